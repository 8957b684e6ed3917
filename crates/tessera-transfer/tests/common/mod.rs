//! Shared harness: an in-memory storage cluster with injectable faults.
//!
//! Every node is an OpenDAL Memory operator behind one OpendalTransport.
//! `FaultyTransport` wraps it and misbehaves per node URL on request.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use opendal::Operator;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tessera_chunks::{compute_root, RootId};
use tessera_core::{NodeDescriptor, ReplicationPolicy, RetryPolicy, TransferResult};
use tessera_storage::{
    CommitReceipt, Confirmation, OpendalTransport, StaticNodeSelector, StorageTransport,
    TransportError, UploadId, UploadTask,
};
use tessera_transfer::{RetrievalVerifier, TransferOrchestrator, TransferSettings};
use tokio_util::sync::CancellationToken;

pub fn memory_operator() -> Operator {
    Operator::new(opendal::services::Memory::default())
        .expect("memory operator")
        .finish()
}

/// Deterministic, non-repeating-looking test payload
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len as u64)
        .map(|i| (i.wrapping_mul(31) ^ (i >> 5)) as u8)
        .collect()
}

pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        backoff: Duration::from_millis(1),
        request_timeout: Duration::from_secs(2),
    }
}

/// Small tasks, quick finality polling, fast retries
pub fn settings(fragment_size: usize, replicas: u32) -> TransferSettings {
    let policy = ReplicationPolicy::new(replicas)
        .with_finality_timeout(Duration::from_secs(2), Duration::from_millis(5));
    TransferSettings::new(fragment_size, policy)
        .with_task_size(64)
        .with_retry(fast_retry())
}

#[derive(Debug, Default)]
pub struct Faults {
    /// Every request to these nodes fails as unavailable
    pub down: HashSet<String>,
    /// Commits on these nodes never reach finality
    pub never_confirm: HashSet<String>,
    /// These nodes report a root other than the one they stored
    pub misreport_root: HashSet<String>,
    /// Fetches from these nodes return flipped bytes
    pub corrupt_reads: HashSet<String>,
    /// Every node rejects upload tasks for these roots
    pub reject_roots: HashSet<RootId>,
    /// The next N put_task calls fail transiently
    pub flaky_puts: u32,
    /// Delay applied to every put_task
    pub slow_puts: Option<Duration>,
    /// Delay applied to every fetch
    pub slow_fetches: Option<Duration>,
}

pub struct FaultyTransport {
    inner: OpendalTransport,
    faults: Mutex<Faults>,
    fetches: Mutex<HashMap<String, u32>>,
    puts: AtomicU32,
}

impl FaultyTransport {
    pub fn new(inner: OpendalTransport) -> Self {
        Self {
            inner,
            faults: Mutex::new(Faults::default()),
            fetches: Mutex::new(HashMap::new()),
            puts: AtomicU32::new(0),
        }
    }

    pub fn inject(&self, f: impl FnOnce(&mut Faults)) {
        f(&mut self.faults.lock().unwrap());
    }

    pub fn fetches_from(&self, url: &str) -> u32 {
        self.fetches.lock().unwrap().get(url).copied().unwrap_or(0)
    }

    pub fn put_calls(&self) -> u32 {
        self.puts.load(Ordering::SeqCst)
    }

    fn check_down(&self, node: &NodeDescriptor) -> Result<(), TransportError> {
        if self.faults.lock().unwrap().down.contains(&node.url) {
            return Err(TransportError::Unavailable {
                node: node.url.clone(),
                message: "connection refused".into(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl StorageTransport for FaultyTransport {
    async fn put_task(
        &self,
        node: &NodeDescriptor,
        root: &RootId,
        task: &UploadTask,
    ) -> Result<(), TransportError> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        self.check_down(node)?;
        let delay = {
            let mut faults = self.faults.lock().unwrap();
            if faults.reject_roots.contains(root) {
                return Err(TransportError::Rejected {
                    node: node.url.clone(),
                    message: "root refused".into(),
                });
            }
            if faults.flaky_puts > 0 {
                faults.flaky_puts -= 1;
                return Err(TransportError::Unavailable {
                    node: node.url.clone(),
                    message: "transient hiccup".into(),
                });
            }
            faults.slow_puts
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.inner.put_task(node, root, task).await
    }

    async fn commit(
        &self,
        node: &NodeDescriptor,
        root: &RootId,
        upload: UploadId,
        task_count: u32,
        length: u64,
    ) -> Result<CommitReceipt, TransportError> {
        self.check_down(node)?;
        let mut receipt = self
            .inner
            .commit(node, root, upload, task_count, length)
            .await?;
        if self.faults.lock().unwrap().misreport_root.contains(&node.url) {
            receipt.root = compute_root(b"not what was sent");
        }
        Ok(receipt)
    }

    async fn confirm(
        &self,
        node: &NodeDescriptor,
        receipt: &CommitReceipt,
    ) -> Result<Confirmation, TransportError> {
        self.check_down(node)?;
        if self.faults.lock().unwrap().never_confirm.contains(&node.url) {
            return Ok(Confirmation::Pending);
        }
        self.inner.confirm(node, receipt).await
    }

    async fn fetch(
        &self,
        node: &NodeDescriptor,
        root: &RootId,
    ) -> Result<Option<Bytes>, TransportError> {
        *self
            .fetches
            .lock()
            .unwrap()
            .entry(node.url.clone())
            .or_default() += 1;
        self.check_down(node)?;
        let delay = self.faults.lock().unwrap().slow_fetches;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let found = self.inner.fetch(node, root).await?;
        if self.faults.lock().unwrap().corrupt_reads.contains(&node.url) {
            return Ok(found.map(|data| {
                let mut flipped = data.to_vec();
                if let Some(first) = flipped.first_mut() {
                    *first ^= 0xff;
                } else {
                    flipped.push(0);
                }
                Bytes::from(flipped)
            }));
        }
        Ok(found)
    }
}

pub struct Cluster {
    pub nodes: Vec<NodeDescriptor>,
    pub selector: Arc<StaticNodeSelector>,
    pub transport: Arc<FaultyTransport>,
}

impl Cluster {
    pub fn new(nodes: Vec<NodeDescriptor>) -> Self {
        let mut inner = OpendalTransport::new("test");
        for node in &nodes {
            inner.insert(node.url.clone(), memory_operator());
        }
        Self {
            selector: Arc::new(StaticNodeSelector::new(nodes.clone())),
            transport: Arc::new(FaultyTransport::new(inner)),
            nodes,
        }
    }

    /// `n` trusted nodes, `mem://node-0` being the fastest
    pub fn trusted(n: usize) -> Self {
        Self::new(
            (0..n)
                .map(|i| {
                    NodeDescriptor::trusted(format!("mem://node-{i}"))
                        .with_latency(Duration::from_millis(i as u64 + 1))
                })
                .collect(),
        )
    }

    pub fn url(&self, i: usize) -> String {
        self.nodes[i].url.clone()
    }

    pub fn orchestrator(&self, settings: TransferSettings) -> TransferOrchestrator {
        TransferOrchestrator::new(self.selector.clone(), self.transport.clone(), settings)
    }

    /// Verified download of `roots` with a fresh, never-cancelled token
    pub async fn retrieve_all(&self, roots: &[RootId]) -> TransferResult<Bytes> {
        self.verifier()
            .retrieve_all(roots, &CancellationToken::new())
            .await
    }

    pub fn verifier(&self) -> RetrievalVerifier {
        RetrievalVerifier::new(self.selector.clone(), self.transport.clone())
            .with_retry(fast_retry())
    }
}
