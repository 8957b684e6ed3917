//! FragmentUploader: one fragment onto `replicas` distinct storage nodes.
//!
//! Per node the fragment is sent as a series of upload tasks (at most
//! `max_in_flight` in flight), then committed. The node reports the root it
//! computed from what it stored; that must equal the locally computed root.
//! With `Confirmed` finality each commit is then polled until the network
//! confirms it or the finality timeout elapses.
//!
//! Replica slots are filled concurrently. A slot whose node fails (network
//! error or a mismatching root) moves to the next alternate from the
//! selector's result set. A replica only counts after a full commit.

use bytes::Bytes;
use futures::stream::{self, StreamExt, TryStreamExt};
use std::collections::{HashSet, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tessera_chunks::{Fragment, RootId};
use tessera_core::{
    FinalityRequirement, NodeDescriptor, ReplicationPolicy, RetryPolicy, TransferError,
    TransferResult,
};
use tessera_storage::{
    CommitHandle, CommitReceipt, Confirmation, NodeSelector, StorageTransport, TransportError,
    UploadId, UploadTask,
};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// What a successful fragment upload produced
#[derive(Debug, Clone)]
pub struct UploadReceipt {
    /// Handle of the first replica's commit
    pub commit_handle: CommitHandle,
    pub root: RootId,
    pub replicas: u32,
    /// Acknowledging node URLs, in slot order
    pub nodes: Vec<String>,
}

/// Why one node could not take its replica
#[derive(Debug)]
enum NodeFailure {
    Transport {
        attempts: u32,
        source: TransportError,
    },
    Mismatch {
        actual: RootId,
    },
    Finality {
        waited: Duration,
    },
    Cancelled,
}

struct Acked {
    node: String,
    handle: CommitHandle,
}

/// Everything a replica slot needs, shared by all slots of one fragment
struct SlotContext<'a> {
    fragment: &'a Fragment,
    root: &'a RootId,
    policy: &'a ReplicationPolicy,
    alternates: &'a Mutex<VecDeque<NodeDescriptor>>,
    cancel: &'a CancellationToken,
}

pub struct FragmentUploader {
    selector: Arc<dyn NodeSelector>,
    transport: Arc<dyn StorageTransport>,
    retry: RetryPolicy,
    task_size: usize,
    max_in_flight: usize,
}

impl FragmentUploader {
    pub fn new(selector: Arc<dyn NodeSelector>, transport: Arc<dyn StorageTransport>) -> Self {
        Self {
            selector,
            transport,
            retry: RetryPolicy::default(),
            task_size: 4 * 1024 * 1024,
            max_in_flight: 8,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_task_size(mut self, bytes: usize) -> Self {
        self.task_size = bytes.max(1);
        self
    }

    pub fn with_max_in_flight(mut self, tasks: usize) -> Self {
        self.max_in_flight = tasks.max(1);
        self
    }

    /// Upload `fragment`, whose root the caller has already computed, and
    /// return once `policy.replicas` distinct nodes hold an acknowledged copy.
    pub async fn upload(
        &self,
        fragment: &Fragment,
        root: &RootId,
        policy: &ReplicationPolicy,
        cancel: &CancellationToken,
    ) -> TransferResult<UploadReceipt> {
        let index = fragment.index;
        if fragment.is_empty() {
            return Err(TransferError::Configuration(format!(
                "fragment {index} is empty"
            )));
        }
        policy.validate()?;
        if cancel.is_cancelled() {
            return Err(TransferError::Cancelled { index: Some(index) });
        }

        let selected = self
            .selector
            .select_nodes(policy.replicas, policy.trust, policy.selection)
            .await
            .map_err(|e| TransferError::TransportFailure {
                index: Some(index),
                root: Some(root.to_string()),
                attempts: 1,
                message: format!("node selection: {e}"),
            })?;

        let mut seen = HashSet::new();
        let candidates: Vec<NodeDescriptor> = selected
            .candidates(policy.trust)
            .into_iter()
            .filter(|n| n.shard_config.is_valid() && seen.insert(n.url.clone()))
            .collect();
        let replicas = policy.replicas as usize;
        if candidates.len() < replicas {
            return Err(TransferError::SelectionExhausted {
                index: Some(index),
                reason: format!(
                    "{} eligible node(s) ({} trusted, {} discovered, {:?}) for {} replica(s)",
                    candidates.len(),
                    selected.trusted.len(),
                    selected.discovered.len(),
                    policy.trust,
                    replicas
                ),
            });
        }

        let mut candidates = candidates.into_iter();
        let primaries: Vec<NodeDescriptor> = candidates.by_ref().take(replicas).collect();
        let alternates = Mutex::new(candidates.collect::<VecDeque<_>>());
        debug!(
            index,
            root = %root.short(),
            tasks = fragment.len().div_ceil(self.task_size),
            replicas,
            alternates = alternates.lock().map(|a| a.len()).unwrap_or(0),
            "uploading fragment"
        );

        let ctx = SlotContext {
            fragment,
            root,
            policy,
            alternates: &alternates,
            cancel,
        };
        let acked = futures::future::try_join_all(
            primaries
                .into_iter()
                .enumerate()
                .map(|(slot, node)| self.fill_slot(slot, node, &ctx)),
        )
        .await?;

        let nodes: Vec<String> = acked.iter().map(|a| a.node.clone()).collect();
        let commit_handle = acked
            .into_iter()
            .next()
            .map(|a| a.handle)
            .ok_or_else(|| TransferError::Configuration("no replica slots".into()))?;

        info!(
            index,
            root = %root,
            replicas = nodes.len(),
            finality = ?policy.finality,
            "fragment committed"
        );
        Ok(UploadReceipt {
            commit_handle,
            root: *root,
            replicas: nodes.len() as u32,
            nodes,
        })
    }

    /// Keep trying nodes for one replica slot until one acknowledges or the
    /// alternates run out.
    async fn fill_slot(
        &self,
        slot: usize,
        first: NodeDescriptor,
        ctx: &SlotContext<'_>,
    ) -> TransferResult<Acked> {
        let index = ctx.fragment.index;
        let mut node = first;
        let mut attempts = 0u32;
        let mut mismatch: Option<RootId> = None;
        let mut last_transport: Option<TransportError> = None;

        loop {
            match self.replicate(&node, ctx).await {
                Ok(handle) => {
                    return Ok(Acked {
                        node: node.url,
                        handle,
                    })
                }
                Err(NodeFailure::Cancelled) => {
                    return Err(TransferError::Cancelled { index: Some(index) })
                }
                Err(NodeFailure::Finality { waited }) => {
                    warn!(index, slot, node = %node.url, "finality not reached");
                    return Err(TransferError::FinalityTimeout {
                        index: Some(index),
                        root: ctx.root.to_string(),
                        waited,
                    });
                }
                Err(NodeFailure::Mismatch { actual }) => {
                    warn!(
                        index,
                        slot,
                        node = %node.url,
                        expected = %ctx.root,
                        actual = %actual,
                        "node committed a different root"
                    );
                    attempts += 1;
                    mismatch = Some(actual);
                }
                Err(NodeFailure::Transport {
                    attempts: n,
                    source,
                }) => {
                    warn!(index, slot, node = %node.url, attempts = n, "node failed: {source}");
                    attempts += n;
                    last_transport = Some(source);
                }
            }

            let next = ctx
                .alternates
                .lock()
                .map_err(|_| TransferError::Configuration("alternate pool poisoned".into()))?
                .pop_front();
            match next {
                Some(alternate) => {
                    info!(
                        index,
                        slot,
                        from = %node.url,
                        to = %alternate.url,
                        "moving replica to alternate node"
                    );
                    node = alternate;
                }
                None if mismatch.is_some() => {
                    return Err(TransferError::IntegrityMismatch {
                        index: Some(index),
                        expected: ctx.root.to_string(),
                        actual: mismatch.map(|r| r.to_string()).unwrap_or_default(),
                    })
                }
                None => {
                    return Err(TransferError::TransportFailure {
                        index: Some(index),
                        root: Some(ctx.root.to_string()),
                        attempts,
                        message: last_transport
                            .map(|e| e.to_string())
                            .unwrap_or_else(|| "no alternate nodes left".into()),
                    })
                }
            }
        }
    }

    /// Push every task to `node`, commit, check the reported root and wait
    /// for finality if the policy asks for it.
    async fn replicate(
        &self,
        node: &NodeDescriptor,
        ctx: &SlotContext<'_>,
    ) -> Result<CommitHandle, NodeFailure> {
        let transport = &self.transport;
        let upload = UploadId::new();
        let tasks = split_tasks(&ctx.fragment.payload, self.task_size, upload);
        let puts: Vec<_> = tasks
            .iter()
            .map(|task| {
                self.request(node, ctx.cancel, move || {
                    transport.put_task(node, ctx.root, task)
                })
            })
            .collect();
        stream::iter(puts)
            .buffer_unordered(self.max_in_flight)
            .try_collect::<Vec<()>>()
            .await?;

        let task_count = tasks.len() as u32;
        let length = ctx.fragment.len() as u64;
        let receipt = self
            .request(node, ctx.cancel, move || {
                transport.commit(node, ctx.root, upload, task_count, length)
            })
            .await?;
        if receipt.root != *ctx.root {
            return Err(NodeFailure::Mismatch {
                actual: receipt.root,
            });
        }
        debug!(node = %node.url, handle = %receipt.handle, "commit accepted");

        if ctx.policy.finality == FinalityRequirement::Confirmed {
            self.await_finality(node, &receipt, ctx).await?;
        }
        Ok(receipt.handle)
    }

    async fn await_finality(
        &self,
        node: &NodeDescriptor,
        receipt: &CommitReceipt,
        ctx: &SlotContext<'_>,
    ) -> Result<(), NodeFailure> {
        let transport = &self.transport;
        let started = Instant::now();
        let deadline = started + ctx.policy.finality_timeout;
        loop {
            let status = self
                .request(node, ctx.cancel, move || transport.confirm(node, receipt))
                .await?;
            if status == Confirmation::Confirmed {
                debug!(
                    node = %node.url,
                    waited_ms = started.elapsed().as_millis() as u64,
                    "commit confirmed"
                );
                return Ok(());
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(NodeFailure::Finality {
                    waited: now - started,
                });
            }
            let pause = ctx.policy.finality_poll_interval.min(deadline - now);
            tokio::select! {
                _ = ctx.cancel.cancelled() => return Err(NodeFailure::Cancelled),
                _ = tokio::time::sleep(pause) => {}
            }
        }
    }

    /// Run one node request under the retry budget. Each attempt is bounded
    /// by the request timeout; only transient errors are retried.
    async fn request<T, F, Fut>(
        &self,
        node: &NodeDescriptor,
        cancel: &CancellationToken,
        mut call: F,
    ) -> Result<T, NodeFailure>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, TransportError>>,
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(NodeFailure::Cancelled),
                r = tokio::time::timeout(self.retry.request_timeout, call()) => r,
            };
            let err = match outcome {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) => e,
                Err(_) => TransportError::Timeout {
                    node: node.url.clone(),
                    elapsed: self.retry.request_timeout,
                },
            };

            if !err.is_transient() || attempt >= self.retry.max_attempts {
                return Err(NodeFailure::Transport {
                    attempts: attempt,
                    source: err,
                });
            }
            let delay = self.retry.delay_for(attempt - 1);
            debug!(
                node = %node.url,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "retrying: {err}"
            );
            tokio::select! {
                _ = cancel.cancelled() => return Err(NodeFailure::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

/// Cut a fragment payload into upload tasks of at most `task_size` bytes.
fn split_tasks(payload: &Bytes, task_size: usize, upload: UploadId) -> Vec<UploadTask> {
    (0..payload.len())
        .step_by(task_size)
        .enumerate()
        .map(|(i, start)| {
            let end = (start + task_size).min(payload.len());
            UploadTask {
                upload,
                index: i as u32,
                offset: start as u64,
                data: payload.slice(start..end),
            }
        })
        .collect()
}
