//! RetrievalVerifier: fetch by root, recompute, compare.
//!
//! Bytes whose recomputed root differs from the requested one are never
//! returned. A node that served corrupt bytes is not asked again for that
//! root; the verifier moves on to the next node that may hold it.
//!
//! Every entry point takes a `CancellationToken`. Cancelling it abandons
//! outstanding node requests and yields `TransferError::Cancelled`.

use bytes::Bytes;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tessera_chunks::{compute_root, RootId};
use tessera_core::{NodeDescriptor, RetryPolicy, TransferError, TransferResult};
use tessera_storage::{NodeSelector, StorageTransport, TransportError};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub struct RetrievalVerifier {
    selector: Arc<dyn NodeSelector>,
    transport: Arc<dyn StorageTransport>,
    retry: RetryPolicy,
    prefetch: usize,
}

impl RetrievalVerifier {
    pub fn new(selector: Arc<dyn NodeSelector>, transport: Arc<dyn StorageTransport>) -> Self {
        Self {
            selector,
            transport,
            retry: RetryPolicy::default(),
            prefetch: 2,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Fragments fetched ahead of the one being written
    pub fn with_prefetch(mut self, fragments: usize) -> Self {
        self.prefetch = fragments.max(1);
        self
    }

    /// Fetch one fragment and return it only if it hashes to `root`.
    pub async fn retrieve(
        &self,
        root: &RootId,
        cancel: &CancellationToken,
    ) -> TransferResult<Bytes> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(TransferError::Cancelled { index: None }),
            verified = self.retrieve_verified(root) => verified,
        }
    }

    async fn retrieve_verified(&self, root: &RootId) -> TransferResult<Bytes> {
        let nodes = self
            .selector
            .locate(root)
            .await
            .map_err(|e| TransferError::TransportFailure {
                index: None,
                root: Some(root.to_string()),
                attempts: 1,
                message: format!("locating root: {e}"),
            })?;

        let mut corrupt: Option<RootId> = None;
        let mut network: Option<(u32, TransportError)> = None;

        for node in &nodes {
            match self.fetch(node, root).await {
                Ok(Some(data)) => {
                    let actual = compute_root(&data);
                    if actual == *root {
                        debug!(
                            root = %root.short(),
                            node = %node.url,
                            bytes = data.len(),
                            "fragment verified"
                        );
                        return Ok(data);
                    }
                    warn!(
                        node = %node.url,
                        expected = %root,
                        actual = %actual,
                        "node served bytes that do not match the root"
                    );
                    corrupt = Some(actual);
                }
                Ok(None) => debug!(root = %root.short(), node = %node.url, "root not on node"),
                Err((attempts, e)) => {
                    warn!(root = %root.short(), node = %node.url, attempts, "fetch failed: {e}");
                    let total = network.as_ref().map_or(0, |(n, _)| *n) + attempts;
                    network = Some((total, e));
                }
            }
        }

        if let Some(actual) = corrupt {
            return Err(TransferError::IntegrityMismatch {
                index: None,
                expected: root.to_string(),
                actual: actual.to_string(),
            });
        }
        if let Some((attempts, e)) = network {
            return Err(TransferError::TransportFailure {
                index: None,
                root: Some(root.to_string()),
                attempts,
                message: e.to_string(),
            });
        }
        Err(TransferError::NotFound {
            index: None,
            root: root.to_string(),
        })
    }

    /// Fetch and verify every root, concatenated in the given order.
    pub async fn retrieve_all(
        &self,
        roots: &[RootId],
        cancel: &CancellationToken,
    ) -> TransferResult<Bytes> {
        let mut out = Vec::new();
        self.retrieve_into(roots, &mut out, cancel).await?;
        Ok(Bytes::from(out))
    }

    /// Stream verified fragments into `sink` in order. Returns bytes written.
    ///
    /// Up to `prefetch` fragments are fetched concurrently; writes stay
    /// sequential. Errors carry the position of the failing root.
    pub async fn retrieve_into<W>(
        &self,
        roots: &[RootId],
        sink: &mut W,
        cancel: &CancellationToken,
    ) -> TransferResult<u64>
    where
        W: AsyncWrite + Unpin,
    {
        let mut fetched = stream::iter(roots.iter().enumerate())
            .map(|(index, root)| async move {
                self.retrieve(root, cancel)
                    .await
                    .map_err(|e| e.at_fragment(index as u64))
            })
            .buffered(self.prefetch);

        let mut written = 0u64;
        while let Some(data) = fetched.next().await {
            let data = data?;
            sink.write_all(&data).await?;
            written += data.len() as u64;
        }
        sink.flush().await?;

        info!(fragments = roots.len(), bytes = written, "retrieval verified");
        Ok(written)
    }

    async fn fetch(
        &self,
        node: &NodeDescriptor,
        root: &RootId,
    ) -> Result<Option<Bytes>, (u32, TransportError)> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let err = match tokio::time::timeout(
                self.retry.request_timeout,
                self.transport.fetch(node, root),
            )
            .await
            {
                Ok(Ok(found)) => return Ok(found),
                Ok(Err(e)) => e,
                Err(_) => TransportError::Timeout {
                    node: node.url.clone(),
                    elapsed: self.retry.request_timeout,
                },
            };
            if !err.is_transient() || attempt >= self.retry.max_attempts {
                return Err((attempt, err));
            }
            tokio::time::sleep(self.retry.delay_for(attempt - 1)).await;
        }
    }
}
