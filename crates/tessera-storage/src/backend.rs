//! StorageTransport over OpenDAL: one operator per storage node.
//!
//! Layout on each node:
//!   {prefix}/staging/{root}/{upload}/{task:08}   upload tasks awaiting commit
//!   {prefix}/fragments/{root}                    committed fragment bytes
//!
//! Commit reads the staged tasks back in order, recomputes the root from the
//! assembled bytes and stores the fragment under that computed root. Confirm
//! treats a fragment object of the committed length as final.

use async_trait::async_trait;
use bytes::Bytes;
use opendal::{ErrorKind, Operator};
use std::collections::HashMap;
use tessera_chunks::{compute_root, RootId};
use tessera_core::NodeDescriptor;
use tracing::{debug, warn};

use crate::error::TransportError;
use crate::transport::{
    CommitHandle, CommitReceipt, Confirmation, StorageTransport, UploadId, UploadTask,
};

#[derive(Debug, Clone)]
pub struct OpendalTransport {
    nodes: HashMap<String, Operator>,
    prefix: String,
}

impl OpendalTransport {
    pub fn new(prefix: &str) -> Self {
        Self {
            nodes: HashMap::new(),
            prefix: prefix.trim_end_matches('/').to_string(),
        }
    }

    /// Route requests for `url` to `op`.
    pub fn with_node(mut self, url: impl Into<String>, op: Operator) -> Self {
        self.insert(url, op);
        self
    }

    pub fn insert(&mut self, url: impl Into<String>, op: Operator) {
        self.nodes.insert(url.into(), op);
    }

    pub fn operator(&self, node: &NodeDescriptor) -> Result<&Operator, TransportError> {
        self.nodes
            .get(&node.url)
            .ok_or_else(|| TransportError::UnknownNode(node.url.clone()))
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn fragment_key(&self, root: &RootId) -> String {
        format!("{}/fragments/{}", self.prefix, root.to_hex())
    }

    fn task_key(&self, root: &RootId, upload: UploadId, index: u32) -> String {
        format!("{}/staging/{}/{upload}/{index:08}", self.prefix, root.to_hex())
    }
}

#[async_trait]
impl StorageTransport for OpendalTransport {
    async fn put_task(
        &self,
        node: &NodeDescriptor,
        root: &RootId,
        task: &UploadTask,
    ) -> Result<(), TransportError> {
        let op = self.operator(node)?;
        let key = self.task_key(root, task.upload, task.index);
        op.write(&key, task.data.clone())
            .await
            .map_err(|e| TransportError::storage(&node.url, e))?;
        debug!(node = %node.url, key = %key, bytes = task.data.len(), "staged upload task");
        Ok(())
    }

    async fn commit(
        &self,
        node: &NodeDescriptor,
        root: &RootId,
        upload: UploadId,
        task_count: u32,
        length: u64,
    ) -> Result<CommitReceipt, TransportError> {
        let op = self.operator(node)?;

        let mut assembled = Vec::with_capacity(length as usize);
        for index in 0..task_count {
            let key = self.task_key(root, upload, index);
            let part = op.read(&key).await.map_err(|e| {
                if e.kind() == ErrorKind::NotFound {
                    TransportError::Rejected {
                        node: node.url.clone(),
                        message: format!("upload task {index} missing at commit"),
                    }
                } else {
                    TransportError::storage(&node.url, e)
                }
            })?;
            assembled.extend_from_slice(&part.to_bytes());
        }

        if assembled.len() as u64 != length {
            return Err(TransportError::Rejected {
                node: node.url.clone(),
                message: format!(
                    "assembled {} bytes, commit declared {length}",
                    assembled.len()
                ),
            });
        }

        let stored_root = compute_root(&assembled);
        let key = self.fragment_key(&stored_root);
        op.write(&key, assembled)
            .await
            .map_err(|e| TransportError::storage(&node.url, e))?;

        for index in 0..task_count {
            if let Err(e) = op.delete(&self.task_key(root, upload, index)).await {
                warn!(node = %node.url, index, "failed to clear staged task: {e}");
            }
        }

        Ok(CommitReceipt {
            handle: CommitHandle::new(format!("{}#{}", node.url, key)),
            node_url: node.url.clone(),
            root: stored_root,
            length,
        })
    }

    async fn confirm(
        &self,
        node: &NodeDescriptor,
        receipt: &CommitReceipt,
    ) -> Result<Confirmation, TransportError> {
        let op = self.operator(node)?;
        match op.stat(&self.fragment_key(&receipt.root)).await {
            Ok(meta) if meta.content_length() == receipt.length => Ok(Confirmation::Confirmed),
            Ok(_) => Ok(Confirmation::Pending),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Confirmation::Pending),
            Err(e) => Err(TransportError::storage(&node.url, e)),
        }
    }

    async fn fetch(
        &self,
        node: &NodeDescriptor,
        root: &RootId,
    ) -> Result<Option<Bytes>, TransportError> {
        let op = self.operator(node)?;
        match op.read(&self.fragment_key(root)).await {
            Ok(buf) => Ok(Some(buf.to_bytes())),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(TransportError::storage(&node.url, e)),
        }
    }
}
