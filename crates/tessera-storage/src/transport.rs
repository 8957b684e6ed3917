//! The storage-network transport interface.
//!
//! The core is agnostic to the wire format. A fragment reaches a node as a
//! series of upload tasks, the node is then asked to commit them as one
//! object, and the commit may later be confirmed as final by the network.
//! Tasks and their commit share an `UploadId`, so two uploads of the same
//! root never see each other's staged tasks.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use tessera_chunks::RootId;
use tessera_core::NodeDescriptor;
use uuid::Uuid;

use crate::error::TransportError;

/// Identity of one attempt to place a fragment on one node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UploadId(Uuid);

impl UploadId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for UploadId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for UploadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

/// A bounded slice of one fragment, sent to a node in a single request
#[derive(Debug, Clone)]
pub struct UploadTask {
    pub upload: UploadId,
    /// Position of this task within the fragment
    pub index: u32,
    /// Byte offset within the fragment
    pub offset: u64,
    pub data: Bytes,
}

/// Opaque transaction reference returned by a node on commit
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommitHandle(String);

impl CommitHandle {
    pub fn new(handle: impl Into<String>) -> Self {
        Self(handle.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CommitHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What a node reports after assembling and storing a fragment
#[derive(Debug, Clone)]
pub struct CommitReceipt {
    pub handle: CommitHandle,
    pub node_url: String,
    /// Root as computed by the node from the bytes it stored
    pub root: RootId,
    pub length: u64,
}

/// Finality status of a commit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    Pending,
    Confirmed,
}

#[async_trait]
pub trait StorageTransport: Send + Sync {
    /// Store one upload task of the fragment addressed by `root`.
    async fn put_task(
        &self,
        node: &NodeDescriptor,
        root: &RootId,
        task: &UploadTask,
    ) -> Result<(), TransportError>;

    /// Assemble the `task_count` tasks stored under `upload` (`length` bytes
    /// in total) into the fragment object.
    async fn commit(
        &self,
        node: &NodeDescriptor,
        root: &RootId,
        upload: UploadId,
        task_count: u32,
        length: u64,
    ) -> Result<CommitReceipt, TransportError>;

    /// Ask whether a commit has reached network finality.
    async fn confirm(
        &self,
        node: &NodeDescriptor,
        receipt: &CommitReceipt,
    ) -> Result<Confirmation, TransportError>;

    /// Fetch the bytes stored for `root`. `Ok(None)` when the node does not
    /// have it.
    async fn fetch(
        &self,
        node: &NodeDescriptor,
        root: &RootId,
    ) -> Result<Option<Bytes>, TransportError>;
}
