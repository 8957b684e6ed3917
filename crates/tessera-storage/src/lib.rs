//! tessera-storage: how the transfer core reaches the storage network
//!
//! - `selector`: the NodeSelector interface and a config-backed implementation
//! - `transport`: the StorageTransport interface (store tasks, commit, confirm, fetch)
//! - `backend`: StorageTransport over one OpenDAL operator per node
//! - `operator`: S3 operator factory for node endpoints

pub mod backend;
pub mod error;
pub mod health;
pub mod operator;
pub mod selector;
pub mod transport;

pub use backend::OpendalTransport;
pub use error::TransportError;
pub use health::{check_health, is_healthy};
pub use operator::{build_operator, transport_from_config, NodeCredentials};
pub use selector::{NodeSelector, SelectedNodes, StaticNodeSelector};
pub use transport::{
    CommitHandle, CommitReceipt, Confirmation, StorageTransport, UploadId, UploadTask,
};
