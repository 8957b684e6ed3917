pub mod config;
pub mod error;
pub mod types;

pub use error::{FailureKind, TransferError, TransferResult};
pub use types::{
    FinalityRequirement, NodeDescriptor, ReplicationPolicy, RetryPolicy, SelectionMode,
    ShardConfig, TrustFilter, TrustTier,
};
