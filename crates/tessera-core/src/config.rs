use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{TransferError, TransferResult};
use crate::types::{
    FinalityRequirement, NodeDescriptor, ReplicationPolicy, RetryPolicy, SelectionMode,
    ShardConfig, TrustFilter, TrustTier,
};

/// Top-level client configuration (loaded from tessera.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TesseraConfig {
    pub transfer: TransferConfig,
    pub replication: ReplicationConfig,
    pub network: NetworkConfig,
    pub log: LogConfig,
}

/// Fragmenting and concurrency knobs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Bytes per fragment (the unit of independent upload and retrieval)
    pub fragment_size: u64,
    /// Bytes per upload task within a fragment
    pub upload_task_size: u64,
    /// Maximum upload tasks in flight per node
    pub max_in_flight_tasks: usize,
    /// Fragments uploaded concurrently within one session
    pub fragment_workers: usize,
}

/// Replication contract. `replicas` has no default and must be set.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicationConfig {
    pub replicas: Option<u32>,
    pub finality: FinalityRequirement,
    pub finality_timeout_secs: u64,
    pub finality_poll_ms: u64,
    pub selection: SelectionMode,
    pub trust: TrustFilter,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Object key prefix under which fragments are stored on each node
    pub prefix: String,
    /// Bucket name on S3-compatible nodes
    pub bucket: String,
    pub region: String,
    /// Refuse plaintext HTTP node endpoints
    pub enforce_tls: bool,
    /// Per-request transport timeout
    pub request_timeout_secs: u64,
    /// Attempts per node request, including the first
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    /// Statically configured storage nodes
    pub nodes: Vec<NodeEntry>,
}

/// One `[[network.nodes]]` entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeEntry {
    pub url: String,
    #[serde(default = "default_trust")]
    pub trust: TrustTier,
    #[serde(default = "default_one")]
    pub num_shards: u32,
    #[serde(default)]
    pub shard_id: u32,
    #[serde(default)]
    pub latency_ms: u64,
}

fn default_trust() -> TrustTier {
    TrustTier::Trusted
}

fn default_one() -> u32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            fragment_size: 400 * 1024 * 1024, // 400MB
            upload_task_size: 4 * 1024 * 1024, // 4MB
            max_in_flight_tasks: 8,
            fragment_workers: 2,
        }
    }
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            replicas: None,
            finality: FinalityRequirement::Confirmed,
            finality_timeout_secs: 300,
            finality_poll_ms: 500,
            selection: SelectionMode::MinLatency,
            trust: TrustFilter::TrustedOnly,
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            prefix: "tessera".into(),
            bucket: "tessera".into(),
            region: "us-east-1".into(),
            enforce_tls: false,
            request_timeout_secs: 30,
            max_retries: 3,
            retry_backoff_ms: 250,
            nodes: Vec::new(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

impl TransferConfig {
    /// Reject values that would make fragmenting or fan-out meaningless.
    pub fn validate(&self) -> TransferResult<()> {
        if self.fragment_size == 0 {
            return Err(TransferError::Configuration(
                "fragment_size must be greater than 0".into(),
            ));
        }
        if usize::try_from(self.fragment_size).is_err() {
            return Err(TransferError::Configuration(format!(
                "fragment_size {} does not fit in memory on this platform",
                self.fragment_size
            )));
        }
        if self.upload_task_size == 0 {
            return Err(TransferError::Configuration(
                "upload_task_size must be greater than 0".into(),
            ));
        }
        if self.max_in_flight_tasks == 0 {
            return Err(TransferError::Configuration(
                "max_in_flight_tasks must be at least 1".into(),
            ));
        }
        if self.fragment_workers == 0 {
            return Err(TransferError::Configuration(
                "fragment_workers must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Upload task size clamped to the fragment size
    pub fn effective_task_size(&self) -> usize {
        self.upload_task_size.min(self.fragment_size) as usize
    }
}

impl ReplicationConfig {
    pub fn to_policy(&self) -> TransferResult<ReplicationPolicy> {
        let replicas = self.replicas.ok_or_else(|| {
            TransferError::Configuration(
                "replication.replicas is not set (no default is assumed)".into(),
            )
        })?;
        let policy = ReplicationPolicy::new(replicas)
            .with_finality(self.finality)
            .with_selection(self.selection)
            .with_trust(self.trust)
            .with_finality_timeout(
                Duration::from_secs(self.finality_timeout_secs),
                Duration::from_millis(self.finality_poll_ms),
            );
        policy.validate()?;
        Ok(policy)
    }
}

impl NetworkConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_retries.max(1),
            backoff: Duration::from_millis(self.retry_backoff_ms),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
        }
    }

    pub fn node_descriptors(&self) -> Vec<NodeDescriptor> {
        self.nodes
            .iter()
            .map(|n| NodeDescriptor {
                url: n.url.clone(),
                shard_config: ShardConfig {
                    num_shards: n.num_shards,
                    shard_id: n.shard_id,
                },
                latency: Duration::from_millis(n.latency_ms),
                trust_tier: n.trust,
            })
            .collect()
    }
}

impl TesseraConfig {
    pub fn validate(&self) -> TransferResult<()> {
        self.transfer.validate()?;
        self.replication.to_policy()?;
        Ok(())
    }
}
