use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Trust classification of a storage node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TrustTier {
    /// Explicitly configured by the operator
    Trusted,
    /// Opportunistically discovered through the indexer
    Discovered,
}

/// Which trust tiers an upload may use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TrustFilter {
    TrustedOnly,
    AllowDiscovered,
}

impl TrustFilter {
    pub fn admits(self, tier: TrustTier) -> bool {
        match self {
            TrustFilter::TrustedOnly => tier == TrustTier::Trusted,
            TrustFilter::AllowDiscovered => true,
        }
    }
}

/// Node ranking strategy requested from the selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SelectionMode {
    MinLatency,
    RoundRobin,
}

/// When a replica write counts as acknowledged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FinalityRequirement {
    /// The node accepted the commit
    Submitted,
    /// The network confirmed the write as durable
    Confirmed,
}

/// Which slice of the segment space a node stores
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ShardConfig {
    pub num_shards: u32,
    pub shard_id: u32,
}

impl ShardConfig {
    /// A node holding every segment
    pub const FULL: ShardConfig = ShardConfig {
        num_shards: 1,
        shard_id: 0,
    };

    /// Shard counts must be a non-zero power of two and the id in range.
    pub fn is_valid(&self) -> bool {
        self.num_shards.is_power_of_two() && self.shard_id < self.num_shards
    }

    /// Fraction of the segment space owned, as a denominator (1 = everything)
    pub fn ownership_denominator(&self) -> u32 {
        self.num_shards
    }
}

impl Default for ShardConfig {
    fn default() -> Self {
        Self::FULL
    }
}

/// A storage endpoint as reported by the node selector. Read-only snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeDescriptor {
    pub url: String,
    pub shard_config: ShardConfig,
    /// Observed round-trip latency
    pub latency: Duration,
    pub trust_tier: TrustTier,
}

impl NodeDescriptor {
    pub fn trusted(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            shard_config: ShardConfig::FULL,
            latency: Duration::ZERO,
            trust_tier: TrustTier::Trusted,
        }
    }

    pub fn discovered(url: impl Into<String>) -> Self {
        Self {
            trust_tier: TrustTier::Discovered,
            ..Self::trusted(url)
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_shards(mut self, num_shards: u32, shard_id: u32) -> Self {
        self.shard_config = ShardConfig {
            num_shards,
            shard_id,
        };
        self
    }
}

/// Replication and finality contract for one fragment upload.
///
/// No `Default`: the replica count is always supplied by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicationPolicy {
    /// Minimum number of distinct nodes that must hold a committed copy
    pub replicas: u32,
    pub finality: FinalityRequirement,
    pub selection: SelectionMode,
    pub trust: TrustFilter,
    /// Upper bound on waiting for network confirmation, per replica
    pub finality_timeout: Duration,
    pub finality_poll_interval: Duration,
}

impl ReplicationPolicy {
    pub fn new(replicas: u32) -> Self {
        Self {
            replicas,
            finality: FinalityRequirement::Confirmed,
            selection: SelectionMode::MinLatency,
            trust: TrustFilter::TrustedOnly,
            finality_timeout: Duration::from_secs(300),
            finality_poll_interval: Duration::from_millis(500),
        }
    }

    pub fn with_finality(mut self, finality: FinalityRequirement) -> Self {
        self.finality = finality;
        self
    }

    pub fn with_selection(mut self, selection: SelectionMode) -> Self {
        self.selection = selection;
        self
    }

    pub fn with_trust(mut self, trust: TrustFilter) -> Self {
        self.trust = trust;
        self
    }

    pub fn with_finality_timeout(mut self, timeout: Duration, poll: Duration) -> Self {
        self.finality_timeout = timeout;
        self.finality_poll_interval = poll;
        self
    }

    pub fn validate(&self) -> crate::TransferResult<()> {
        if self.replicas == 0 {
            return Err(crate::TransferError::Configuration(
                "replication count must be at least 1".into(),
            ));
        }
        if self.finality == FinalityRequirement::Confirmed
            && self.finality_poll_interval.is_zero()
        {
            return Err(crate::TransferError::Configuration(
                "finality poll interval must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

/// Bounded retry budget for a single node request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per request, including the first
    pub max_attempts: u32,
    /// Base delay between attempts; doubled after each failure
    pub backoff: Duration,
    /// Transport-level timeout for one request
    pub request_timeout: Duration,
}

impl RetryPolicy {
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.backoff.saturating_mul(1u32 << attempt.min(6))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_millis(250),
            request_timeout: Duration::from_secs(30),
        }
    }
}
