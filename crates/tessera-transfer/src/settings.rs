use tessera_core::config::TesseraConfig;
use tessera_core::{ReplicationPolicy, RetryPolicy, TransferError, TransferResult};

/// Typed, validated knobs for one orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferSettings {
    pub fragment_size: usize,
    /// Clamped to `fragment_size`
    pub upload_task_size: usize,
    pub max_in_flight_tasks: usize,
    pub fragment_workers: usize,
    pub policy: ReplicationPolicy,
    pub retry: RetryPolicy,
}

impl TransferSettings {
    /// Settings with a caller-supplied fragment size and policy, other knobs at
    /// their config defaults.
    pub fn new(fragment_size: usize, policy: ReplicationPolicy) -> Self {
        Self {
            fragment_size,
            upload_task_size: 4 * 1024 * 1024,
            max_in_flight_tasks: 8,
            fragment_workers: 2,
            policy,
            retry: RetryPolicy::default(),
        }
    }

    pub fn from_config(config: &TesseraConfig) -> TransferResult<Self> {
        config.transfer.validate()?;
        let policy = config.replication.to_policy()?;
        Ok(Self {
            fragment_size: config.transfer.fragment_size as usize,
            upload_task_size: config.transfer.effective_task_size(),
            max_in_flight_tasks: config.transfer.max_in_flight_tasks,
            fragment_workers: config.transfer.fragment_workers,
            policy,
            retry: config.network.retry_policy(),
        })
    }

    pub fn with_task_size(mut self, bytes: usize) -> Self {
        self.upload_task_size = bytes;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.fragment_workers = workers;
        self
    }

    pub fn with_max_in_flight(mut self, tasks: usize) -> Self {
        self.max_in_flight_tasks = tasks;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn validate(&self) -> TransferResult<()> {
        let zero = |what: &str| {
            Err(TransferError::Configuration(format!(
                "{what} must be greater than 0"
            )))
        };
        if self.fragment_size == 0 {
            return zero("fragment size");
        }
        if self.upload_task_size == 0 {
            return zero("upload task size");
        }
        if self.max_in_flight_tasks == 0 {
            return zero("max in-flight tasks");
        }
        if self.fragment_workers == 0 {
            return zero("fragment workers");
        }
        if self.retry.max_attempts == 0 {
            return zero("retry attempts");
        }
        self.policy.validate()
    }

    pub(crate) fn task_size(&self) -> usize {
        self.upload_task_size.min(self.fragment_size)
    }
}
