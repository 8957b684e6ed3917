use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

pub type TransferResult<T> = Result<T, TransferError>;

/// Errors surfaced by the transfer core.
///
/// Every variant that concerns a single fragment carries its index (and root,
/// once known) so the caller can retry that fragment alone.
#[derive(Debug, Error)]
pub enum TransferError {
    /// Rejected before any network activity
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("{}no eligible storage node: {reason}", at(.index))]
    SelectionExhausted { index: Option<u64>, reason: String },

    #[error("{}finality not reached for {root} within {}ms", at(.index), .waited.as_millis())]
    FinalityTimeout {
        index: Option<u64>,
        root: String,
        waited: Duration,
    },

    #[error("{}transport failure after {attempts} attempt(s){}: {message}", at(.index), root_suffix(.root))]
    TransportFailure {
        index: Option<u64>,
        root: Option<String>,
        attempts: u32,
        message: String,
    },

    #[error("{}integrity check failed: expected {expected}, got {actual}", at(.index))]
    IntegrityMismatch {
        index: Option<u64>,
        expected: String,
        actual: String,
    },

    #[error("{}root not found on any node: {root}", at(.index))]
    NotFound { index: Option<u64>, root: String },

    #[error("{}transfer cancelled", at(.index))]
    Cancelled { index: Option<u64> },

    #[error("{}reading source: {source}", at(.index))]
    Source {
        index: Option<u64>,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn at(index: &Option<u64>) -> String {
    match index {
        Some(i) => format!("fragment {i}: "),
        None => String::new(),
    }
}

fn root_suffix(root: &Option<String>) -> String {
    match root {
        Some(r) => format!(" (root {r})"),
        None => String::new(),
    }
}

/// Serializable classification of a [`TransferError`], used in session reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Configuration,
    SelectionExhausted,
    FinalityTimeout,
    TransportFailure,
    IntegrityMismatch,
    NotFound,
    Cancelled,
    Source,
    Io,
}

impl TransferError {
    pub fn kind(&self) -> FailureKind {
        match self {
            TransferError::Configuration(_) => FailureKind::Configuration,
            TransferError::SelectionExhausted { .. } => FailureKind::SelectionExhausted,
            TransferError::FinalityTimeout { .. } => FailureKind::FinalityTimeout,
            TransferError::TransportFailure { .. } => FailureKind::TransportFailure,
            TransferError::IntegrityMismatch { .. } => FailureKind::IntegrityMismatch,
            TransferError::NotFound { .. } => FailureKind::NotFound,
            TransferError::Cancelled { .. } => FailureKind::Cancelled,
            TransferError::Source { .. } => FailureKind::Source,
            TransferError::Io(_) => FailureKind::Io,
        }
    }

    /// Fragment index this error refers to, if any.
    pub fn index(&self) -> Option<u64> {
        match self {
            TransferError::SelectionExhausted { index, .. }
            | TransferError::FinalityTimeout { index, .. }
            | TransferError::TransportFailure { index, .. }
            | TransferError::IntegrityMismatch { index, .. }
            | TransferError::NotFound { index, .. }
            | TransferError::Cancelled { index }
            | TransferError::Source { index, .. } => *index,
            TransferError::Configuration(_) | TransferError::Io(_) => None,
        }
    }

    /// Attach a fragment index to an error produced without one.
    pub fn at_fragment(mut self, fragment: u64) -> Self {
        match &mut self {
            TransferError::SelectionExhausted { index, .. }
            | TransferError::FinalityTimeout { index, .. }
            | TransferError::TransportFailure { index, .. }
            | TransferError::IntegrityMismatch { index, .. }
            | TransferError::NotFound { index, .. }
            | TransferError::Cancelled { index }
            | TransferError::Source { index, .. } => {
                index.get_or_insert(fragment);
            }
            TransferError::Configuration(_) | TransferError::Io(_) => {}
        }
        self
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, TransferError::Cancelled { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_fragment_index() {
        let err = TransferError::SelectionExhausted {
            index: Some(3),
            reason: "0 trusted nodes".into(),
        };
        assert_eq!(
            err.to_string(),
            "fragment 3: no eligible storage node: 0 trusted nodes"
        );
    }

    #[test]
    fn at_fragment_does_not_overwrite() {
        let err = TransferError::Cancelled { index: Some(1) }.at_fragment(7);
        assert_eq!(err.index(), Some(1));

        let err = TransferError::NotFound {
            index: None,
            root: "0xab".into(),
        }
        .at_fragment(7);
        assert_eq!(err.index(), Some(7));
        assert_eq!(err.kind(), FailureKind::NotFound);
    }

    #[test]
    fn transport_failure_mentions_root() {
        let err = TransferError::TransportFailure {
            index: None,
            root: Some("0x01".into()),
            attempts: 3,
            message: "connection refused".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("3 attempt(s)"));
        assert!(msg.contains("root 0x01"));
    }
}
