use std::time::Duration;
use thiserror::Error;

/// Network-level failures talking to one storage node.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("node {node} unavailable: {message}")]
    Unavailable { node: String, message: String },

    #[error("request to {node} timed out after {}ms", .elapsed.as_millis())]
    Timeout { node: String, elapsed: Duration },

    #[error("node {node} rejected request: {message}")]
    Rejected { node: String, message: String },

    #[error("no transport route for node {0}")]
    UnknownNode(String),

    #[error("storage error on {node}: {source}")]
    Storage {
        node: String,
        #[source]
        source: opendal::Error,
    },
}

impl TransportError {
    /// Whether retrying the same request against the same node may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            TransportError::Unavailable { .. } | TransportError::Timeout { .. } => true,
            TransportError::Storage { source, .. } => source.is_temporary(),
            TransportError::Rejected { .. } | TransportError::UnknownNode(_) => false,
        }
    }

    pub fn node(&self) -> &str {
        match self {
            TransportError::Unavailable { node, .. }
            | TransportError::Timeout { node, .. }
            | TransportError::Rejected { node, .. }
            | TransportError::Storage { node, .. } => node,
            TransportError::UnknownNode(node) => node,
        }
    }

    pub(crate) fn storage(node: &str, source: opendal::Error) -> Self {
        TransportError::Storage {
            node: node.to_string(),
            source,
        }
    }
}
