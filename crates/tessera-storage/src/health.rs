//! Node health check

use anyhow::Result;
use tessera_core::NodeDescriptor;

use crate::backend::OpendalTransport;

/// Verify a node is reachable by listing the fragment prefix
pub async fn check_health(transport: &OpendalTransport, node: &NodeDescriptor) -> Result<()> {
    let op = transport.operator(node)?;
    op.list(&format!("{}/", transport.prefix()))
        .await
        .map(|_| ())
        .map_err(|e| anyhow::anyhow!("node {} health check failed: {e}", node.url))
}

/// Returns true if the node is reachable, false otherwise (non-panicking)
pub async fn is_healthy(transport: &OpendalTransport, node: &NodeDescriptor) -> bool {
    check_health(transport, node).await.is_ok()
}
