//! OpenDAL Operator factory for S3-compatible storage nodes

use anyhow::{Context, Result};
use opendal::Operator;
use tessera_core::config::NetworkConfig;

use crate::backend::OpendalTransport;

/// Access credentials shared by every configured node
#[derive(Clone)]
pub struct NodeCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
}

impl std::fmt::Debug for NodeCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .finish()
    }
}

/// Build an OpenDAL Operator for one node endpoint.
///
/// If `enforce_tls` is set and the endpoint uses HTTP, this returns an error.
/// Otherwise, a warning is logged for non-HTTPS endpoints.
///
/// Retries are budgeted by the uploader's RetryPolicy, so no RetryLayer is
/// installed here.
pub fn build_operator(
    endpoint: &str,
    network: &NetworkConfig,
    creds: &NodeCredentials,
) -> Result<Operator> {
    if endpoint.starts_with("http://") {
        if network.enforce_tls {
            anyhow::bail!(
                "node endpoint uses plaintext HTTP ({}), but enforce_tls is enabled. \
                 Use an HTTPS endpoint or set network.enforce_tls = false for local development.",
                endpoint
            );
        }
        tracing::warn!(
            endpoint = %endpoint,
            "node endpoint uses plaintext HTTP, credentials are transmitted unencrypted"
        );
    }

    // opendal 0.55: S3 builder uses consuming pattern (methods take `self`, return `Self`)
    let builder = opendal::services::S3::default()
        .endpoint(endpoint)
        .region(&network.region)
        .bucket(&network.bucket)
        .access_key_id(&creds.access_key_id)
        .secret_access_key(&creds.secret_access_key);

    let op = Operator::new(builder)
        .with_context(|| format!("creating OpenDAL S3 operator for {endpoint}"))?
        .layer(opendal::layers::LoggingLayer::default())
        .finish();

    Ok(op)
}

/// Build a transport routing to every node listed in the network config.
pub fn transport_from_config(
    network: &NetworkConfig,
    creds: &NodeCredentials,
) -> Result<OpendalTransport> {
    let mut transport = OpendalTransport::new(&network.prefix);
    for node in &network.nodes {
        let op = build_operator(&node.url, network, creds)?;
        transport.insert(node.url.clone(), op);
    }
    Ok(transport)
}
