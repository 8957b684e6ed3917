//! Node selection
//!
//! The indexer that ranks storage nodes is an external collaborator; the
//! transfer core only sees the [`NodeSelector`] trait. [`StaticNodeSelector`]
//! implements it over the node list from `tessera.toml`.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use tessera_chunks::RootId;
use tessera_core::config::NetworkConfig;
use tessera_core::{NodeDescriptor, SelectionMode, TrustFilter, TrustTier};
use tracing::{debug, warn};

use crate::error::TransportError;

/// Eligible nodes for one upload, each tier already ranked best-first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectedNodes {
    pub trusted: Vec<NodeDescriptor>,
    pub discovered: Vec<NodeDescriptor>,
}

impl SelectedNodes {
    /// Nodes admitted by `trust`, trusted tier first.
    pub fn candidates(&self, trust: TrustFilter) -> Vec<NodeDescriptor> {
        let mut out = self.trusted.clone();
        if trust == TrustFilter::AllowDiscovered {
            out.extend(self.discovered.iter().cloned());
        }
        out
    }

    pub fn len(&self) -> usize {
        self.trusted.len() + self.discovered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trusted.is_empty() && self.discovered.is_empty()
    }
}

#[async_trait]
pub trait NodeSelector: Send + Sync {
    /// Every node eligible for an upload needing `replicas` copies, ranked by
    /// `mode`. The caller takes the first `replicas` and keeps the rest as
    /// alternates. Results must not be cached across sessions.
    async fn select_nodes(
        &self,
        replicas: u32,
        trust: TrustFilter,
        mode: SelectionMode,
    ) -> Result<SelectedNodes, TransportError>;

    /// Nodes that may serve `root`, most preferred first.
    async fn locate(&self, root: &RootId) -> Result<Vec<NodeDescriptor>, TransportError>;
}

/// A selector over a fixed node list.
///
/// Descriptors with an invalid shard configuration are dropped at
/// construction. `MinLatency` orders by latency, then by shard ownership
/// (fewer shards owns more), then by URL. `RoundRobin` rotates the configured
/// order by one position per call.
#[derive(Debug)]
pub struct StaticNodeSelector {
    nodes: Vec<NodeDescriptor>,
    cursor: AtomicUsize,
}

impl StaticNodeSelector {
    pub fn new(nodes: Vec<NodeDescriptor>) -> Self {
        let nodes = nodes
            .into_iter()
            .filter(|n| {
                let valid = n.shard_config.is_valid();
                if !valid {
                    warn!(
                        node = %n.url,
                        num_shards = n.shard_config.num_shards,
                        shard_id = n.shard_config.shard_id,
                        "dropping node with invalid shard config"
                    );
                }
                valid
            })
            .collect();
        Self {
            nodes,
            cursor: AtomicUsize::new(0),
        }
    }

    pub fn from_config(network: &NetworkConfig) -> Self {
        Self::new(network.node_descriptors())
    }

    /// Valid nodes in configured order
    pub fn nodes(&self) -> &[NodeDescriptor] {
        &self.nodes
    }

    /// All valid nodes ordered for `mode`, ignoring trust.
    pub fn rank(&self, mode: SelectionMode) -> Vec<NodeDescriptor> {
        let mut ranked = self.nodes.clone();
        match mode {
            SelectionMode::MinLatency => by_latency(&mut ranked),
            SelectionMode::RoundRobin => {
                if !ranked.is_empty() {
                    let start = self.cursor.fetch_add(1, Ordering::Relaxed) % ranked.len();
                    ranked.rotate_left(start);
                }
            }
        }
        ranked
    }
}

fn by_latency(nodes: &mut [NodeDescriptor]) {
    nodes.sort_by(|a, b| {
        a.latency
            .cmp(&b.latency)
            .then(a.shard_config.num_shards.cmp(&b.shard_config.num_shards))
            .then_with(|| a.url.cmp(&b.url))
    });
}

fn partition(nodes: Vec<NodeDescriptor>) -> SelectedNodes {
    let (trusted, discovered) = nodes
        .into_iter()
        .partition(|n| n.trust_tier == TrustTier::Trusted);
    SelectedNodes {
        trusted,
        discovered,
    }
}

#[async_trait]
impl NodeSelector for StaticNodeSelector {
    async fn select_nodes(
        &self,
        replicas: u32,
        trust: TrustFilter,
        mode: SelectionMode,
    ) -> Result<SelectedNodes, TransportError> {
        let mut selected = partition(self.rank(mode));
        if trust == TrustFilter::TrustedOnly {
            selected.discovered.clear();
        }
        debug!(
            replicas,
            trusted = selected.trusted.len(),
            discovered = selected.discovered.len(),
            ?mode,
            "selected nodes"
        );
        Ok(selected)
    }

    async fn locate(&self, root: &RootId) -> Result<Vec<NodeDescriptor>, TransportError> {
        let mut ranked = self.nodes.clone();
        by_latency(&mut ranked);
        let selected = partition(ranked);
        debug!(root = %root.short(), nodes = selected.len(), "located candidate nodes");
        Ok(selected.candidates(TrustFilter::AllowDiscovered))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tessera_chunks::compute_root;

    fn node(url: &str, ms: u64) -> NodeDescriptor {
        NodeDescriptor::trusted(url).with_latency(Duration::from_millis(ms))
    }

    fn urls(nodes: &[NodeDescriptor]) -> Vec<&str> {
        nodes.iter().map(|n| n.url.as_str()).collect()
    }

    #[test]
    fn invalid_shard_configs_are_dropped() {
        let selector = StaticNodeSelector::new(vec![
            node("a", 1),
            node("b", 1).with_shards(3, 0),
            node("c", 1).with_shards(4, 9),
            node("d", 1).with_shards(4, 2),
        ]);
        assert_eq!(urls(selector.nodes()), vec!["a", "d"]);
    }

    #[tokio::test]
    async fn min_latency_ranks_by_latency_then_ownership() {
        let selector = StaticNodeSelector::new(vec![
            node("slow", 50),
            node("sharded", 5).with_shards(4, 1),
            node("full", 5),
            node("fast", 1),
        ]);
        let selected = selector
            .select_nodes(2, TrustFilter::TrustedOnly, SelectionMode::MinLatency)
            .await
            .unwrap();
        assert_eq!(urls(&selected.trusted), vec!["fast", "full", "sharded", "slow"]);
    }

    #[test]
    fn round_robin_rotates_per_call() {
        let selector = StaticNodeSelector::new(vec![node("a", 0), node("b", 0), node("c", 0)]);
        let firsts: Vec<String> = (0..4)
            .map(|_| {
                let selected = tokio_test::block_on(selector.select_nodes(
                    1,
                    TrustFilter::TrustedOnly,
                    SelectionMode::RoundRobin,
                ))
                .unwrap();
                selected.trusted[0].url.clone()
            })
            .collect();
        assert_eq!(firsts, vec!["a", "b", "c", "a"]);
    }

    #[tokio::test]
    async fn trusted_only_hides_discovered_nodes() {
        let selector = StaticNodeSelector::new(vec![
            NodeDescriptor::discovered("d1"),
            NodeDescriptor::discovered("d2"),
        ]);
        let selected = selector
            .select_nodes(1, TrustFilter::TrustedOnly, SelectionMode::MinLatency)
            .await
            .unwrap();
        assert!(selected.is_empty());

        let selected = selector
            .select_nodes(1, TrustFilter::AllowDiscovered, SelectionMode::MinLatency)
            .await
            .unwrap();
        assert_eq!(selected.candidates(TrustFilter::AllowDiscovered).len(), 2);
        assert!(selected.candidates(TrustFilter::TrustedOnly).is_empty());
    }

    #[tokio::test]
    async fn locate_lists_trusted_first() {
        let selector = StaticNodeSelector::new(vec![
            NodeDescriptor::discovered("d").with_latency(Duration::from_millis(1)),
            node("t", 20),
        ]);
        let located = selector.locate(&compute_root(b"anything")).await.unwrap();
        assert_eq!(urls(&located), vec!["t", "d"]);
    }
}
