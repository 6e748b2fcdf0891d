//! The shared set of lock nodes and the concurrent fan-out over it

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use redlock_common::{DEFAULT_NODE_TIMEOUT_MS, MIN_NODES, NodeError, RedlockError, Result};
use redlock_node::{Node, NodeDescriptor};
use tracing::debug;

use crate::validity::quorum;

/// An ordered, immutable set of at least three nodes
///
/// Cloning is cheap; clones share the same node handles and connections.
#[derive(Clone)]
pub struct NodeSet {
    nodes: Arc<[Arc<dyn Node>]>,
    quorum: usize,
    node_timeout: Duration,
}

impl std::fmt::Debug for NodeSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeSet")
            .field(
                "nodes",
                &self.nodes.iter().map(|n| n.describe()).collect::<Vec<_>>(),
            )
            .field("quorum", &self.quorum)
            .field("node_timeout", &self.node_timeout)
            .finish()
    }
}

impl NodeSet {
    /// Build a set from node handles; fails with fewer than three nodes
    pub fn new(nodes: Vec<Arc<dyn Node>>) -> Result<Self> {
        if nodes.len() < MIN_NODES {
            return Err(RedlockError::InsufficientNodes(nodes.len()));
        }
        let quorum = quorum(nodes.len());
        Ok(Self {
            nodes: nodes.into(),
            quorum,
            node_timeout: Duration::from_millis(DEFAULT_NODE_TIMEOUT_MS),
        })
    }

    /// Build a set from connection descriptors
    ///
    /// The node count is validated before any node is created.
    pub fn connect(descriptors: &[NodeDescriptor]) -> Result<Self> {
        if descriptors.len() < MIN_NODES {
            return Err(RedlockError::InsufficientNodes(descriptors.len()));
        }
        let nodes = descriptors
            .iter()
            .map(NodeDescriptor::connect)
            .collect::<std::result::Result<Vec<_>, NodeError>>()?;
        Self::new(nodes)
    }

    /// Bound every single node call by `timeout`
    pub fn with_node_timeout(mut self, timeout: Duration) -> Self {
        self.node_timeout = timeout;
        self
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn quorum(&self) -> usize {
        self.quorum
    }

    pub fn node_timeout(&self) -> Duration {
        self.node_timeout
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Node>> {
        self.nodes.iter()
    }

    /// Number of nodes that newly stored `token` under `resource`
    pub(crate) async fn try_acquire_all(&self, resource: &str, token: &str, ttl: Duration) -> usize {
        self.try_acquire_within(resource, token, ttl, self.node_timeout)
            .await
    }

    /// Like `try_acquire_all`, with each node call bounded by the smaller of
    /// `budget` and the node timeout
    pub(crate) async fn try_acquire_within(
        &self,
        resource: &str,
        token: &str,
        ttl: Duration,
        budget: Duration,
    ) -> usize {
        let timeout = budget.min(self.node_timeout);
        self.fan_out("try_acquire", timeout, |node| {
            node.try_acquire(resource, token, ttl)
        })
        .await
            .into_iter()
            .filter(|voted| *voted == Some(true))
            .count()
    }

    /// Number of nodes that deleted `resource` held by `token`
    pub(crate) async fn release_all(&self, resource: &str, token: &str) -> usize {
        self.fan_out("release", self.node_timeout, |node| node.release(resource, token))
            .await
            .into_iter()
            .filter(|voted| *voted == Some(true))
            .count()
    }

    /// Number of nodes that reset the expiry of `resource` held by `token`
    pub(crate) async fn extend_all(&self, resource: &str, token: &str, ttl: Duration) -> usize {
        self.fan_out("extend", self.node_timeout, |node| node.extend(resource, token, ttl))
            .await
            .into_iter()
            .filter(|voted| *voted == Some(true))
            .count()
    }

    /// Positive TTLs reported by nodes where `resource` is held by `token`
    pub(crate) async fn ttl_all(&self, resource: &str, token: &str) -> Vec<Duration> {
        self.fan_out("get_ttl", self.node_timeout, |node| node.get_ttl(resource, token))
            .await
            .into_iter()
            .flatten()
            .flatten()
            .filter(|ttl| !ttl.is_zero())
            .collect()
    }

    /// Run `call` against every node concurrently
    ///
    /// Each call is bounded by `timeout`. A failed or timed-out call yields
    /// `None` and never affects the other nodes.
    async fn fan_out<'a, T, F, Fut>(
        &'a self,
        op: &'static str,
        timeout: Duration,
        call: F,
    ) -> Vec<Option<T>>
    where
        F: Fn(&'a dyn Node) -> Fut,
        Fut: Future<Output = std::result::Result<T, NodeError>> + 'a,
    {
        let calls = self.nodes.iter().map(|node| {
            let pending = call(node.as_ref());
            async move {
                let outcome = match tokio::time::timeout(timeout, pending).await {
                    Ok(result) => result,
                    Err(_) => Err(NodeError::Timeout),
                };
                match outcome {
                    Ok(value) => Some(value),
                    Err(e) => {
                        debug!(node = %node.describe(), op, error = %e, "Node did not vote");
                        None
                    }
                }
            }
        });
        join_all(calls).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use redlock_node::MemoryNode;

    fn memory_nodes(count: usize) -> Vec<Arc<dyn Node>> {
        (0..count)
            .map(|i| Arc::new(MemoryNode::new(format!("n{i}"))) as Arc<dyn Node>)
            .collect()
    }

    #[test]
    fn test_insufficient_nodes() {
        for count in 0..3 {
            let err = NodeSet::new(memory_nodes(count)).unwrap_err();
            assert!(matches!(err, RedlockError::InsufficientNodes(n) if n == count));
        }
    }

    #[test]
    fn test_connect_checks_count_first() {
        let descriptors = vec![NodeDescriptor::default(), NodeDescriptor::default()];
        // Invalid descriptors are never looked at when there are too few
        let err = NodeSet::connect(&descriptors).unwrap_err();
        assert!(matches!(err, RedlockError::InsufficientNodes(2)));
    }

    #[test]
    fn test_connect_invalid_descriptor() {
        let descriptors = vec![NodeDescriptor::default(); 3];
        let err = NodeSet::connect(&descriptors).unwrap_err();
        assert!(matches!(err, RedlockError::Node(NodeError::InvalidDescriptor(_))));
    }

    #[test]
    fn test_quorum_from_size() {
        assert_eq!(NodeSet::new(memory_nodes(3)).unwrap().quorum(), 3);
        assert_eq!(NodeSet::new(memory_nodes(5)).unwrap().quorum(), 3);
        assert_eq!(NodeSet::new(memory_nodes(9)).unwrap().quorum(), 5);
    }

    #[tokio::test]
    async fn test_fan_out_counts_votes() {
        let nodes = NodeSet::new(memory_nodes(5)).unwrap();
        let ttl = Duration::from_secs(10);

        assert_eq!(nodes.try_acquire_all("res", "t1", ttl).await, 5);
        assert_eq!(nodes.try_acquire_all("res", "t2", ttl).await, 0);
        assert_eq!(nodes.ttl_all("res", "t1").await.len(), 5);
        assert_eq!(nodes.extend_all("res", "t1", ttl).await, 5);
        assert_eq!(nodes.release_all("res", "t1").await, 5);
        assert!(nodes.ttl_all("res", "t1").await.is_empty());
    }

    #[tokio::test]
    async fn test_budget_caps_node_timeout() {
        let nodes = NodeSet::new(memory_nodes(3)).unwrap();
        let ttl = Duration::from_secs(10);

        // Memory nodes answer on first poll, so even a zero budget collects votes
        assert_eq!(
            nodes
                .try_acquire_within("res", "t1", ttl, Duration::ZERO)
                .await,
            3
        );
        assert_eq!(
            nodes
                .try_acquire_within("res", "t2", ttl, Duration::from_secs(60))
                .await,
            0
        );
    }

    #[tokio::test]
    async fn test_unavailable_node_is_no_vote() {
        let memory: Vec<Arc<MemoryNode>> = (0..3)
            .map(|i| Arc::new(MemoryNode::new(format!("n{i}"))))
            .collect();
        memory[1].set_available(false);
        let nodes = NodeSet::new(
            memory
                .iter()
                .map(|n| n.clone() as Arc<dyn Node>)
                .collect(),
        )
        .unwrap();

        assert_eq!(
            nodes
                .try_acquire_all("res", "t1", Duration::from_secs(1))
                .await,
            2
        );
    }
}
