// In-process lock node
// Holds leases in a DashMap with per-key expiry; used for tests and single-process setups

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, LazyLock, Weak};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use redlock_common::NodeError;
use tracing::debug;

use crate::node::Node;

/// Process-wide registry backing `memory://<name>` descriptors
static SHARED_NODES: LazyLock<DashMap<String, Arc<MemoryNode>>> = LazyLock::new(DashMap::new);

/// A lease held on one key
struct Lease {
    token: String,
    expires_at: Instant,
}

impl Lease {
    fn new(token: &str, ttl: Duration) -> Self {
        Self {
            token: token.to_string(),
            expires_at: Instant::now() + ttl,
        }
    }

    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }

    fn remaining(&self) -> Option<Duration> {
        let remaining = self.expires_at.saturating_duration_since(Instant::now());
        (!remaining.is_zero()).then_some(remaining)
    }
}

/// In-memory node; each DashMap shard lock makes an operation atomic per key
pub struct MemoryNode {
    name: String,
    leases: DashMap<String, Lease>,
    available: AtomicBool,
}

impl MemoryNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            leases: DashMap::new(),
            available: AtomicBool::new(true),
        }
    }

    /// Node registered under `name` for the whole process, created on first use
    pub fn shared(name: &str) -> Arc<Self> {
        SHARED_NODES
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Self::new(name)))
            .clone()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Simulate the node becoming unreachable (`false`) or coming back (`true`)
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    /// Token currently holding `resource`, if the lease is live
    pub fn holder(&self, resource: &str) -> Option<String> {
        self.leases
            .get(resource)
            .filter(|lease| !lease.is_expired())
            .map(|lease| lease.token.clone())
    }

    /// Number of live leases
    pub fn len(&self) -> usize {
        self.leases.iter().filter(|l| !l.is_expired()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop expired leases, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let before = self.leases.len();
        self.leases.retain(|_, lease| !lease.is_expired());
        before - self.leases.len()
    }

    /// Start a background task purging expired leases every `every`
    ///
    /// The task holds only a weak reference and ends once the node is dropped.
    pub fn spawn_expiry_task(node: &Arc<Self>, every: Duration) -> tokio::task::JoinHandle<()> {
        let node: Weak<Self> = Arc::downgrade(node);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                let Some(node) = node.upgrade() else {
                    break;
                };
                let purged = node.purge_expired();
                if purged > 0 {
                    debug!(node = %node.name, count = purged, "Purged expired leases");
                }
            }
        })
    }

    fn check_available(&self) -> Result<(), NodeError> {
        if self.is_available() {
            Ok(())
        } else {
            Err(NodeError::Unavailable(self.describe()))
        }
    }
}

#[async_trait]
impl Node for MemoryNode {
    async fn try_acquire(
        &self,
        resource: &str,
        token: &str,
        ttl: Duration,
    ) -> Result<bool, NodeError> {
        self.check_available()?;
        let acquired = match self.leases.entry(resource.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_expired() {
                    occupied.insert(Lease::new(token, ttl));
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Lease::new(token, ttl));
                true
            }
        };
        Ok(acquired)
    }

    async fn release(&self, resource: &str, token: &str) -> Result<bool, NodeError> {
        self.check_available()?;
        let removed = self
            .leases
            .remove_if(resource, |_, lease| {
                lease.token == token && !lease.is_expired()
            })
            .is_some();
        Ok(removed)
    }

    async fn extend(&self, resource: &str, token: &str, ttl: Duration) -> Result<bool, NodeError> {
        self.check_available()?;
        if let Some(mut lease) = self.leases.get_mut(resource)
            && lease.token == token
            && !lease.is_expired()
        {
            lease.expires_at = Instant::now() + ttl;
            return Ok(true);
        }
        Ok(false)
    }

    async fn get_ttl(&self, resource: &str, token: &str) -> Result<Option<Duration>, NodeError> {
        self.check_available()?;
        Ok(self
            .leases
            .get(resource)
            .filter(|lease| lease.token == token)
            .and_then(|lease| lease.remaining()))
    }

    fn describe(&self) -> String {
        format!("memory://{}", self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn test_acquire_and_release() {
        let node = MemoryNode::new("n1");

        assert!(node.try_acquire("key1", "token1", TTL).await.unwrap());
        assert_eq!(node.holder("key1").as_deref(), Some("token1"));
        assert!(node.release("key1", "token1").await.unwrap());
        assert!(node.holder("key1").is_none());
    }

    #[tokio::test]
    async fn test_acquire_conflict() {
        let node = MemoryNode::new("n1");

        assert!(node.try_acquire("key1", "token1", TTL).await.unwrap());
        // Another token cannot acquire, nor can the same token twice
        assert!(!node.try_acquire("key1", "token2", TTL).await.unwrap());
        assert!(!node.try_acquire("key1", "token1", TTL).await.unwrap());
    }

    #[tokio::test]
    async fn test_release_wrong_token() {
        let node = MemoryNode::new("n1");

        assert!(node.try_acquire("key1", "token1", TTL).await.unwrap());
        assert!(!node.release("key1", "token2").await.unwrap());
        assert!(node.release("key1", "token1").await.unwrap());
        assert!(!node.release("key1", "token1").await.unwrap());
    }

    #[tokio::test]
    async fn test_acquire_after_expiry() {
        let node = MemoryNode::new("n1");

        assert!(node.try_acquire("key1", "token1", Duration::ZERO).await.unwrap());
        // Expired lease is treated as unset
        assert!(node.try_acquire("key1", "token2", TTL).await.unwrap());
        assert!(!node.extend("key1", "token1", TTL).await.unwrap());
    }

    #[tokio::test]
    async fn test_extend_and_ttl() {
        let node = MemoryNode::new("n1");

        node.try_acquire("key1", "token1", Duration::from_millis(50))
            .await
            .unwrap();
        assert!(node.extend("key1", "token1", TTL).await.unwrap());
        let ttl = node.get_ttl("key1", "token1").await.unwrap().unwrap();
        assert!(ttl > Duration::from_secs(59));

        assert!(node.get_ttl("key1", "token2").await.unwrap().is_none());
        assert!(!node.extend("key1", "token2", TTL).await.unwrap());
    }

    #[tokio::test]
    async fn test_unavailable_node_errors() {
        let node = MemoryNode::new("down");
        node.set_available(false);

        let err = node.try_acquire("key1", "token1", TTL).await.unwrap_err();
        assert!(matches!(err, NodeError::Unavailable(_)));

        node.set_available(true);
        assert!(node.try_acquire("key1", "token1", TTL).await.unwrap());
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let node = MemoryNode::new("n1");

        node.try_acquire("a", "t", Duration::ZERO).await.unwrap();
        node.try_acquire("b", "t", TTL).await.unwrap();

        assert_eq!(node.purge_expired(), 1);
        assert_eq!(node.len(), 1);
    }

    #[tokio::test]
    async fn test_expiry_task_purges() {
        let node = Arc::new(MemoryNode::new("n1"));
        node.try_acquire("a", "t", Duration::from_millis(5))
            .await
            .unwrap();

        let handle = MemoryNode::spawn_expiry_task(&node, Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(node.leases.len(), 0);
        handle.abort();
    }

    #[test]
    fn test_shared_registry_returns_same_node() {
        let a = MemoryNode::shared("registry-test");
        let b = MemoryNode::shared("registry-test");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.describe(), "memory://registry-test");
    }
}
