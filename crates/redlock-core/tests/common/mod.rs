//! Common test utilities for lock integration tests
//!
//! This module provides shared test infrastructure including:
//! - In-memory clusters whose nodes can be taken down individually
//! - SlowNode: a node that answers only after a fixed delay
//! - TtlBlindNode: a node that never reports a remaining TTL
//! - Fast lock options so retries and expiry fit in test time

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use redlock_core::{LockOptions, MemoryNode, Node, NodeError};

static NEXT_ID: AtomicUsize = AtomicUsize::new(0);

/// Unique name so tests never share keys or shared nodes
pub fn unique(prefix: &str) -> String {
    format!("{prefix}-{}", NEXT_ID.fetch_add(1, Ordering::Relaxed))
}

/// Install a log subscriber honoring `RUST_LOG`; repeated calls are ignored
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// `count` independent in-memory nodes
pub fn memory_cluster(count: usize) -> Vec<Arc<MemoryNode>> {
    let cluster = unique("node");
    (0..count)
        .map(|i| Arc::new(MemoryNode::new(format!("{cluster}-{i}"))))
        .collect()
}

pub fn as_nodes(cluster: &[Arc<MemoryNode>]) -> Vec<Arc<dyn Node>> {
    cluster
        .iter()
        .map(|node| node.clone() as Arc<dyn Node>)
        .collect()
}

/// Short retries and a 10s lease
pub fn fast_options() -> LockOptions {
    LockOptions::default()
        .with_retry_times(2)
        .with_retry_delay(Duration::from_millis(10))
        .with_ttl(Duration::from_secs(10))
}

/// Number of nodes where `resource` is currently held by `token`
pub fn holders(cluster: &[Arc<MemoryNode>], resource: &str, token: &str) -> usize {
    cluster
        .iter()
        .filter(|node| node.holder(resource).as_deref() == Some(token))
        .count()
}

/// Whether no node holds `resource` at all
pub fn all_free(cluster: &[Arc<MemoryNode>], resource: &str) -> bool {
    cluster.iter().all(|node| node.holder(resource).is_none())
}

/// Poll `check` every 10ms until it holds or `within` passes
pub async fn eventually(within: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + within;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

/// A memory node that delays every answer
pub struct SlowNode {
    inner: MemoryNode,
    delay: Duration,
}

impl SlowNode {
    pub fn new(delay: Duration) -> Self {
        Self {
            inner: MemoryNode::new(unique("slow")),
            delay,
        }
    }
}

#[async_trait]
impl Node for SlowNode {
    async fn try_acquire(
        &self,
        resource: &str,
        token: &str,
        ttl: Duration,
    ) -> Result<bool, NodeError> {
        tokio::time::sleep(self.delay).await;
        self.inner.try_acquire(resource, token, ttl).await
    }

    async fn release(&self, resource: &str, token: &str) -> Result<bool, NodeError> {
        tokio::time::sleep(self.delay).await;
        self.inner.release(resource, token).await
    }

    async fn extend(&self, resource: &str, token: &str, ttl: Duration) -> Result<bool, NodeError> {
        tokio::time::sleep(self.delay).await;
        self.inner.extend(resource, token, ttl).await
    }

    async fn get_ttl(&self, resource: &str, token: &str) -> Result<Option<Duration>, NodeError> {
        tokio::time::sleep(self.delay).await;
        self.inner.get_ttl(resource, token).await
    }

    fn describe(&self) -> String {
        format!("slow+{}", self.inner.describe())
    }
}

/// A memory node whose TTL queries always fail
pub struct TtlBlindNode {
    inner: MemoryNode,
}

impl TtlBlindNode {
    pub fn new() -> Self {
        Self {
            inner: MemoryNode::new(unique("blind")),
        }
    }
}

#[async_trait]
impl Node for TtlBlindNode {
    async fn try_acquire(
        &self,
        resource: &str,
        token: &str,
        ttl: Duration,
    ) -> Result<bool, NodeError> {
        self.inner.try_acquire(resource, token, ttl).await
    }

    async fn release(&self, resource: &str, token: &str) -> Result<bool, NodeError> {
        self.inner.release(resource, token).await
    }

    async fn extend(&self, resource: &str, token: &str, ttl: Duration) -> Result<bool, NodeError> {
        self.inner.extend(resource, token, ttl).await
    }

    async fn get_ttl(&self, _resource: &str, _token: &str) -> Result<Option<Duration>, NodeError> {
        Err(NodeError::Unavailable(self.describe()))
    }

    fn describe(&self) -> String {
        format!("blind+{}", self.inner.describe())
    }
}
