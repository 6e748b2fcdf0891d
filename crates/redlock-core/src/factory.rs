//! Lock factories sharing one node set
//!
//! Connections are created once and reused by every lock the factory hands
//! out; each lock gets the factory defaults unless overridden.

use std::path::Path;
use std::sync::Arc;

use redlock_common::Result;
use redlock_node::{Node, NodeDescriptor};
use tracing::info;

use crate::config::RedlockConfig;
use crate::lock::{Lock, LockOptions};
use crate::node_set::NodeSet;
use crate::rlock::RLock;

#[derive(Debug, Clone)]
pub struct LockFactory {
    nodes: NodeSet,
    defaults: LockOptions,
}

impl LockFactory {
    /// Build from node handles; fails with fewer than three nodes
    pub fn new(nodes: Vec<Arc<dyn Node>>, defaults: LockOptions) -> Result<Self> {
        Ok(Self::from_node_set(NodeSet::new(nodes)?, defaults))
    }

    pub fn from_node_set(nodes: NodeSet, defaults: LockOptions) -> Self {
        Self { nodes, defaults }
    }

    /// Build from connection descriptors; the node count is checked before
    /// anything is connected
    pub fn connect(descriptors: &[NodeDescriptor], defaults: LockOptions) -> Result<Self> {
        Ok(Self::from_node_set(NodeSet::connect(descriptors)?, defaults))
    }

    pub fn from_config(config: &RedlockConfig) -> Result<Self> {
        let nodes = config.node_set()?;
        info!(nodes = ?nodes, "Lock factory created");
        Ok(Self::from_node_set(nodes, config.lock_options()))
    }

    /// Load configuration from an optional file and the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::from_config(&RedlockConfig::load(path)?)
    }

    /// A new lock on `resource` with the factory defaults
    pub fn lock(&self, resource: impl Into<String>) -> Lock {
        Lock::new(resource, self.nodes.clone(), self.defaults.clone())
    }

    /// A new lock on `resource` with adjusted options
    ///
    /// ```no_run
    /// # use std::time::Duration;
    /// # fn demo(factory: &redlock_core::LockFactory) {
    /// let lock = factory.lock_with("jobs:nightly", |o| o.with_ttl(Duration::from_secs(10)));
    /// # }
    /// ```
    pub fn lock_with(
        &self,
        resource: impl Into<String>,
        overrides: impl FnOnce(LockOptions) -> LockOptions,
    ) -> Lock {
        Lock::new(resource, self.nodes.clone(), overrides(self.defaults.clone()))
    }

    pub fn node_set(&self) -> &NodeSet {
        &self.nodes
    }

    pub fn defaults(&self) -> &LockOptions {
        &self.defaults
    }
}

/// Factory for reentrant locks
#[derive(Debug, Clone)]
pub struct RLockFactory {
    inner: LockFactory,
}

impl RLockFactory {
    pub fn new(nodes: Vec<Arc<dyn Node>>, defaults: LockOptions) -> Result<Self> {
        Ok(LockFactory::new(nodes, defaults)?.into())
    }

    pub fn from_node_set(nodes: NodeSet, defaults: LockOptions) -> Self {
        LockFactory::from_node_set(nodes, defaults).into()
    }

    pub fn connect(descriptors: &[NodeDescriptor], defaults: LockOptions) -> Result<Self> {
        Ok(LockFactory::connect(descriptors, defaults)?.into())
    }

    pub fn from_config(config: &RedlockConfig) -> Result<Self> {
        Ok(LockFactory::from_config(config)?.into())
    }

    pub fn load(path: Option<&Path>) -> Result<Self> {
        Ok(LockFactory::load(path)?.into())
    }

    pub fn lock(&self, resource: impl Into<String>) -> RLock {
        RLock::from_lock(self.inner.lock(resource))
    }

    pub fn lock_with(
        &self,
        resource: impl Into<String>,
        overrides: impl FnOnce(LockOptions) -> LockOptions,
    ) -> RLock {
        RLock::from_lock(self.inner.lock_with(resource, overrides))
    }

    pub fn node_set(&self) -> &NodeSet {
        self.inner.node_set()
    }

    pub fn defaults(&self) -> &LockOptions {
        self.inner.defaults()
    }
}

impl From<LockFactory> for RLockFactory {
    fn from(inner: LockFactory) -> Self {
        Self { inner }
    }
}
