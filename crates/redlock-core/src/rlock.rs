//! Reentrant distributed lock
//!
//! Nested `acquire`/`release` calls on the same `RLock` only touch the nodes on
//! the outermost acquire and the final release.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use redlock_common::{RedlockError, Result};
use redlock_node::{Node, NodeDescriptor};
use tracing::warn;

use crate::lock::{AcquireOptions, Lock, LockOptions, TtlReport};
use crate::node_set::NodeSet;

/// A `Lock` with a recursion counter
///
/// The counter belongs to one logical owner, such as a task and the calls it
/// nests. Separate owners should each use their own `RLock` on the resource.
/// Outermost acquires racing on one shared `RLock` contend like separate
/// locks: at most one of them wins and the depth counts only the winner.
#[derive(Debug)]
pub struct RLock {
    lock: Lock,
    depth: Mutex<u32>,
}

impl RLock {
    pub fn new(resource: impl Into<String>, nodes: NodeSet, options: LockOptions) -> Self {
        Self::from_lock(Lock::new(resource, nodes, options))
    }

    pub fn with_nodes(
        resource: impl Into<String>,
        nodes: Vec<Arc<dyn Node>>,
        options: LockOptions,
    ) -> Result<Self> {
        Ok(Self::from_lock(Lock::with_nodes(resource, nodes, options)?))
    }

    pub fn connect(
        resource: impl Into<String>,
        descriptors: &[NodeDescriptor],
        options: LockOptions,
    ) -> Result<Self> {
        Ok(Self::from_lock(Lock::connect(resource, descriptors, options)?))
    }

    pub fn from_lock(lock: Lock) -> Self {
        Self {
            lock,
            depth: Mutex::new(0),
        }
    }

    /// Current recursion level
    pub fn depth(&self) -> u32 {
        *self.depth.lock()
    }

    /// The underlying lock
    pub fn lock(&self) -> &Lock {
        &self.lock
    }

    /// Acquire the lock or increase the recursion level
    ///
    /// When already held, the nodes are only polled to confirm the lock is
    /// still ours, and the minimum remaining time is returned. Fails with
    /// `LockLost` if it is not.
    pub async fn acquire(&self, opts: AcquireOptions) -> Result<Option<Duration>> {
        if self.depth() > 0 {
            let report = self.lock.check_times().await?;
            let remaining = report.min_remaining().filter(|_| report.held);
            let Some(remaining) = remaining else {
                warn!(
                    resource = %self.lock.resource(),
                    depth = self.depth(),
                    "Lost rlock while re-acquiring"
                );
                return Err(RedlockError::LockLost(self.lock.resource().to_string()));
            };
            *self.depth.lock() += 1;
            return Ok(Some(remaining));
        }

        let validity = self.lock.acquire(opts).await?;
        if validity.is_some() {
            *self.depth.lock() += 1;
        }
        Ok(validity)
    }

    /// Extend and nest if still held, otherwise acquire
    pub async fn acquire_or_extend(&self, opts: AcquireOptions) -> Result<Option<Duration>> {
        if self.lock.locked().await
            && let Some(validity) = self.lock.extend().await?
        {
            *self.depth.lock() += 1;
            return Ok(Some(validity));
        }
        self.acquire(opts).await
    }

    /// Decrease the recursion level, releasing the lock when it reaches zero
    ///
    /// Nested releases return `true` without touching the nodes.
    pub async fn release(&self) -> Result<bool> {
        let remaining = {
            let mut depth = self.depth.lock();
            if *depth == 0 {
                return Err(RedlockError::InvalidOperation(
                    "cannot release an un-acquired rlock".to_string(),
                ));
            }
            *depth -= 1;
            *depth
        };

        if remaining > 0 {
            return Ok(true);
        }
        self.lock.release().await
    }

    pub async fn extend(&self) -> Result<Option<Duration>> {
        self.lock.extend().await
    }

    pub async fn locked(&self) -> bool {
        self.lock.locked().await
    }

    pub async fn check_times(&self) -> Result<TtlReport> {
        self.lock.check_times().await
    }

    pub async fn start_autoextend(&self, timeout: Option<Duration>) -> Result<()> {
        self.lock.start_autoextend(timeout).await
    }

    pub async fn stop_autoextend(&self) {
        self.lock.stop_autoextend().await
    }

    pub fn resource(&self) -> &str {
        self.lock.resource()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use redlock_node::MemoryNode;

    fn test_rlock() -> RLock {
        let nodes: Vec<Arc<dyn Node>> = (0..3)
            .map(|i| Arc::new(MemoryNode::new(format!("r{i}"))) as Arc<dyn Node>)
            .collect();
        RLock::with_nodes("rlock", nodes, LockOptions::default()).unwrap()
    }

    #[tokio::test]
    async fn test_release_without_acquire() {
        let rlock = test_rlock();
        let err = rlock.release().await.unwrap_err();
        assert!(matches!(err, RedlockError::InvalidOperation(_)));
        assert_eq!(rlock.depth(), 0);
    }

    #[tokio::test]
    async fn test_racing_outer_acquires_count_one_winner() {
        let nodes: Vec<Arc<dyn Node>> = (0..3)
            .map(|i| Arc::new(MemoryNode::new(format!("race{i}"))) as Arc<dyn Node>)
            .collect();
        let options = LockOptions::default().with_retry_delay(Duration::from_millis(100));
        let holder = Lock::with_nodes("shared", nodes.clone(), options.clone()).unwrap();
        let rlock = RLock::with_nodes("shared", nodes, options).unwrap();
        let opts = AcquireOptions::default().non_blocking().without_autoextend();

        // Both outer acquires see depth 0 and start retrying against the holder
        holder.acquire(opts.clone()).await.unwrap().unwrap();
        let release_holder = async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            holder.release().await.unwrap();
        };
        let (a, b, ()) = tokio::join!(
            rlock.acquire(opts.clone()),
            rlock.acquire(opts.clone()),
            release_holder
        );

        let winners = [a.unwrap(), b.unwrap()]
            .iter()
            .filter(|validity| validity.is_some())
            .count();
        assert_eq!(winners, 1);
        assert_eq!(rlock.depth(), 1);
        assert!(rlock.release().await.unwrap());
        assert!(!rlock.locked().await);
    }

    #[tokio::test]
    async fn test_depth_counts_nesting() {
        let rlock = test_rlock();
        let opts = AcquireOptions::default().non_blocking().without_autoextend();

        assert!(rlock.acquire(opts.clone()).await.unwrap().is_some());
        let token = rlock.lock().token();
        assert!(rlock.acquire(opts.clone()).await.unwrap().is_some());
        assert_eq!(rlock.depth(), 2);
        assert_eq!(rlock.lock().token(), token);

        assert!(rlock.release().await.unwrap());
        assert_eq!(rlock.depth(), 1);
        assert!(rlock.locked().await);

        assert!(rlock.release().await.unwrap());
        assert_eq!(rlock.depth(), 0);
        assert!(!rlock.locked().await);
    }
}
