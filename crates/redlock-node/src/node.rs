//! The node contract

use std::time::Duration;

use async_trait::async_trait;
use redlock_common::NodeError;

/// One independent lock store
///
/// Every operation must be a single round trip executed atomically on the
/// store, because other clients may contact the same node concurrently.
/// Errors are reported as `Err` and turned into a "no" vote by the caller.
#[async_trait]
pub trait Node: Send + Sync {
    /// Set `resource = token` with expiry `ttl`, only if `resource` is unset.
    /// Returns `true` iff the value was newly set.
    async fn try_acquire(
        &self,
        resource: &str,
        token: &str,
        ttl: Duration,
    ) -> Result<bool, NodeError>;

    /// Delete `resource` only if it currently holds `token`.
    async fn release(&self, resource: &str, token: &str) -> Result<bool, NodeError>;

    /// Reset the expiry of `resource` to `ttl` only if it currently holds `token`.
    async fn extend(&self, resource: &str, token: &str, ttl: Duration) -> Result<bool, NodeError>;

    /// Remaining time to live of `resource` if it currently holds `token`.
    async fn get_ttl(&self, resource: &str, token: &str) -> Result<Option<Duration>, NodeError>;

    /// Human readable identity used in log fields; must not leak credentials
    fn describe(&self) -> String;
}
