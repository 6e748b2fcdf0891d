//! Redis-backed lock node
//!
//! Acquisition is a plain `SET NX PX`; release, extend and TTL reads are Lua
//! scripts comparing the stored token before acting, so each operation is a
//! single atomic round trip on the server.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{Client, Script};
use redlock_common::NodeError;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::node::Node;

const RELEASE_SCRIPT: &str = r#"
if redis.call("get", KEYS[1]) == ARGV[1] then
    return redis.call("del", KEYS[1])
else
    return 0
end
"#;

const EXTEND_SCRIPT: &str = r#"
if redis.call("get", KEYS[1]) == ARGV[1] then
    return redis.call("pexpire", KEYS[1], ARGV[2])
else
    return 0
end
"#;

const GET_TTL_SCRIPT: &str = r#"
if redis.call("get", KEYS[1]) == ARGV[1] then
    return redis.call("pttl", KEYS[1])
else
    return 0
end
"#;

/// Lock node talking to one Redis server
///
/// The connection is opened lazily on first use and re-established by the
/// connection manager after failures, so an unreachable server only costs
/// that node's vote.
pub struct RedisNode {
    client: Client,
    connection: OnceCell<ConnectionManager>,
    release: Script,
    extend: Script,
    get_ttl: Script,
    label: String,
}

impl RedisNode {
    /// Create a node for `url` without connecting yet
    pub fn open(url: &str) -> Result<Self, NodeError> {
        let client = Client::open(url).map_err(NodeError::backend)?;
        Ok(Self {
            client,
            connection: OnceCell::new(),
            release: Script::new(RELEASE_SCRIPT),
            extend: Script::new(EXTEND_SCRIPT),
            get_ttl: Script::new(GET_TTL_SCRIPT),
            label: redact_credentials(url),
        })
    }

    async fn connection(&self) -> Result<ConnectionManager, NodeError> {
        let manager = self
            .connection
            .get_or_try_init(|| async {
                debug!(node = %self.label, "Connecting to redis node");
                ConnectionManager::new(self.client.clone()).await
            })
            .await
            .map_err(NodeError::backend)?;
        Ok(manager.clone())
    }
}

#[async_trait]
impl Node for RedisNode {
    async fn try_acquire(
        &self,
        resource: &str,
        token: &str,
        ttl: Duration,
    ) -> Result<bool, NodeError> {
        let mut conn = self.connection().await?;
        let reply: Option<String> = redis::cmd("SET")
            .arg(resource)
            .arg(token)
            .arg("NX")
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await
            .map_err(NodeError::backend)?;
        Ok(reply.is_some())
    }

    async fn release(&self, resource: &str, token: &str) -> Result<bool, NodeError> {
        let mut conn = self.connection().await?;
        let deleted: i64 = self
            .release
            .key(resource)
            .arg(token)
            .invoke_async(&mut conn)
            .await
            .map_err(NodeError::backend)?;
        Ok(deleted == 1)
    }

    async fn extend(&self, resource: &str, token: &str, ttl: Duration) -> Result<bool, NodeError> {
        let mut conn = self.connection().await?;
        let updated: i64 = self
            .extend
            .key(resource)
            .arg(token)
            .arg(ttl_millis(ttl))
            .invoke_async(&mut conn)
            .await
            .map_err(NodeError::backend)?;
        Ok(updated == 1)
    }

    async fn get_ttl(&self, resource: &str, token: &str) -> Result<Option<Duration>, NodeError> {
        let mut conn = self.connection().await?;
        let pttl: i64 = self
            .get_ttl
            .key(resource)
            .arg(token)
            .invoke_async(&mut conn)
            .await
            .map_err(NodeError::backend)?;
        // PTTL answers -1 (no expiry) and -2 (missing key) as negatives
        Ok((pttl > 0).then(|| Duration::from_millis(pttl as u64)))
    }

    fn describe(&self) -> String {
        self.label.clone()
    }
}

/// Millisecond TTL argument; PX rejects zero so round up to at least 1
fn ttl_millis(ttl: Duration) -> u64 {
    (ttl.as_millis() as u64).max(1)
}

/// Strip `user:password@` from a connection URL so it can be logged
fn redact_credentials(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}://{}", &url[..scheme_end], &url[at + 1..])
        }
        _ => url.to_string(),
    }
}
