//! Node connection descriptors
//!
//! A node is described either by a URL or by discrete connection fields:
//!
//! ```yaml
//! nodes:
//!   - url: redis://10.0.0.1:6379/0
//!   - host: 10.0.0.2
//!     port: 6380
//!     password: secret
//!   - url: memory://local-3
//! ```

use std::sync::Arc;

use redlock_common::NodeError;
use serde::{Deserialize, Serialize};

use crate::memory::MemoryNode;
use crate::node::Node;

const DEFAULT_REDIS_PORT: u16 = 6379;
const MEMORY_SCHEME: &str = "memory://";

/// Connection details for one node
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeDescriptor {
    /// Full connection URL; takes precedence over the discrete fields
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub db: Option<i64>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

impl NodeDescriptor {
    /// Describe a node by URL
    pub fn from_url(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Default::default()
        }
    }

    /// Describe a Redis node by host and port
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: Some(host.into()),
            port: Some(port),
            ..Default::default()
        }
    }

    /// Describe a process-wide in-memory node
    pub fn memory(name: &str) -> Self {
        Self::from_url(format!("{MEMORY_SCHEME}{name}"))
    }

    /// Set the logical database
    pub fn with_db(mut self, db: i64) -> Self {
        self.db = Some(db);
        self
    }

    /// Set authentication credentials
    pub fn with_auth(mut self, username: Option<&str>, password: &str) -> Self {
        self.username = username.map(str::to_string);
        self.password = Some(password.to_string());
        self
    }

    /// Resolve into a connection URL
    pub fn to_url(&self) -> Result<String, NodeError> {
        if let Some(url) = &self.url {
            return Ok(url.clone());
        }

        let host = self.host.as_deref().ok_or_else(|| {
            NodeError::InvalidDescriptor("either 'url' or 'host' must be specified".to_string())
        })?;
        let port = self.port.unwrap_or(DEFAULT_REDIS_PORT);
        let db = self.db.unwrap_or(0);
        let auth = match (&self.username, &self.password) {
            (Some(user), Some(password)) => format!("{user}:{password}@"),
            (None, Some(password)) => format!(":{password}@"),
            (Some(user), None) => format!("{user}@"),
            (None, None) => String::new(),
        };

        Ok(format!("redis://{auth}{host}:{port}/{db}"))
    }

    /// Build a node handle; remote nodes connect lazily on first use
    pub fn connect(&self) -> Result<Arc<dyn Node>, NodeError> {
        let url = self.to_url()?;

        if let Some(name) = url.strip_prefix(MEMORY_SCHEME) {
            if name.is_empty() {
                return Err(NodeError::InvalidDescriptor(
                    "memory node needs a name".to_string(),
                ));
            }
            let node: Arc<dyn Node> = MemoryNode::shared(name);
            return Ok(node);
        }

        if is_redis_url(&url) {
            return connect_redis(&url);
        }

        Err(NodeError::InvalidDescriptor(format!(
            "unsupported node scheme in '{url}'"
        )))
    }
}

fn is_redis_url(url: &str) -> bool {
    ["redis://", "rediss://", "redis+unix://", "unix://"]
        .iter()
        .any(|scheme| url.starts_with(scheme))
}

#[cfg(feature = "redis")]
fn connect_redis(url: &str) -> Result<Arc<dyn Node>, NodeError> {
    let node: Arc<dyn Node> = Arc::new(crate::redis_node::RedisNode::open(url)?);
    Ok(node)
}

#[cfg(not(feature = "redis"))]
fn connect_redis(url: &str) -> Result<Arc<dyn Node>, NodeError> {
    Err(NodeError::InvalidDescriptor(format!(
        "'{url}' needs the 'redis' feature"
    )))
}
