//! Lock configuration loading
//!
//! Settings come from an optional YAML/TOML/JSON file, overridden by
//! `REDLOCK_*` environment variables:
//!
//! ```yaml
//! nodes:
//!   - url: redis://10.0.0.1:6379/0
//!   - url: redis://10.0.0.2:6379/0
//!   - host: 10.0.0.3
//!     password: secret
//! retry_times: 3
//! retry_delay_ms: 200
//! ttl_ms: 120000
//! node_timeout_ms: 100
//! ```
//!
//! `REDLOCK_TTL_MS=30000` overrides `ttl_ms`.

use std::path::Path;
use std::time::Duration;

use config::{Config, Environment, File, FileFormat};
use redlock_common::{
    DEFAULT_NODE_TIMEOUT_MS, DEFAULT_RETRY_DELAY_MS, DEFAULT_RETRY_TIMES, DEFAULT_TTL_MS,
    ENV_PREFIX, RedlockError, Result,
};
use redlock_node::NodeDescriptor;
use serde::Deserialize;

use crate::lock::LockOptions;
use crate::node_set::NodeSet;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RedlockConfig {
    pub nodes: Vec<NodeDescriptor>,
    pub retry_times: u32,
    pub retry_delay_ms: u64,
    pub ttl_ms: u64,
    pub node_timeout_ms: u64,
}

impl Default for RedlockConfig {
    fn default() -> Self {
        Self {
            nodes: Vec::new(),
            retry_times: DEFAULT_RETRY_TIMES,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
            ttl_ms: DEFAULT_TTL_MS,
            node_timeout_ms: DEFAULT_NODE_TIMEOUT_MS,
        }
    }
}

impl RedlockConfig {
    /// Load from an optional file plus `REDLOCK_*` environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path));
        }
        let settings = builder
            .add_source(environment())
            .build()
            .map_err(|e| RedlockError::Config(e.to_string()))?;

        settings
            .try_deserialize()
            .map_err(|e| RedlockError::Config(e.to_string()))
    }

    /// Parse a YAML document, without environment overrides
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Config::builder()
            .add_source(File::from_str(yaml, FileFormat::Yaml))
            .build()
            .and_then(|settings| settings.try_deserialize())
            .map_err(|e| RedlockError::Config(e.to_string()))
    }

    pub fn lock_options(&self) -> LockOptions {
        LockOptions::default()
            .with_retry_times(self.retry_times)
            .with_retry_delay(Duration::from_millis(self.retry_delay_ms))
            .with_ttl(Duration::from_millis(self.ttl_ms))
    }

    pub fn node_timeout(&self) -> Duration {
        Duration::from_millis(self.node_timeout_ms)
    }

    /// Build the node set described by `nodes`
    pub fn node_set(&self) -> Result<NodeSet> {
        Ok(NodeSet::connect(&self.nodes)?.with_node_timeout(self.node_timeout()))
    }
}

fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}
