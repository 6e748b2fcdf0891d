//! Redlock Common - Shared types and utilities
//!
//! This crate provides the foundational types used across all redlock components:
//! - Error types for lock operations and node calls
//! - Default lock parameters and the clock drift constants
//! - Timing and token helpers

pub mod error;
pub mod utils;

// Re-exports for convenience
pub use error::{NodeError, RedlockError, Result};
pub use utils::{duration_from_ms, duration_to_ms, jitter, new_token};

/// Minimum number of independent nodes a lock can be built on
pub const MIN_NODES: usize = 3;

/// Default number of retries after a failed acquire or extend attempt
pub const DEFAULT_RETRY_TIMES: u32 = 3;

/// Default upper bound of the random delay between attempts (milliseconds)
pub const DEFAULT_RETRY_DELAY_MS: u64 = 200;

/// Default lease duration (milliseconds)
pub const DEFAULT_TTL_MS: u64 = 120_000;

/// Default bound on a single call to one node (milliseconds)
pub const DEFAULT_NODE_TIMEOUT_MS: u64 = 100;

/// Fraction of the TTL added to the drift allowance
pub const CLOCK_DRIFT_FACTOR: f64 = 0.01;

/// Fixed drift allowance in milliseconds: 1ms node expiry precision plus 1ms
/// minimum drift for small TTLs
pub const CLOCK_DRIFT_FLOOR_MS: f64 = 2.0;

/// Autoextend renews once this fraction of the remaining validity has elapsed
pub const AUTOEXTEND_RATIO: f64 = 0.75;

/// Below this many milliseconds of validity autoextend gives up
pub const AUTOEXTEND_MIN_VALIDITY_MS: f64 = 2.0;

/// Prefix for environment variable overrides of the lock configuration
pub const ENV_PREFIX: &str = "REDLOCK";
