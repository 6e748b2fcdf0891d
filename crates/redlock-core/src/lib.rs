//! Redlock Core - Distributed locking over independent nodes
//!
//! This crate provides:
//! - `Lock`: quorum acquisition with drift-corrected validity, extension,
//!   release and scoped use
//! - Background autoextend of held locks
//! - `RLock`: a reentrant lock with a recursion counter
//! - `LockFactory` / `RLockFactory`: locks sharing one set of node connections
//! - `RedlockConfig`: file and environment configuration
//! - Outcome counters through the `metrics` facade

mod autoextend;
pub mod config;
pub mod factory;
pub mod lock;
pub mod node_set;
pub mod rlock;
pub mod telemetry;
pub mod validity;

pub use self::config::RedlockConfig;
pub use factory::{LockFactory, RLockFactory};
pub use lock::{AcquireOptions, Lock, LockOptions, TtlReport};
pub use node_set::NodeSet;
pub use rlock::RLock;
pub use telemetry::describe_metrics;
pub use validity::{drift_ms, quorum, validity_ms};

pub use redlock_common::{NodeError, RedlockError, Result};
pub use redlock_node::{MemoryNode, Node, NodeDescriptor};
