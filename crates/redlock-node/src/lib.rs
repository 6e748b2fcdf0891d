//! Redlock Node - the per-node contract and its backends
//!
//! This crate provides:
//! - The `Node` trait: four compare-and-act operations on one independent store
//! - `MemoryNode`: an in-process store with real expiry semantics
//! - `RedisNode`: a Redis-backed node (feature `redis`)
//! - `NodeDescriptor`: connection details resolved into node handles

pub mod descriptor;
pub mod memory;
pub mod node;
#[cfg(feature = "redis")]
pub mod redis_node;

pub use descriptor::NodeDescriptor;
pub use memory::MemoryNode;
pub use node::Node;
#[cfg(feature = "redis")]
pub use redis_node::RedisNode;

pub use redlock_common::NodeError;
