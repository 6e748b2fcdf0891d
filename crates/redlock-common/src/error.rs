//! Error types for redlock
//!
//! This module defines:
//! - `RedlockError`: errors surfaced to lock callers (misuse and fatal configuration)
//! - `NodeError`: failures of a single node call, recovered at the fan-out boundary

/// Errors surfaced by lock operations
///
/// Failing to reach quorum is not an error: acquire/extend report it as `None`
/// and release as `false`.
#[derive(thiserror::Error, Debug)]
pub enum RedlockError {
    #[error(
        "at least 3 nodes are required for redlock to work, got {0}; \
         consider a single-node lock if lesser guarantees are acceptable"
    )]
    InsufficientNodes(usize),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    #[error("lock lost: {0}")]
    LockLost(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("node error: {0}")]
    Node(#[from] NodeError),
}

pub type Result<T> = std::result::Result<T, RedlockError>;

/// Failure of one call against one node
#[derive(thiserror::Error, Debug)]
pub enum NodeError {
    #[error("node unavailable: {0}")]
    Unavailable(String),

    #[error("node request timed out")]
    Timeout,

    #[error("unexpected node reply: {0}")]
    Protocol(String),

    #[error("invalid node descriptor: {0}")]
    InvalidDescriptor(String),

    #[error("node backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl NodeError {
    /// Wrap a backend-specific error
    pub fn backend<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        NodeError::Backend(Box::new(err))
    }
}
