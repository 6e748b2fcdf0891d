//! The distributed lock
//!
//! A `Lock` names one resource on a shared `NodeSet`. Acquiring it fans a
//! conditional set out to every node, and succeeds only when a quorum of nodes
//! accepted the fresh token and the drift-corrected validity is still positive.
//! Partial acquisitions are released before retrying.
//!
//! ```no_run
//! use std::sync::Arc;
//! use redlock_core::{AcquireOptions, Lock, LockOptions};
//! use redlock_node::{MemoryNode, Node};
//!
//! # async fn demo() -> redlock_common::Result<()> {
//! let nodes: Vec<Arc<dyn Node>> = (0..3)
//!     .map(|i| Arc::new(MemoryNode::new(format!("n{i}"))) as Arc<dyn Node>)
//!     .collect();
//! let lock = Lock::with_nodes("orders:42", nodes, LockOptions::default())?;
//!
//! if let Some(validity) = lock.acquire(AcquireOptions::default()).await? {
//!     // critical section, good for at most `validity`
//!     lock.release().await?;
//! }
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use redlock_common::{
    DEFAULT_RETRY_DELAY_MS, DEFAULT_RETRY_TIMES, DEFAULT_TTL_MS, RedlockError, Result,
    duration_from_ms, duration_to_ms, jitter, new_token,
};
use redlock_node::{Node, NodeDescriptor};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::autoextend::AutoExtendHandle;
use crate::node_set::NodeSet;
use crate::telemetry::{ACQUIRE_TOTAL, EXTEND_TOTAL, RELEASE_TOTAL, record};
use crate::validity::{remaining_ms, validity_ms};

/// Per-lock configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockOptions {
    /// Retries after a failed acquire or extend attempt
    pub retry_times: u32,
    /// Upper bound of the random pause between attempts
    pub retry_delay: Duration,
    /// Lease duration honored by each node
    pub ttl: Duration,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            retry_times: DEFAULT_RETRY_TIMES,
            retry_delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
            ttl: Duration::from_millis(DEFAULT_TTL_MS),
        }
    }
}

impl LockOptions {
    pub fn with_retry_times(mut self, retry_times: u32) -> Self {
        self.retry_times = retry_times;
        self
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }
}

/// Call-level options for `acquire`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcquireOptions {
    /// Keep trying until acquired or `timeout` passes
    pub blocking: bool,
    /// Bound on a blocking acquire; `None` blocks indefinitely
    pub timeout: Option<Duration>,
    /// Renew the lease in the background once acquired
    pub autoextend: bool,
    /// Stop renewing after this long regardless of the lock state
    pub autoextend_timeout: Option<Duration>,
}

impl Default for AcquireOptions {
    fn default() -> Self {
        Self {
            blocking: true,
            timeout: None,
            autoextend: true,
            autoextend_timeout: None,
        }
    }
}

impl AcquireOptions {
    /// Give up after `retry_times` retries instead of blocking
    pub fn non_blocking(mut self) -> Self {
        self.blocking = false;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn without_autoextend(mut self) -> Self {
        self.autoextend = false;
        self
    }

    pub fn with_autoextend_timeout(mut self, timeout: Duration) -> Self {
        self.autoextend = true;
        self.autoextend_timeout = Some(timeout);
        self
    }

    fn validate(&self) -> Result<()> {
        if !self.blocking && self.timeout.is_some() {
            return Err(RedlockError::InvalidArgument(
                "timeout cannot be set for a non-blocking acquire".to_string(),
            ));
        }
        Ok(())
    }
}

/// Result of polling every node for the lock's remaining time
#[derive(Debug, Clone, PartialEq)]
pub struct TtlReport {
    /// At least a quorum of nodes still hold the lock with time left
    pub held: bool,
    /// Drift-corrected remaining time per agreeing node
    pub remaining: Vec<Duration>,
}

impl TtlReport {
    pub fn min_remaining(&self) -> Option<Duration> {
        self.remaining.iter().min().copied()
    }
}

/// Token state of a lock instance
#[derive(Debug, Clone, PartialEq, Eq)]
enum TokenState {
    Unacquired,
    Held(String),
    Released(String),
}

pub(crate) struct LockInner {
    resource: String,
    nodes: NodeSet,
    options: LockOptions,
    token: Mutex<TokenState>,
    autoextend: Mutex<Option<AutoExtendHandle>>,
}

/// A distributed lock on one resource
///
/// Cloning yields another handle to the same lock instance (same token, same
/// autoextend worker).
#[derive(Clone)]
pub struct Lock {
    inner: Arc<LockInner>,
}

impl std::fmt::Debug for Lock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lock")
            .field("resource", &self.inner.resource)
            .field("options", &self.inner.options)
            .field("nodes", &self.inner.nodes)
            .finish()
    }
}

impl Lock {
    pub fn new(resource: impl Into<String>, nodes: NodeSet, options: LockOptions) -> Self {
        Self {
            inner: Arc::new(LockInner {
                resource: resource.into(),
                nodes,
                options,
                token: Mutex::new(TokenState::Unacquired),
                autoextend: Mutex::new(None),
            }),
        }
    }

    /// Build a lock over node handles; fails with fewer than three nodes
    pub fn with_nodes(
        resource: impl Into<String>,
        nodes: Vec<Arc<dyn Node>>,
        options: LockOptions,
    ) -> Result<Self> {
        Ok(Self::new(resource, NodeSet::new(nodes)?, options))
    }

    /// Build a lock over freshly created nodes
    pub fn connect(
        resource: impl Into<String>,
        descriptors: &[NodeDescriptor],
        options: LockOptions,
    ) -> Result<Self> {
        Ok(Self::new(resource, NodeSet::connect(descriptors)?, options))
    }

    pub(crate) fn from_inner(inner: Arc<LockInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn downgrade(&self) -> std::sync::Weak<LockInner> {
        Arc::downgrade(&self.inner)
    }

    pub fn resource(&self) -> &str {
        &self.inner.resource
    }

    pub fn options(&self) -> &LockOptions {
        &self.inner.options
    }

    pub fn ttl(&self) -> Duration {
        self.inner.options.ttl
    }

    pub fn quorum(&self) -> usize {
        self.inner.nodes.quorum()
    }

    pub fn node_count(&self) -> usize {
        self.inner.nodes.len()
    }

    /// Token of the current acquisition, if held
    pub fn token(&self) -> Option<String> {
        match &*self.inner.token.lock() {
            TokenState::Held(token) => Some(token.clone()),
            _ => None,
        }
    }

    /// Whether an autoextend worker is currently running
    pub fn is_autoextending(&self) -> bool {
        self.inner
            .autoextend
            .lock()
            .as_ref()
            .is_some_and(AutoExtendHandle::is_running)
    }

    /// Acquire the lock
    ///
    /// Returns the validity of the new lease, or `None` when a quorum could not
    /// be reached within the retry budget (non-blocking) or the timeout
    /// (blocking). Contention is never an error.
    pub async fn acquire(&self, opts: AcquireOptions) -> Result<Option<Duration>> {
        opts.validate()?;

        let validity = if opts.blocking {
            self.acquire_blocking(opts.timeout).await
        } else {
            self.acquire_with_retries().await
        };

        let Some(validity) = validity else {
            record(ACQUIRE_TOTAL, "failed");
            return Ok(None);
        };

        record(ACQUIRE_TOTAL, "acquired");
        if opts.autoextend {
            self.spawn_autoextend(opts.autoextend_timeout).await;
        }
        Ok(Some(validity))
    }

    /// Extend the lease if still held, otherwise acquire anew
    pub async fn acquire_or_extend(&self, opts: AcquireOptions) -> Result<Option<Duration>> {
        if self.locked().await
            && let Some(validity) = self.extend().await?
        {
            return Ok(Some(validity));
        }
        self.acquire(opts).await
    }

    /// Reset the lease to the full TTL on every node
    ///
    /// Returns the new validity, or `None` when a quorum could not be reached
    /// after `retry_times` retries.
    pub async fn extend(&self) -> Result<Option<Duration>> {
        let token = self.require_token()?;
        let LockOptions {
            retry_times,
            retry_delay,
            ttl,
        } = self.inner.options;

        for attempt in 0..=retry_times {
            let start = Instant::now();
            let extended = self
                .inner
                .nodes
                .extend_all(&self.inner.resource, &token, ttl)
                .await;
            let validity = validity_ms(ttl, start.elapsed());

            if extended >= self.quorum() && validity > 0.0 {
                record(EXTEND_TOTAL, "extended");
                return Ok(Some(duration_from_ms(validity)));
            }

            debug!(
                resource = %self.inner.resource,
                extended,
                quorum = self.quorum(),
                validity_ms = validity,
                attempt,
                "Lock extension failed"
            );
            if attempt < retry_times {
                tokio::time::sleep(jitter(retry_delay)).await;
            }
        }

        record(EXTEND_TOTAL, "failed");
        Ok(None)
    }

    /// Poll every node for the remaining lease time
    pub async fn check_times(&self) -> Result<TtlReport> {
        let token = self.require_token()?;
        let ttl = self.inner.options.ttl;

        let start = Instant::now();
        let reported = self.inner.nodes.ttl_all(&self.inner.resource, &token).await;
        let elapsed = start.elapsed();

        // Keys may expire while other nodes are still being queried
        let remaining: Vec<Duration> = reported
            .into_iter()
            .map(|node_ttl| remaining_ms(node_ttl, elapsed, ttl))
            .filter(|ms| *ms > 0.0)
            .map(duration_from_ms)
            .collect();
        let held = !remaining.is_empty() && remaining.len() >= self.quorum();

        Ok(TtlReport { held, remaining })
    }

    /// Whether the lock is acquired and a quorum of nodes still hold it
    pub async fn locked(&self) -> bool {
        if self.token().is_none() {
            return false;
        }
        self.check_times()
            .await
            .map(|report| report.held)
            .unwrap_or(false)
    }

    /// Release the lock
    ///
    /// Stops the autoextend worker first. Returns `true` iff a quorum of nodes
    /// deleted the key; unlike a local mutex this can fail while the lock was
    /// held. Releasing an already released lock is a no-op returning `false`.
    pub async fn release(&self) -> Result<bool> {
        let token = match &*self.inner.token.lock() {
            TokenState::Held(token) => Some(token.clone()),
            TokenState::Released(_) => None,
            TokenState::Unacquired => {
                return Err(RedlockError::InvalidOperation(
                    "release of a lock that was never acquired".to_string(),
                ));
            }
        };

        self.stop_autoextend().await;

        let Some(token) = token else {
            return Ok(false);
        };

        {
            let mut state = self.inner.token.lock();
            if *state == TokenState::Held(token.clone()) {
                *state = TokenState::Released(token.clone());
            }
        }

        let released = self
            .inner
            .nodes
            .release_all(&self.inner.resource, &token)
            .await;
        let ok = released >= self.quorum();

        if ok {
            record(RELEASE_TOTAL, "released");
            debug!(resource = %self.inner.resource, released, "Lock released");
        } else {
            record(RELEASE_TOTAL, "failed");
            warn!(
                resource = %self.inner.resource,
                released,
                quorum = self.quorum(),
                "Lock release did not reach quorum"
            );
        }
        Ok(ok)
    }

    /// Start renewing the lease in the background
    ///
    /// Any previous worker is stopped first. `timeout` bounds how long the
    /// worker keeps renewing.
    pub async fn start_autoextend(&self, timeout: Option<Duration>) -> Result<()> {
        if !self.locked().await {
            return Err(RedlockError::InvalidOperation(
                "cannot autoextend an un-acquired lock".to_string(),
            ));
        }
        self.spawn_autoextend(timeout).await;
        Ok(())
    }

    /// Stop the autoextend worker and wait for it to exit; idempotent
    pub async fn stop_autoextend(&self) {
        let handle = self.inner.autoextend.lock().take();
        if let Some(handle) = handle {
            handle.stop().await;
            info!(resource = %self.inner.resource, "Autoextend stopped");
        }
    }

    /// Run `body` while holding the lock
    ///
    /// The lock is released when `body` finishes, and also when it panics or
    /// the returned future is dropped. Returns `None` without running `body`
    /// if the lock could not be acquired.
    pub async fn scoped<F, Fut, T>(&self, opts: AcquireOptions, body: F) -> Result<Option<T>>
    where
        F: FnOnce(Duration) -> Fut,
        Fut: Future<Output = T>,
    {
        let Some(validity) = self.acquire(opts).await? else {
            return Ok(None);
        };

        let mut guard = ReleaseOnDrop::new(self.clone());
        let output = body(validity).await;
        guard.disarm();

        self.release().await?;
        Ok(Some(output))
    }

    pub(crate) fn require_token(&self) -> Result<String> {
        match &*self.inner.token.lock() {
            TokenState::Held(token) => Ok(token.clone()),
            TokenState::Released(_) => Err(RedlockError::InvalidOperation(
                "lock has already been released".to_string(),
            )),
            TokenState::Unacquired => Err(RedlockError::InvalidOperation(
                "invalid operation on a lock that was never acquired".to_string(),
            )),
        }
    }

    async fn spawn_autoextend(&self, timeout: Option<Duration>) {
        self.stop_autoextend().await;
        let handle = AutoExtendHandle::spawn(self.downgrade(), timeout);
        // A concurrent start may have raced us; dropping its handle stops it
        let previous = self.inner.autoextend.lock().replace(handle);
        drop(previous);
        info!(resource = %self.inner.resource, ?timeout, "Autoextend started");
    }

    /// One acquisition attempt with a fresh token
    ///
    /// With a deadline, node calls never run past it and the cleanup of a
    /// failed attempt runs in the background.
    async fn try_acquire_once(&self, deadline: Option<Instant>) -> Option<Duration> {
        let ttl = self.inner.options.ttl;
        let token = new_token();
        let nodes = &self.inner.nodes;

        let start = Instant::now();
        let acquired = match deadline {
            Some(deadline) => {
                let budget = deadline.saturating_duration_since(start);
                nodes
                    .try_acquire_within(&self.inner.resource, &token, ttl, budget)
                    .await
            }
            None => nodes.try_acquire_all(&self.inner.resource, &token, ttl).await,
        };
        let validity = validity_ms(ttl, start.elapsed());

        if acquired >= self.quorum() && validity > 0.0 {
            *self.inner.token.lock() = TokenState::Held(token);
            debug!(
                resource = %self.inner.resource,
                acquired,
                validity_ms = validity,
                "Lock acquired"
            );
            return Some(duration_from_ms(validity));
        }

        debug!(
            resource = %self.inner.resource,
            acquired,
            quorum = self.quorum(),
            validity_ms = validity,
            "Lock attempt failed, releasing partial acquisitions"
        );
        if deadline.is_some() {
            let nodes = nodes.clone();
            let resource = self.inner.resource.clone();
            tokio::spawn(async move {
                nodes.release_all(&resource, &token).await;
            });
        } else {
            nodes.release_all(&self.inner.resource, &token).await;
        }
        None
    }

    async fn acquire_with_retries(&self) -> Option<Duration> {
        let LockOptions {
            retry_times,
            retry_delay,
            ..
        } = self.inner.options;

        for attempt in 0..=retry_times {
            if let Some(validity) = self.try_acquire_once(None).await {
                return Some(validity);
            }
            if attempt < retry_times {
                tokio::time::sleep(jitter(retry_delay)).await;
            }
        }
        None
    }

    async fn acquire_blocking(&self, timeout: Option<Duration>) -> Option<Duration> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let retry_delay = self.inner.options.retry_delay;

        loop {
            if let Some(validity) = self.try_acquire_once(deadline).await {
                return Some(validity);
            }
            let wake = Instant::now() + jitter(retry_delay);
            match deadline {
                Some(deadline) if wake >= deadline => {
                    tokio::time::sleep_until(deadline).await;
                    debug!(
                        resource = %self.inner.resource,
                        timeout_ms = timeout.map(duration_to_ms),
                        "Blocking acquire timed out"
                    );
                    return None;
                }
                _ => tokio::time::sleep_until(wake).await,
            }
        }
    }
}

/// Releases the lock in a background task unless disarmed
struct ReleaseOnDrop {
    lock: Option<Lock>,
}

impl ReleaseOnDrop {
    fn new(lock: Lock) -> Self {
        Self { lock: Some(lock) }
    }

    fn disarm(&mut self) {
        self.lock = None;
    }
}

impl Drop for ReleaseOnDrop {
    fn drop(&mut self) {
        let Some(lock) = self.lock.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = lock.release().await {
                        warn!(resource = %lock.resource(), error = %e, "Scoped release failed");
                    }
                });
            }
            Err(_) => warn!(
                resource = %lock.resource(),
                "No runtime to release scoped lock; it will expire after its TTL"
            ),
        }
    }
}
