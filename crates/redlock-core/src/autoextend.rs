//! Background lease renewal
//!
//! The worker sleeps for a fixed fraction of the remaining validity, extends the
//! lock, and repeats with the fresh validity. It exits when told to stop, when
//! its timeout would be exceeded, when the lock handle is gone, or when the
//! validity has dropped too low to renew in time.

use std::sync::Weak;
use std::time::Duration;

use redlock_common::{
    AUTOEXTEND_MIN_VALIDITY_MS, AUTOEXTEND_RATIO, duration_from_ms, duration_to_ms,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::lock::{Lock, LockInner};

/// Owner of a running autoextend worker
///
/// Dropping the handle signals the worker to stop without waiting for it.
pub(crate) struct AutoExtendHandle {
    stop_tx: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl AutoExtendHandle {
    pub(crate) fn spawn(lock: Weak<LockInner>, timeout: Option<Duration>) -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(run(lock, timeout, stop_rx));
        Self {
            stop_tx,
            task: Some(task),
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Signal the worker and wait until it has exited
    pub(crate) async fn stop(mut self) {
        self.stop_tx.send_replace(true);
        if let Some(task) = self.task.take()
            && let Err(e) = task.await
            && e.is_panic()
        {
            warn!(error = %e, "Autoextend worker panicked");
        }
    }
}

impl Drop for AutoExtendHandle {
    fn drop(&mut self) {
        self.stop_tx.send_replace(true);
    }
}

async fn run(
    weak: Weak<LockInner>,
    timeout: Option<Duration>,
    mut stop_rx: watch::Receiver<bool>,
) {
    let started = Instant::now();

    let mut expected_ms = match weak.upgrade().map(Lock::from_inner) {
        Some(lock) => match lock.check_times().await {
            Ok(report) => report.min_remaining().map(duration_to_ms).unwrap_or(0.0),
            Err(e) => {
                debug!(error = %e, "Autoextend could not read remaining time");
                0.0
            }
        },
        None => return,
    };

    loop {
        if *stop_rx.borrow() {
            break;
        }

        if expected_ms < AUTOEXTEND_MIN_VALIDITY_MS {
            warn!(
                validity_ms = expected_ms,
                "Lock validity too low to autoextend, stopping"
            );
            break;
        }

        let wait = duration_from_ms(expected_ms * AUTOEXTEND_RATIO);
        if let Some(timeout) = timeout
            && started.elapsed() + wait >= timeout
        {
            debug!(?timeout, "Autoextend timeout reached");
            break;
        }

        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = stop_rx.changed() => break,
        }

        let Some(lock) = weak.upgrade().map(Lock::from_inner) else {
            break;
        };

        let extended = tokio::select! {
            result = lock.extend() => result,
            _ = stop_rx.changed() => break,
        };

        expected_ms = match extended {
            Ok(Some(validity)) => {
                let validity_ms = duration_to_ms(validity);
                debug!(resource = %lock.resource(), validity_ms, "Lock autoextended");
                validity_ms
            }
            Ok(None) => {
                warn!(resource = %lock.resource(), "Autoextend could not reach quorum");
                0.0
            }
            Err(e) => {
                warn!(resource = %lock.resource(), error = %e, "Autoextend failed");
                0.0
            }
        };
    }
}
