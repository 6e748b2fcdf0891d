//! Utility functions for redlock
//!
//! Millisecond conversions, retry jitter and token minting.

use std::time::Duration;

use rand::Rng;

/// Convert fractional milliseconds into a `Duration`, clamping negatives to zero
pub fn duration_from_ms(ms: f64) -> Duration {
    if ms.is_finite() && ms > 0.0 {
        Duration::from_secs_f64(ms / 1000.0)
    } else {
        Duration::ZERO
    }
}

/// Convert a `Duration` into fractional milliseconds
pub fn duration_to_ms(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}

/// Random delay uniformly drawn from `[0, max]` at millisecond granularity
pub fn jitter(max: Duration) -> Duration {
    let max_ms = max.as_millis().min(u64::MAX as u128) as u64;
    Duration::from_millis(rand::rng().random_range(0..=max_ms))
}

/// Mint a fresh high-entropy lock token
///
/// # Examples
///
/// ```
/// use redlock_common::new_token;
///
/// let token = new_token();
/// assert_eq!(token.len(), 32);
/// assert_ne!(token, new_token());
/// ```
pub fn new_token() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}
