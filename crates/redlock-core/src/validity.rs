//! Quorum and validity arithmetic
//!
//! A lock is held while at least `quorum(n)` nodes agree and the validity
//! `ttl - (elapsed + drift)` is positive, where `drift = ttl * 0.01 + 2ms`.

use std::time::Duration;

use redlock_common::{CLOCK_DRIFT_FACTOR, CLOCK_DRIFT_FLOOR_MS, MIN_NODES, duration_to_ms};

/// Minimum number of agreeing nodes: a strict majority, never below 3
pub fn quorum(node_count: usize) -> usize {
    MIN_NODES.max(node_count / 2 + 1)
}

/// Clock drift allowance for `ttl`, in milliseconds
pub fn drift_ms(ttl: Duration) -> f64 {
    duration_to_ms(ttl) * CLOCK_DRIFT_FACTOR + CLOCK_DRIFT_FLOOR_MS
}

/// Time in milliseconds a lock of `ttl` can be considered held after a
/// fan-out that took `elapsed`; may be negative
pub fn validity_ms(ttl: Duration, elapsed: Duration) -> f64 {
    remaining_ms(ttl, elapsed, ttl)
}

/// Remaining time in milliseconds of a node-reported `reported` TTL after
/// subtracting the request time and the drift allowance of the lock's `ttl`
pub fn remaining_ms(reported: Duration, elapsed: Duration, ttl: Duration) -> f64 {
    duration_to_ms(reported) - (duration_to_ms(elapsed) + drift_ms(ttl))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_quorum_small_sets() {
        assert_eq!(quorum(3), 3);
        assert_eq!(quorum(4), 3);
        assert_eq!(quorum(5), 3);
        assert_eq!(quorum(6), 4);
        assert_eq!(quorum(7), 4);
    }

    #[test]
    fn test_drift() {
        assert_eq!(drift_ms(Duration::from_millis(1000)), 12.0);
        assert_eq!(drift_ms(Duration::from_millis(120_000)), 1202.0);
        assert_eq!(drift_ms(Duration::ZERO), 2.0);
    }

    #[test]
    fn test_validity() {
        let v = validity_ms(Duration::from_millis(1000), Duration::from_millis(10));
        assert_eq!(v, 978.0);

        // Too slow: validity goes negative
        let v = validity_ms(Duration::from_millis(100), Duration::from_millis(200));
        assert!(v < 0.0);
    }

    #[test]
    fn test_remaining_uses_lock_ttl_for_drift() {
        let r = remaining_ms(
            Duration::from_millis(500),
            Duration::from_millis(5),
            Duration::from_millis(1000),
        );
        assert_eq!(r, 483.0);
    }

    proptest! {
        #[test]
        fn quorum_is_strict_majority(n in 3usize..100_000) {
            let q = quorum(n);
            prop_assert_eq!(q, std::cmp::max(3, n / 2 + 1));
            prop_assert!(q * 2 > n);
            prop_assert!(q >= 3);
            prop_assert!(q <= n);
        }

        #[test]
        fn drift_has_floor(ttl_ms in 1u64..10_000_000) {
            let ttl = Duration::from_millis(ttl_ms);
            let d = drift_ms(ttl);
            prop_assert!(d >= 2.0);
            prop_assert!((d - (ttl_ms as f64 * 0.01 + 2.0)).abs() < 1e-6);
        }

        #[test]
        fn validity_never_exceeds_ttl_minus_drift(ttl_ms in 1u64..1_000_000, elapsed_ms in 0u64..10_000) {
            let ttl = Duration::from_millis(ttl_ms);
            let v = validity_ms(ttl, Duration::from_millis(elapsed_ms));
            prop_assert!(v <= ttl_ms as f64 - drift_ms(ttl) + 1e-6);
        }
    }
}
