// Lock outcome metrics
// Counters are emitted through the `metrics` facade; nothing is recorded until
// the application installs a recorder

use metrics::{counter, describe_counter};

pub const ACQUIRE_TOTAL: &str = "redlock_acquire_total";
pub const EXTEND_TOTAL: &str = "redlock_extend_total";
pub const RELEASE_TOTAL: &str = "redlock_release_total";

/// Register metric descriptions
/// Call once at startup, after installing a recorder
pub fn describe_metrics() {
    describe_counter!(
        ACQUIRE_TOTAL,
        "Lock acquisitions by outcome (acquired, failed)"
    );
    describe_counter!(
        EXTEND_TOTAL,
        "Lock extensions by outcome (extended, failed)"
    );
    describe_counter!(
        RELEASE_TOTAL,
        "Lock releases by outcome (released, failed)"
    );
}

pub(crate) fn record(metric: &'static str, outcome: &'static str) {
    counter!(metric, "outcome" => outcome).increment(1);
}
