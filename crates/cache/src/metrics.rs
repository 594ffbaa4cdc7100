//! Counters for cache lookups and best-effort side effects.
//!
//! The server registers these with its registry via [`collectors`].

use prometheus::core::Collector;
use prometheus::{IntCounterVec, Opts};
use std::sync::LazyLock;

/// Cache-aside lookups by result (hit, miss, decode_error, error).
pub static CACHE_LOOKUPS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new("silo_cache_lookups_total", "Cache-aside lookups by result"),
        &["result"],
    )
    .expect("metric creation failed")
});

/// Best-effort side effects that failed and were skipped, by kind.
pub static BEST_EFFORT_FAILURES: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "silo_best_effort_failures_total",
            "Best-effort side effects that failed and were skipped",
        ),
        &["kind"],
    )
    .expect("metric creation failed")
});

/// Record a skipped best-effort side effect.
pub fn best_effort_failed(kind: &str) {
    BEST_EFFORT_FAILURES.with_label_values(&[kind]).inc();
}

/// Collectors owned by this crate.
pub fn collectors() -> Vec<Box<dyn Collector>> {
    vec![
        Box::new(CACHE_LOOKUPS.clone()),
        Box::new(BEST_EFFORT_FAILURES.clone()),
    ]
}
