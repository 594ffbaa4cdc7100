//! Queue counters, registered by the server via [`collectors`].

use prometheus::core::Collector;
use prometheus::{IntCounterVec, Opts};
use std::sync::LazyLock;

/// Message lifecycle events by queue name and event.
pub static QUEUE_EVENTS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new("silo_queue_events_total", "Queue message lifecycle events"),
        &["queue", "event"],
    )
    .expect("metric creation failed")
});

pub(crate) fn record(queue: &str, event: &str) {
    QUEUE_EVENTS.with_label_values(&[queue, event]).inc();
}

pub fn collectors() -> Vec<Box<dyn Collector>> {
    vec![Box::new(QUEUE_EVENTS.clone())]
}
