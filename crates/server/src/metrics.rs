//! Prometheus metrics for the silo server.
//!
//! Counters cover the write paths, the deletion pipeline and every
//! best-effort side effect, so that skipped work stays visible.
//!
//! # Security Note
//!
//! The `/metrics` endpoint is unauthenticated to allow Prometheus scraping.
//! Metrics carry no owner names or hashes, but they do expose aggregate
//! usage. Restrict the endpoint to the scraper at the network level.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{
    self, Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry,
    TextEncoder,
};
use std::sync::{LazyLock, Once};

/// Global Prometheus registry for all metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

/// Single-shot and fast uploads by outcome (created, deduplicated, conflict, failed).
pub static UPLOADS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new("silo_uploads_total", "Uploads by outcome"),
        &["outcome"],
    )
    .expect("metric creation failed")
});

pub static DEDUP_HITS: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "silo_dedup_hits_total",
        "Writes satisfied by linking content that already existed",
    )
    .expect("metric creation failed")
});

/// Lease acquisitions that found the lock held, by lock kind.
pub static LOCK_CONFLICTS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new("silo_lock_conflicts_total", "Lease locks found held"),
        &["lock"],
    )
    .expect("metric creation failed")
});

/// Multipart chunk submissions by outcome.
pub static MULTIPART_CHUNKS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new("silo_multipart_chunks_total", "Multipart chunk submissions"),
        &["outcome"],
    )
    .expect("metric creation failed")
});

/// Multipart completions by outcome.
pub static MULTIPART_COMPLETIONS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "silo_multipart_completions_total",
            "Multipart completion attempts",
        ),
        &["outcome"],
    )
    .expect("metric creation failed")
});

pub static SOFT_DELETES: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new("silo_soft_deletes_total", "Links moved to the recycle bin")
        .expect("metric creation failed")
});

/// Deletion pipeline events: scheduled, schedule_failed, and one per
/// processing outcome.
pub static DELETION_TASKS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new("silo_deletion_tasks_total", "Deferred deletion task events"),
        &["event"],
    )
    .expect("metric creation failed")
});

pub static BLOBS_REMOVED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "silo_blobs_removed_total",
        "Blobs physically removed from the blob store",
    )
    .expect("metric creation failed")
});

pub static AUDIT_EVENTS_DROPPED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "silo_audit_events_dropped_total",
        "Audit events dropped because the audit queue refused them",
    )
    .expect("metric creation failed")
});

pub static SWEEP_RECONCILED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "silo_sweep_reconciled_total",
        "Unreferenced records retired by the reconciliation sweep",
    )
    .expect("metric creation failed")
});

pub static BACKGROUND_TASK_PANICS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "silo_background_task_panics_total",
            "Background tasks that terminated with a panic",
        ),
        &["task"],
    )
    .expect("metric creation failed")
});

pub static BLOB_WRITE_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "silo_blob_write_duration_seconds",
            "Time taken to write or compose a content blob",
        )
        .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]),
    )
    .expect("metric creation failed")
});

static REGISTER_ONCE: Once = Once::new();

/// Register all metrics with the global registry.
///
/// Includes the collectors owned by the cache and queue crates.
pub fn register_metrics() {
    REGISTER_ONCE.call_once(|| {
        let local: Vec<Box<dyn prometheus::core::Collector>> = vec![
            Box::new(UPLOADS.clone()),
            Box::new(DEDUP_HITS.clone()),
            Box::new(LOCK_CONFLICTS.clone()),
            Box::new(MULTIPART_CHUNKS.clone()),
            Box::new(MULTIPART_COMPLETIONS.clone()),
            Box::new(SOFT_DELETES.clone()),
            Box::new(DELETION_TASKS.clone()),
            Box::new(BLOBS_REMOVED.clone()),
            Box::new(AUDIT_EVENTS_DROPPED.clone()),
            Box::new(SWEEP_RECONCILED.clone()),
            Box::new(BACKGROUND_TASK_PANICS.clone()),
            Box::new(BLOB_WRITE_DURATION.clone()),
        ];
        let collectors = local
            .into_iter()
            .chain(silo_cache::metrics::collectors())
            .chain(silo_queue::metrics::collectors());
        for collector in collectors {
            REGISTRY
                .register(collector)
                .expect("metric registration failed");
        }
    });
}

/// GET /metrics - Prometheus metrics endpoint.
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = Vec::new();
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            format!("Failed to encode metrics: {e}").into_bytes(),
        ),
    }
}

pub fn record_upload(outcome: &str) {
    UPLOADS.with_label_values(&[outcome]).inc();
}

pub fn record_lock_conflict(lock: &str) {
    LOCK_CONFLICTS.with_label_values(&[lock]).inc();
}

pub fn record_deletion(event: &str) {
    DELETION_TASKS.with_label_values(&[event]).inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_registration() {
        register_metrics();
        register_metrics();
        record_upload("created");
        let names: Vec<String> = REGISTRY
            .gather()
            .iter()
            .map(|family| family.get_name().to_string())
            .collect();
        assert!(names.contains(&"silo_uploads_total".to_string()));
    }
}
