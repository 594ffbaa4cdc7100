//! Operation log: fire-and-forget publishing and the persisting worker.

use crate::error::ServiceResult;
use crate::metrics::AUDIT_EVENTS_DROPPED;
use silo_core::{AuditEvent, AuditOperation, AuditOutcome, ResourceType};
use silo_metadata::{AuditEventRow, CatalogStore};
use silo_queue::{DelayQueue, Delivery, WorkQueue};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Publishes audit events without ever failing the caller.
#[derive(Clone)]
pub struct AuditSink {
    queue: Option<Arc<dyn DelayQueue>>,
}

impl AuditSink {
    pub fn new(queue: Arc<dyn DelayQueue>) -> Self {
        Self { queue: Some(queue) }
    }

    /// A sink that discards everything (audit disabled).
    pub fn disabled() -> Self {
        Self { queue: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.queue.is_some()
    }

    /// Publish `event`. A refused or unencodable event is dropped, logged
    /// and counted.
    pub async fn record(&self, event: AuditEvent) {
        let Some(queue) = &self.queue else {
            return;
        };
        let payload = match serde_json::to_vec(&event) {
            Ok(payload) => payload,
            Err(e) => {
                AUDIT_EVENTS_DROPPED.inc();
                tracing::warn!(error = %e, "failed to encode audit event, dropping");
                return;
            }
        };
        if let Err(e) = queue.publish(payload, Duration::ZERO).await {
            AUDIT_EVENTS_DROPPED.inc();
            tracing::warn!(
                event_id = %event.event_id,
                operation = event.operation.as_str(),
                error = %e,
                "audit event dropped"
            );
        }
    }

    /// Settle `event` against an operation's result: unchanged on success,
    /// marked failed with the error text otherwise.
    ///
    /// Must stay synchronous: `&result` may not be held across an await,
    /// as a result carrying a `ByteStream` is not `Sync`.
    pub fn finish_event<T>(event: AuditEvent, result: &ServiceResult<T>) -> AuditEvent {
        match result {
            Ok(_) => event,
            Err(e) => AuditEvent {
                outcome: AuditOutcome::Failed,
                error_message: Some(e.to_string()),
                ..event
            },
        }
    }
}

/// Builder shorthand for the common success event.
pub fn file_event(actor: &str, operation: AuditOperation, resource_id: &str) -> AuditEvent {
    AuditEvent::success(actor, operation, ResourceType::File, resource_id)
}

/// Persist events from `queue` until it drains.
///
/// Inserts dedupe on `event_id`, so redelivery is harmless.
pub fn spawn_audit_writer(
    queue: Arc<dyn WorkQueue>,
    catalog: Arc<dyn CatalogStore>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(delivery) = queue.next().await {
            persist(catalog.as_ref(), delivery).await;
        }
        tracing::info!("audit writer stopped");
    })
}

async fn persist(catalog: &dyn CatalogStore, delivery: Delivery) {
    let event: AuditEvent = match serde_json::from_slice(delivery.payload()) {
        Ok(event) => event,
        Err(e) => {
            delivery.nack_discard(format!("undecodable audit event: {e}"));
            return;
        }
    };
    let row = match AuditEventRow::from_event(&event) {
        Ok(row) => row,
        Err(e) => {
            delivery.nack_discard(format!("unencodable audit event: {e}"));
            return;
        }
    };
    match catalog.insert_audit_event(&row).await {
        Ok(inserted) => {
            if !inserted {
                tracing::debug!(event_id = %event.event_id, "duplicate audit event ignored");
            }
            delivery.ack();
        }
        Err(e) => {
            tracing::warn!(event_id = %event.event_id, error = %e, "failed to persist audit event");
            delivery.nack_requeue();
        }
    }
}
