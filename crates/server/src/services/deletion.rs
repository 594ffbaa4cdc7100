//! Deferred deletion: scheduling on soft-delete and the consuming worker.

use crate::metrics::record_deletion;
use crate::services::reclaim::{Reclaim, Reclaimer};
use silo_core::DeferredDeletionTask;
use silo_metadata::PurgeOutcome;
use silo_queue::{DelayQueue, Delivery, WorkQueue};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Publishes deletion tasks with the grace period as delay.
#[derive(Clone)]
pub struct DeletionScheduler {
    queue: Arc<dyn DelayQueue>,
    grace_period: Duration,
}

impl DeletionScheduler {
    pub fn new(queue: Arc<dyn DelayQueue>, grace_period: Duration) -> Self {
        Self {
            queue,
            grace_period,
        }
    }

    /// Best-effort: a failed schedule is logged and counted, and left to
    /// the reconciliation sweep.
    pub async fn schedule(&self, task: &DeferredDeletionTask) -> bool {
        let result = match task.to_json() {
            Ok(payload) => self
                .queue
                .publish(payload, self.grace_period)
                .await
                .map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };
        match result {
            Ok(()) => {
                record_deletion("scheduled");
                tracing::info!(
                    hash = %task.hash,
                    owner = %task.owner,
                    grace_secs = self.grace_period.as_secs(),
                    "scheduled deferred deletion"
                );
                true
            }
            Err(e) => {
                record_deletion("schedule_failed");
                silo_cache::metrics::best_effort_failed("deletion_schedule");
                tracing::warn!(
                    hash = %task.hash,
                    owner = %task.owner,
                    error = %e,
                    "failed to schedule deferred deletion"
                );
                false
            }
        }
    }
}

/// How a processed task should be settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    Ack,
    /// Failed; retry with backoff, counting towards parking.
    Requeue,
    /// The hash is locked by a writer; retry without counting the attempt.
    Defer,
    Discard(String),
}

/// Consumes deletion tasks whose grace period has elapsed.
pub struct DeletionWorker {
    reclaimer: Arc<Reclaimer>,
}

impl DeletionWorker {
    pub fn new(reclaimer: Arc<Reclaimer>) -> Self {
        Self { reclaimer }
    }

    /// Consume `queue` until it drains.
    pub fn spawn(self: Arc<Self>, queue: Arc<dyn WorkQueue>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(delivery) = queue.next().await {
                self.handle(delivery).await;
            }
            tracing::info!("deletion worker stopped");
        })
    }

    async fn handle(&self, delivery: Delivery) {
        match self.process(delivery.payload()).await {
            Disposition::Ack => delivery.ack(),
            Disposition::Requeue => delivery.nack_requeue(),
            Disposition::Defer => delivery.defer(),
            Disposition::Discard(reason) => delivery.nack_discard(reason),
        }
    }

    /// Decide the fate of one task payload.
    pub async fn process(&self, payload: &[u8]) -> Disposition {
        let task = match DeferredDeletionTask::from_json(payload) {
            Ok(task) => task,
            Err(e) => {
                record_deletion("malformed");
                return Disposition::Discard(format!("malformed deletion task: {e}"));
            }
        };

        match self.reclaimer.reclaim(&task.hash).await {
            Ok(Reclaim::Locked) => {
                record_deletion("deferred");
                tracing::debug!(hash = %task.hash, "hash is being written, deferring");
                Disposition::Defer
            }
            Ok(Reclaim::Done(PurgeOutcome::GracePending)) => {
                // the newer recycle scheduled its own task
                record_deletion(PurgeOutcome::GracePending.as_str());
                tracing::info!(
                    hash = %task.hash,
                    owner = %task.owner,
                    "content recycled again since this task was scheduled, skipping"
                );
                Disposition::Ack
            }
            Ok(Reclaim::Done(outcome)) => {
                record_deletion(outcome.as_str());
                tracing::info!(
                    hash = %task.hash,
                    owner = %task.owner,
                    file_name = %task.file_name,
                    outcome = outcome.as_str(),
                    "processed deferred deletion"
                );
                Disposition::Ack
            }
            Err(e) => {
                record_deletion("failed");
                tracing::warn!(hash = %task.hash, error = %e, "deferred deletion failed");
                if e.is_transient() {
                    Disposition::Requeue
                } else {
                    Disposition::Discard(e.to_string())
                }
            }
        }
    }
}
