//! Periodic reconciliation of unreferenced content.
//!
//! Catches content whose deletion task was never scheduled or was lost,
//! by running the worker's reclamation directly on records that have had
//! no active link for longer than the grace period.

use crate::error::ServiceResult;
use crate::metrics::SWEEP_RECONCILED;
use crate::services::reclaim::{Reclaim, Reclaimer};
use silo_metadata::{CatalogStore, PurgeOutcome};
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Counts from one sweep pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepStats {
    pub examined: u64,
    pub reclaimed: u64,
    pub skipped: u64,
    pub errors: u64,
}

pub struct ReconciliationSweep {
    catalog: Arc<dyn CatalogStore>,
    reclaimer: Arc<Reclaimer>,
    grace_period: Duration,
    batch_size: u32,
}

impl ReconciliationSweep {
    pub fn new(
        catalog: Arc<dyn CatalogStore>,
        reclaimer: Arc<Reclaimer>,
        grace_period: Duration,
        batch_size: u32,
    ) -> Self {
        Self {
            catalog,
            reclaimer,
            grace_period,
            batch_size,
        }
    }

    /// Run one pass over at most `batch_size` candidates.
    #[tracing::instrument(skip(self))]
    pub async fn run_once(&self) -> ServiceResult<SweepStats> {
        let cutoff = OffsetDateTime::now_utc() - self.grace_period;
        let candidates = self
            .catalog
            .unreferenced_since(cutoff, self.batch_size)
            .await?;

        let mut stats = SweepStats::default();
        for record in candidates {
            stats.examined += 1;
            let hash = match record.content_hash() {
                Ok(hash) => hash,
                Err(e) => {
                    stats.errors += 1;
                    tracing::warn!(hash = %record.hash, error = %e, "skipping corrupt record");
                    continue;
                }
            };
            match self.reclaimer.reclaim(&hash).await {
                Ok(Reclaim::Done(PurgeOutcome::Purged { .. } | PurgeOutcome::AlreadyAbsent { .. })) => {
                    stats.reclaimed += 1;
                    SWEEP_RECONCILED.inc();
                }
                Ok(_) => stats.skipped += 1,
                Err(e) => {
                    stats.errors += 1;
                    tracing::warn!(hash = %hash, error = %e, "sweep failed to reclaim content");
                }
            }
        }

        if stats.examined > 0 {
            tracing::info!(
                examined = stats.examined,
                reclaimed = stats.reclaimed,
                skipped = stats.skipped,
                errors = stats.errors,
                "reconciliation sweep finished"
            );
        }
        Ok(stats)
    }

    /// Run a pass every `interval` until `cancel` fires.
    pub fn spawn(self: Arc<Self>, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // the first tick completes immediately
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = self.run_once().await {
                            tracing::error!(error = %e, "reconciliation sweep failed");
                        }
                    }
                }
            }
            tracing::info!("reconciliation sweep stopped");
        })
    }
}
