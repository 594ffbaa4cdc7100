//! Physical retirement of unreferenced content.
//!
//! Shared by the deletion worker, the reconciliation sweep and permanent
//! delete. Every caller runs the same steps under the hash's dedup lock:
//! re-check the reference count and the grace period of recycled links,
//! retire the record in one catalog transaction, remove the blob, then
//! invalidate the cached record.

use crate::error::ServiceResult;
use crate::metrics::BLOBS_REMOVED;
use silo_cache::{CacheAside, LeaseLock, LockOutcome, keys};
use silo_core::ContentHash;
use silo_metadata::{CatalogStore, PurgeOutcome};
use silo_storage::{BlobStore, BlobStoreExt};
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;

/// Result of one reclamation attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reclaim {
    /// A writer holds the hash's dedup lock; try again later.
    Locked,
    Done(PurgeOutcome),
}

pub struct Reclaimer {
    catalog: Arc<dyn CatalogStore>,
    storage: Arc<dyn BlobStore>,
    locks: LeaseLock,
    meta: CacheAside,
    lock_ttl: Duration,
    grace_period: Duration,
}

impl Reclaimer {
    pub fn new(
        catalog: Arc<dyn CatalogStore>,
        storage: Arc<dyn BlobStore>,
        locks: LeaseLock,
        meta: CacheAside,
        lock_ttl: Duration,
        grace_period: Duration,
    ) -> Self {
        Self {
            catalog,
            storage,
            locks,
            meta,
            lock_ttl,
            grace_period,
        }
    }

    /// Retire `hash` if nothing references it.
    #[tracing::instrument(skip(self), fields(hash = %hash))]
    pub async fn reclaim(&self, hash: &ContentHash) -> ServiceResult<Reclaim> {
        let lease = match self
            .locks
            .acquire(&keys::upload_lock(hash), self.lock_ttl)
            .await?
        {
            LockOutcome::Granted(lease) => lease,
            LockOutcome::Held => {
                crate::metrics::record_lock_conflict("upload");
                return Ok(Reclaim::Locked);
            }
        };

        let result = self.reclaim_locked(hash).await;
        self.locks.release_quietly(lease).await;
        result.map(Reclaim::Done)
    }

    async fn reclaim_locked(&self, hash: &ContentHash) -> ServiceResult<PurgeOutcome> {
        let now = OffsetDateTime::now_utc();
        let outcome = self
            .catalog
            .purge_unreferenced(&hash.to_hex(), now - self.grace_period, now)
            .await?;

        if let Some(blob_key) = outcome.blob_key() {
            if self.storage.delete_if_exists(blob_key).await? {
                BLOBS_REMOVED.inc();
                tracing::info!(blob_key, "removed unreferenced blob");
            } else {
                tracing::debug!(blob_key, "blob already gone");
            }
            self.meta.invalidate(&keys::file_meta(hash)).await;
        }

        tracing::debug!(outcome = outcome.as_str(), "reclamation finished");
        Ok(outcome)
    }
}
