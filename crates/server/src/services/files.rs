//! Single-shot uploads, downloads and the per-user file lifecycle.

use crate::error::{ServiceError, ServiceResult};
use crate::metrics::{self, BLOB_WRITE_DURATION, DEDUP_HITS, SOFT_DELETES};
use crate::services::audit::{AuditSink, file_event};
use crate::services::deletion::DeletionScheduler;
use crate::services::reclaim::{Reclaim, Reclaimer};
use crate::services::{parse_hash, validate_file_name};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use silo_cache::{CacheAside, LeaseLock, LockOutcome, keys};
use silo_core::{AuditOperation, ContentHash, DeferredDeletionTask, LinkStatus};
use silo_metadata::{CatalogStore, ContentRecordRow, FileLinkRow, PurgeOutcome};
use silo_storage::{BlobStore, ByteStream};
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;

/// Cached view of a content record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMeta {
    pub hash: String,
    pub canonical_name: String,
    pub size: u64,
    pub blob_key: String,
    /// False once the blob has been physically removed.
    pub present: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl From<ContentRecordRow> for FileMeta {
    fn from(row: ContentRecordRow) -> Self {
        Self {
            hash: row.hash,
            canonical_name: row.canonical_name,
            size: row.size.max(0) as u64,
            blob_key: row.blob_key,
            present: row.present,
            created_at: row.created_at,
        }
    }
}

/// One of a user's files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileEntry {
    pub hash: String,
    pub file_name: String,
    pub size: u64,
    pub status: LinkStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl TryFrom<FileLinkRow> for FileEntry {
    type Error = ServiceError;

    fn try_from(row: FileLinkRow) -> ServiceResult<Self> {
        Ok(Self {
            status: row.link_status()?,
            hash: row.hash,
            file_name: row.display_name,
            size: row.size.max(0) as u64,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadOutcome {
    pub hash: String,
    pub size: u64,
    /// True when no bytes were written because the content already existed.
    pub deduplicated: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SoftDeleteOutcome {
    pub hash: String,
    pub deletion_scheduled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermanentDeleteOutcome {
    pub hash: String,
    /// What happened to the content: a purge outcome, or `deferred` when a
    /// writer held the hash and the sweep will finish the job.
    pub content: String,
}

/// An opened download.
pub struct Download {
    pub file_name: String,
    pub size: u64,
    pub stream: ByteStream,
}

pub struct FileService {
    catalog: Arc<dyn CatalogStore>,
    storage: Arc<dyn BlobStore>,
    locks: LeaseLock,
    meta: CacheAside,
    reclaimer: Arc<Reclaimer>,
    deletions: DeletionScheduler,
    audit: AuditSink,
    upload_lock_ttl: Duration,
}

impl FileService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        catalog: Arc<dyn CatalogStore>,
        storage: Arc<dyn BlobStore>,
        locks: LeaseLock,
        meta: CacheAside,
        reclaimer: Arc<Reclaimer>,
        deletions: DeletionScheduler,
        audit: AuditSink,
        upload_lock_ttl: Duration,
    ) -> Self {
        Self {
            catalog,
            storage,
            locks,
            meta,
            reclaimer,
            deletions,
            audit,
            upload_lock_ttl,
        }
    }

    /// Store `data` for `owner`, writing the blob only if this content has
    /// never been materialized (or was physically removed).
    #[tracing::instrument(skip(self, data), fields(owner = %owner, size = data.len()))]
    pub async fn upload(
        &self,
        owner: &str,
        file_name: &str,
        data: Bytes,
    ) -> ServiceResult<UploadOutcome> {
        let file_name = validate_file_name(file_name)?;
        if data.is_empty() {
            return Err(ServiceError::Validation("upload body is empty".to_string()));
        }
        let size = data.len() as u64;
        let hash = ContentHash::compute(&data);

        let result = self.store_bytes(owner, file_name, &hash, data).await;
        metrics::record_upload(match &result {
            Ok(outcome) if outcome.deduplicated => "deduplicated",
            Ok(_) => "created",
            Err(ServiceError::Conflict(_)) => "conflict",
            Err(_) => "failed",
        });
        let event = file_event(owner, AuditOperation::Upload, &hash.to_hex())
            .with("file_name", file_name)
            .with("size", size);
        let event = match &result {
            Ok(outcome) => event.with("deduplicated", outcome.deduplicated),
            Err(_) => event,
        };
        let event = AuditSink::finish_event(event, &result);
        self.audit.record(event).await;
        result
    }

    async fn store_bytes(
        &self,
        owner: &str,
        file_name: &str,
        hash: &ContentHash,
        data: Bytes,
    ) -> ServiceResult<UploadOutcome> {
        let size = data.len() as u64;
        if self.link_existing(owner, hash, file_name, size).await? {
            return Ok(UploadOutcome::new(hash, size, true));
        }

        let lease = match self
            .locks
            .acquire(&keys::upload_lock(hash), self.upload_lock_ttl)
            .await?
        {
            LockOutcome::Granted(lease) => lease,
            LockOutcome::Held => {
                metrics::record_lock_conflict("upload");
                return Err(ServiceError::Conflict(
                    "this content is being written by another request, retry shortly".to_string(),
                ));
            }
        };

        let result = self.materialize(owner, file_name, hash, data).await;
        self.locks.release_quietly(lease).await;
        result
    }

    /// Write the blob and its record. Caller holds the hash's upload lock.
    async fn materialize(
        &self,
        owner: &str,
        file_name: &str,
        hash: &ContentHash,
        data: Bytes,
    ) -> ServiceResult<UploadOutcome> {
        let size = data.len() as u64;
        // a racing writer may have finished between the first check and the lock
        if self.link_existing(owner, hash, file_name, size).await? {
            return Ok(UploadOutcome::new(hash, size, true));
        }

        let blob_key = hash.blob_key();
        let timer = BLOB_WRITE_DURATION.start_timer();
        self.storage.put(&blob_key, data).await?;
        timer.observe_duration();

        let record = ContentRecordRow::live(hash, file_name, size);
        self.catalog.upsert_content(&record).await?;
        self.write_through(hash).await;

        let link = FileLinkRow::active(owner, hash, file_name, size);
        if !self.catalog.attach_link(&link).await? {
            return Err(ServiceError::Infra(format!(
                "content record {hash} was retired while its upload lock was held"
            )));
        }

        tracing::info!(hash = %hash, blob_key, "materialized new content");
        Ok(UploadOutcome::new(hash, size, false))
    }

    /// Link `owner` to `hash` if its content is live.
    pub(crate) async fn link_existing(
        &self,
        owner: &str,
        hash: &ContentHash,
        file_name: &str,
        size: u64,
    ) -> ServiceResult<bool> {
        let link = FileLinkRow::active(owner, hash, file_name, size);
        let linked = self.catalog.attach_link(&link).await?;
        if linked {
            DEDUP_HITS.inc();
            tracing::debug!(hash = %hash, owner, "linked existing content");
        }
        Ok(linked)
    }

    /// Refresh the cached record from the catalog.
    pub(crate) async fn write_through(&self, hash: &ContentHash) {
        match self.catalog.get_content(&hash.to_hex()).await {
            Ok(Some(stored)) => {
                self.meta
                    .put(&keys::file_meta(hash), &FileMeta::from(stored))
                    .await;
            }
            Ok(None) => {}
            Err(e) => {
                silo_cache::metrics::best_effort_failed("cache_write");
                tracing::warn!(hash = %hash, error = %e, "skipping cache write-through");
            }
        }
    }

    /// Link existing live content without resending its bytes.
    #[tracing::instrument(skip(self), fields(owner = %owner))]
    pub async fn fast_upload(
        &self,
        owner: &str,
        hash: &str,
        file_name: &str,
    ) -> ServiceResult<UploadOutcome> {
        let hash = parse_hash(hash)?;
        let file_name = validate_file_name(file_name)?;

        let result = self.link_live(owner, &hash, file_name).await;
        let event = file_event(owner, AuditOperation::FastUpload, &hash.to_hex())
            .with("file_name", file_name);
        let event = AuditSink::finish_event(event, &result);
        self.audit.record(event).await;
        result
    }

    async fn link_live(
        &self,
        owner: &str,
        hash: &ContentHash,
        file_name: &str,
    ) -> ServiceResult<UploadOutcome> {
        let record = self
            .catalog
            .get_content(&hash.to_hex())
            .await?
            .filter(|record| record.present)
            .ok_or_else(|| ServiceError::NotFound(format!("no content with hash {hash}")))?;
        let size = record.size.max(0) as u64;
        if !self.link_existing(owner, hash, file_name, size).await? {
            return Err(ServiceError::NotFound(format!("content {hash} was removed")));
        }
        Ok(UploadOutcome::new(hash, size, true))
    }

    /// Open `owner`'s active file for streaming.
    #[tracing::instrument(skip(self), fields(owner = %owner))]
    pub async fn download(&self, owner: &str, hash: &str) -> ServiceResult<Download> {
        let hash = parse_hash(hash)?;
        let result = self.open(owner, &hash).await;
        let event = file_event(owner, AuditOperation::Download, &hash.to_hex());
        let event = AuditSink::finish_event(event, &result);
        self.audit.record(event).await;
        result
    }

    async fn open(&self, owner: &str, hash: &ContentHash) -> ServiceResult<Download> {
        let link = self
            .catalog
            .get_link(owner, &hash.to_hex())
            .await?
            .filter(|link| link.status == LinkStatus::Active.as_str())
            .ok_or_else(|| ServiceError::NotFound(format!("file {hash} not found")))?;

        let meta = self.meta(&hash.to_hex()).await?;
        if !meta.present {
            return Err(ServiceError::NotFound(format!("content {hash} was removed")));
        }
        let stream = self.storage.get_stream(&meta.blob_key).await?;
        Ok(Download {
            file_name: link.display_name,
            size: meta.size,
            stream,
        })
    }

    /// Content record for `hash`, through the cache.
    pub async fn meta(&self, hash: &str) -> ServiceResult<FileMeta> {
        let hash = parse_hash(hash)?;
        let hex = hash.to_hex();
        self.meta
            .get_or_fetch(&keys::file_meta(&hash), || async {
                Ok::<_, ServiceError>(self.catalog.get_content(&hex).await?.map(FileMeta::from))
            })
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("no content with hash {hash}")))
    }

    /// `owner`'s files in `status`, most recently changed first.
    pub async fn list(&self, owner: &str, status: LinkStatus) -> ServiceResult<Vec<FileEntry>> {
        self.catalog
            .list_links(owner, status)
            .await?
            .into_iter()
            .map(FileEntry::try_from)
            .collect()
    }

    /// Move `owner`'s file to the recycle bin, scheduling physical deletion
    /// when it was the last reference.
    #[tracing::instrument(skip(self), fields(owner = %owner))]
    pub async fn soft_delete(&self, owner: &str, hash: &str) -> ServiceResult<SoftDeleteOutcome> {
        let hash = parse_hash(hash)?;
        let result = self.recycle(owner, &hash).await;
        let event = file_event(owner, AuditOperation::Delete, &hash.to_hex());
        let event = match &result {
            Ok(outcome) => event.with("deletion_scheduled", outcome.deletion_scheduled),
            Err(_) => event,
        };
        let event = AuditSink::finish_event(event, &result);
        self.audit.record(event).await;
        result
    }

    async fn recycle(&self, owner: &str, hash: &ContentHash) -> ServiceResult<SoftDeleteOutcome> {
        let hex = hash.to_hex();
        let not_found = || ServiceError::NotFound(format!("file {hash} not found"));
        let link = self
            .catalog
            .get_link(owner, &hex)
            .await?
            .filter(|link| link.status == LinkStatus::Active.as_str())
            .ok_or_else(not_found)?;

        let moved = self
            .catalog
            .transition_link(
                owner,
                &hex,
                LinkStatus::Active,
                LinkStatus::Recycled,
                OffsetDateTime::now_utc(),
            )
            .await?;
        if !moved {
            return Err(not_found());
        }
        SOFT_DELETES.inc();

        let deletion_scheduled = match self.catalog.count_active_links(&hex).await {
            Ok(0) => {
                let task = DeferredDeletionTask::new(owner, *hash, link.display_name);
                self.deletions.schedule(&task).await
            }
            Ok(references) => {
                tracing::debug!(hash = %hash, references, "content still referenced");
                false
            }
            Err(e) => {
                silo_cache::metrics::best_effort_failed("deletion_schedule");
                tracing::warn!(
                    hash = %hash,
                    error = %e,
                    "could not recount references, leaving content to the sweep"
                );
                false
            }
        };

        Ok(SoftDeleteOutcome {
            hash: hex,
            deletion_scheduled,
        })
    }

    /// Bring a recycled file back. No queued deletion is cancelled; the
    /// worker's re-check sees the active link.
    #[tracing::instrument(skip(self), fields(owner = %owner))]
    pub async fn restore(&self, owner: &str, hash: &str) -> ServiceResult<FileEntry> {
        let hash = parse_hash(hash)?;
        let result = self.reactivate(owner, &hash).await;
        let event = file_event(owner, AuditOperation::Restore, &hash.to_hex());
        let event = AuditSink::finish_event(event, &result);
        self.audit.record(event).await;
        result
    }

    async fn reactivate(&self, owner: &str, hash: &ContentHash) -> ServiceResult<FileEntry> {
        let hex = hash.to_hex();
        let moved = self
            .catalog
            .transition_link(
                owner,
                &hex,
                LinkStatus::Recycled,
                LinkStatus::Active,
                OffsetDateTime::now_utc(),
            )
            .await?;

        let link = self
            .catalog
            .get_link(owner, &hex)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("file {hash} not in recycle bin")))?;
        if !moved && link.status != LinkStatus::Active.as_str() {
            return Err(ServiceError::NotFound(format!(
                "content {hash} has been permanently deleted"
            )));
        }
        FileEntry::try_from(link)
    }

    /// Remove `owner`'s link outright and retire the content now if nothing
    /// else references it.
    #[tracing::instrument(skip(self), fields(owner = %owner))]
    pub async fn permanent_delete(
        &self,
        owner: &str,
        hash: &str,
    ) -> ServiceResult<PermanentDeleteOutcome> {
        let hash = parse_hash(hash)?;
        let result = self.remove(owner, &hash).await;
        let event = file_event(owner, AuditOperation::PermanentDelete, &hash.to_hex());
        let event = match &result {
            Ok(outcome) => event.with("content", &outcome.content),
            Err(_) => event,
        };
        let event = AuditSink::finish_event(event, &result);
        self.audit.record(event).await;
        result
    }

    async fn remove(&self, owner: &str, hash: &ContentHash) -> ServiceResult<PermanentDeleteOutcome> {
        let hex = hash.to_hex();
        let not_found = || ServiceError::NotFound(format!("file {hash} not found"));
        let link = self.catalog.get_link(owner, &hex).await?.ok_or_else(not_found)?;
        if !self.catalog.delete_link(owner, &hex).await? {
            return Err(not_found());
        }

        let content = match self.reclaimer.reclaim(hash).await? {
            Reclaim::Locked => {
                tracing::info!(hash = %hash, "hash is being written, leaving content to the sweep");
                "deferred".to_string()
            }
            Reclaim::Done(PurgeOutcome::GracePending) => {
                // other owners' recycled links were waiting on this one
                let task = DeferredDeletionTask::new(owner, *hash, link.display_name);
                self.deletions.schedule(&task).await;
                PurgeOutcome::GracePending.as_str().to_string()
            }
            Reclaim::Done(outcome) => outcome.as_str().to_string(),
        };
        Ok(PermanentDeleteOutcome { hash: hex, content })
    }
}

impl UploadOutcome {
    fn new(hash: &ContentHash, size: u64, deduplicated: bool) -> Self {
        Self {
            hash: hash.to_hex(),
            size,
            deduplicated,
        }
    }
}
