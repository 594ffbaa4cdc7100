//! Resumable multipart uploads.
//!
//! Session state lives only in the cache store:
//! - `multipart-info:{id}` holds the session fields
//! - `multipart-chunks:{id}` holds the received chunk indexes
//!
//! Chunk bytes go to `multipart/{id}/{index}` in the blob store until
//! completion composes them into the content blob.

use crate::error::{ServiceError, ServiceResult};
use crate::metrics::{self, BLOB_WRITE_DURATION, MULTIPART_CHUNKS, MULTIPART_COMPLETIONS};
use crate::services::audit::AuditSink;
use crate::services::files::FileService;
use crate::services::{parse_hash, validate_file_name};
use bytes::Bytes;
use futures::TryStreamExt;
use serde::{Deserialize, Serialize};
use silo_cache::{KvStore, LeaseLock, LockOutcome, WriteBatch, keys};
use silo_core::config::UploadConfig;
use silo_core::upload::{
    InitMultipartRequest, InitMultipartResponse, MultipartStatusResponse, fields,
};
use silo_core::{
    AuditEvent, AuditOperation, ContentHash, ResourceType, SessionId, UploadSession, UploadStatus,
};
use silo_metadata::{CatalogStore, ContentRecordRow, FileLinkRow};
use silo_storage::{BlobStore, BlobStoreExt};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkReceipt {
    pub session_id: String,
    pub index: u64,
    pub uploaded_count: u64,
    pub chunk_count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompleteOutcome {
    pub session_id: String,
    pub hash: String,
    pub file_name: String,
    pub size: u64,
    /// True when the content already existed and no compose was needed.
    pub deduplicated: bool,
}

pub struct MultipartService {
    kv: Arc<dyn KvStore>,
    storage: Arc<dyn BlobStore>,
    catalog: Arc<dyn CatalogStore>,
    locks: LeaseLock,
    files: Arc<FileService>,
    audit: AuditSink,
    config: UploadConfig,
}

impl MultipartService {
    pub fn new(
        kv: Arc<dyn KvStore>,
        storage: Arc<dyn BlobStore>,
        catalog: Arc<dyn CatalogStore>,
        files: Arc<FileService>,
        audit: AuditSink,
        config: UploadConfig,
    ) -> Self {
        Self {
            locks: LeaseLock::new(kv.clone()),
            kv,
            storage,
            catalog,
            files,
            audit,
            config,
        }
    }

    /// Start a session, or link directly when the content is already live.
    #[tracing::instrument(skip(self, req), fields(owner = %owner, hash = %req.hash))]
    pub async fn init(
        &self,
        owner: &str,
        req: &InitMultipartRequest,
    ) -> ServiceResult<InitMultipartResponse> {
        let hash = parse_hash(&req.hash)?;
        let file_name = validate_file_name(&req.file_name)?;
        if req.size <= 0 {
            return Err(ServiceError::Validation(
                "size must be greater than zero".to_string(),
            ));
        }
        let size = req.size as u64;

        let result = self.open_session(owner, &hash, file_name, size).await;
        let resource_id = match &result {
            Ok(InitMultipartResponse {
                session_id: Some(id),
                ..
            }) => id.clone(),
            _ => hash.to_hex(),
        };
        let event = AuditEvent::success(
            owner,
            AuditOperation::MultipartInit,
            ResourceType::MultipartSession,
            resource_id,
        )
        .with("hash", hash)
        .with("file_name", file_name)
        .with("size", size);
        let event = AuditSink::finish_event(event, &result);
        self.audit.record(event).await;
        result
    }

    async fn open_session(
        &self,
        owner: &str,
        hash: &ContentHash,
        file_name: &str,
        size: u64,
    ) -> ServiceResult<InitMultipartResponse> {
        let live = self
            .catalog
            .get_content(&hash.to_hex())
            .await?
            .filter(|record| record.present);
        if let Some(record) = live {
            let stored_size = record.size.max(0) as u64;
            if self
                .files
                .link_existing(owner, hash, file_name, stored_size)
                .await?
            {
                return Ok(InitMultipartResponse {
                    session_id: None,
                    chunk_size: self.config.chunk_size,
                    chunk_count: 0,
                    deduplicated: true,
                });
            }
        }

        let session = UploadSession::new(*hash, file_name, size, self.config.chunk_size, owner);
        self.kv
            .hset_all(
                &keys::multipart_info(&session.id),
                &session.to_fields()?,
                Some(self.config.session_ttl()),
            )
            .await?;

        tracing::info!(
            session_id = %session.id,
            chunk_count = session.chunk_count,
            "multipart session initiated"
        );
        Ok(InitMultipartResponse {
            session_id: Some(session.id.to_string()),
            chunk_size: session.chunk_size,
            chunk_count: session.chunk_count,
            deduplicated: false,
        })
    }

    /// Load `owner`'s session. Expired, unknown and foreign sessions are
    /// indistinguishable.
    async fn load(&self, owner: &str, id: &SessionId) -> ServiceResult<UploadSession> {
        let not_found = || ServiceError::NotFound(format!("upload session {id} not found"));
        let map = self.kv.hgetall(&keys::multipart_info(id)).await?;
        if map.is_empty() {
            return Err(not_found());
        }
        let session = UploadSession::from_fields(*id, &map)
            .map_err(|e| ServiceError::Infra(format!("corrupt session {id}: {e}")))?;
        if session.owner != owner {
            return Err(not_found());
        }
        Ok(session)
    }

    /// Accept chunk `index`. Each index is recorded at most once; a
    /// duplicate is rejected without touching the stored bytes.
    #[tracing::instrument(skip(self, data), fields(owner = %owner, size = data.len()))]
    pub async fn put_chunk(
        &self,
        owner: &str,
        session_id: &str,
        index: u64,
        data: Bytes,
    ) -> ServiceResult<ChunkReceipt> {
        let result = self.accept_chunk(owner, session_id, index, data).await;
        MULTIPART_CHUNKS
            .with_label_values(&[match &result {
                Ok(_) => "accepted",
                Err(ServiceError::Conflict(_)) => "conflict",
                Err(ServiceError::OutOfRange { .. }) => "out_of_range",
                Err(ServiceError::Validation(_)) => "invalid",
                Err(_) => "failed",
            }])
            .inc();
        result
    }

    async fn accept_chunk(
        &self,
        owner: &str,
        session_id: &str,
        index: u64,
        data: Bytes,
    ) -> ServiceResult<ChunkReceipt> {
        let id = parse_session_id(session_id)?;
        let session = self.load(owner, &id).await?;
        if !session.status.accepts_chunks() {
            return Err(ServiceError::Conflict(format!(
                "upload session {id} is already completed"
            )));
        }
        let Some(expected_len) = session.expected_chunk_len(index) else {
            return Err(ServiceError::OutOfRange {
                index,
                chunk_count: session.chunk_count,
            });
        };
        self.reject_duplicate(&id, index).await?;
        if data.len() as u64 != expected_len {
            return Err(ServiceError::Validation(format!(
                "chunk {index} must be {expected_len} bytes, got {}",
                data.len()
            )));
        }

        let lease = match self
            .locks
            .acquire(&keys::chunk_lock(&id, index), self.config.merge_lock_ttl())
            .await?
        {
            LockOutcome::Granted(lease) => lease,
            LockOutcome::Held => {
                metrics::record_lock_conflict("chunk");
                return Err(ServiceError::Conflict(format!(
                    "chunk {index} is already being uploaded"
                )));
            }
        };
        let result = self.store_chunk(&session, index, data).await;
        self.locks.release_quietly(lease).await;
        result
    }

    async fn reject_duplicate(&self, id: &SessionId, index: u64) -> ServiceResult<()> {
        if self
            .kv
            .sismember(&keys::multipart_chunks(id), &index.to_string())
            .await?
        {
            return Err(ServiceError::Conflict(format!(
                "chunk {index} was already uploaded"
            )));
        }
        Ok(())
    }

    /// Write and record one chunk. Caller holds the chunk lock.
    async fn store_chunk(
        &self,
        session: &UploadSession,
        index: u64,
        data: Bytes,
    ) -> ServiceResult<ChunkReceipt> {
        let id = session.id;
        self.reject_duplicate(&id, index).await?;
        self.storage.put(&id.chunk_key(index), data).await?;

        let info_key = keys::multipart_info(&id);
        let chunks_key = keys::multipart_chunks(&id);
        let member = index.to_string();
        let ttl = self.config.session_ttl();
        // set membership, counter and status move together or not at all
        let batch = WriteBatch::new()
            .require_key(&info_key)
            .require_not_member(&chunks_key, &member)
            .set_add(&chunks_key, &member)
            .hash_incr_by(&info_key, fields::UPLOADED_COUNT, 1)
            .hash_set_if(
                &info_key,
                fields::STATUS,
                UploadStatus::Initiated.as_str(),
                UploadStatus::Uploading.as_str(),
            )
            .expire(&info_key, ttl)
            .expire(&chunks_key, ttl);

        if !self.kv.apply(batch).await? {
            if self.kv.hgetall(&info_key).await?.is_empty() {
                return Err(ServiceError::NotFound(format!(
                    "upload session {id} expired"
                )));
            }
            return Err(ServiceError::Conflict(format!(
                "chunk {index} was already uploaded"
            )));
        }

        let uploaded_count = self.kv.scard(&chunks_key).await?;
        tracing::debug!(
            session_id = %id,
            index,
            uploaded_count,
            chunk_count = session.chunk_count,
            "chunk recorded"
        );
        Ok(ChunkReceipt {
            session_id: id.to_string(),
            index,
            uploaded_count,
            chunk_count: session.chunk_count,
        })
    }

    /// Progress of `owner`'s session. Never mutates.
    pub async fn status(
        &self,
        owner: &str,
        session_id: &str,
    ) -> ServiceResult<MultipartStatusResponse> {
        let id = parse_session_id(session_id)?;
        let session = self.load(owner, &id).await?;
        let mut uploaded_chunks: Vec<u64> = self
            .kv
            .smembers(&keys::multipart_chunks(&id))
            .await?
            .iter()
            .filter_map(|member| member.parse().ok())
            .collect();
        uploaded_chunks.sort_unstable();

        Ok(MultipartStatusResponse {
            session_id: id.to_string(),
            hash: session.hash.to_hex(),
            status: session.status,
            uploaded_count: session.uploaded_count,
            chunk_count: session.chunk_count,
            progress_percent: session.progress_percent(),
            completed: session.is_fully_uploaded(),
            uploaded_chunks,
        })
    }

    /// Compose the received chunks into the content blob and register it.
    #[tracing::instrument(skip(self), fields(owner = %owner))]
    pub async fn complete(&self, owner: &str, session_id: &str) -> ServiceResult<CompleteOutcome> {
        let id = parse_session_id(session_id)?;
        let result = self.finish(owner, &id).await;
        MULTIPART_COMPLETIONS
            .with_label_values(&[match &result {
                Ok(outcome) if outcome.deduplicated => "deduplicated",
                Ok(_) => "composed",
                Err(ServiceError::Incomplete { .. }) => "incomplete",
                Err(ServiceError::Conflict(_)) => "conflict",
                Err(ServiceError::Validation(_)) => "hash_mismatch",
                Err(_) => "failed",
            }])
            .inc();

        let event = AuditEvent::success(
            owner,
            AuditOperation::MultipartComplete,
            ResourceType::MultipartSession,
            id.to_string(),
        );
        let event = match &result {
            Ok(outcome) => event
                .with("hash", &outcome.hash)
                .with("size", outcome.size)
                .with("deduplicated", outcome.deduplicated),
            Err(_) => event,
        };
        let event = AuditSink::finish_event(event, &result);
        self.audit.record(event).await;
        result
    }

    async fn finish(&self, owner: &str, id: &SessionId) -> ServiceResult<CompleteOutcome> {
        let session = self.load(owner, id).await?;
        if !session.is_fully_uploaded() {
            return Err(ServiceError::Incomplete {
                uploaded: session.uploaded_count,
                expected: session.chunk_count,
            });
        }

        let merge = match self
            .locks
            .acquire(&keys::merge_lock(id), self.config.merge_lock_ttl())
            .await?
        {
            LockOutcome::Granted(lease) => lease,
            LockOutcome::Held => {
                metrics::record_lock_conflict("merge");
                return Err(ServiceError::Conflict(format!(
                    "upload session {id} is already being completed"
                )));
            }
        };
        let result = self.finish_merging(owner, id).await;
        self.locks.release_quietly(merge).await;
        result
    }

    /// Caller holds the merge lock.
    async fn finish_merging(&self, owner: &str, id: &SessionId) -> ServiceResult<CompleteOutcome> {
        // a caller that lost the race for the lock sees the winner's status here
        let session = self.load(owner, id).await?;
        if session.status == UploadStatus::Completed {
            return Err(ServiceError::Conflict(format!(
                "upload session {id} is already completed"
            )));
        }

        let lease = match self
            .locks
            .acquire(&keys::upload_lock(&session.hash), self.config.merge_lock_ttl())
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
        let result = self.register(&session).await;
        self.locks.release_quietly(lease).await;

        let outcome = result?;
        self.mark_completed(&session).await?;
        self.spawn_chunk_cleanup(session.chunk_keys());
        Ok(outcome)
    }

    /// Materialize the session's content. Caller holds the hash's upload lock.
    async fn register(&self, session: &UploadSession) -> ServiceResult<CompleteOutcome> {
        let hash = session.hash;
        let outcome = |size, deduplicated| CompleteOutcome {
            session_id: session.id.to_string(),
            hash: hash.to_hex(),
            file_name: session.file_name.clone(),
            size,
            deduplicated,
        };

        if self
            .files
            .link_existing(&session.owner, &hash, &session.file_name, session.total_size)
            .await?
        {
            return Ok(outcome(session.total_size, true));
        }

        let blob_key = hash.blob_key();
        let timer = BLOB_WRITE_DURATION.start_timer();
        let size = self.storage.compose(&blob_key, &session.chunk_keys()).await?;
        timer.observe_duration();

        if let Err(e) = self.verify(&blob_key, &hash, session.total_size).await {
            if let Err(cleanup) = self.storage.delete_if_exists(&blob_key).await {
                tracing::warn!(blob_key, error = %cleanup, "failed to remove rejected blob");
            }
            return Err(e);
        }

        let record = ContentRecordRow::live(&hash, &session.file_name, size);
        self.catalog.upsert_content(&record).await?;
        self.files.write_through(&hash).await;

        let link = FileLinkRow::active(&session.owner, &hash, &session.file_name, size);
        if !self.catalog.attach_link(&link).await? {
            return Err(ServiceError::Infra(format!(
                "content record {hash} was retired while its upload lock was held"
            )));
        }

        tracing::info!(session_id = %session.id, hash = %hash, size, "multipart upload composed");
        Ok(outcome(size, false))
    }

    /// Hash the composed blob and compare with the claimed hash and size.
    async fn verify(
        &self,
        blob_key: &str,
        expected: &ContentHash,
        expected_size: u64,
    ) -> ServiceResult<()> {
        let mut stream = self.storage.get_stream(blob_key).await?;
        let mut hasher = ContentHash::hasher();
        let mut size = 0u64;
        while let Some(bytes) = stream.try_next().await? {
            size += bytes.len() as u64;
            hasher.update(&bytes);
        }
        let actual = hasher.finalize();
        if actual != *expected || size != expected_size {
            tracing::warn!(
                expected = %expected,
                actual = %actual,
                size,
                expected_size,
                "composed content does not match the claimed hash"
            );
            return Err(ServiceError::Validation(format!(
                "composed content hashes to {actual} ({size} bytes), expected {expected} ({expected_size} bytes)"
            )));
        }
        Ok(())
    }

    /// Flip to `Completed` and shorten the session's TTL to the audit window.
    async fn mark_completed(&self, session: &UploadSession) -> ServiceResult<()> {
        let ttl = self.config.completed_session_ttl();
        let update = [
            (
                fields::STATUS.to_string(),
                UploadStatus::Completed.as_str().to_string(),
            ),
            (fields::LOCATION.to_string(), session.hash.blob_key()),
        ];
        self.kv
            .hset_all(&keys::multipart_info(&session.id), &update, Some(ttl))
            .await?;
        if let Err(e) = self
            .kv
            .expire(&keys::multipart_chunks(&session.id), ttl)
            .await
        {
            silo_cache::metrics::best_effort_failed("session_ttl");
            tracing::warn!(session_id = %session.id, error = %e, "failed to shorten chunk set TTL");
        }
        Ok(())
    }

    /// Best-effort removal of temporary chunk objects.
    fn spawn_chunk_cleanup(&self, chunk_keys: Vec<String>) {
        let storage = self.storage.clone();
        tokio::spawn(async move {
            for key in chunk_keys {
                if let Err(e) = storage.delete_if_exists(&key).await {
                    silo_cache::metrics::best_effort_failed("chunk_cleanup");
                    tracing::warn!(chunk_key = %key, error = %e, "failed to remove temporary chunk");
                }
            }
        });
    }
}

fn parse_session_id(id: &str) -> ServiceResult<SessionId> {
    SessionId::parse(id.trim())
        .map_err(|_| ServiceError::Validation(format!("invalid upload session id: {id}")))
}
