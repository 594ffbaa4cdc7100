//! Content record repository trait.

use crate::error::MetadataResult;
use crate::models::ContentRecordRow;
use async_trait::async_trait;
use time::OffsetDateTime;

/// Repository for global content records.
#[async_trait]
pub trait ContentRepo: Send + Sync {
    /// Insert a record, or reactivate an existing one.
    ///
    /// Must only be called after the blob at `record.blob_key` was written.
    /// On conflict the existence flag is set, `removed_at` cleared and the
    /// size and blob key refreshed; `canonical_name` keeps the first value.
    async fn upsert_content(&self, record: &ContentRecordRow) -> MetadataResult<()>;

    /// Get a record by hex hash, live or absent.
    async fn get_content(&self, hash: &str) -> MetadataResult<Option<ContentRecordRow>>;

    /// Clear the existence flag. Returns false if no live record matched.
    async fn mark_content_absent(&self, hash: &str, at: OffsetDateTime) -> MetadataResult<bool>;
}
