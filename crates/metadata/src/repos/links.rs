//! File link repository trait.

use crate::error::MetadataResult;
use crate::models::FileLinkRow;
use async_trait::async_trait;
use silo_core::LinkStatus;
use time::OffsetDateTime;

/// Repository for per-user file links.
#[async_trait]
pub trait LinkRepo: Send + Sync {
    /// Upsert `link` as active, but only while its content record is live.
    ///
    /// The record is locked for the duration so a concurrent purge cannot
    /// retire the content between the check and the write. Returns false
    /// (and writes nothing) when the record is missing or absent.
    async fn attach_link(&self, link: &FileLinkRow) -> MetadataResult<bool>;

    /// Get the link between `owner` and `hash`.
    async fn get_link(&self, owner: &str, hash: &str) -> MetadataResult<Option<FileLinkRow>>;

    /// Move a link from `from` to `to`. Returns false if no link in state
    /// `from` exists.
    async fn transition_link(
        &self,
        owner: &str,
        hash: &str,
        from: LinkStatus,
        to: LinkStatus,
        at: OffsetDateTime,
    ) -> MetadataResult<bool>;

    /// Remove a link regardless of status. Returns false if none existed.
    async fn delete_link(&self, owner: &str, hash: &str) -> MetadataResult<bool>;

    /// Reference count: number of active links for `hash`.
    async fn count_active_links(&self, hash: &str) -> MetadataResult<u64>;

    /// List an owner's links in `status`, most recently changed first.
    async fn list_links(&self, owner: &str, status: LinkStatus)
    -> MetadataResult<Vec<FileLinkRow>>;
}
