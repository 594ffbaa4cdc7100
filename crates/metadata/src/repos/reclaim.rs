//! Reclamation of unreferenced content.

use crate::error::MetadataResult;
use crate::models::{ContentRecordRow, PurgeOutcome};
use async_trait::async_trait;
use time::OffsetDateTime;

/// Repository operations used by the deferred-deletion worker and sweep.
#[async_trait]
pub trait ReclaimRepo: Send + Sync {
    /// Retire `hash` if nothing references it, in one transaction.
    ///
    /// A recycled link changed after `cutoff` is still inside its grace
    /// period and holds the content back. Otherwise deletes the remaining
    /// recycled links and clears the existence flag. The caller removes the
    /// blob afterwards when the outcome carries a key.
    async fn purge_unreferenced(
        &self,
        hash: &str,
        cutoff: OffsetDateTime,
        at: OffsetDateTime,
    ) -> MetadataResult<PurgeOutcome>;

    /// Live records with no active link whose last link change (or own
    /// update when no links remain) is older than `cutoff`.
    async fn unreferenced_since(
        &self,
        cutoff: OffsetDateTime,
        limit: u32,
    ) -> MetadataResult<Vec<ContentRecordRow>>;
}
