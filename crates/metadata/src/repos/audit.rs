//! Audit event repository trait.

use crate::error::MetadataResult;
use crate::models::AuditEventRow;
use async_trait::async_trait;

/// Repository for the operation log.
#[async_trait]
pub trait AuditRepo: Send + Sync {
    /// Insert an event. Duplicates by `event_id` are ignored and return false.
    async fn insert_audit_event(&self, event: &AuditEventRow) -> MetadataResult<bool>;

    /// Most recent events for `actor`, newest first.
    async fn recent_audit_events(
        &self,
        actor: &str,
        limit: u32,
    ) -> MetadataResult<Vec<AuditEventRow>>;
}
