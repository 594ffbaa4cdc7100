//! Database models mapping to the catalog schema.

use crate::error::{MetadataError, MetadataResult};
use silo_core::{AuditEvent, ContentHash, LinkStatus};
use sqlx::FromRow;
use std::collections::BTreeMap;
use time::OffsetDateTime;
use uuid::Uuid;

// =============================================================================
// Content records
// =============================================================================

/// One row per distinct content hash.
///
/// `present` is the existence flag: false once the blob was physically
/// removed, with the row retained for audit.
#[derive(Debug, Clone, FromRow)]
pub struct ContentRecordRow {
    pub hash: String,
    pub canonical_name: String,
    pub size: i64,
    pub blob_key: String,
    pub present: bool,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
    pub removed_at: Option<OffsetDateTime>,
}

impl ContentRecordRow {
    /// Build a live record for freshly written content.
    pub fn live(hash: &ContentHash, canonical_name: impl Into<String>, size: u64) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            hash: hash.to_hex(),
            canonical_name: canonical_name.into(),
            size: size as i64,
            blob_key: hash.blob_key(),
            present: true,
            created_at: now,
            updated_at: now,
            removed_at: None,
        }
    }

    pub fn content_hash(&self) -> MetadataResult<ContentHash> {
        Ok(ContentHash::from_hex(&self.hash)?)
    }
}

// =============================================================================
// File links
// =============================================================================

/// A user's ownership link to a content record.
#[derive(Debug, Clone, FromRow)]
pub struct FileLinkRow {
    pub owner: String,
    pub hash: String,
    pub display_name: String,
    pub size: i64,
    pub status: String,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl FileLinkRow {
    /// Build an active link.
    pub fn active(
        owner: impl Into<String>,
        hash: &ContentHash,
        display_name: impl Into<String>,
        size: u64,
    ) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            owner: owner.into(),
            hash: hash.to_hex(),
            display_name: display_name.into(),
            size: size as i64,
            status: LinkStatus::Active.as_str().to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn link_status(&self) -> MetadataResult<LinkStatus> {
        Ok(self.status.parse()?)
    }
}

// =============================================================================
// Audit events
// =============================================================================

/// Persisted audit event. `extra` holds the detail map as JSON text.
#[derive(Debug, Clone, FromRow)]
pub struct AuditEventRow {
    pub event_id: Uuid,
    pub actor: String,
    pub operation: String,
    pub resource_type: String,
    pub resource_id: String,
    pub outcome: String,
    pub error_message: Option<String>,
    pub extra: String,
    pub created_at: OffsetDateTime,
}

impl AuditEventRow {
    pub fn from_event(event: &AuditEvent) -> MetadataResult<Self> {
        let extra = serde_json::to_string(&event.extra)
            .map_err(|e| MetadataError::Internal(format!("encode audit extra: {e}")))?;
        Ok(Self {
            event_id: event.event_id,
            actor: event.actor.clone(),
            operation: event.operation.as_str().to_string(),
            resource_type: event.resource_type.as_str().to_string(),
            resource_id: event.resource_id.clone(),
            outcome: event.outcome.as_str().to_string(),
            error_message: event.error_message.clone(),
            extra,
            created_at: event.created_at,
        })
    }

    /// Decode the detail map. A corrupt column yields an empty map.
    pub fn extra_map(&self) -> BTreeMap<String, String> {
        serde_json::from_str(&self.extra).unwrap_or_default()
    }
}

// =============================================================================
// Reclamation
// =============================================================================

/// Result of a transactional attempt to retire unreferenced content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PurgeOutcome {
    /// At least one active link exists; nothing was changed.
    StillReferenced,
    /// No active link, but a recycled one is still inside its grace period.
    GracePending,
    /// No record exists for the hash.
    Missing,
    /// Recycled links were removed and the record marked absent.
    Purged { blob_key: String },
    /// The record was already marked absent by an earlier run.
    AlreadyAbsent { blob_key: String },
}

impl PurgeOutcome {
    /// Blob key that should be removed from the blob store, if any.
    pub fn blob_key(&self) -> Option<&str> {
        match self {
            Self::Purged { blob_key } | Self::AlreadyAbsent { blob_key } => Some(blob_key),
            Self::StillReferenced | Self::GracePending | Self::Missing => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StillReferenced => "still_referenced",
            Self::GracePending => "grace_pending",
            Self::Missing => "missing",
            Self::Purged { .. } => "purged",
            Self::AlreadyAbsent { .. } => "already_absent",
        }
    }
}
