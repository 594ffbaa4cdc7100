//! Audit event records.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use time::OffsetDateTime;
use uuid::Uuid;

/// Operation recorded in the audit log.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOperation {
    Upload,
    FastUpload,
    Download,
    Delete,
    Restore,
    PermanentDelete,
    MultipartInit,
    MultipartComplete,
}

impl AuditOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Upload => "upload",
            Self::FastUpload => "fast_upload",
            Self::Download => "download",
            Self::Delete => "delete",
            Self::Restore => "restore",
            Self::PermanentDelete => "permanent_delete",
            Self::MultipartInit => "multipart_init",
            Self::MultipartComplete => "multipart_complete",
        }
    }
}

/// Kind of resource an audit event refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    File,
    MultipartSession,
}

impl ResourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::File => "file",
            Self::MultipartSession => "multipart_session",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditOutcome {
    Success,
    Failed,
}

impl AuditOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }
}

/// A structured, fire-and-forget audit record.
///
/// `event_id` is the natural key used to drop duplicates on redelivery.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_id: Uuid,
    pub actor: String,
    pub operation: AuditOperation,
    pub resource_type: ResourceType,
    pub resource_id: String,
    pub outcome: AuditOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl AuditEvent {
    pub fn success(
        actor: impl Into<String>,
        operation: AuditOperation,
        resource_type: ResourceType,
        resource_id: impl Into<String>,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            actor: actor.into(),
            operation,
            resource_type,
            resource_id: resource_id.into(),
            outcome: AuditOutcome::Success,
            error_message: None,
            extra: BTreeMap::new(),
            created_at: OffsetDateTime::now_utc(),
        }
    }

    pub fn failure(
        actor: impl Into<String>,
        operation: AuditOperation,
        resource_type: ResourceType,
        resource_id: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            outcome: AuditOutcome::Failed,
            error_message: Some(error.into()),
            ..Self::success(actor, operation, resource_type, resource_id)
        }
    }

    /// Attach an extra key/value detail.
    pub fn with(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.extra.insert(key.into(), value.to_string());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_event_carries_error() {
        let event = AuditEvent::failure(
            "alice",
            AuditOperation::Upload,
            ResourceType::File,
            "abc",
            "lock held",
        )
        .with("size", 42);
        assert_eq!(event.outcome, AuditOutcome::Failed);
        assert_eq!(event.error_message.as_deref(), Some("lock held"));
        assert_eq!(event.extra.get("size").map(String::as_str), Some("42"));
    }

    #[test]
    fn test_operation_names_match_serde() {
        let json = serde_json::to_string(&AuditOperation::PermanentDelete).unwrap();
        assert_eq!(json, format!("\"{}\"", AuditOperation::PermanentDelete.as_str()));
    }
}
