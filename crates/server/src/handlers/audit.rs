//! Audit log endpoint.

use crate::auth::require_identity;
use crate::error::{ApiResult, ServiceError};
use crate::state::AppState;
use axum::Json;
use axum::extract::{Query, Request, State};
use serde::{Deserialize, Serialize};
use silo_metadata::AuditEventRow;
use std::collections::BTreeMap;
use time::OffsetDateTime;
use uuid::Uuid;

pub const DEFAULT_AUDIT_LIMIT: u32 = 50;
pub const MAX_AUDIT_LIMIT: u32 = 500;

#[derive(Debug, Default, Deserialize)]
pub struct AuditQuery {
    pub limit: Option<u32>,
}

impl AuditQuery {
    fn effective_limit(&self) -> u32 {
        self.limit
            .unwrap_or(DEFAULT_AUDIT_LIMIT)
            .clamp(1, MAX_AUDIT_LIMIT)
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AuditEntry {
    pub event_id: Uuid,
    pub operation: String,
    pub resource_type: String,
    pub resource_id: String,
    pub outcome: String,
    pub error_message: Option<String>,
    pub extra: BTreeMap<String, String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl From<AuditEventRow> for AuditEntry {
    fn from(row: AuditEventRow) -> Self {
        Self {
            extra: row.extra_map(),
            event_id: row.event_id,
            operation: row.operation,
            resource_type: row.resource_type,
            resource_id: row.resource_id,
            outcome: row.outcome,
            error_message: row.error_message,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AuditListResponse {
    pub events: Vec<AuditEntry>,
}

/// GET /v1/audit?limit=n - the caller's most recent events, newest first.
pub async fn list_audit_events(
    State(state): State<AppState>,
    Query(query): Query<AuditQuery>,
    req: Request,
) -> ApiResult<Json<AuditListResponse>> {
    let identity = require_identity(&req)?;
    let rows = state
        .catalog
        .recent_audit_events(identity.as_str(), query.effective_limit())
        .await
        .map_err(ServiceError::from)?;
    Ok(Json(AuditListResponse {
        events: rows.into_iter().map(AuditEntry::from).collect(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_defaults_and_clamps() {
        assert_eq!(AuditQuery::default().effective_limit(), DEFAULT_AUDIT_LIMIT);
        assert_eq!(AuditQuery { limit: Some(0) }.effective_limit(), 1);
        assert_eq!(
            AuditQuery { limit: Some(10_000) }.effective_limit(),
            MAX_AUDIT_LIMIT
        );
    }
}
