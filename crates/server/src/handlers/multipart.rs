//! Multipart upload endpoints.

use crate::auth::require_identity;
use crate::error::{ApiError, ApiResult};
use crate::handlers::files::{read_body, read_json};
use crate::services::{ChunkReceipt, CompleteOutcome};
use crate::state::AppState;
use axum::Json;
use axum::extract::{Path, Request, State};
use axum::http::StatusCode;
use silo_core::upload::{InitMultipartRequest, InitMultipartResponse, MultipartStatusResponse};

/// Slack over the chunk size when reading a chunk body, so an oversized
/// chunk is rejected by the length check with a useful message.
const CHUNK_BODY_SLACK: usize = 1024;

/// POST /v1/multipart
pub async fn init_multipart(
    State(state): State<AppState>,
    req: Request,
) -> ApiResult<(StatusCode, Json<InitMultipartResponse>)> {
    let identity = require_identity(&req)?;
    let body: InitMultipartRequest = read_json(req).await?;
    let response = state.multipart.init(identity.as_str(), &body).await?;
    let status = if response.deduplicated {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((status, Json(response)))
}

/// PUT /v1/multipart/{session_id}/chunks/{index}
pub async fn put_chunk(
    State(state): State<AppState>,
    Path((session_id, index)): Path<(String, String)>,
    req: Request,
) -> ApiResult<Json<ChunkReceipt>> {
    let identity = require_identity(&req)?;
    let index: u64 = index
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("invalid chunk index: {index}")))?;
    let limit = usize::try_from(state.config.upload.chunk_size)
        .unwrap_or(usize::MAX)
        .saturating_add(CHUNK_BODY_SLACK);
    let data = read_body(req, limit).await?;

    let receipt = state
        .multipart
        .put_chunk(identity.as_str(), &session_id, index, data)
        .await?;
    Ok(Json(receipt))
}

/// GET /v1/multipart/{session_id}
pub async fn multipart_status(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    req: Request,
) -> ApiResult<Json<MultipartStatusResponse>> {
    let identity = require_identity(&req)?;
    Ok(Json(
        state.multipart.status(identity.as_str(), &session_id).await?,
    ))
}

/// POST /v1/multipart/{session_id}/complete
pub async fn complete_multipart(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    req: Request,
) -> ApiResult<Json<CompleteOutcome>> {
    let identity = require_identity(&req)?;
    Ok(Json(
        state
            .multipart
            .complete(identity.as_str(), &session_id)
            .await?,
    ))
}
