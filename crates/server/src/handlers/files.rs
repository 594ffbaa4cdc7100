//! File endpoints: upload, download, listing and the recycle bin.

use crate::auth::require_identity;
use crate::error::{ApiError, ApiResult};
use crate::services::{FileEntry, FileMeta, PermanentDeleteOutcome, SoftDeleteOutcome, UploadOutcome};
use crate::state::AppState;
use axum::Json;
use axum::body::Body;
use axum::extract::{Path, Request, State};
use axum::http::StatusCode;
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE};
use axum::response::{IntoResponse, Response};
use futures::StreamExt;
use percent_encoding::{NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};
use serde::{Deserialize, Serialize};
use silo_core::LinkStatus;

/// Header carrying the display name of a single-shot upload, percent-encoded.
pub const FILE_NAME_HEADER: &str = "x-file-name";

/// Maximum size of small JSON request bodies.
pub(crate) const MAX_JSON_BODY_SIZE: usize = 64 * 1024;

#[derive(Debug, Deserialize)]
pub struct FastUploadRequest {
    pub hash: String,
    pub file_name: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FileListResponse {
    pub files: Vec<FileEntry>,
}

/// Read a JSON body of at most `MAX_JSON_BODY_SIZE` bytes.
pub(crate) async fn read_json<T: serde::de::DeserializeOwned>(req: Request) -> ApiResult<T> {
    let bytes = axum::body::to_bytes(req.into_body(), MAX_JSON_BODY_SIZE)
        .await
        .map_err(|e| ApiError::BadRequest(format!("failed to read body: {e}")))?;
    serde_json::from_slice(&bytes).map_err(|e| ApiError::BadRequest(format!("invalid JSON: {e}")))
}

/// Read a raw body, rejecting a declared length above `limit` up front.
pub(crate) async fn read_body(req: Request, limit: usize) -> ApiResult<bytes::Bytes> {
    let declared = req
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());
    if declared.is_some_and(|len| len > limit as u64) {
        return Err(ApiError::PayloadTooLarge(format!(
            "body exceeds {limit} bytes"
        )));
    }
    axum::body::to_bytes(req.into_body(), limit)
        .await
        .map_err(|e| ApiError::BadRequest(format!("failed to read body: {e}")))
}

fn decode_file_name(req: &Request) -> ApiResult<String> {
    let Some(raw) = req.headers().get(FILE_NAME_HEADER) else {
        return Ok(String::new());
    };
    let raw = raw
        .to_str()
        .map_err(|_| ApiError::BadRequest(format!("{FILE_NAME_HEADER} must be ASCII")))?;
    percent_decode_str(raw)
        .decode_utf8()
        .map(|name| name.into_owned())
        .map_err(|_| ApiError::BadRequest(format!("{FILE_NAME_HEADER} is not valid UTF-8")))
}

/// POST /v1/files
pub async fn upload_file(
    State(state): State<AppState>,
    req: Request,
) -> ApiResult<(StatusCode, Json<UploadOutcome>)> {
    let identity = require_identity(&req)?;
    let file_name = decode_file_name(&req)?;
    let limit = usize::try_from(state.config.server.max_upload_bytes).unwrap_or(usize::MAX);
    let data = read_body(req, limit).await?;

    let outcome = state.files.upload(identity.as_str(), &file_name, data).await?;
    let status = if outcome.deduplicated {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((status, Json(outcome)))
}

/// POST /v1/files/fast-upload
pub async fn fast_upload(
    State(state): State<AppState>,
    req: Request,
) -> ApiResult<Json<UploadOutcome>> {
    let identity = require_identity(&req)?;
    let body: FastUploadRequest = read_json(req).await?;
    let outcome = state
        .files
        .fast_upload(identity.as_str(), &body.hash, &body.file_name)
        .await?;
    Ok(Json(outcome))
}

/// GET /v1/files
pub async fn list_files(
    State(state): State<AppState>,
    req: Request,
) -> ApiResult<Json<FileListResponse>> {
    let identity = require_identity(&req)?;
    let files = state.files.list(identity.as_str(), LinkStatus::Active).await?;
    Ok(Json(FileListResponse { files }))
}

/// GET /v1/recycle-bin
pub async fn list_recycle_bin(
    State(state): State<AppState>,
    req: Request,
) -> ApiResult<Json<FileListResponse>> {
    let identity = require_identity(&req)?;
    let files = state
        .files
        .list(identity.as_str(), LinkStatus::Recycled)
        .await?;
    Ok(Json(FileListResponse { files }))
}

/// GET /v1/files/{hash}
pub async fn download_file(
    State(state): State<AppState>,
    Path(hash): Path<String>,
    req: Request,
) -> ApiResult<Response> {
    let identity = require_identity(&req)?;
    let download = state.files.download(identity.as_str(), &hash).await?;

    let body_stream = download
        .stream
        .map(|result| result.map_err(|e| std::io::Error::other(e.to_string())));
    let disposition = format!(
        "attachment; filename*=UTF-8''{}",
        utf8_percent_encode(&download.file_name, NON_ALPHANUMERIC)
    );

    Ok((
        StatusCode::OK,
        [
            (CONTENT_TYPE, "application/octet-stream".to_string()),
            (CONTENT_LENGTH, download.size.to_string()),
            (CONTENT_DISPOSITION, disposition),
        ],
        Body::from_stream(body_stream),
    )
        .into_response())
}

/// GET /v1/files/{hash}/meta
pub async fn file_meta(
    State(state): State<AppState>,
    Path(hash): Path<String>,
    req: Request,
) -> ApiResult<Json<FileMeta>> {
    require_identity(&req)?;
    Ok(Json(state.files.meta(&hash).await?))
}

/// DELETE /v1/files/{hash}
pub async fn delete_file(
    State(state): State<AppState>,
    Path(hash): Path<String>,
    req: Request,
) -> ApiResult<Json<SoftDeleteOutcome>> {
    let identity = require_identity(&req)?;
    Ok(Json(state.files.soft_delete(identity.as_str(), &hash).await?))
}

/// POST /v1/files/{hash}/restore
pub async fn restore_file(
    State(state): State<AppState>,
    Path(hash): Path<String>,
    req: Request,
) -> ApiResult<Json<FileEntry>> {
    let identity = require_identity(&req)?;
    Ok(Json(state.files.restore(identity.as_str(), &hash).await?))
}

/// DELETE /v1/recycle-bin/{hash}
pub async fn purge_file(
    State(state): State<AppState>,
    Path(hash): Path<String>,
    req: Request,
) -> ApiResult<Json<PermanentDeleteOutcome>> {
    let identity = require_identity(&req)?;
    Ok(Json(
        state
            .files
            .permanent_delete(identity.as_str(), &hash)
            .await?,
    ))
}
