//! Service and API error types.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use silo_cache::CacheError;
use silo_metadata::MetadataError;
use silo_queue::QueueError;
use silo_storage::StorageError;

/// Failure of a core operation.
///
/// Everything a backing store reports, other than a missing object, is
/// transient infrastructure failure.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    NotFound(String),

    #[error("chunk index {index} is out of range (chunk count {chunk_count})")]
    OutOfRange { index: u64, chunk_count: u64 },

    #[error("upload incomplete: {uploaded} of {expected} chunks received")]
    Incomplete { uploaded: u64, expected: u64 },

    #[error("{0}")]
    Infra(String),
}

impl ServiceError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::Conflict(_) => "conflict",
            Self::NotFound(_) => "not_found",
            Self::OutOfRange { .. } => "out_of_range",
            Self::Incomplete { .. } => "incomplete",
            Self::Infra(_) => "internal_error",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) | Self::OutOfRange { .. } => StatusCode::BAD_REQUEST,
            Self::Conflict(_) | Self::Incomplete { .. } => StatusCode::CONFLICT,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Infra(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether a worker should retry the operation that produced this error.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Infra(_))
    }
}

impl From<StorageError> for ServiceError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::NotFound(key) => Self::NotFound(format!("blob not found: {key}")),
            other => Self::Infra(format!("blob store: {other}")),
        }
    }
}

impl From<MetadataError> for ServiceError {
    fn from(e: MetadataError) -> Self {
        match e {
            MetadataError::NotFound(what) => Self::NotFound(what),
            other => Self::Infra(format!("catalog: {other}")),
        }
    }
}

impl From<CacheError> for ServiceError {
    fn from(e: CacheError) -> Self {
        Self::Infra(format!("cache: {e}"))
    }
}

impl From<QueueError> for ServiceError {
    fn from(e: QueueError) -> Self {
        Self::Infra(format!("queue: {e}"))
    }
}

impl From<silo_core::Error> for ServiceError {
    fn from(e: silo_core::Error) -> Self {
        match e {
            silo_core::Error::InvalidHash(_) | silo_core::Error::InvalidChunkSize { .. } => {
                Self::Validation(e.to_string())
            }
            other => Self::Infra(other.to_string()),
        }
    }
}

/// Result type for service operations.
pub type ServiceResult<T> = std::result::Result<T, ServiceError>;

/// API error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error code for programmatic handling.
    pub code: String,
    /// Human-readable error message.
    pub message: String,
}

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("payload too large: {0}")]
    PayloadTooLarge(String),

    #[error(transparent)]
    Service(#[from] ServiceError),
}

impl ApiError {
    /// Get the error code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "bad_request",
            Self::Unauthorized(_) => "unauthorized",
            Self::PayloadTooLarge(_) => "payload_too_large",
            Self::Service(e) => e.code(),
        }
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Service(e) => e.status_code(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = match &self {
            Self::Service(ServiceError::Infra(detail)) => {
                tracing::error!(error = %detail, "request failed on backing store");
                "internal server error".to_string()
            }
            other => other.to_string(),
        };
        let body = ErrorResponse {
            code: self.code().to_string(),
            message,
        };
        (status, Json(body)).into_response()
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_taxonomy_status_codes() {
        let cases = [
            (ServiceError::Validation("x".into()), StatusCode::BAD_REQUEST),
            (
                ServiceError::OutOfRange {
                    index: 3,
                    chunk_count: 3,
                },
                StatusCode::BAD_REQUEST,
            ),
            (ServiceError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (ServiceError::Conflict("x".into()), StatusCode::CONFLICT),
            (
                ServiceError::Incomplete {
                    uploaded: 1,
                    expected: 2,
                },
                StatusCode::CONFLICT,
            ),
            (
                ServiceError::Infra("x".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (error, status) in cases {
            assert_eq!(ApiError::from(error).status_code(), status);
        }
        assert_eq!(
            ApiError::Unauthorized("x".into()).status_code(),
            StatusCode::UNAUTHORIZED
        );
    }

    #[test]
    fn test_storage_not_found_is_not_transient() {
        let err = ServiceError::from(StorageError::NotFound("files/abc".into()));
        assert!(matches!(err, ServiceError::NotFound(_)));
        assert!(!err.is_transient());

        let err = ServiceError::from(StorageError::Config("bad".into()));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_infra_detail_is_not_leaked() {
        let response =
            ApiError::from(ServiceError::Infra("password=hunter2".into())).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(!text.contains("hunter2"));
        assert!(text.contains("internal_error"));
    }
}
