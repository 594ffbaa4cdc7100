//! Caller identity and request correlation.
//!
//! Authentication is delegated to a fronting proxy, which passes the
//! authenticated user in a configurable header (`x-silo-user` by default).

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use tracing::Instrument;
use uuid::Uuid;

/// Maximum length for trace IDs.
/// Longer trace IDs are truncated to prevent log bloat and potential log injection.
const MAX_TRACE_ID_LEN: usize = 128;

/// Maximum length of an owner identity.
pub const MAX_IDENTITY_LEN: usize = 256;

/// Trace ID for request correlation.
#[derive(Clone, Debug)]
pub struct TraceId(pub String);

impl TraceId {
    /// Generate a new random trace ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create a trace ID from a client-provided value, keeping printable
    /// ASCII only and at most `MAX_TRACE_ID_LEN` characters.
    pub fn from_client(value: &str) -> Self {
        let sanitized: String = value
            .chars()
            .take(MAX_TRACE_ID_LEN)
            .filter(|c| c.is_ascii_graphic() || *c == ' ')
            .collect();

        if sanitized.is_empty() {
            Self::new()
        } else {
            Self(sanitized)
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TraceId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TraceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The authenticated owner making the request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Identity(pub String);

impl Identity {
    /// Parse a header value. Blank, oversized or non-printable values are
    /// rejected rather than cleaned, since the value keys ownership.
    pub fn from_header(value: &str) -> Option<Self> {
        let value = value.trim();
        if value.is_empty()
            || value.len() > MAX_IDENTITY_LEN
            || value.chars().any(|c| !c.is_ascii_graphic())
        {
            return None;
        }
        Some(Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn extract_or_generate_trace_id(req: &Request) -> TraceId {
    req.headers()
        .get("x-trace-id")
        .and_then(|v| v.to_str().ok())
        .map(TraceId::from_client)
        .unwrap_or_else(TraceId::new)
}

/// Attach the trace ID and caller identity to the request and run the
/// rest of the stack inside a span carrying both.
pub async fn identity_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Response {
    let trace_id = extract_or_generate_trace_id(&req);
    let trace_id_str = trace_id.0.clone();
    req.extensions_mut().insert(trace_id);

    let identity = req
        .headers()
        .get(state.config.auth.identity_header.as_str())
        .and_then(|v| v.to_str().ok())
        .and_then(Identity::from_header);
    let user = identity
        .as_ref()
        .map(|id| id.0.clone())
        .unwrap_or_default();
    if let Some(identity) = identity {
        req.extensions_mut().insert(identity);
    }

    next.run(req)
        .instrument(tracing::info_span!("request", trace_id = %trace_id_str, user = %user))
        .await
}

/// Require a caller identity.
pub fn require_identity(req: &Request) -> ApiResult<Identity> {
    req.extensions()
        .get::<Identity>()
        .cloned()
        .ok_or_else(|| ApiError::Unauthorized("caller identity required".to_string()))
}

/// Get the trace ID from request extensions.
pub fn get_trace_id(req: &Request) -> Option<&TraceId> {
    req.extensions().get::<TraceId>()
}
