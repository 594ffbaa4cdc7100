//! Health endpoint.

use crate::state::AppState;
use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use std::fmt::Display;

/// Health response.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub blob_store: String,
    pub catalog: String,
    pub cache: String,
}

fn component<E: Display>(name: &str, result: Result<(), E>) -> String {
    match result {
        Ok(()) => "ok".to_string(),
        Err(e) => {
            tracing::warn!(component = name, error = %e, "health check failed");
            "unavailable".to_string()
        }
    }
}

/// GET /v1/health - unauthenticated, for load balancers and probes.
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let (blob_store, catalog, cache) = tokio::join!(
        state.storage.health_check(),
        state.catalog.health_check(),
        state.kv.health_check(),
    );
    let blob_store = component("blob_store", blob_store);
    let catalog = component("catalog", catalog);
    let cache = component("cache", cache);

    let healthy = [&blob_store, &catalog, &cache].iter().all(|s| *s == "ok");
    let (status, label) = if healthy {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "degraded")
    };
    (
        status,
        Json(HealthResponse {
            status: label.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            blob_store,
            catalog,
            cache,
        }),
    )
}
