//! Route configuration.

use crate::auth::identity_middleware;
use crate::handlers;
use crate::metrics::metrics_handler;
use crate::state::AppState;
use axum::Router;
use axum::middleware;
use axum::routing::{delete, get, post, put};
use tower_http::trace::TraceLayer;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let api_routes = Router::new()
        // Health check (no identity required, for load balancers and probes)
        .route("/v1/health", get(handlers::health_check))
        // Files
        .route(
            "/v1/files",
            post(handlers::upload_file).get(handlers::list_files),
        )
        .route("/v1/files/fast-upload", post(handlers::fast_upload))
        .route(
            "/v1/files/{hash}",
            get(handlers::download_file).delete(handlers::delete_file),
        )
        .route("/v1/files/{hash}/meta", get(handlers::file_meta))
        .route("/v1/files/{hash}/restore", post(handlers::restore_file))
        // Recycle bin
        .route("/v1/recycle-bin", get(handlers::list_recycle_bin))
        .route("/v1/recycle-bin/{hash}", delete(handlers::purge_file))
        // Multipart uploads
        .route("/v1/multipart", post(handlers::init_multipart))
        .route(
            "/v1/multipart/{session_id}",
            get(handlers::multipart_status),
        )
        .route(
            "/v1/multipart/{session_id}/chunks/{index}",
            put(handlers::put_chunk),
        )
        .route(
            "/v1/multipart/{session_id}/complete",
            post(handlers::complete_multipart),
        )
        // Audit log
        .route("/v1/audit", get(handlers::list_audit_events));

    let mut router = Router::new().merge(api_routes);

    // When enabled, /metrics must be network-restricted to the scraper.
    if state.config.server.metrics_enabled {
        router = router.route("/metrics", get(metrics_handler));
    }

    // Order of execution: TraceLayer -> identity -> handler
    router
        .layer(middleware::from_fn_with_state(
            state.clone(),
            identity_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
