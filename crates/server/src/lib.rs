//! HTTP server for the silo file store.
//!
//! This crate provides:
//! - Single-shot and fast uploads with content deduplication
//! - Resumable multipart uploads
//! - Downloads, listing, soft delete, restore and permanent delete
//! - The deferred deletion worker, reconciliation sweep and audit writer

pub mod auth;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod routes;
pub mod runtime;
pub mod services;
pub mod state;

pub use auth::{Identity, TraceId};
pub use error::{ApiError, ServiceError};
pub use routes::create_router;
pub use runtime::Runtime;
pub use state::AppState;
