//! Core domain types and shared logic for the silo file store.
//!
//! This crate defines the canonical data model used across all other crates:
//! - Content hashes and blob key layout
//! - Per-user file link lifecycle
//! - Multipart upload sessions
//! - Deferred deletion tasks and audit events
//! - Application configuration

pub mod audit;
pub mod config;
pub mod deletion;
pub mod error;
pub mod hash;
pub mod link;
pub mod upload;

pub use audit::{AuditEvent, AuditOperation, AuditOutcome, ResourceType};
pub use deletion::DeferredDeletionTask;
pub use error::{Error, Result};
pub use hash::{ContentHash, ContentHasher};
pub use link::LinkStatus;
pub use upload::{SessionId, UploadSession, UploadStatus, chunk_count};

/// Default multipart chunk size: 5 MiB
pub const DEFAULT_CHUNK_SIZE: u64 = 5 * 1024 * 1024;

/// Maximum chunk size: 64 MiB
pub const MAX_CHUNK_SIZE: u64 = 64 * 1024 * 1024;

/// Minimum chunk size: 1 MiB
pub const MIN_CHUNK_SIZE: u64 = 1024 * 1024;

/// Grace period before unreferenced content is physically deleted: 3 days
pub const DEFAULT_DELETION_GRACE_SECS: u64 = 3 * 24 * 60 * 60;
