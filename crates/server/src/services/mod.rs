//! Core operations over the four backing stores.
//!
//! No sequence here is transactional across stores. Correctness rests on
//! lease locks around materializing writes, idempotent catalog upserts and
//! re-validation of reference counts before anything is destroyed.

pub mod audit;
pub mod deletion;
pub mod files;
pub mod multipart;
pub mod reclaim;
pub mod sweep;

pub use audit::{AuditSink, spawn_audit_writer};
pub use deletion::{DeletionScheduler, DeletionWorker, Disposition};
pub use files::{
    Download, FileEntry, FileMeta, FileService, PermanentDeleteOutcome, SoftDeleteOutcome,
    UploadOutcome,
};
pub use multipart::{ChunkReceipt, CompleteOutcome, MultipartService};
pub use reclaim::{Reclaim, Reclaimer};
pub use sweep::{ReconciliationSweep, SweepStats};

use crate::error::{ServiceError, ServiceResult};
use silo_core::ContentHash;

/// Longest accepted display name, in bytes.
pub const MAX_FILE_NAME_LEN: usize = 1024;

pub(crate) fn parse_hash(hash: &str) -> ServiceResult<ContentHash> {
    Ok(ContentHash::from_hex(hash.trim())?)
}

pub(crate) fn validate_file_name(name: &str) -> ServiceResult<&str> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ServiceError::Validation("file name is required".to_string()));
    }
    if name.len() > MAX_FILE_NAME_LEN {
        return Err(ServiceError::Validation(format!(
            "file name exceeds {MAX_FILE_NAME_LEN} bytes"
        )));
    }
    if name.chars().any(char::is_control) {
        return Err(ServiceError::Validation(
            "file name contains control characters".to_string(),
        ));
    }
    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_name_validation() {
        assert_eq!(validate_file_name("  report.pdf ").unwrap(), "report.pdf");
        assert!(validate_file_name("   ").is_err());
        assert!(validate_file_name("a\nb").is_err());
        assert!(validate_file_name(&"x".repeat(MAX_FILE_NAME_LEN + 1)).is_err());
    }

    #[test]
    fn test_parse_hash_is_validation_error() {
        assert!(matches!(parse_hash("nope"), Err(ServiceError::Validation(_))));
        let hash = ContentHash::compute(b"x");
        assert_eq!(parse_hash(&hash.to_hex().to_uppercase()).unwrap(), hash);
    }
}
