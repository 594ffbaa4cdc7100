//! Catalog error types.

use thiserror::Error;

/// Catalog operation errors.
#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("corrupt row: {0}")]
    Corrupt(String),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type for catalog operations.
pub type MetadataResult<T> = std::result::Result<T, MetadataError>;

impl From<silo_core::Error> for MetadataError {
    fn from(err: silo_core::Error) -> Self {
        Self::Corrupt(err.to_string())
    }
}
