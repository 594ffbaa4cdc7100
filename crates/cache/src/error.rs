//! Cache store error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    /// The key holds a value of a different kind (string, hash or set).
    #[error("wrong value type for key {0}")]
    WrongType(String),

    #[error("hash field {field} of {key} is not an integer")]
    NotAnInteger { key: String, field: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("cache backend unavailable: {0}")]
    Unavailable(String),
}

pub type CacheResult<T> = std::result::Result<T, CacheError>;
