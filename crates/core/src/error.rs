//! Errors raised by domain types while parsing or decoding.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Not a 64-character hex SHA-256 digest.
    #[error("invalid content hash: {0}")]
    InvalidHash(String),

    #[error("chunk size {size} outside [{min}, {max}]")]
    InvalidChunkSize { size: u64, min: u64, max: u64 },

    /// A session id or cached session field that cannot be decoded.
    #[error("upload session: {0}")]
    UploadSession(String),

    #[error("unknown status: {0}")]
    InvalidStatus(String),

    #[error("serialization: {0}")]
    Serialization(String),
}

pub type Result<T> = std::result::Result<T, Error>;
