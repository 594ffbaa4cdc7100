//! Multipart upload session types and lifecycle.

use crate::hash::ContentHash;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use uuid::Uuid;

/// Unique identifier for a multipart upload session.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Generate a new random session ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse from a string.
    pub fn parse(s: &str) -> crate::Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| crate::Error::UploadSession(format!("invalid session ID: {e}")))
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Blob store key of a temporary chunk belonging to this session.
    pub fn chunk_key(&self, index: u64) -> String {
        format!("multipart/{}/{index}", self.0)
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionId({})", self.0)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Multipart session status.
///
/// Expiry is not a status: an expired session simply disappears from the
/// cache store with its TTL.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadStatus {
    /// Session created, no chunk received yet.
    Initiated,
    /// At least one chunk received.
    Uploading,
    /// Chunks were composed into the final blob.
    Completed,
}

impl UploadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initiated => "initiated",
            Self::Uploading => "uploading",
            Self::Completed => "completed",
        }
    }

    /// Check if the session still accepts chunks.
    pub fn accepts_chunks(&self) -> bool {
        !matches!(self, Self::Completed)
    }
}

impl FromStr for UploadStatus {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s {
            "initiated" => Ok(Self::Initiated),
            "uploading" => Ok(Self::Uploading),
            "completed" => Ok(Self::Completed),
            other => Err(crate::Error::InvalidStatus(format!(
                "unknown upload status: {other}"
            ))),
        }
    }
}

impl fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Number of chunks needed to cover `size` bytes.
pub fn chunk_count(size: u64, chunk_size: u64) -> u64 {
    if chunk_size == 0 {
        return 0;
    }
    size.div_ceil(chunk_size)
}

/// Field names of the session record in the cache store.
pub mod fields {
    pub const HASH: &str = "hash";
    pub const FILE_NAME: &str = "file_name";
    pub const TOTAL_SIZE: &str = "total_size";
    pub const CHUNK_SIZE: &str = "chunk_size";
    pub const CHUNK_COUNT: &str = "chunk_count";
    pub const OWNER: &str = "owner";
    pub const STATUS: &str = "status";
    pub const UPLOADED_COUNT: &str = "uploaded_count";
    pub const CREATED_AT: &str = "created_at";
    pub const LOCATION: &str = "location";
}

/// A multipart upload session tracking which chunks were received.
///
/// The set of received chunk indices is stored alongside the session in the
/// cache store and is not part of this struct.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadSession {
    pub id: SessionId,
    /// Claimed hash of the assembled content.
    pub hash: ContentHash,
    pub file_name: String,
    pub total_size: u64,
    pub chunk_size: u64,
    pub chunk_count: u64,
    pub owner: String,
    pub status: UploadStatus,
    /// Number of distinct chunks received.
    pub uploaded_count: u64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    /// Blob key of the composed content once completed.
    pub location: Option<String>,
}

impl UploadSession {
    /// Create a new session in the `Initiated` state.
    pub fn new(
        hash: ContentHash,
        file_name: impl Into<String>,
        total_size: u64,
        chunk_size: u64,
        owner: impl Into<String>,
    ) -> Self {
        Self {
            id: SessionId::new(),
            hash,
            file_name: file_name.into(),
            total_size,
            chunk_size,
            chunk_count: chunk_count(total_size, chunk_size),
            owner: owner.into(),
            status: UploadStatus::Initiated,
            uploaded_count: 0,
            created_at: OffsetDateTime::now_utc(),
            location: None,
        }
    }

    /// Expected byte length of the chunk at `index`.
    pub fn expected_chunk_len(&self, index: u64) -> Option<u64> {
        if index >= self.chunk_count {
            return None;
        }
        if index + 1 == self.chunk_count {
            Some(self.total_size - self.chunk_size * index)
        } else {
            Some(self.chunk_size)
        }
    }

    /// Whether every chunk has been received.
    pub fn is_fully_uploaded(&self) -> bool {
        self.chunk_count > 0 && self.uploaded_count == self.chunk_count
    }

    /// Upload progress as an integer percentage.
    pub fn progress_percent(&self) -> u64 {
        if self.chunk_count == 0 {
            return 0;
        }
        self.uploaded_count * 100 / self.chunk_count
    }

    /// Blob keys of every chunk, in index order.
    pub fn chunk_keys(&self) -> Vec<String> {
        (0..self.chunk_count).map(|i| self.id.chunk_key(i)).collect()
    }

    /// Flatten into cache-store hash fields.
    pub fn to_fields(&self) -> crate::Result<Vec<(String, String)>> {
        let created_at = self
            .created_at
            .format(&Rfc3339)
            .map_err(|e| crate::Error::Serialization(e.to_string()))?;
        let mut out = vec![
            (fields::HASH.to_string(), self.hash.to_hex()),
            (fields::FILE_NAME.to_string(), self.file_name.clone()),
            (fields::TOTAL_SIZE.to_string(), self.total_size.to_string()),
            (fields::CHUNK_SIZE.to_string(), self.chunk_size.to_string()),
            (fields::CHUNK_COUNT.to_string(), self.chunk_count.to_string()),
            (fields::OWNER.to_string(), self.owner.clone()),
            (fields::STATUS.to_string(), self.status.as_str().to_string()),
            (
                fields::UPLOADED_COUNT.to_string(),
                self.uploaded_count.to_string(),
            ),
            (fields::CREATED_AT.to_string(), created_at),
        ];
        if let Some(location) = &self.location {
            out.push((fields::LOCATION.to_string(), location.clone()));
        }
        Ok(out)
    }

    /// Rebuild from cache-store hash fields.
    pub fn from_fields(id: SessionId, map: &HashMap<String, String>) -> crate::Result<Self> {
        fn field<'a>(map: &'a HashMap<String, String>, name: &str) -> crate::Result<&'a str> {
            map.get(name).map(String::as_str).ok_or_else(|| {
                crate::Error::UploadSession(format!("session record missing field '{name}'"))
            })
        }
        fn number(map: &HashMap<String, String>, name: &str) -> crate::Result<u64> {
            field(map, name)?.parse().map_err(|e| {
                crate::Error::UploadSession(format!("session field '{name}' is not a number: {e}"))
            })
        }

        let created_at = OffsetDateTime::parse(field(map, fields::CREATED_AT)?, &Rfc3339)
            .map_err(|e| crate::Error::Serialization(e.to_string()))?;

        Ok(Self {
            id,
            hash: ContentHash::from_hex(field(map, fields::HASH)?)?,
            file_name: field(map, fields::FILE_NAME)?.to_string(),
            total_size: number(map, fields::TOTAL_SIZE)?,
            chunk_size: number(map, fields::CHUNK_SIZE)?,
            chunk_count: number(map, fields::CHUNK_COUNT)?,
            owner: field(map, fields::OWNER)?.to_string(),
            status: field(map, fields::STATUS)?.parse()?,
            uploaded_count: number(map, fields::UPLOADED_COUNT)?,
            created_at,
            location: map.get(fields::LOCATION).cloned(),
        })
    }
}

/// Request to start a multipart upload.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InitMultipartRequest {
    /// Hex SHA-256 of the complete content.
    pub hash: String,
    pub file_name: String,
    /// Total size in bytes.
    pub size: i64,
}

/// Response from starting a multipart upload.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InitMultipartResponse {
    /// Absent when the content already exists and was linked directly.
    pub session_id: Option<String>,
    pub chunk_size: u64,
    pub chunk_count: u64,
    /// True when no upload is needed.
    pub deduplicated: bool,
}

/// Response from querying a multipart session.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MultipartStatusResponse {
    pub session_id: String,
    pub hash: String,
    pub status: UploadStatus,
    pub uploaded_count: u64,
    pub chunk_count: u64,
    pub progress_percent: u64,
    pub completed: bool,
    /// Indices received so far, ascending.
    pub uploaded_chunks: Vec<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_session(size: u64, chunk_size: u64) -> UploadSession {
        UploadSession::new(
            ContentHash::compute(b"content"),
            "report.pdf",
            size,
            chunk_size,
            "alice",
        )
    }

    #[test]
    fn test_session_id_roundtrip() {
        let id = SessionId::new();
        let parsed = SessionId::parse(&id.to_string()).unwrap();
        assert_eq!(id, parsed);
        assert!(SessionId::parse("not-a-uuid").is_err());
    }

    #[test]
    fn test_chunk_key_layout() {
        let id = SessionId::new();
        assert_eq!(id.chunk_key(3), format!("multipart/{id}/3"));
    }

    #[test]
    fn test_chunk_count() {
        assert_eq!(chunk_count(100, 64), 2);
        assert_eq!(chunk_count(128, 64), 2);
        assert_eq!(chunk_count(129, 64), 3);
        assert_eq!(chunk_count(0, 64), 0);
        assert_eq!(chunk_count(10, 0), 0);
    }

    #[test]
    fn test_expected_chunk_len() {
        let session = sample_session(100, 64);
        assert_eq!(session.expected_chunk_len(0), Some(64));
        assert_eq!(session.expected_chunk_len(1), Some(36));
        assert_eq!(session.expected_chunk_len(2), None);

        let exact = sample_session(128, 64);
        assert_eq!(exact.expected_chunk_len(1), Some(64));
    }

    #[test]
    fn test_progress_and_completion() {
        let mut session = sample_session(300, 100);
        assert_eq!(session.progress_percent(), 0);
        assert!(!session.is_fully_uploaded());

        session.uploaded_count = 2;
        assert_eq!(session.progress_percent(), 66);

        session.uploaded_count = 3;
        assert_eq!(session.progress_percent(), 100);
        assert!(session.is_fully_uploaded());
    }

    #[test]
    fn test_status_parse() {
        for status in [
            UploadStatus::Initiated,
            UploadStatus::Uploading,
            UploadStatus::Completed,
        ] {
            assert_eq!(status.as_str().parse::<UploadStatus>().unwrap(), status);
        }
        assert!("expired".parse::<UploadStatus>().is_err());
        assert!(!UploadStatus::Completed.accepts_chunks());
    }

    #[test]
    fn test_fields_roundtrip_preserves_session() {
        let mut session = sample_session(300, 100);
        session.status = UploadStatus::Completed;
        session.uploaded_count = 3;
        session.location = Some(session.hash.blob_key());
        let map: HashMap<String, String> = session.to_fields().unwrap().into_iter().collect();
        let restored = UploadSession::from_fields(session.id, &map).unwrap();
        assert_eq!(restored, session);
    }

    #[test]
    fn test_from_fields_rejects_missing_field() {
        let session = sample_session(10, 5);
        let mut map: HashMap<String, String> = session.to_fields().unwrap().into_iter().collect();
        map.remove(fields::CHUNK_COUNT);
        assert!(UploadSession::from_fields(session.id, &map).is_err());
    }
}
