//! Deferred deletion messages.

use crate::hash::ContentHash;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Request to physically delete content once its grace period has passed.
///
/// Produced when a soft-delete drops the reference count to zero. The
/// consumer must re-validate the reference count before acting, so a
/// redelivered or stale task is harmless.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeferredDeletionTask {
    pub owner: String,
    pub hash: ContentHash,
    pub file_name: String,
    #[serde(with = "time::serde::rfc3339")]
    pub scheduled_at: OffsetDateTime,
}

impl DeferredDeletionTask {
    pub fn new(owner: impl Into<String>, hash: ContentHash, file_name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            hash,
            file_name: file_name.into(),
            scheduled_at: OffsetDateTime::now_utc(),
        }
    }

    /// Encode as a queue payload.
    pub fn to_json(&self) -> crate::Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| crate::Error::Serialization(e.to_string()))
    }

    /// Decode a queue payload.
    pub fn from_json(data: &[u8]) -> crate::Result<Self> {
        serde_json::from_slice(data).map_err(|e| crate::Error::Serialization(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_wire_format() {
        let task = DeferredDeletionTask::new("bob", ContentHash::compute(b"x"), "a.txt");
        let json: serde_json::Value = serde_json::from_slice(&task.to_json().unwrap()).unwrap();
        assert_eq!(json["owner"], "bob");
        assert_eq!(json["hash"], task.hash.to_hex());
        assert_eq!(json["file_name"], "a.txt");
        assert!(json["scheduled_at"].as_str().unwrap().ends_with('Z'));
    }

    #[test]
    fn test_malformed_payload_is_rejected() {
        assert!(DeferredDeletionTask::from_json(b"{not json").is_err());
        assert!(DeferredDeletionTask::from_json(br#"{"owner":"a","hash":"xyz"}"#).is_err());
    }
}
