//! Key namespaces in the cache store.

use silo_core::{ContentHash, SessionId};

/// Cached content record.
pub fn file_meta(hash: &ContentHash) -> String {
    format!("file-meta:{hash}")
}

/// Multipart session fields (a hash value).
pub fn multipart_info(id: &SessionId) -> String {
    format!("multipart-info:{id}")
}

/// Indexes of received chunks (a set value).
pub fn multipart_chunks(id: &SessionId) -> String {
    format!("multipart-chunks:{id}")
}

/// Dedup lock guarding materializing writes of one hash.
pub fn upload_lock(hash: &ContentHash) -> String {
    format!("upload-lock:{hash}")
}

/// Merge lock guarding completion of one session.
pub fn merge_lock(id: &SessionId) -> String {
    format!("merge-lock:{id}")
}

/// Lock held while one chunk of a session is written and recorded.
pub fn chunk_lock(id: &SessionId, index: u64) -> String {
    format!("chunk-lock:{id}:{index}")
}
