//! Storage trait definitions.

use crate::error::{StorageError, StorageResult};
use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::pin::Pin;

/// A boxed stream of bytes for streaming reads.
pub type ByteStream = Pin<Box<dyn Stream<Item = StorageResult<Bytes>> + Send>>;

/// Content-addressed blob storage.
///
/// Keys are relative paths such as `files/<hash>` or
/// `multipart/<session>/<index>`. Writes are atomic: a reader never observes
/// a partially written object.
#[async_trait]
pub trait BlobStore: Send + Sync + 'static {
    /// Check if an object exists.
    async fn exists(&self, key: &str) -> StorageResult<bool>;

    /// Get an object's size without fetching content.
    async fn head(&self, key: &str) -> StorageResult<BlobMeta>;

    /// Get an object's content.
    async fn get(&self, key: &str) -> StorageResult<Bytes>;

    /// Get an object as a byte stream.
    async fn get_stream(&self, key: &str) -> StorageResult<ByteStream>;

    /// Put an object atomically, replacing any previous content.
    async fn put(&self, key: &str, data: Bytes) -> StorageResult<()>;

    /// Delete an object. Returns `NotFound` if it does not exist.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// Concatenate `sources` in order into `dest`, returning the total size.
    ///
    /// Sources are left in place. `dest` appears atomically.
    async fn compose(&self, dest: &str, sources: &[String]) -> StorageResult<u64>;

    /// List objects with a prefix.
    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>>;

    /// Static backend identifier used for metrics and logging.
    fn backend_name(&self) -> &'static str;

    /// Verify storage backend connectivity.
    ///
    /// The default implementation returns Ok(()), suitable for backends that
    /// don't require connectivity verification.
    async fn health_check(&self) -> StorageResult<()> {
        Ok(())
    }
}

/// Extension methods available on every [`BlobStore`].
#[async_trait]
pub trait BlobStoreExt: BlobStore {
    /// Delete an object, treating an absent object as success.
    async fn delete_if_exists(&self, key: &str) -> StorageResult<bool> {
        match self.delete(key).await {
            Ok(()) => Ok(true),
            Err(StorageError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

impl<T: BlobStore + ?Sized> BlobStoreExt for T {}

/// Metadata about a stored object.
#[derive(Clone, Debug)]
pub struct BlobMeta {
    /// Object size in bytes.
    pub size: u64,
    /// Last modification time (if available).
    pub last_modified: Option<time::OffsetDateTime>,
}
