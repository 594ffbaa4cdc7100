//! Blob store test utilities.

use async_trait::async_trait;
use bytes::Bytes;
use silo_storage::{BlobMeta, BlobStore, ByteStream, FilesystemBackend, StorageError, StorageResult};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tempfile::TempDir;

/// A filesystem blob store in a temporary directory.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub struct TestStorage {
    pub backend: Arc<dyn BlobStore>,
    _temp_dir: TempDir,
}

#[allow(dead_code)]
impl TestStorage {
    pub async fn new() -> StorageResult<Self> {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
        let backend = FilesystemBackend::new(temp_dir.path()).await?;
        Ok(Self {
            backend: Arc::new(backend),
            _temp_dir: temp_dir,
        })
    }

    pub fn store(&self) -> Arc<dyn BlobStore> {
        self.backend.clone()
    }
}

/// Wraps a blob store, counting writes per key and optionally failing
/// deletes or slowing writes down to widen race windows.
#[allow(dead_code)]
pub struct InstrumentedBlobStore {
    inner: Arc<dyn BlobStore>,
    puts: Mutex<HashMap<String, usize>>,
    fail_deletes: AtomicBool,
    put_delay: Mutex<Option<Duration>>,
}

#[allow(dead_code)]
impl InstrumentedBlobStore {
    pub fn new(inner: Arc<dyn BlobStore>) -> Self {
        Self {
            inner,
            puts: Mutex::new(HashMap::new()),
            fail_deletes: AtomicBool::new(false),
            put_delay: Mutex::new(None),
        }
    }

    /// Number of puts to `key` so far.
    pub fn put_count(&self, key: &str) -> usize {
        self.puts.lock().unwrap().get(key).copied().unwrap_or(0)
    }

    pub fn set_fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    pub fn set_put_delay(&self, delay: Option<Duration>) {
        *self.put_delay.lock().unwrap() = delay;
    }
}

#[async_trait]
impl BlobStore for InstrumentedBlobStore {
    async fn exists(&self, key: &str) -> StorageResult<bool> {
        self.inner.exists(key).await
    }

    async fn head(&self, key: &str) -> StorageResult<BlobMeta> {
        self.inner.head(key).await
    }

    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        self.inner.get(key).await
    }

    async fn get_stream(&self, key: &str) -> StorageResult<ByteStream> {
        self.inner.get_stream(key).await
    }

    async fn put(&self, key: &str, data: Bytes) -> StorageResult<()> {
        *self.puts.lock().unwrap().entry(key.to_string()).or_default() += 1;
        let delay = *self.put_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.inner.put(key, data).await
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(StorageError::Io(std::io::Error::other(
                "injected delete failure",
            )));
        }
        self.inner.delete(key).await
    }

    async fn compose(&self, dest: &str, sources: &[String]) -> StorageResult<u64> {
        self.inner.compose(dest, sources).await
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        self.inner.list(prefix).await
    }

    fn backend_name(&self) -> &'static str {
        "instrumented"
    }
}
