//! Shared test helpers for cache tests.

use async_trait::async_trait;
use silo_cache::{CacheError, CacheResult, KvStore, MemoryKvStore, WriteBatch};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// A store whose reads can be switched to fail.
#[allow(dead_code)]
#[derive(Clone, Default)]
pub struct FlakyKvStore {
    pub inner: MemoryKvStore,
    fail_reads: Arc<AtomicBool>,
}

#[allow(dead_code)]
impl FlakyKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    fn check(&self) -> CacheResult<()> {
        if self.fail_reads.load(Ordering::SeqCst) {
            Err(CacheError::Unavailable("injected".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl KvStore for FlakyKvStore {
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        self.check()?;
        self.inner.get(key).await
    }

    async fn set_ex(&self, key: &str, value: Vec<u8>, ttl: Duration) -> CacheResult<()> {
        self.inner.set_ex(key, value, ttl).await
    }

    async fn set_nx_ex(&self, key: &str, value: Vec<u8>, ttl: Duration) -> CacheResult<bool> {
        self.inner.set_nx_ex(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        self.inner.delete(key).await
    }

    async fn compare_and_delete(&self, key: &str, expected: &[u8]) -> CacheResult<bool> {
        self.inner.compare_and_delete(key, expected).await
    }

    async fn hset_all(
        &self,
        key: &str,
        fields: &[(String, String)],
        ttl: Option<Duration>,
    ) -> CacheResult<()> {
        self.inner.hset_all(key, fields, ttl).await
    }

    async fn hgetall(&self, key: &str) -> CacheResult<HashMap<String, String>> {
        self.check()?;
        self.inner.hgetall(key).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> CacheResult<bool> {
        self.inner.expire(key, ttl).await
    }

    async fn sismember(&self, key: &str, member: &str) -> CacheResult<bool> {
        self.check()?;
        self.inner.sismember(key, member).await
    }

    async fn scard(&self, key: &str) -> CacheResult<u64> {
        self.check()?;
        self.inner.scard(key).await
    }

    async fn smembers(&self, key: &str) -> CacheResult<Vec<String>> {
        self.check()?;
        self.inner.smembers(key).await
    }

    async fn apply(&self, batch: WriteBatch) -> CacheResult<bool> {
        self.inner.apply(batch).await
    }

    fn backend_name(&self) -> &'static str {
        "flaky"
    }
}
