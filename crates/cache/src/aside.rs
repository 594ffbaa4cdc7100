//! Cache-aside reads over the key/value store.

use crate::kv::KvStore;
use crate::metrics::{self, CACHE_LOOKUPS};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Read-through, write-through JSON cache in front of an authoritative source.
///
/// Absence is never cached: a miss against a nonexistent key always goes
/// back to the source.
#[derive(Clone)]
pub struct CacheAside {
    kv: Arc<dyn KvStore>,
    ttl: Duration,
}

impl CacheAside {
    pub fn new(kv: Arc<dyn KvStore>, ttl: Duration) -> Self {
        Self { kv, ttl }
    }

    /// Return the cached value for `key`, or call `fetch` and repopulate.
    ///
    /// A cached payload that fails to decode, or any cache error, is treated
    /// as a miss. Only `fetch` errors are returned.
    pub async fn get_or_fetch<T, E, F, Fut>(&self, key: &str, fetch: F) -> Result<Option<T>, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<T>, E>>,
    {
        match self.kv.get(key).await {
            Ok(Some(bytes)) => match serde_json::from_slice::<T>(&bytes) {
                Ok(value) => {
                    CACHE_LOOKUPS.with_label_values(&["hit"]).inc();
                    return Ok(Some(value));
                }
                Err(e) => {
                    CACHE_LOOKUPS.with_label_values(&["decode_error"]).inc();
                    tracing::warn!(key, error = %e, "discarding undecodable cache entry");
                }
            },
            Ok(None) => {
                CACHE_LOOKUPS.with_label_values(&["miss"]).inc();
            }
            Err(e) => {
                CACHE_LOOKUPS.with_label_values(&["error"]).inc();
                tracing::warn!(key, error = %e, "cache read failed, falling through");
            }
        }

        let value = fetch().await?;
        if let Some(value) = &value {
            self.put(key, value).await;
        }
        Ok(value)
    }

    /// Best-effort write-through.
    pub async fn put<T: Serialize>(&self, key: &str, value: &T) {
        let result = match serde_json::to_vec(value) {
            Ok(bytes) => self.kv.set_ex(key, bytes, self.ttl).await,
            Err(e) => Err(e.into()),
        };
        if let Err(e) = result {
            metrics::best_effort_failed("cache_write");
            tracing::warn!(key, error = %e, "cache write-through failed");
        }
    }

    /// Best-effort invalidation.
    pub async fn invalidate(&self, key: &str) {
        if let Err(e) = self.kv.delete(key).await {
            metrics::best_effort_failed("cache_invalidate");
            tracing::warn!(key, error = %e, "cache invalidation failed");
        }
    }
}
