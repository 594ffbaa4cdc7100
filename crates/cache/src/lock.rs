//! Lease locks over the cache store.

use crate::error::CacheResult;
use crate::kv::KvStore;
use crate::metrics;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// A held lease. Only the holder of the token can release it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    key: String,
    token: String,
}

impl Lease {
    pub fn key(&self) -> &str {
        &self.key
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockOutcome {
    Granted(Lease),
    /// Another caller holds an unexpired lease on the key.
    Held,
}

/// Mutual exclusion by `SET NX` with a TTL and compare-and-delete release.
///
/// Leases expire on their own, so a crashed holder cannot block others.
#[derive(Clone)]
pub struct LeaseLock {
    kv: Arc<dyn KvStore>,
}

impl LeaseLock {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    pub async fn acquire(&self, key: &str, ttl: Duration) -> CacheResult<LockOutcome> {
        let token = Uuid::new_v4().to_string();
        if self.kv.set_nx_ex(key, token.clone().into_bytes(), ttl).await? {
            Ok(LockOutcome::Granted(Lease {
                key: key.to_string(),
                token,
            }))
        } else {
            Ok(LockOutcome::Held)
        }
    }

    /// Release `lease` if it is still ours. Returns false when it had
    /// already expired (and possibly been taken by someone else).
    pub async fn release(&self, lease: Lease) -> CacheResult<bool> {
        self.kv
            .compare_and_delete(&lease.key, lease.token.as_bytes())
            .await
    }

    /// Release without surfacing errors; the lease TTL is the fallback.
    pub async fn release_quietly(&self, lease: Lease) {
        let key = lease.key.clone();
        match self.release(lease).await {
            Ok(true) => {}
            Ok(false) => tracing::warn!(key = %key, "lease expired before release"),
            Err(e) => {
                metrics::best_effort_failed("lock_release");
                tracing::warn!(key = %key, error = %e, "failed to release lease");
            }
        }
    }
}
