//! Key/value store abstraction backing the fast-path cache.

use crate::error::CacheResult;
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

/// A precondition checked atomically before a [`WriteBatch`] applies.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Guard {
    /// `key` must exist and be unexpired.
    KeyExists { key: String },
    /// `member` must not already be in the set at `key`.
    NotMember { key: String, member: String },
}

/// One mutation inside a [`WriteBatch`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BatchOp {
    SetAdd { key: String, member: String },
    HashIncrBy { key: String, field: String, by: i64 },
    /// Set `field` to `value` only if it currently equals `expected`.
    HashSetIf {
        key: String,
        field: String,
        expected: String,
        value: String,
    },
    Expire { key: String, ttl: Duration },
}

/// Guarded multi-key write applied all-or-nothing.
#[derive(Clone, Debug, Default)]
pub struct WriteBatch {
    pub(crate) guards: Vec<Guard>,
    pub(crate) ops: Vec<BatchOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn require_key(mut self, key: impl Into<String>) -> Self {
        self.guards.push(Guard::KeyExists { key: key.into() });
        self
    }

    pub fn require_not_member(mut self, key: impl Into<String>, member: impl Into<String>) -> Self {
        self.guards.push(Guard::NotMember {
            key: key.into(),
            member: member.into(),
        });
        self
    }

    pub fn set_add(mut self, key: impl Into<String>, member: impl Into<String>) -> Self {
        self.ops.push(BatchOp::SetAdd {
            key: key.into(),
            member: member.into(),
        });
        self
    }

    pub fn hash_incr_by(mut self, key: impl Into<String>, field: impl Into<String>, by: i64) -> Self {
        self.ops.push(BatchOp::HashIncrBy {
            key: key.into(),
            field: field.into(),
            by,
        });
        self
    }

    pub fn hash_set_if(
        mut self,
        key: impl Into<String>,
        field: impl Into<String>,
        expected: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.ops.push(BatchOp::HashSetIf {
            key: key.into(),
            field: field.into(),
            expected: expected.into(),
            value: value.into(),
        });
        self
    }

    pub fn expire(mut self, key: impl Into<String>, ttl: Duration) -> Self {
        self.ops.push(BatchOp::Expire {
            key: key.into(),
            ttl,
        });
        self
    }

    pub fn guards(&self) -> &[Guard] {
        &self.guards
    }

    pub fn ops(&self) -> &[BatchOp] {
        &self.ops
    }
}

/// Ephemeral key/value store with TTLs, hashes, sets and guarded batches.
///
/// Nothing stored here is authoritative; callers must tolerate loss.
#[async_trait]
pub trait KvStore: Send + Sync + 'static {
    /// Get a string value. Expired keys read as absent.
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>>;

    /// Set a string value with a TTL, replacing any existing value.
    async fn set_ex(&self, key: &str, value: Vec<u8>, ttl: Duration) -> CacheResult<()>;

    /// Set a string value only if the key is absent. Returns true if set.
    async fn set_nx_ex(&self, key: &str, value: Vec<u8>, ttl: Duration) -> CacheResult<bool>;

    /// Delete a key of any type. Returns true if it existed.
    async fn delete(&self, key: &str) -> CacheResult<bool>;

    /// Delete a string key only if its value equals `expected`.
    async fn compare_and_delete(&self, key: &str, expected: &[u8]) -> CacheResult<bool>;

    /// Write hash fields, creating the hash if needed, then apply `ttl` if given.
    async fn hset_all(
        &self,
        key: &str,
        fields: &[(String, String)],
        ttl: Option<Duration>,
    ) -> CacheResult<()>;

    /// All fields of a hash; empty when the key is absent.
    async fn hgetall(&self, key: &str) -> CacheResult<HashMap<String, String>>;

    /// Reset the TTL of an existing key. Returns false if absent.
    async fn expire(&self, key: &str, ttl: Duration) -> CacheResult<bool>;

    async fn sismember(&self, key: &str, member: &str) -> CacheResult<bool>;

    async fn scard(&self, key: &str) -> CacheResult<u64>;

    /// Members of a set, in no particular order; empty when absent.
    async fn smembers(&self, key: &str) -> CacheResult<Vec<String>>;

    /// Apply a guarded batch atomically. Returns false, with nothing
    /// written, when any guard fails.
    async fn apply(&self, batch: WriteBatch) -> CacheResult<bool>;

    fn backend_name(&self) -> &'static str;

    async fn health_check(&self) -> CacheResult<()> {
        Ok(())
    }
}
