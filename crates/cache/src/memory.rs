//! In-process [`KvStore`] backed by DashMap.
//!
//! Single-key operations run under the shared side of a gate lock and rely
//! on DashMap's per-shard locking. Batches take the exclusive side, so no
//! single-key operation interleaves with a batch.

use crate::error::{CacheError, CacheResult};
use crate::kv::{BatchOp, Guard, KvStore, WriteBatch};
use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry as MapEntry;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Clone, Debug)]
enum Value {
    Str(Vec<u8>),
    Hash(HashMap<String, String>),
    Set(BTreeSet<String>),
}

#[derive(Clone, Debug)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn new(value: Value) -> Self {
        Self {
            value,
            expires_at: None,
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

struct Inner {
    entries: DashMap<String, Entry>,
    gate: RwLock<()>,
}

/// In-process cache store. Cloning shares the underlying map.
#[derive(Clone)]
pub struct MemoryKvStore {
    inner: Arc<Inner>,
}

impl Default for MemoryKvStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                entries: DashMap::new(),
                gate: RwLock::new(()),
            }),
        }
    }

    fn shared(&self) -> RwLockReadGuard<'_, ()> {
        self.inner.gate.read().unwrap_or_else(|poisoned| {
            tracing::warn!("cache gate RwLock was poisoned, recovering with into_inner()");
            poisoned.into_inner()
        })
    }

    fn exclusive(&self) -> RwLockWriteGuard<'_, ()> {
        self.inner.gate.write().unwrap_or_else(|poisoned| {
            tracing::warn!("cache gate RwLock was poisoned, recovering with into_inner()");
            poisoned.into_inner()
        })
    }

    fn evict_if_expired(&self, key: &str, now: Instant) {
        self.inner.entries.remove_if(key, |_, entry| entry.is_expired(now));
    }

    /// Number of stored keys, including expired ones not yet evicted.
    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }

    /// Remove every expired key. Returns the number evicted.
    pub fn purge_expired(&self) -> usize {
        let _gate = self.shared();
        let now = Instant::now();

        let stale: Vec<String> = self
            .inner
            .entries
            .iter()
            .filter(|entry| entry.value().is_expired(now))
            .map(|entry| entry.key().clone())
            .collect();

        stale
            .into_iter()
            .filter(|key| {
                self.inner
                    .entries
                    .remove_if(key, |_, entry| entry.is_expired(now))
                    .is_some()
            })
            .count()
    }
}

/// Spawn a background task that periodically evicts expired keys until
/// `cancel` fires.
pub fn spawn_reaper(
    store: MemoryKvStore,
    interval: Duration,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let evicted = store.purge_expired();
                    if evicted > 0 {
                        tracing::debug!(evicted, "cache reaper evicted expired keys");
                    }
                }
            }
        }
    })
}

fn wrong_type(key: &str) -> CacheError {
    CacheError::WrongType(key.to_string())
}

/// Apply one batch op to a staged copy of the affected keys.
fn stage_op(
    staged: &mut HashMap<String, Option<Entry>>,
    op: &BatchOp,
    now: Instant,
) -> CacheResult<()> {
    match op {
        BatchOp::SetAdd { key, member } => {
            let slot = staged.entry(key.clone()).or_default();
            let entry = slot.get_or_insert_with(|| Entry::new(Value::Set(BTreeSet::new())));
            match &mut entry.value {
                Value::Set(set) => {
                    set.insert(member.clone());
                }
                _ => return Err(wrong_type(key)),
            }
        }
        BatchOp::HashIncrBy { key, field, by } => {
            let slot = staged.entry(key.clone()).or_default();
            let entry = slot.get_or_insert_with(|| Entry::new(Value::Hash(HashMap::new())));
            let Value::Hash(map) = &mut entry.value else {
                return Err(wrong_type(key));
            };
            let current = match map.get(field) {
                Some(raw) => raw.parse::<i64>().map_err(|_| CacheError::NotAnInteger {
                    key: key.clone(),
                    field: field.clone(),
                })?,
                None => 0,
            };
            map.insert(field.clone(), (current + by).to_string());
        }
        BatchOp::HashSetIf {
            key,
            field,
            expected,
            value,
        } => {
            if let Some(Some(entry)) = staged.get_mut(key) {
                let Value::Hash(map) = &mut entry.value else {
                    return Err(wrong_type(key));
                };
                if map.get(field) == Some(expected) {
                    map.insert(field.clone(), value.clone());
                }
            }
        }
        BatchOp::Expire { key, ttl } => {
            if let Some(Some(entry)) = staged.get_mut(key) {
                entry.expires_at = Some(now + *ttl);
            }
        }
    }
    Ok(())
}

fn op_key(op: &BatchOp) -> &str {
    match op {
        BatchOp::SetAdd { key, .. }
        | BatchOp::HashIncrBy { key, .. }
        | BatchOp::HashSetIf { key, .. }
        | BatchOp::Expire { key, .. } => key,
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        let _gate = self.shared();
        self.evict_if_expired(key, Instant::now());
        match self.inner.entries.get(key) {
            None => Ok(None),
            Some(entry) => match &entry.value {
                Value::Str(bytes) => Ok(Some(bytes.clone())),
                _ => Err(wrong_type(key)),
            },
        }
    }

    async fn set_ex(&self, key: &str, value: Vec<u8>, ttl: Duration) -> CacheResult<()> {
        let _gate = self.shared();
        let entry = Entry {
            value: Value::Str(value),
            expires_at: Some(Instant::now() + ttl),
        };
        self.inner.entries.insert(key.to_string(), entry);
        Ok(())
    }

    async fn set_nx_ex(&self, key: &str, value: Vec<u8>, ttl: Duration) -> CacheResult<bool> {
        let _gate = self.shared();
        let now = Instant::now();
        self.evict_if_expired(key, now);
        match self.inner.entries.entry(key.to_string()) {
            MapEntry::Occupied(_) => Ok(false),
            MapEntry::Vacant(vacant) => {
                vacant.insert(Entry {
                    value: Value::Str(value),
                    expires_at: Some(now + ttl),
                });
                Ok(true)
            }
        }
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        let _gate = self.shared();
        let now = Instant::now();
        let removed = self.inner.entries.remove(key);
        Ok(removed.is_some_and(|(_, entry)| !entry.is_expired(now)))
    }

    async fn compare_and_delete(&self, key: &str, expected: &[u8]) -> CacheResult<bool> {
        let _gate = self.shared();
        let now = Instant::now();
        self.evict_if_expired(key, now);
        let removed = self.inner.entries.remove_if(key, |_, entry| {
            matches!(&entry.value, Value::Str(bytes) if bytes.as_slice() == expected)
        });
        Ok(removed.is_some())
    }

    async fn hset_all(
        &self,
        key: &str,
        fields: &[(String, String)],
        ttl: Option<Duration>,
    ) -> CacheResult<()> {
        let _gate = self.shared();
        let now = Instant::now();
        self.evict_if_expired(key, now);
        let mut entry = self
            .inner
            .entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::new(Value::Hash(HashMap::new())));
        let Value::Hash(map) = &mut entry.value else {
            return Err(wrong_type(key));
        };
        map.extend(fields.iter().cloned());
        if let Some(ttl) = ttl {
            entry.expires_at = Some(now + ttl);
        }
        Ok(())
    }

    async fn hgetall(&self, key: &str) -> CacheResult<HashMap<String, String>> {
        let _gate = self.shared();
        self.evict_if_expired(key, Instant::now());
        match self.inner.entries.get(key) {
            None => Ok(HashMap::new()),
            Some(entry) => match &entry.value {
                Value::Hash(map) => Ok(map.clone()),
                _ => Err(wrong_type(key)),
            },
        }
    }

    async fn expire(&self, key: &str, ttl: Duration) -> CacheResult<bool> {
        let _gate = self.shared();
        let now = Instant::now();
        self.evict_if_expired(key, now);
        match self.inner.entries.get_mut(key) {
            None => Ok(false),
            Some(mut entry) => {
                entry.expires_at = Some(now + ttl);
                Ok(true)
            }
        }
    }

    async fn sismember(&self, key: &str, member: &str) -> CacheResult<bool> {
        let _gate = self.shared();
        self.evict_if_expired(key, Instant::now());
        match self.inner.entries.get(key) {
            None => Ok(false),
            Some(entry) => match &entry.value {
                Value::Set(set) => Ok(set.contains(member)),
                _ => Err(wrong_type(key)),
            },
        }
    }

    async fn scard(&self, key: &str) -> CacheResult<u64> {
        let _gate = self.shared();
        self.evict_if_expired(key, Instant::now());
        match self.inner.entries.get(key) {
            None => Ok(0),
            Some(entry) => match &entry.value {
                Value::Set(set) => Ok(set.len() as u64),
                _ => Err(wrong_type(key)),
            },
        }
    }

    async fn smembers(&self, key: &str) -> CacheResult<Vec<String>> {
        let _gate = self.shared();
        self.evict_if_expired(key, Instant::now());
        match self.inner.entries.get(key) {
            None => Ok(Vec::new()),
            Some(entry) => match &entry.value {
                Value::Set(set) => Ok(set.iter().cloned().collect()),
                _ => Err(wrong_type(key)),
            },
        }
    }

    async fn apply(&self, batch: WriteBatch) -> CacheResult<bool> {
        let _gate = self.exclusive();
        let now = Instant::now();

        for guard in &batch.guards {
            match guard {
                Guard::KeyExists { key } => {
                    self.evict_if_expired(key, now);
                    if !self.inner.entries.contains_key(key) {
                        return Ok(false);
                    }
                }
                Guard::NotMember { key, member } => {
                    self.evict_if_expired(key, now);
                    if let Some(entry) = self.inner.entries.get(key) {
                        match &entry.value {
                            Value::Set(set) if set.contains(member) => return Ok(false),
                            Value::Set(_) => {}
                            _ => return Err(wrong_type(key)),
                        }
                    }
                }
            }
        }

        // Stage copies so a failing op leaves the store untouched.
        let mut staged: HashMap<String, Option<Entry>> = HashMap::new();
        for op in &batch.ops {
            let key = op_key(op);
            if !staged.contains_key(key) {
                self.evict_if_expired(key, now);
                let current = self.inner.entries.get(key).map(|entry| entry.value().clone());
                staged.insert(key.to_string(), current);
            }
        }
        for op in &batch.ops {
            stage_op(&mut staged, op, now)?;
        }

        for (key, entry) in staged {
            if let Some(entry) = entry {
                self.inner.entries.insert(key, entry);
            }
        }
        Ok(true)
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
