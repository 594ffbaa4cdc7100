//! Fast-path cache for the silo file store.
//!
//! Holds ephemeral, non-authoritative state:
//! - Cache-aside copies of content records
//! - Multipart session fields and received-chunk sets
//! - Lease locks for dedup and merge coordination

pub mod aside;
pub mod error;
pub mod keys;
pub mod kv;
pub mod lock;
pub mod memory;
pub mod metrics;

pub use aside::CacheAside;
pub use error::{CacheError, CacheResult};
pub use kv::{BatchOp, Guard, KvStore, WriteBatch};
pub use lock::{Lease, LeaseLock, LockOutcome};
pub use memory::{MemoryKvStore, spawn_reaper};
