//! Delayed work queues for the silo file store.
//!
//! Two queues run on this abstraction: deferred deletions (published with
//! the grace period as delay) and audit events (published with no delay).
//! Consumption is at-least-once; handlers must be idempotent.

pub mod error;
pub mod memory;
pub mod metrics;
pub mod traits;

pub use error::{QueueError, QueueResult};
pub use memory::{BrokerOptions, MemoryBroker};
pub use traits::{DelayQueue, Delivery, Message, WorkQueue};
