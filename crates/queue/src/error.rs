//! Queue error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueueError {
    /// The publish channel is at capacity.
    #[error("queue {0} is full")]
    Full(String),

    /// The broker has shut down.
    #[error("queue {0} is closed")]
    Closed(String),
}

pub type QueueResult<T> = std::result::Result<T, QueueError>;
