//! Publish and consume sides of a delayed work queue.

use crate::error::QueueResult;
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

/// A message in flight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: Uuid,
    pub payload: Vec<u8>,
    /// Number of times this message has been handed to a consumer.
    pub deliveries: u32,
}

impl Message {
    pub fn new(payload: Vec<u8>) -> Self {
        Self {
            id: Uuid::new_v4(),
            payload,
            deliveries: 0,
        }
    }
}

/// Publish side: messages become visible to consumers after `delay`.
#[async_trait]
pub trait DelayQueue: Send + Sync {
    async fn publish(&self, payload: Vec<u8>, delay: Duration) -> QueueResult<()>;
}

/// Consume side with manual acknowledgement.
#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// Wait for the next ready message. `None` once the broker has shut down.
    async fn next(&self) -> Option<Delivery>;
}

/// How a consumer settled a delivery.
#[derive(Debug)]
pub(crate) enum Settlement {
    Requeue(Message),
    Defer(Message),
    Discard(Message, String),
}

/// A delivered message that must be settled.
///
/// Dropping a delivery without settling it requeues the message, so a
/// panicking handler does not lose work.
#[derive(Debug)]
pub struct Delivery {
    message: Option<Message>,
    settle_tx: mpsc::UnboundedSender<Settlement>,
}

impl Delivery {
    pub(crate) fn new(message: Message, settle_tx: mpsc::UnboundedSender<Settlement>) -> Self {
        Self {
            message: Some(message),
            settle_tx,
        }
    }

    pub fn payload(&self) -> &[u8] {
        self.message.as_ref().map_or(&[], |m| m.payload.as_slice())
    }

    pub fn id(&self) -> Option<Uuid> {
        self.message.as_ref().map(|m| m.id)
    }

    /// Times this message has been delivered, including this one.
    pub fn deliveries(&self) -> u32 {
        self.message.as_ref().map_or(0, |m| m.deliveries)
    }

    /// Processing succeeded; the message is gone.
    pub fn ack(mut self) {
        self.message = None;
    }

    /// Transient failure; redeliver after the broker's backoff.
    pub fn nack_requeue(mut self) {
        if let Some(message) = self.message.take() {
            let _ = self.settle_tx.send(Settlement::Requeue(message));
        }
    }

    /// Not processed because a precondition is not met yet (a lock is
    /// held). Redeliver after the base backoff without counting the
    /// attempt, so waiting never parks the message.
    pub fn defer(mut self) {
        if let Some(message) = self.message.take() {
            let _ = self.settle_tx.send(Settlement::Defer(message));
        }
    }

    /// Permanent failure (e.g. malformed payload); drop the message.
    pub fn nack_discard(mut self, reason: impl Into<String>) {
        if let Some(message) = self.message.take() {
            let _ = self.settle_tx.send(Settlement::Discard(message, reason.into()));
        }
    }
}

impl Drop for Delivery {
    fn drop(&mut self) {
        if let Some(message) = self.message.take() {
            tracing::warn!(message_id = %message.id, "delivery dropped unsettled, requeueing");
            let _ = self.settle_tx.send(Settlement::Requeue(message));
        }
    }
}
