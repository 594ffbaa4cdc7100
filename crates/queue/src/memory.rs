//! In-process broker implementing the delay/dead-letter pattern.
//!
//! Published messages wait in a timer wheel until their delay elapses and
//! are then moved to the work channel, the same shape as a TTL queue whose
//! expired messages dead-letter into a consumer queue. Requeued messages
//! re-enter the wheel with a backoff; after `max_deliveries` they are parked.
//! Deferred messages re-enter after the base backoff and keep their count.

use crate::error::{QueueError, QueueResult};
use crate::metrics;
use crate::traits::{DelayQueue, Delivery, Message, Settlement, WorkQueue};
use async_trait::async_trait;
use silo_core::config::QueueConfig;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::time::DelayQueue as TimerWheel;

/// Broker tuning.
#[derive(Clone, Debug)]
pub struct BrokerOptions {
    pub capacity: usize,
    pub max_deliveries: u32,
    pub retry_backoff: Duration,
}

impl From<&QueueConfig> for BrokerOptions {
    fn from(config: &QueueConfig) -> Self {
        Self {
            capacity: config.channel_capacity,
            max_deliveries: config.max_deliveries,
            retry_backoff: config.retry_backoff(),
        }
    }
}

struct Scheduled {
    message: Message,
    delay: Duration,
}

pub struct MemoryBroker {
    name: String,
    publish_tx: mpsc::Sender<Scheduled>,
    settle_tx: mpsc::UnboundedSender<Settlement>,
    work_rx: tokio::sync::Mutex<mpsc::Receiver<Message>>,
    parked: Arc<Mutex<Vec<Message>>>,
}

impl MemoryBroker {
    /// Start a broker and its pump task. The pump stops when `cancel` fires,
    /// after which consumers drain to `None`.
    pub fn start(
        name: impl Into<String>,
        options: BrokerOptions,
        cancel: CancellationToken,
    ) -> (Arc<Self>, JoinHandle<()>) {
        let name = name.into();
        let capacity = options.capacity.max(1);
        let (publish_tx, publish_rx) = mpsc::channel(capacity);
        let (settle_tx, settle_rx) = mpsc::unbounded_channel();
        let (work_tx, work_rx) = mpsc::channel(capacity);
        let parked = Arc::new(Mutex::new(Vec::new()));

        let pump = Pump {
            name: name.clone(),
            options,
            publish_rx,
            settle_rx,
            work_tx,
            parked: parked.clone(),
            timers: TimerWheel::new(),
        };
        let handle = tokio::spawn(pump.run(cancel));

        let broker = Arc::new(Self {
            name,
            publish_tx,
            settle_tx,
            work_rx: tokio::sync::Mutex::new(work_rx),
            parked,
        });
        (broker, handle)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Messages that exhausted their deliveries.
    pub fn parked(&self) -> Vec<Message> {
        self.parked
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl DelayQueue for MemoryBroker {
    async fn publish(&self, payload: Vec<u8>, delay: Duration) -> QueueResult<()> {
        let scheduled = Scheduled {
            message: Message::new(payload),
            delay,
        };
        match self.publish_tx.try_send(scheduled) {
            Ok(()) => {
                metrics::record(&self.name, "published");
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                metrics::record(&self.name, "rejected");
                Err(QueueError::Full(self.name.clone()))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(QueueError::Closed(self.name.clone())),
        }
    }
}

#[async_trait]
impl WorkQueue for MemoryBroker {
    async fn next(&self) -> Option<Delivery> {
        let message = self.work_rx.lock().await.recv().await?;
        Some(Delivery::new(message, self.settle_tx.clone()))
    }
}

struct Pump {
    name: String,
    options: BrokerOptions,
    publish_rx: mpsc::Receiver<Scheduled>,
    settle_rx: mpsc::UnboundedReceiver<Settlement>,
    work_tx: mpsc::Sender<Message>,
    parked: Arc<Mutex<Vec<Message>>>,
    timers: TimerWheel<Message>,
}

impl Pump {
    async fn run(mut self, cancel: CancellationToken) {
        tracing::debug!(queue = %self.name, "queue pump started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                Some(scheduled) = self.publish_rx.recv() => {
                    self.timers.insert(scheduled.message, scheduled.delay);
                }
                Some(settlement) = self.settle_rx.recv() => self.settle(settlement),
                Some(expired) = std::future::poll_fn(|cx| self.timers.poll_expired(cx)),
                    if !self.timers.is_empty() =>
                {
                    let mut message = expired.into_inner();
                    message.deliveries += 1;
                    let sent = tokio::select! {
                        _ = cancel.cancelled() => break,
                        sent = self.work_tx.send(message) => sent,
                    };
                    if sent.is_err() {
                        break;
                    }
                    metrics::record(&self.name, "delivered");
                }
            }
        }
        tracing::debug!(
            queue = %self.name,
            pending = self.timers.len(),
            "queue pump stopped"
        );
    }

    fn settle(&mut self, settlement: Settlement) {
        match settlement {
            Settlement::Requeue(message) if message.deliveries >= self.options.max_deliveries => {
                tracing::error!(
                    queue = %self.name,
                    message_id = %message.id,
                    deliveries = message.deliveries,
                    "message exhausted its deliveries, parking"
                );
                metrics::record(&self.name, "parked");
                self.parked
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .push(message);
            }
            Settlement::Requeue(message) => {
                let backoff = self.options.retry_backoff * message.deliveries.max(1);
                tracing::debug!(
                    queue = %self.name,
                    message_id = %message.id,
                    deliveries = message.deliveries,
                    backoff_ms = backoff.as_millis() as u64,
                    "requeueing message"
                );
                metrics::record(&self.name, "requeued");
                self.timers.insert(message, backoff);
            }
            Settlement::Defer(mut message) => {
                message.deliveries = message.deliveries.saturating_sub(1);
                tracing::debug!(
                    queue = %self.name,
                    message_id = %message.id,
                    backoff_ms = self.options.retry_backoff.as_millis() as u64,
                    "deferring message"
                );
                metrics::record(&self.name, "deferred");
                self.timers.insert(message, self.options.retry_backoff);
            }
            Settlement::Discard(message, reason) => {
                tracing::warn!(
                    queue = %self.name,
                    message_id = %message.id,
                    reason = %reason,
                    "discarding message"
                );
                metrics::record(&self.name, "discarded");
            }
        }
    }
}
