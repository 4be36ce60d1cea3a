use crate::domain::events::SagaMessage;
use crate::domain::ports::{Delivery, Envelope, MessageBus, dead_letter_queue};
use crate::error::Result;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tracing::{error, warn};

/// Backoff stops doubling after this many attempts.
const MAX_BACKOFF_SHIFT: u32 = 6;

#[derive(Default)]
struct QueueState {
    ready: VecDeque<Envelope>,
    delayed: Vec<(Instant, Envelope)>,
    unacked: HashMap<u64, Envelope>,
}

impl QueueState {
    fn promote_due(&mut self, now: Instant) {
        let mut i = 0;
        while i < self.delayed.len() {
            if self.delayed[i].0 <= now {
                let (_, envelope) = self.delayed.swap_remove(i);
                self.ready.push_back(envelope);
            } else {
                i += 1;
            }
        }
    }

    fn next_due(&self) -> Option<Instant> {
        self.delayed.iter().map(|(at, _)| *at).min()
    }

    fn pending(&self) -> usize {
        self.ready.len() + self.delayed.len() + self.unacked.len()
    }
}

#[derive(Default)]
struct Broker {
    queues: HashMap<String, QueueState>,
    history: HashMap<String, Vec<Envelope>>,
    next_tag: u64,
}

/// In-process broker with durable-queue semantics: unacked deliveries survive
/// until acked or nacked, nacked ones come back after an exponential backoff,
/// and anything past `max_deliveries` lands on the queue's dead-letter queue.
///
/// `Clone` shares the same broker, so one instance can be handed to every
/// service in the process.
///
/// Publish history is off unless enabled with [`InMemoryBus::with_history`].
#[derive(Clone)]
pub struct InMemoryBus {
    broker: Arc<Mutex<Broker>>,
    notify: Arc<Notify>,
    max_deliveries: u32,
    backoff: Duration,
    record_history: bool,
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new(5, Duration::from_millis(200))
    }
}

impl InMemoryBus {
    pub fn new(max_deliveries: u32, backoff: Duration) -> Self {
        Self {
            broker: Arc::new(Mutex::new(Broker::default())),
            notify: Arc::new(Notify::new()),
            max_deliveries: max_deliveries.max(1),
            backoff,
            record_history: false,
        }
    }

    /// Keeps a copy of every published and dead-lettered envelope for
    /// [`InMemoryBus::published`]. The copies are never evicted.
    pub fn with_history(mut self) -> Self {
        self.record_history = true;
        self
    }

    fn record(&self, broker: &mut Broker, queue: &str, envelope: &Envelope) {
        if self.record_history {
            broker
                .history
                .entry(queue.to_string())
                .or_default()
                .push(envelope.clone());
        }
    }

    fn backoff_for(&self, attempts: u32) -> Duration {
        let shift = attempts.saturating_sub(1).min(MAX_BACKOFF_SHIFT);
        self.backoff * (1u32 << shift)
    }

    /// Every envelope published to `queue` since history was enabled, in
    /// publish order. Empty on a bus built without history.
    pub async fn published(&self, queue: &str) -> Vec<Envelope> {
        let broker = self.broker.lock().await;
        broker.history.get(queue).cloned().unwrap_or_default()
    }

    /// Decodes every payload ever published on `E`'s queue.
    pub async fn published_messages<E: SagaMessage>(&self) -> Vec<E> {
        self.published(E::QUEUE)
            .await
            .iter()
            .filter_map(|envelope| E::decode(&envelope.payload).ok())
            .collect()
    }

    /// Messages parked on `queue`'s dead-letter queue.
    pub async fn dead_letters(&self, queue: &str) -> Vec<Envelope> {
        let broker = self.broker.lock().await;
        broker
            .queues
            .get(&dead_letter_queue(queue))
            .map(|state| state.ready.iter().cloned().collect())
            .unwrap_or_default()
    }

    async fn push(&self, queue: &str, payload: Vec<u8>) {
        let envelope = Envelope {
            id: uuid::Uuid::new_v4().to_string(),
            queue: queue.to_string(),
            payload,
            attempts: 0,
            published_at: Utc::now(),
        };
        let mut broker = self.broker.lock().await;
        self.record(&mut broker, queue, &envelope);
        broker
            .queues
            .entry(queue.to_string())
            .or_default()
            .ready
            .push_back(envelope);
    }
}

#[async_trait]
impl MessageBus for InMemoryBus {
    async fn publish(&self, queue: &str, payload: Vec<u8>) -> Result<()> {
        self.push(queue, payload).await;
        self.notify.notify_waiters();
        Ok(())
    }

    async fn receive(&self, queue: &str, wait: Duration) -> Result<Option<Delivery>> {
        let deadline = Instant::now() + wait;
        loop {
            // Register interest before looking so a publish in between is not missed.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let next_due = {
                let mut broker = self.broker.lock().await;
                broker.next_tag += 1;
                let tag = broker.next_tag;
                let state = broker.queues.entry(queue.to_string()).or_default();
                state.promote_due(Instant::now());
                if let Some(envelope) = state.ready.pop_front() {
                    state.unacked.insert(tag, envelope.clone());
                    return Ok(Some(Delivery { tag, envelope }));
                }
                state.next_due()
            };

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            let wake_at = next_due.map_or(deadline, |due| due.min(deadline));
            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep_until(wake_at) => {}
            }
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<()> {
        let mut broker = self.broker.lock().await;
        let removed = broker
            .queues
            .get_mut(&delivery.envelope.queue)
            .and_then(|state| state.unacked.remove(&delivery.tag));
        if removed.is_none() {
            warn!(
                queue = %delivery.envelope.queue,
                tag = delivery.tag,
                "Ack for unknown delivery ignored"
            );
        }
        Ok(())
    }

    async fn nack(&self, delivery: &Delivery, requeue: bool) -> Result<()> {
        let queue = delivery.envelope.queue.clone();
        {
            let mut broker = self.broker.lock().await;
            let Some(mut envelope) = broker
                .queues
                .get_mut(&queue)
                .and_then(|state| state.unacked.remove(&delivery.tag))
            else {
                warn!(queue = %queue, tag = delivery.tag, "Nack for unknown delivery ignored");
                return Ok(());
            };
            envelope.attempts += 1;

            if requeue && envelope.attempts < self.max_deliveries {
                let due = Instant::now() + self.backoff_for(envelope.attempts);
                if let Some(state) = broker.queues.get_mut(&queue) {
                    state.delayed.push((due, envelope));
                }
            } else {
                if requeue {
                    error!(
                        queue = %queue,
                        message_id = %envelope.id,
                        attempts = envelope.attempts,
                        "Delivery attempts exhausted, dead-lettering for manual intervention"
                    );
                }
                let dlq = dead_letter_queue(&queue);
                self.record(&mut broker, &dlq, &envelope);
                broker.queues.entry(dlq).or_default().ready.push_back(envelope);
            }
        }
        self.notify.notify_waiters();
        Ok(())
    }

    async fn pending(&self, queue: &str) -> Result<usize> {
        let broker = self.broker.lock().await;
        Ok(broker.queues.get(queue).map_or(0, QueueState::pending))
    }
}
