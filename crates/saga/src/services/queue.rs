//! In-memory message queue with delivery counting and dead-lettering.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use events::Event;
use tokio::sync::Mutex;

use crate::config::SagaConfig;
use crate::delivery::Delivery;
use crate::error::SagaError;
use crate::services::publisher::Publisher;

#[derive(Debug, Default)]
struct QueueState {
    queues: HashMap<String, VecDeque<Delivery>>,
    next_id: u64,
    fail_on_publish: bool,
}

impl QueueState {
    fn push(&mut self, queue: &str, body: String, receive_count: u32) -> String {
        self.next_id += 1;
        let message_id = format!("MSG-{:06}", self.next_id);
        self.queues
            .entry(queue.to_string())
            .or_default()
            .push_back(Delivery {
                message_id: message_id.clone(),
                body,
                receive_count,
                source: queue.to_string(),
            });
        message_id
    }
}

/// Named FIFO queues with at-least-once semantics.
///
/// A received message is gone from its queue until it is handed back with
/// [`InMemoryQueue::nack`]. A message that has been received
/// `max_receive_count` times is diverted to the dead-letter queue instead
/// of being requeued; the dead-letter queue itself never diverts.
#[derive(Debug, Clone)]
pub struct InMemoryQueue {
    state: Arc<Mutex<QueueState>>,
    max_receive_count: u32,
    dead_letter: String,
}

impl InMemoryQueue {
    /// Creates an empty queue set.
    pub fn new(max_receive_count: u32, dead_letter: impl Into<String>) -> Self {
        Self {
            state: Arc::new(Mutex::new(QueueState::default())),
            max_receive_count: max_receive_count.max(1),
            dead_letter: dead_letter.into(),
        }
    }

    /// Creates a queue set using the configured limits.
    pub fn from_config(config: &SagaConfig) -> Self {
        Self::new(config.max_receive_count, config.queues.dead_letter.clone())
    }

    /// Returns the name of the dead-letter queue.
    pub fn dead_letter(&self) -> &str {
        &self.dead_letter
    }

    /// Configures every publish to fail until switched off again.
    pub async fn set_fail_on_publish(&self, fail: bool) {
        self.state.lock().await.fail_on_publish = fail;
    }

    /// Enqueues a raw body, bypassing event encoding. Returns the message ID.
    pub async fn send_raw(&self, queue: &str, body: impl Into<String>) -> String {
        self.state.lock().await.push(queue, body.into(), 0)
    }

    /// Takes up to `max` messages off `queue`, counting the delivery.
    ///
    /// Reads from the dead-letter queue are not counted, so a dead-lettered
    /// message reports how often its primary consumer saw it.
    pub async fn receive(&self, queue: &str, max: usize) -> Vec<Delivery> {
        let counted = queue != self.dead_letter;
        let mut state = self.state.lock().await;
        let Some(messages) = state.queues.get_mut(queue) else {
            return Vec::new();
        };
        let take = max.min(messages.len());
        messages
            .drain(..take)
            .map(|mut delivery| {
                if counted {
                    delivery.receive_count += 1;
                }
                delivery
            })
            .collect()
    }

    /// Hands a failed delivery back to `queue` for redelivery, or diverts it
    /// to the dead-letter queue once its attempts are used up.
    pub async fn nack(&self, queue: &str, delivery: Delivery) {
        let mut state = self.state.lock().await;
        let target = if queue != self.dead_letter && delivery.receive_count >= self.max_receive_count
        {
            tracing::warn!(
                message_id = %delivery.message_id,
                %queue,
                receive_count = delivery.receive_count,
                "message moved to dead-letter queue"
            );
            metrics::counter!("queue_dead_lettered_total", "queue" => queue.to_string())
                .increment(1);
            self.dead_letter.clone()
        } else {
            queue.to_string()
        };
        state.queues.entry(target).or_default().push_back(delivery);
    }

    /// Returns the messages waiting on `queue` without receiving them.
    pub async fn peek(&self, queue: &str) -> Vec<Delivery> {
        let state = self.state.lock().await;
        state
            .queues
            .get(queue)
            .map(|messages| messages.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Returns the number of messages waiting on `queue`.
    pub async fn depth(&self, queue: &str) -> usize {
        let state = self.state.lock().await;
        state.queues.get(queue).map_or(0, VecDeque::len)
    }

    /// Returns the depth of every known queue, sorted by name.
    pub async fn depths(&self) -> Vec<(String, usize)> {
        let state = self.state.lock().await;
        let mut depths: Vec<_> = state
            .queues
            .iter()
            .map(|(name, messages)| (name.clone(), messages.len()))
            .collect();
        depths.sort();
        depths
    }
}

#[async_trait]
impl Publisher for InMemoryQueue {
    async fn publish(&self, destination: &str, event: &Event) -> Result<(), SagaError> {
        self.republish(destination, event, 0).await
    }

    async fn republish(
        &self,
        destination: &str,
        event: &Event,
        attempts: u32,
    ) -> Result<(), SagaError> {
        let body = event.to_json()?;
        let mut state = self.state.lock().await;
        if state.fail_on_publish {
            return Err(SagaError::Publish {
                destination: destination.to_string(),
                reason: "queue unavailable".to_string(),
            });
        }
        let message_id = state.push(destination, body, attempts);
        tracing::debug!(%message_id, %destination, kind = %event.kind, "event published");
        metrics::counter!("saga_events_published_total", "kind" => event.kind.to_string())
            .increment(1);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use common::{PaymentId, UserId};
    use events::EventKind;

    use super::*;

    fn event() -> Event {
        Event::new(EventKind::PaymentInitiated, PaymentId::new(), UserId::new("u1"))
    }

    #[tokio::test]
    async fn test_publish_then_receive() {
        let queue = InMemoryQueue::new(3, "dlq");
        let event = event();
        queue.publish("wallet", &event).await.unwrap();

        let received = queue.receive("wallet", 10).await;
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].receive_count, 1);
        assert_eq!(received[0].source, "wallet");
        assert_eq!(Event::from_json(&received[0].body).unwrap(), event);
        assert_eq!(queue.depth("wallet").await, 0);
    }

    #[tokio::test]
    async fn test_nack_dead_letters_after_max_receives() {
        let queue = InMemoryQueue::new(2, "dlq");
        queue.publish("wallet", &event()).await.unwrap();

        let first = queue.receive("wallet", 1).await.remove(0);
        queue.nack("wallet", first).await;
        assert_eq!(queue.depth("wallet").await, 1);

        let second = queue.receive("wallet", 1).await.remove(0);
        assert_eq!(second.receive_count, 2);
        queue.nack("wallet", second).await;

        assert_eq!(queue.depth("wallet").await, 0);
        let dead = queue.peek("dlq").await;
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].source, "wallet");
        assert_eq!(dead[0].receive_count, 2);
    }

    #[tokio::test]
    async fn test_dead_letter_queue_never_diverts() {
        let queue = InMemoryQueue::new(1, "dlq");
        queue.send_raw("dlq", "{}").await;

        let delivery = queue.receive("dlq", 1).await.remove(0);
        assert_eq!(delivery.receive_count, 0);
        queue.nack("dlq", delivery).await;
        assert_eq!(queue.depth("dlq").await, 1);
    }

    #[tokio::test]
    async fn test_republish_carries_attempts() {
        let queue = InMemoryQueue::new(3, "dlq");
        queue.republish("gateway", &event(), 2).await.unwrap();

        let delivery = queue.receive("gateway", 1).await.remove(0);
        assert_eq!(delivery.receive_count, 3);
    }

    #[tokio::test]
    async fn test_fail_on_publish() {
        let queue = InMemoryQueue::new(3, "dlq");
        queue.set_fail_on_publish(true).await;

        let result = queue.publish("wallet", &event()).await;
        assert!(matches!(result, Err(SagaError::Publish { .. })));
        assert_eq!(queue.depth("wallet").await, 0);
    }
}
