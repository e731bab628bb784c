//! Failure classification and recovery of dead-lettered messages.

use chrono::{DateTime, Utc};
use events::Event;
use store::{FailedEvent, FailedEventStatus, FailedEventStore};

use crate::config::{QueueNames, RetryPolicy, SagaConfig};
use crate::delivery::{BatchReport, Delivery};
use crate::error::Result;
use crate::services::Publisher;

/// Kind recorded for messages whose body could not be decoded.
pub const UNKNOWN_KIND: &str = "unknown";

/// Reason recorded for decodable messages that will not be re-driven.
pub const MAX_RETRIES_EXCEEDED: &str = "max retries exceeded";

/// What to do with a dead-lettered message.
#[derive(Debug, Clone, PartialEq)]
pub enum Classification {
    /// Publish the event again to `destination`.
    Redrive { event: Event, destination: String },
    /// Give up and keep an audit record.
    Permanent(FailedEvent),
}

/// Decides between re-driving a dead-lettered message and giving up on it.
///
/// Undecodable bodies are never retried. A decodable event is re-driven
/// only if its kind is retryable and it was delivered fewer than
/// `max_retries` times.
#[derive(Debug, Clone)]
pub struct FailureClassifier {
    policy: RetryPolicy,
    queues: QueueNames,
    max_retries: u32,
}

impl FailureClassifier {
    pub fn new(policy: RetryPolicy, queues: QueueNames, max_retries: u32) -> Self {
        Self {
            policy,
            queues,
            max_retries,
        }
    }

    pub fn from_config(config: &SagaConfig) -> Self {
        Self::new(
            config.retry_policy.clone(),
            config.queues.clone(),
            config.max_retries,
        )
    }

    pub fn classify(&self, delivery: &Delivery, now: DateTime<Utc>) -> Classification {
        let event = match Event::from_json(&delivery.body) {
            Ok(event) => event,
            Err(e) => {
                return Classification::Permanent(failed_event(
                    delivery,
                    UNKNOWN_KIND.to_string(),
                    None,
                    e.to_string(),
                    now,
                ));
            }
        };

        if delivery.receive_count < self.max_retries && self.policy.is_retryable(&event.kind) {
            let destination = self.queues.destination_for(&event.kind).to_string();
            return Classification::Redrive { event, destination };
        }

        Classification::Permanent(failed_event(
            delivery,
            event.kind.to_string(),
            Some(event.payment_id),
            MAX_RETRIES_EXCEEDED.to_string(),
            now,
        ))
    }
}

fn failed_event(
    delivery: &Delivery,
    event_kind: String,
    payment_id: Option<common::PaymentId>,
    error_message: String,
    now: DateTime<Utc>,
) -> FailedEvent {
    FailedEvent {
        message_id: delivery.message_id.clone(),
        original_event: delivery.body.clone(),
        event_kind,
        payment_id,
        error_message,
        source: delivery.source.clone(),
        retry_count: delivery.receive_count,
        status: FailedEventStatus::Failed,
        created_at: now,
    }
}

/// Result of recovering one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryOutcome {
    /// The event was published again.
    Redriven { destination: String },
    /// A failed-event record was written. `inserted` is false if one
    /// already existed for this message.
    Stored { inserted: bool },
}

/// Consumes the dead-letter queue.
pub struct RecoveryHandler<S: FailedEventStore, P: Publisher> {
    classifier: FailureClassifier,
    store: S,
    publisher: P,
}

impl<S: FailedEventStore, P: Publisher> RecoveryHandler<S, P> {
    pub fn new(classifier: FailureClassifier, store: S, publisher: P) -> Self {
        Self {
            classifier,
            store,
            publisher,
        }
    }

    /// Recovers one dead-lettered message.
    #[tracing::instrument(skip(self, delivery), fields(message_id = %delivery.message_id, source = %delivery.source))]
    pub async fn handle(&self, delivery: &Delivery) -> Result<RecoveryOutcome> {
        match self.classifier.classify(delivery, Utc::now()) {
            Classification::Redrive { event, destination } => {
                self.publisher
                    .republish(&destination, &event, delivery.receive_count)
                    .await?;
                tracing::info!(
                    kind = %event.kind,
                    %destination,
                    attempts = delivery.receive_count,
                    "re-driving dead-lettered event"
                );
                metrics::counter!("recovery_redriven_total", "kind" => event.kind.to_string())
                    .increment(1);
                Ok(RecoveryOutcome::Redriven { destination })
            }
            Classification::Permanent(failed) => {
                tracing::error!(
                    kind = %failed.event_kind,
                    payment_id = ?failed.payment_id,
                    retry_count = failed.retry_count,
                    reason = %failed.error_message,
                    "storing permanently failed event"
                );
                metrics::counter!("recovery_failed_events_total", "kind" => failed.event_kind.clone())
                    .increment(1);
                let inserted = self.store.insert_failed_event(failed).await?;
                Ok(RecoveryOutcome::Stored { inserted })
            }
        }
    }

    /// Recovers every delivery in order, continuing past failures.
    pub async fn process_batch(&self, deliveries: &[Delivery]) -> BatchReport {
        let mut report = BatchReport::default();
        for delivery in deliveries {
            let result = self.handle(delivery).await.map(|_| ());
            report.record(&delivery.message_id, result);
        }
        report
    }
}
