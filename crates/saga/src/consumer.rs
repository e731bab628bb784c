//! Batch consumer feeding queue deliveries to step handlers.

use events::{Event, EventKind};

use crate::delivery::{BatchReport, Delivery};
use crate::error::Result;
use crate::handlers::EventHandler;

/// Decodes deliveries and dispatches each event to the step that handles
/// its kind.
///
/// Events no registered step handles are logged and dropped.
pub struct Consumer {
    name: &'static str,
    handlers: Vec<Box<dyn EventHandler>>,
}

impl Consumer {
    /// Creates a consumer with no handlers.
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            handlers: Vec::new(),
        }
    }

    /// Registers a step handler.
    pub fn register(&mut self, handler: Box<dyn EventHandler>) {
        self.handlers.push(handler);
    }

    /// Builder form of [`Consumer::register`].
    pub fn with_handler(mut self, handler: impl EventHandler + 'static) -> Self {
        self.register(Box::new(handler));
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Returns the number of registered handlers.
    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    /// Processes one delivery.
    #[tracing::instrument(skip(self, delivery), fields(consumer = self.name, message_id = %delivery.message_id))]
    pub async fn process(&self, delivery: &Delivery) -> Result<()> {
        let kind = Event::peek_kind(&delivery.body)?;
        if !kind.is_known() {
            drop_unhandled(&kind);
            return Ok(());
        }

        let event = Event::from_json(&delivery.body)?;
        event.validate()?;

        let Some(handler) = self.handlers.iter().find(|h| h.handles(&event.kind)) else {
            drop_unhandled(&event.kind);
            return Ok(());
        };

        match handler.handle(&event).await {
            Ok(()) => {
                metrics::counter!("saga_events_handled_total", "kind" => event.kind.to_string())
                    .increment(1);
                Ok(())
            }
            Err(e) => {
                metrics::counter!("saga_step_failures_total", "handler" => handler.name())
                    .increment(1);
                if e.is_transient() {
                    tracing::warn!(handler = handler.name(), error = %e, "step failed, will be redelivered");
                } else {
                    tracing::error!(handler = handler.name(), error = %e, "step failed");
                }
                Err(e)
            }
        }
    }

    /// Processes every delivery in order, continuing past failures.
    pub async fn process_batch(&self, deliveries: &[Delivery]) -> BatchReport {
        let mut report = BatchReport::default();
        for delivery in deliveries {
            let result = self.process(delivery).await;
            report.record(&delivery.message_id, result);
        }
        if report.has_failures() {
            tracing::warn!(
                consumer = self.name,
                processed = report.processed,
                failed = report.failures.len(),
                "batch finished with failures"
            );
        }
        report
    }
}

fn drop_unhandled(kind: &EventKind) {
    tracing::warn!(%kind, "no handler for event kind, dropping");
    metrics::counter!("saga_events_dropped_total", "kind" => kind.to_string()).increment(1);
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use common::{PaymentId, UserId};
    use rust_decimal_macros::dec;

    use super::*;
    use crate::error::SagaError;

    struct CountingHandler {
        calls: Arc<AtomicUsize>,
        fail: bool,
    }

    #[async_trait]
    impl EventHandler for CountingHandler {
        fn name(&self) -> &'static str {
            "counting"
        }

        fn handles(&self, kind: &EventKind) -> bool {
            *kind == EventKind::PaymentInitiated
        }

        async fn handle(&self, _event: &Event) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(SagaError::Gateway("boom".to_string()))
            } else {
                Ok(())
            }
        }
    }

    fn delivery(id: &str, body: String) -> Delivery {
        Delivery {
            message_id: id.to_string(),
            body,
            receive_count: 1,
            source: "wallet-events".to_string(),
        }
    }

    fn initiated() -> String {
        Event::new(EventKind::PaymentInitiated, PaymentId::new(), UserId::new("alice"))
            .with_amount(dec!(10), "USD")
            .to_json()
            .unwrap()
    }

    fn consumer(fail: bool) -> (Consumer, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let consumer = Consumer::new("test").with_handler(CountingHandler {
            calls: calls.clone(),
            fail,
        });
        (consumer, calls)
    }

    #[tokio::test]
    async fn test_dispatches_to_handler() {
        let (consumer, calls) = consumer(false);
        consumer.process(&delivery("m1", initiated())).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unknown_kind_is_dropped() {
        let (consumer, calls) = consumer(false);
        let body = Event::new(
            EventKind::Other("wallet.frozen".to_string()),
            PaymentId::new(),
            UserId::new("alice"),
        )
        .to_json()
        .unwrap();

        consumer.process(&delivery("m1", body)).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unknown_kind_with_foreign_envelope_is_dropped() {
        let (consumer, calls) = consumer(false);
        let body = r#"{"type":"wallet.frozen","payment_id":"legacy-42","user_id":"alice"}"#;

        consumer
            .process(&delivery("m1", body.to_string()))
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_malformed_body_fails() {
        let (consumer, _) = consumer(false);
        let result = consumer.process(&delivery("m1", "not json".to_string())).await;
        assert!(matches!(result, Err(SagaError::Event(_))));
    }

    #[tokio::test]
    async fn test_missing_required_field_fails_before_dispatch() {
        let (consumer, calls) = consumer(false);
        let body = Event::new(EventKind::PaymentInitiated, PaymentId::new(), UserId::new("alice"))
            .to_json()
            .unwrap();

        assert!(consumer.process(&delivery("m1", body)).await.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_batch_continues_past_failures() {
        let (consumer, calls) = consumer(true);
        let deliveries = vec![
            delivery("m1", initiated()),
            delivery("m2", "{".to_string()),
            delivery("m3", initiated()),
        ];

        let report = consumer.process_batch(&deliveries).await;

        assert_eq!(report.processed, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(report.failed("m1") && report.failed("m2") && report.failed("m3"));
        assert!(matches!(report.into_result(), Err(SagaError::Gateway(_))));
    }
}
