//! Payment intake: the saga's entry point.

use events::{Event, EventKind};
use ledger::{NewPayment, PaymentRegistry};
use store::{Payment, PaymentStore};

use crate::config::QueueNames;
use crate::error::Result;
use crate::handlers::emit;
use crate::services::Publisher;

/// Accepts payment requests and starts their saga.
pub struct PaymentIntake<S: PaymentStore, P: Publisher> {
    payments: PaymentRegistry<S>,
    publisher: P,
    queues: QueueNames,
}

impl<S: PaymentStore, P: Publisher> PaymentIntake<S, P> {
    pub fn new(store: S, publisher: P, queues: QueueNames) -> Self {
        Self {
            payments: PaymentRegistry::new(store),
            publisher,
            queues,
        }
    }

    /// Validates and records a pending payment, then emits
    /// `payment.initiated`.
    ///
    /// An invalid request is rejected without side effects. Once the
    /// payment is stored it is accepted: a failure to publish the start
    /// event is logged and the payment is still returned.
    #[tracing::instrument(skip(self, request), fields(owner = %request.owner))]
    pub async fn submit(&self, request: NewPayment) -> Result<Payment> {
        let payment = self.payments.create(request).await?;

        let event = Event::new(
            EventKind::PaymentInitiated,
            payment.id,
            payment.owner.clone(),
        )
        .with_amount(payment.amount, payment.currency.clone());

        if let Err(e) = emit(&self.publisher, &self.queues, &event).await {
            tracing::error!(payment_id = %payment.id, error = %e, "failed to publish payment.initiated");
        }

        metrics::counter!("payments_submitted_total").increment(1);
        Ok(payment)
    }
}

#[cfg(test)]
mod tests {
    use ledger::LedgerError;
    use rust_decimal_macros::dec;
    use store::{InMemoryStore, PaymentStatus, PaymentStore};

    use super::*;
    use crate::error::SagaError;
    use crate::services::InMemoryQueue;

    fn request() -> NewPayment {
        NewPayment {
            owner: "alice".into(),
            service_id: "svc-1".to_string(),
            amount: dec!(100),
            currency: "USD".to_string(),
            description: "monthly plan".to_string(),
        }
    }

    #[tokio::test]
    async fn test_submit_creates_payment_and_emits_initiated() {
        let store = InMemoryStore::new();
        let queue = InMemoryQueue::new(3, "dlq");
        let queues = QueueNames::default();
        let intake = PaymentIntake::new(store.clone(), queue.clone(), queues.clone());

        let payment = intake.submit(request()).await.unwrap();
        assert_eq!(payment.status, PaymentStatus::Pending);
        assert!(store.get_payment(payment.id).await.unwrap().is_some());

        let messages = queue.peek(&queues.wallet).await;
        assert_eq!(messages.len(), 1);
        let event = Event::from_json(&messages[0].body).unwrap();
        assert_eq!(event.kind, EventKind::PaymentInitiated);
        assert_eq!(event.payment_id, payment.id);
        assert_eq!(event.amount, Some(dec!(100)));
        assert_eq!(event.currency.as_deref(), Some("USD"));
    }

    #[tokio::test]
    async fn test_submit_rejects_invalid_request() {
        let queue = InMemoryQueue::new(3, "dlq");
        let intake = PaymentIntake::new(InMemoryStore::new(), queue.clone(), QueueNames::default());

        let result = intake
            .submit(NewPayment {
                amount: dec!(0),
                ..request()
            })
            .await;

        assert!(matches!(
            result,
            Err(SagaError::Ledger(LedgerError::Validation(_)))
        ));
        assert!(queue.depths().await.is_empty());
    }

    #[tokio::test]
    async fn test_submit_survives_publish_failure() {
        let store = InMemoryStore::new();
        let queue = InMemoryQueue::new(3, "dlq");
        queue.set_fail_on_publish(true).await;
        let intake = PaymentIntake::new(store.clone(), queue, QueueNames::default());

        let payment = intake.submit(request()).await.unwrap();
        assert!(store.get_payment(payment.id).await.unwrap().is_some());
    }
}
