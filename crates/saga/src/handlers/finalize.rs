//! Finalize step: records the payment outcome once the funds settled.

use async_trait::async_trait;
use events::{Event, EventKind};
use ledger::PaymentRegistry;
use store::PaymentStore;

use crate::config::QueueNames;
use crate::error::Result;
use crate::handlers::{EventHandler, emit, ignore};
use crate::services::Publisher;

/// Reacts to settlement outcomes by marking the payment terminal.
///
/// `wallet.funds_deducted` completes the payment. `wallet.funds_released`
/// and `wallet.reservation_failed` fail it. The terminal status is then
/// announced on the event bus.
pub struct FinalizeHandler<S: PaymentStore, P: Publisher> {
    payments: PaymentRegistry<S>,
    publisher: P,
    queues: QueueNames,
}

impl<S: PaymentStore, P: Publisher> FinalizeHandler<S, P> {
    pub fn new(store: S, publisher: P, queues: QueueNames) -> Self {
        Self {
            payments: PaymentRegistry::new(store),
            publisher,
            queues,
        }
    }

    async fn complete(&self, event: &Event) -> Result<()> {
        let (amount, currency) = event.require_amount()?;
        let payment = self.payments.mark_completed(event.payment_id).await?;
        tracing::info!(payment_id = %payment.id, "payment completed");
        metrics::counter!("payments_finalized_total", "status" => "completed").increment(1);

        let mut completed = Event::new(
            EventKind::PaymentCompleted,
            payment.id,
            event.user_id.clone(),
        )
        .with_amount(amount, currency);
        completed.reservation_id = event.reservation_id;
        completed.gateway_ref = event.gateway_ref.clone();
        emit(&self.publisher, &self.queues, &completed).await
    }

    async fn fail(&self, event: &Event) -> Result<()> {
        let reason = event.require_reason()?;
        let payment = self.payments.mark_failed(event.payment_id).await?;
        tracing::info!(payment_id = %payment.id, reason, "payment failed");
        metrics::counter!("payments_finalized_total", "status" => "failed").increment(1);

        let mut failed = Event::new(EventKind::PaymentFailed, payment.id, event.user_id.clone())
            .with_amount(payment.amount, payment.currency.clone())
            .with_reason(reason);
        failed.reservation_id = event.reservation_id;
        failed.error_code = event.error_code.clone();
        emit(&self.publisher, &self.queues, &failed).await
    }
}

#[async_trait]
impl<S: PaymentStore, P: Publisher> EventHandler for FinalizeHandler<S, P> {
    fn name(&self) -> &'static str {
        "finalize"
    }

    fn handles(&self, kind: &EventKind) -> bool {
        matches!(
            kind,
            EventKind::FundsDeducted | EventKind::FundsReleased | EventKind::ReservationFailed
        )
    }

    #[tracing::instrument(skip(self, event), fields(payment_id = %event.payment_id, kind = %event.kind))]
    async fn handle(&self, event: &Event) -> Result<()> {
        match event.kind {
            EventKind::FundsDeducted => self.complete(event).await,
            EventKind::FundsReleased | EventKind::ReservationFailed => self.fail(event).await,
            _ => ignore(self.name(), event),
        }
    }
}
