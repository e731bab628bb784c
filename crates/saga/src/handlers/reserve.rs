//! Reserve step: holds funds for an initiated payment.

use async_trait::async_trait;
use events::{Event, EventKind};
use ledger::{ReservationManager, ReserveOutcome};
use store::{ReservationStore, WalletStore};

use crate::config::QueueNames;
use crate::error::{Result, SagaError};
use crate::handlers::{EventHandler, emit, ignore};
use crate::services::Publisher;

/// Reacts to `payment.initiated` by reserving the payment amount.
///
/// A rejected reservation surfaces as [`SagaError::ReservationRejected`]
/// and publishes nothing, so the payment stays pending.
pub struct ReserveFundsHandler<S, P>
where
    S: WalletStore + ReservationStore + Clone,
    P: Publisher,
{
    reservations: ReservationManager<S>,
    publisher: P,
    queues: QueueNames,
}

impl<S, P> ReserveFundsHandler<S, P>
where
    S: WalletStore + ReservationStore + Clone,
    P: Publisher,
{
    pub fn new(reservations: ReservationManager<S>, publisher: P, queues: QueueNames) -> Self {
        Self {
            reservations,
            publisher,
            queues,
        }
    }
}

#[async_trait]
impl<S, P> EventHandler for ReserveFundsHandler<S, P>
where
    S: WalletStore + ReservationStore + Clone,
    P: Publisher,
{
    fn name(&self) -> &'static str {
        "reserve"
    }

    fn handles(&self, kind: &EventKind) -> bool {
        *kind == EventKind::PaymentInitiated
    }

    #[tracing::instrument(skip(self, event), fields(payment_id = %event.payment_id))]
    async fn handle(&self, event: &Event) -> Result<()> {
        if !self.handles(&event.kind) {
            return ignore(self.name(), event);
        }

        let (amount, currency) = event.require_amount()?;
        let outcome = self
            .reservations
            .reserve(event.payment_id, &event.user_id, amount, currency)
            .await?;

        match outcome {
            ReserveOutcome::Reserved(reservation) => {
                let reserved = Event::new(
                    EventKind::FundsReserved,
                    event.payment_id,
                    event.user_id.clone(),
                )
                .with_amount(reservation.amount, reservation.currency.clone())
                .with_reservation(reservation.id);
                emit(&self.publisher, &self.queues, &reserved).await
            }
            ReserveOutcome::Rejected(reason) => {
                tracing::warn!(%reason, "funds could not be reserved");
                Err(SagaError::ReservationRejected {
                    payment_id: event.payment_id,
                    reason,
                })
            }
        }
    }
}
