//! Settlement step: confirms or releases the hold once the gateway answered.

use async_trait::async_trait;
use events::{Event, EventKind};
use ledger::{ReservationManager, Settlement};
use store::{ReservationStore, WalletStore};

use crate::config::QueueNames;
use crate::error::Result;
use crate::handlers::{EventHandler, emit, ignore};
use crate::services::Publisher;

/// Reacts to gateway outcomes.
///
/// `gateway.payment_approved` confirms the reservation, which debits the
/// wallet, and emits `wallet.funds_deducted`. `gateway.payment_rejected`
/// releases it without touching the wallet and emits
/// `wallet.funds_released`. A failed debit propagates and leaves the
/// reservation active.
pub struct SettlementHandler<S, P>
where
    S: WalletStore + ReservationStore + Clone,
    P: Publisher,
{
    reservations: ReservationManager<S>,
    publisher: P,
    queues: QueueNames,
}

impl<S, P> SettlementHandler<S, P>
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

    async fn confirm(&self, event: &Event) -> Result<()> {
        let reservation_id = event.require_reservation()?;
        let gateway_ref = event.require_gateway_ref()?;

        let Settlement {
            reservation,
            already_settled,
        } = self.reservations.confirm(reservation_id, gateway_ref).await?;
        if already_settled {
            tracing::info!(%reservation_id, "approval redelivered for confirmed reservation");
        }

        let deducted = Event::new(
            EventKind::FundsDeducted,
            event.payment_id,
            event.user_id.clone(),
        )
        .with_amount(reservation.amount, reservation.currency.clone())
        .with_reservation(reservation.id)
        .with_gateway_ref(gateway_ref);
        emit(&self.publisher, &self.queues, &deducted).await
    }

    async fn release(&self, event: &Event) -> Result<()> {
        let reservation_id = event.require_reservation()?;
        let reason = event.require_reason()?;

        let Settlement {
            reservation,
            already_settled,
        } = self.reservations.release(reservation_id, reason).await?;
        if already_settled {
            tracing::info!(%reservation_id, "rejection redelivered for released reservation");
        }

        let mut released = Event::new(
            EventKind::FundsReleased,
            event.payment_id,
            event.user_id.clone(),
        )
        .with_amount(reservation.amount, reservation.currency.clone())
        .with_reservation(reservation.id)
        .with_reason(reason);
        released.error_code = event.error_code.clone();
        emit(&self.publisher, &self.queues, &released).await
    }
}

#[async_trait]
impl<S, P> EventHandler for SettlementHandler<S, P>
where
    S: WalletStore + ReservationStore + Clone,
    P: Publisher,
{
    fn name(&self) -> &'static str {
        "settle"
    }

    fn handles(&self, kind: &EventKind) -> bool {
        matches!(kind, EventKind::GatewayApproved | EventKind::GatewayRejected)
    }

    #[tracing::instrument(skip(self, event), fields(payment_id = %event.payment_id, kind = %event.kind))]
    async fn handle(&self, event: &Event) -> Result<()> {
        match event.kind {
            EventKind::GatewayApproved => self.confirm(event).await,
            EventKind::GatewayRejected => self.release(event).await,
            _ => ignore(self.name(), event),
        }
    }
}
