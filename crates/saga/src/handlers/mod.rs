//! Saga step handlers.
//!
//! Each step reacts only to the event kinds it understands and knows
//! nothing about the overall payment state. Progress is handed to the
//! next step by publishing an event:
//!
//! 1. [`PaymentIntake`] creates the payment and emits `payment.initiated`.
//! 2. [`ReserveFundsHandler`] places a hold and emits `wallet.funds_reserved`.
//! 3. [`AuthorizeHandler`] asks the gateway and emits `gateway.payment_approved`
//!    or `gateway.payment_rejected`.
//! 4. [`SettlementHandler`] confirms or releases the hold and emits
//!    `wallet.funds_deducted` or `wallet.funds_released`.
//! 5. [`FinalizeHandler`] records the payment outcome and emits
//!    `payment.completed` or `payment.failed`.

mod authorize;
mod finalize;
mod intake;
mod reserve;
mod settle;

pub use authorize::{AuthorizeHandler, GATEWAY_ERROR_CODE};
pub use finalize::FinalizeHandler;
pub use intake::PaymentIntake;
pub use reserve::ReserveFundsHandler;
pub use settle::SettlementHandler;

use async_trait::async_trait;
use events::{Event, EventKind};

use crate::config::QueueNames;
use crate::error::Result;
use crate::services::Publisher;

/// A saga step driven by events.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Name used in logs and metrics.
    fn name(&self) -> &'static str;

    /// Returns true if this step reacts to `kind`.
    fn handles(&self, kind: &EventKind) -> bool;

    /// Processes one event.
    ///
    /// Kinds the step does not handle are logged and dropped without error.
    async fn handle(&self, event: &Event) -> Result<()>;
}

/// Logs and drops an event the step does not react to.
pub(crate) fn ignore(handler: &'static str, event: &Event) -> Result<()> {
    tracing::warn!(
        handler,
        kind = %event.kind,
        event_id = %event.id,
        "ignoring event kind"
    );
    metrics::counter!("saga_events_dropped_total", "kind" => event.kind.to_string())
        .increment(1);
    Ok(())
}

/// Publishes `event` to the queue its kind is routed to.
pub(crate) async fn emit<P: Publisher + ?Sized>(
    publisher: &P,
    queues: &QueueNames,
    event: &Event,
) -> Result<()> {
    publisher
        .publish(queues.destination_for(&event.kind), event)
        .await
}
