//! Authorize step: asks the payment gateway to approve reserved funds.

use std::time::Instant;

use async_trait::async_trait;
use events::{Event, EventKind};

use crate::config::QueueNames;
use crate::error::Result;
use crate::handlers::{EventHandler, emit, ignore};
use crate::services::{GatewayResponse, PaymentGateway, Publisher};

/// Rejection code published when the gateway could not be reached.
pub const GATEWAY_ERROR_CODE: &str = "gateway_error";

/// Reacts to `wallet.funds_reserved` with a single gateway authorization.
///
/// An unreachable gateway and a decline both publish
/// `gateway.payment_rejected`; neither fails the message.
pub struct AuthorizeHandler<P: Publisher, G: PaymentGateway> {
    gateway: G,
    publisher: P,
    queues: QueueNames,
}

impl<P: Publisher, G: PaymentGateway> AuthorizeHandler<P, G> {
    pub fn new(gateway: G, publisher: P, queues: QueueNames) -> Self {
        Self {
            gateway,
            publisher,
            queues,
        }
    }
}

#[async_trait]
impl<P: Publisher, G: PaymentGateway> EventHandler for AuthorizeHandler<P, G> {
    fn name(&self) -> &'static str {
        "authorize"
    }

    fn handles(&self, kind: &EventKind) -> bool {
        *kind == EventKind::FundsReserved
    }

    #[tracing::instrument(skip(self, event), fields(payment_id = %event.payment_id))]
    async fn handle(&self, event: &Event) -> Result<()> {
        if !self.handles(&event.kind) {
            return ignore(self.name(), event);
        }

        let (amount, currency) = event.require_amount()?;
        let reservation_id = event.require_reservation()?;

        let started = Instant::now();
        let response = self
            .gateway
            .authorize(event.payment_id, amount, currency)
            .await;
        metrics::histogram!("gateway_authorize_duration_seconds")
            .record(started.elapsed().as_secs_f64());

        let outcome = |kind: EventKind| {
            Event::new(kind, event.payment_id, event.user_id.clone())
                .with_amount(amount, currency)
                .with_reservation(reservation_id)
        };

        let next = match response {
            Ok(GatewayResponse {
                approved: true,
                reference: Some(reference),
                ..
            }) => {
                tracing::info!(gateway_ref = %reference, "payment approved");
                outcome(EventKind::GatewayApproved).with_gateway_ref(reference)
            }
            Ok(GatewayResponse {
                approved: true,
                reference: None,
                ..
            }) => {
                tracing::warn!("gateway approved without a reference");
                outcome(EventKind::GatewayRejected)
                    .with_error_code(GATEWAY_ERROR_CODE)
                    .with_reason("approval carried no gateway reference")
            }
            Ok(response) => {
                let code = response.error_code.unwrap_or_default();
                let message = response.message.unwrap_or_else(|| "declined".to_string());
                tracing::info!(%code, %message, "payment declined");
                outcome(EventKind::GatewayRejected)
                    .with_error_code(code)
                    .with_reason(message)
            }
            Err(e) => {
                tracing::warn!(error = %e, "gateway unreachable, rejecting payment");
                outcome(EventKind::GatewayRejected)
                    .with_error_code(GATEWAY_ERROR_CODE)
                    .with_reason(e.to_string())
            }
        };

        emit(&self.publisher, &self.queues, &next).await
    }
}
