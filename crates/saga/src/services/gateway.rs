//! Payment gateway capability and its implementations.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::PaymentId;
use rand::Rng;
use rust_decimal::Decimal;
use tokio::sync::Mutex;

use crate::config::GatewaySettings;
use crate::error::SagaError;

/// Rejection code used by the simulated issuer.
pub const DECLINED_CODE: &str = "DECLINED";

/// Rejection message used by the simulated issuer.
pub const DECLINED_MESSAGE: &str = "transaction declined by issuer";

/// Answer from the gateway to an authorization request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayResponse {
    pub approved: bool,
    /// Gateway reference, set on approval.
    pub reference: Option<String>,
    /// Rejection code, set on decline.
    pub error_code: Option<String>,
    /// Human-readable rejection reason, set on decline.
    pub message: Option<String>,
}

impl GatewayResponse {
    /// Creates an approval carrying `reference`.
    pub fn approved(reference: impl Into<String>) -> Self {
        Self {
            approved: true,
            reference: Some(reference.into()),
            error_code: None,
            message: None,
        }
    }

    /// Creates a decline with a code and reason.
    pub fn declined(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            approved: false,
            reference: None,
            error_code: Some(code.into()),
            message: Some(message.into()),
        }
    }
}

/// Authorizes payments against an external processor.
///
/// `Err` means the gateway could not be reached; a decline is an `Ok`
/// response with `approved == false`.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn authorize(
        &self,
        payment_id: PaymentId,
        amount: Decimal,
        currency: &str,
    ) -> Result<GatewayResponse, SagaError>;
}

fn new_reference() -> String {
    format!("GW-{:08x}", rand::thread_rng().r#gen::<u32>())
}

/// Scripted behaviour of an [`InMemoryGateway`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayMode {
    Approve,
    Decline { code: String, message: String },
    Unavailable,
}

#[derive(Debug)]
struct InMemoryGatewayState {
    mode: GatewayMode,
    calls: usize,
}

/// In-memory gateway for testing.
#[derive(Debug, Clone)]
pub struct InMemoryGateway {
    state: Arc<Mutex<InMemoryGatewayState>>,
}

impl Default for InMemoryGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryGateway {
    /// Creates a gateway that approves every request.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(InMemoryGatewayState {
                mode: GatewayMode::Approve,
                calls: 0,
            })),
        }
    }

    /// Switches the gateway to approve every request.
    pub async fn approve_all(&self) {
        self.state.lock().await.mode = GatewayMode::Approve;
    }

    /// Switches the gateway to decline every request.
    pub async fn decline_all(&self, code: impl Into<String>, message: impl Into<String>) {
        self.state.lock().await.mode = GatewayMode::Decline {
            code: code.into(),
            message: message.into(),
        };
    }

    /// Switches the gateway to fail every request as unreachable.
    pub async fn set_unavailable(&self) {
        self.state.lock().await.mode = GatewayMode::Unavailable;
    }

    /// Returns the number of authorize calls made.
    pub async fn call_count(&self) -> usize {
        self.state.lock().await.calls
    }
}

#[async_trait]
impl PaymentGateway for InMemoryGateway {
    async fn authorize(
        &self,
        _payment_id: PaymentId,
        _amount: Decimal,
        _currency: &str,
    ) -> Result<GatewayResponse, SagaError> {
        let mut state = self.state.lock().await;
        state.calls += 1;
        match &state.mode {
            GatewayMode::Approve => Ok(GatewayResponse::approved(new_reference())),
            GatewayMode::Decline { code, message } => {
                Ok(GatewayResponse::declined(code.clone(), message.clone()))
            }
            GatewayMode::Unavailable => {
                Err(SagaError::Gateway("connection refused".to_string()))
            }
        }
    }
}

/// Gateway stand-in that declines a share of requests at random after a
/// short simulated processing delay.
#[derive(Debug, Clone)]
pub struct SimulatedGateway {
    settings: GatewaySettings,
}

impl SimulatedGateway {
    pub fn new(settings: GatewaySettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl PaymentGateway for SimulatedGateway {
    #[tracing::instrument(skip_all, fields(%payment_id, %amount, currency))]
    async fn authorize(
        &self,
        payment_id: PaymentId,
        amount: Decimal,
        currency: &str,
    ) -> Result<GatewayResponse, SagaError> {
        let (latency, declined) = {
            let mut rng = rand::thread_rng();
            let min = self.settings.min_latency.as_millis() as u64;
            let max = (self.settings.max_latency.as_millis() as u64).max(min);
            let latency = Duration::from_millis(rng.gen_range(min..=max));
            let declined = rng.gen_bool(self.settings.fail_rate.clamp(0.0, 1.0));
            (latency, declined)
        };

        tokio::time::sleep(latency).await;

        if declined {
            tracing::info!("simulated decline");
            Ok(GatewayResponse::declined(DECLINED_CODE, DECLINED_MESSAGE))
        } else {
            Ok(GatewayResponse::approved(new_reference()))
        }
    }
}
