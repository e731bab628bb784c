//! Saga configuration, built once at start-up.

use std::collections::HashMap;
use std::time::Duration;

use events::EventKind;

/// Names of the queues and topic the saga steps talk over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueNames {
    /// Consumed by the wallet service: reserve, confirm and release.
    pub wallet: String,
    /// Consumed by the gateway service: authorize.
    pub gateway: String,
    /// Consumed by the payment service: finalize.
    pub payments: String,
    /// Where the queue diverts messages that ran out of delivery attempts.
    pub dead_letter: String,
    /// Fan-out topic for terminal payment events.
    pub event_bus: String,
}

impl QueueNames {
    /// Returns the destination an event of `kind` is published to.
    pub fn destination_for(&self, kind: &EventKind) -> &str {
        match kind {
            EventKind::PaymentInitiated
            | EventKind::GatewayApproved
            | EventKind::GatewayRejected => &self.wallet,
            EventKind::FundsReserved => &self.gateway,
            EventKind::FundsDeducted | EventKind::FundsReleased | EventKind::ReservationFailed => {
                &self.payments
            }
            EventKind::PaymentCompleted | EventKind::PaymentFailed | EventKind::Other(_) => {
                &self.event_bus
            }
        }
    }

    /// Queues that have a consuming step, in saga order.
    pub fn consumed(&self) -> [&str; 3] {
        [&self.wallet, &self.gateway, &self.payments]
    }
}

impl Default for QueueNames {
    fn default() -> Self {
        Self {
            wallet: "wallet-events".to_string(),
            gateway: "gateway-events".to_string(),
            payments: "payment-events".to_string(),
            dead_letter: "saga-dead-letter".to_string(),
            event_bus: "payment-bus".to_string(),
        }
    }
}

/// Which event kinds the recovery handler may re-drive.
///
/// Every catalog kind is listed explicitly so a new kind has to be
/// classified on purpose. Kinds outside the catalog are never retryable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    retryable: HashMap<EventKind, bool>,
}

impl RetryPolicy {
    /// Returns true if a dead-lettered event of `kind` may be re-driven.
    pub fn is_retryable(&self, kind: &EventKind) -> bool {
        self.retryable.get(kind).copied().unwrap_or(false)
    }

    /// Returns a copy of the policy with `kind` set to `retryable`.
    pub fn with(mut self, kind: EventKind, retryable: bool) -> Self {
        self.retryable.insert(kind, retryable);
        self
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        let retryable = EventKind::CATALOG
            .into_iter()
            .map(|kind| {
                let retry = matches!(kind, EventKind::PaymentInitiated | EventKind::FundsReserved);
                (kind, retry)
            })
            .collect();
        Self { retryable }
    }
}

/// Behaviour of the simulated payment gateway.
#[derive(Debug, Clone, PartialEq)]
pub struct GatewaySettings {
    /// Share of authorizations declined, between 0 and 1.
    pub fail_rate: f64,
    pub min_latency: Duration,
    pub max_latency: Duration,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            fail_rate: 0.1,
            min_latency: Duration::from_millis(50),
            max_latency: Duration::from_millis(150),
        }
    }
}

/// Immutable configuration handed to every saga component.
///
/// Reads from environment variables:
/// - `WALLET_QUEUE`, `GATEWAY_QUEUE`, `PAYMENTS_QUEUE`, `DEAD_LETTER_QUEUE`, `EVENT_BUS`
/// - `RESERVATION_HOLD_SECS` (default: `900`)
/// - `MAX_RETRIES` (default: `3`)
/// - `MAX_RECEIVE_COUNT` (default: `3`)
/// - `BATCH_SIZE` (default: `10`)
/// - `GATEWAY_FAIL_RATE` (default: `0.1`)
#[derive(Debug, Clone, PartialEq)]
pub struct SagaConfig {
    pub queues: QueueNames,
    /// How long a reservation holds funds before the sweep releases it.
    pub hold_duration: chrono::Duration,
    /// Delivery attempts after which the recovery handler stops re-driving.
    pub max_retries: u32,
    /// Delivery attempts before the queue dead-letters a message.
    pub max_receive_count: u32,
    pub batch_size: usize,
    pub retry_policy: RetryPolicy,
    pub gateway: GatewaySettings,
}

impl SagaConfig {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration from an arbitrary key lookup.
    ///
    /// Missing or unparseable values fall back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let text = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());
        let parsed = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());

        let queues = QueueNames {
            wallet: text("WALLET_QUEUE", &defaults.queues.wallet),
            gateway: text("GATEWAY_QUEUE", &defaults.queues.gateway),
            payments: text("PAYMENTS_QUEUE", &defaults.queues.payments),
            dead_letter: text("DEAD_LETTER_QUEUE", &defaults.queues.dead_letter),
            event_bus: text("EVENT_BUS", &defaults.queues.event_bus),
        };

        let fail_rate = lookup("GATEWAY_FAIL_RATE")
            .and_then(|v| v.trim().parse::<f64>().ok())
            .filter(|rate| (0.0..=1.0).contains(rate))
            .unwrap_or(defaults.gateway.fail_rate);

        Self {
            queues,
            hold_duration: parsed("RESERVATION_HOLD_SECS")
                .and_then(|secs| i64::try_from(secs).ok())
                .map(chrono::Duration::seconds)
                .unwrap_or(defaults.hold_duration),
            max_retries: parsed("MAX_RETRIES")
                .and_then(|v| u32::try_from(v).ok())
                .unwrap_or(defaults.max_retries),
            max_receive_count: parsed("MAX_RECEIVE_COUNT")
                .and_then(|v| u32::try_from(v).ok())
                .filter(|v| *v > 0)
                .unwrap_or(defaults.max_receive_count),
            batch_size: parsed("BATCH_SIZE")
                .and_then(|v| usize::try_from(v).ok())
                .filter(|v| *v > 0)
                .unwrap_or(defaults.batch_size),
            retry_policy: defaults.retry_policy,
            gateway: GatewaySettings {
                fail_rate,
                ..defaults.gateway
            },
        }
    }
}

impl Default for SagaConfig {
    fn default() -> Self {
        Self {
            queues: QueueNames::default(),
            hold_duration: chrono::Duration::minutes(15),
            max_retries: 3,
            max_receive_count: 3,
            batch_size: 10,
            retry_policy: RetryPolicy::default(),
            gateway: GatewaySettings::default(),
        }
    }
}
