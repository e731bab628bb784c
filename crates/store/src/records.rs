//! Records persisted by the saga.

use chrono::{DateTime, Duration, Utc};
use common::{PaymentId, ReservationId, UserId, WalletId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{StoreError, Version};

/// Decimal places a stored amount can carry. Matches the `NUMERIC(20, 4)`
/// columns; anything finer would be rounded by PostgreSQL.
pub const AMOUNT_SCALE: u32 = 4;

/// A user's wallet. Looked up by owner; one wallet per owner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Wallet {
    pub id: WalletId,
    pub owner: UserId,
    /// Never negative.
    pub balance: Decimal,
    pub currency: String,
    pub version: Version,
    pub updated_at: DateTime<Utc>,
}

impl Wallet {
    /// Opens a wallet with an initial balance at the initial version.
    pub fn open(owner: impl Into<UserId>, balance: Decimal, currency: impl Into<String>) -> Self {
        Self {
            id: WalletId::new(),
            owner: owner.into(),
            balance,
            currency: currency.into(),
            version: Version::initial(),
            updated_at: Utc::now(),
        }
    }
}

/// A conditional debit against a wallet.
///
/// Applies only if the stored version equals `expected_version` and the
/// stored balance covers `amount`.
#[derive(Debug, Clone, PartialEq)]
pub struct WalletDebit {
    pub wallet_id: WalletId,
    pub amount: Decimal,
    pub expected_version: Version,
    pub at: DateTime<Utc>,
}

/// Lifecycle status of a funds reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
    /// Funds are logically held; the wallet has not been touched.
    #[default]
    Active,
    /// The wallet was debited. Terminal.
    Confirmed,
    /// The hold was dropped without touching the wallet. Terminal.
    Released,
}

impl ReservationStatus {
    pub fn can_confirm(&self) -> bool {
        matches!(self, ReservationStatus::Active)
    }

    pub fn can_release(&self) -> bool {
        matches!(self, ReservationStatus::Active)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ReservationStatus::Confirmed | ReservationStatus::Released
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Active => "active",
            ReservationStatus::Confirmed => "confirmed",
            ReservationStatus::Released => "released",
        }
    }
}

impl std::fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ReservationStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(ReservationStatus::Active),
            "confirmed" => Ok(ReservationStatus::Confirmed),
            "released" => Ok(ReservationStatus::Released),
            other => Err(StoreError::InvalidData(format!(
                "unknown reservation status: {other}"
            ))),
        }
    }
}

/// A logical hold on a wallet's funds for one payment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: ReservationId,
    pub payment_id: PaymentId,
    pub owner: UserId,
    pub amount: Decimal,
    pub currency: String,
    pub status: ReservationStatus,
    /// Why the hold was released, once it is.
    pub release_reason: Option<String>,
    /// Gateway reference recorded on confirmation.
    pub gateway_ref: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Reservation {
    /// Creates an active hold that expires `hold` after `now`.
    pub fn hold(
        payment_id: PaymentId,
        owner: UserId,
        amount: Decimal,
        currency: impl Into<String>,
        hold: Duration,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ReservationId::new(),
            payment_id,
            owner,
            amount,
            currency: currency.into(),
            status: ReservationStatus::Active,
            release_reason: None,
            gateway_ref: None,
            created_at: now,
            expires_at: now + hold,
            updated_at: now,
        }
    }

    /// Returns true if the hold is still active past its expiry.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == ReservationStatus::Active && self.expires_at <= now
    }
}

/// A conditional status change of a reservation.
///
/// Applies only if the stored status equals `from`.
#[derive(Debug, Clone, PartialEq)]
pub struct ReservationTransition {
    pub reservation_id: ReservationId,
    pub from: ReservationStatus,
    pub to: ReservationStatus,
    pub release_reason: Option<String>,
    pub gateway_ref: Option<String>,
    pub at: DateTime<Utc>,
}

impl ReservationTransition {
    /// Transition from active to confirmed.
    pub fn confirm(reservation_id: ReservationId, gateway_ref: impl Into<String>) -> Self {
        Self {
            reservation_id,
            from: ReservationStatus::Active,
            to: ReservationStatus::Confirmed,
            release_reason: None,
            gateway_ref: Some(gateway_ref.into()),
            at: Utc::now(),
        }
    }

    /// Transition from active to released.
    pub fn release(reservation_id: ReservationId, reason: impl Into<String>) -> Self {
        Self {
            reservation_id,
            from: ReservationStatus::Active,
            to: ReservationStatus::Released,
            release_reason: Some(reason.into()),
            gateway_ref: None,
            at: Utc::now(),
        }
    }
}

/// Advisory status of a payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    #[default]
    Pending,
    Completed,
    Failed,
}

impl PaymentStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PaymentStatus::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for PaymentStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PaymentStatus::Pending),
            "completed" => Ok(PaymentStatus::Completed),
            "failed" => Ok(PaymentStatus::Failed),
            other => Err(StoreError::InvalidData(format!(
                "unknown payment status: {other}"
            ))),
        }
    }
}

/// A payment accepted at intake.
///
/// Immutable after creation except for status and update timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub owner: UserId,
    pub service_id: String,
    pub amount: Decimal,
    pub currency: String,
    pub description: String,
    pub status: PaymentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Status of a failed event. Failed events are never updated, so there is
/// only one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailedEventStatus {
    #[default]
    Failed,
}

impl FailedEventStatus {
    pub fn as_str(&self) -> &'static str {
        "failed"
    }
}

impl std::fmt::Display for FailedEventStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Audit record for a message the saga gave up on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedEvent {
    /// Message ID assigned by the queue.
    pub message_id: String,
    /// The raw message body.
    pub original_event: String,
    /// Best-effort kind, "unknown" if the body could not be parsed.
    pub event_kind: String,
    pub payment_id: Option<PaymentId>,
    pub error_message: String,
    /// Label of the queue the message was dead-lettered from.
    pub source: String,
    pub retry_count: u32,
    pub status: FailedEventStatus,
    pub created_at: DateTime<Utc>,
}
