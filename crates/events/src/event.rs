use chrono::{DateTime, Utc};
use common::{EventId, PaymentId, ReservationId, UserId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{EventError, EventKind, Result};

#[derive(Deserialize)]
struct KindOnly {
    #[serde(rename = "type")]
    kind: EventKind,
}

/// Optional payload fields an event kind may require.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Amount,
    Currency,
    Reason,
    ReservationId,
    GatewayRef,
}

impl Field {
    /// Returns the JSON name of the field.
    pub fn as_str(&self) -> &'static str {
        match self {
            Field::Amount => "amount",
            Field::Currency => "currency",
            Field::Reason => "reason",
            Field::ReservationId => "reservation_id",
            Field::GatewayRef => "gateway_ref",
        }
    }
}

impl std::fmt::Display for Field {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The envelope carried on the bus between saga steps.
///
/// Events are immutable once published. Optional payload fields are
/// populated according to the kind and omitted from the JSON when absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Unique identifier for this event.
    pub id: EventId,

    /// The kind of the event.
    #[serde(rename = "type")]
    pub kind: EventKind,

    /// When the event occurred.
    pub occurred_at: DateTime<Utc>,

    /// The payment this event belongs to.
    pub payment_id: PaymentId,

    /// The user who owns the payment.
    pub user_id: UserId,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<Decimal>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,

    /// Free-text reason for a rejection or release.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Machine-readable rejection code from the gateway.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reservation_id: Option<ReservationId>,

    /// Reference assigned by the payment gateway on approval.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway_ref: Option<String>,
}

impl Event {
    /// Creates a new event with a fresh ID and the current time.
    pub fn new(kind: EventKind, payment_id: PaymentId, user_id: UserId) -> Self {
        Self {
            id: EventId::new(),
            kind,
            occurred_at: Utc::now(),
            payment_id,
            user_id,
            amount: None,
            currency: None,
            reason: None,
            error_code: None,
            reservation_id: None,
            gateway_ref: None,
        }
    }

    /// Sets the amount and its currency.
    pub fn with_amount(mut self, amount: Decimal, currency: impl Into<String>) -> Self {
        self.amount = Some(amount);
        self.currency = Some(currency.into());
        self
    }

    /// Sets the free-text reason.
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Sets the rejection code.
    pub fn with_error_code(mut self, code: impl Into<String>) -> Self {
        self.error_code = Some(code.into());
        self
    }

    /// Sets the reservation the event refers to.
    pub fn with_reservation(mut self, reservation_id: ReservationId) -> Self {
        self.reservation_id = Some(reservation_id);
        self
    }

    /// Sets the gateway reference.
    pub fn with_gateway_ref(mut self, gateway_ref: impl Into<String>) -> Self {
        self.gateway_ref = Some(gateway_ref.into());
        self
    }

    /// Decodes an event from its JSON body.
    ///
    /// Amounts are accepted either as JSON strings or numbers.
    pub fn from_json(body: &str) -> Result<Self> {
        Ok(serde_json::from_str(body)?)
    }

    /// Reads only the `type` field of a JSON body.
    ///
    /// The rest of the envelope is not checked, so this succeeds for
    /// kinds whose payload shape is unknown here.
    pub fn peek_kind(body: &str) -> Result<EventKind> {
        let envelope: KindOnly = serde_json::from_str(body)?;
        Ok(envelope.kind)
    }

    /// Encodes the event as JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Returns the amount and currency, failing if either is absent.
    pub fn require_amount(&self) -> Result<(Decimal, &str)> {
        let amount = self.amount.ok_or_else(|| self.missing(Field::Amount))?;
        let currency = self
            .currency
            .as_deref()
            .filter(|c| !c.is_empty())
            .ok_or_else(|| self.missing(Field::Currency))?;
        Ok((amount, currency))
    }

    /// Returns the reservation ID, failing if absent.
    pub fn require_reservation(&self) -> Result<ReservationId> {
        self.reservation_id
            .ok_or_else(|| self.missing(Field::ReservationId))
    }

    /// Returns the gateway reference, failing if absent.
    pub fn require_gateway_ref(&self) -> Result<&str> {
        self.gateway_ref
            .as_deref()
            .ok_or_else(|| self.missing(Field::GatewayRef))
    }

    /// Returns the reason, failing if absent.
    pub fn require_reason(&self) -> Result<&str> {
        self.reason
            .as_deref()
            .ok_or_else(|| self.missing(Field::Reason))
    }

    /// Checks that every field the kind requires is present.
    pub fn validate(&self) -> Result<()> {
        for field in self.kind.required_fields() {
            let present = match field {
                Field::Amount => self.amount.is_some(),
                Field::Currency => self.currency.as_deref().is_some_and(|c| !c.is_empty()),
                Field::Reason => self.reason.is_some(),
                Field::ReservationId => self.reservation_id.is_some(),
                Field::GatewayRef => self.gateway_ref.is_some(),
            };
            if !present {
                return Err(self.missing(*field));
            }
        }
        Ok(())
    }

    fn missing(&self, field: Field) -> EventError {
        EventError::MissingField {
            kind: self.kind.clone(),
            field,
        }
    }
}
