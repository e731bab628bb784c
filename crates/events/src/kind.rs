use serde::{Deserialize, Serialize};

use crate::Field;

/// The kind of an event on the saga bus.
///
/// The nine known kinds form a fixed catalog. Any other kind text is kept
/// verbatim in [`EventKind::Other`] so that handlers can log and drop it
/// instead of failing to decode the message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventKind {
    PaymentInitiated,
    PaymentCompleted,
    PaymentFailed,
    FundsReserved,
    ReservationFailed,
    FundsDeducted,
    FundsReleased,
    GatewayApproved,
    GatewayRejected,
    Other(String),
}

impl EventKind {
    /// Every kind in the catalog, in saga order.
    pub const CATALOG: [EventKind; 9] = [
        EventKind::PaymentInitiated,
        EventKind::FundsReserved,
        EventKind::ReservationFailed,
        EventKind::GatewayApproved,
        EventKind::GatewayRejected,
        EventKind::FundsDeducted,
        EventKind::FundsReleased,
        EventKind::PaymentCompleted,
        EventKind::PaymentFailed,
    ];

    /// Parses kind text. Never fails: unrecognised text becomes `Other`.
    pub fn parse(s: &str) -> Self {
        match s {
            "payment.initiated" => EventKind::PaymentInitiated,
            "payment.completed" => EventKind::PaymentCompleted,
            "payment.failed" => EventKind::PaymentFailed,
            "wallet.funds_reserved" => EventKind::FundsReserved,
            "wallet.reservation_failed" => EventKind::ReservationFailed,
            "wallet.funds_deducted" => EventKind::FundsDeducted,
            "wallet.funds_released" => EventKind::FundsReleased,
            "gateway.payment_approved" => EventKind::GatewayApproved,
            "gateway.payment_rejected" => EventKind::GatewayRejected,
            other => EventKind::Other(other.to_string()),
        }
    }

    /// Returns the wire name of this kind.
    pub fn as_str(&self) -> &str {
        match self {
            EventKind::PaymentInitiated => "payment.initiated",
            EventKind::PaymentCompleted => "payment.completed",
            EventKind::PaymentFailed => "payment.failed",
            EventKind::FundsReserved => "wallet.funds_reserved",
            EventKind::ReservationFailed => "wallet.reservation_failed",
            EventKind::FundsDeducted => "wallet.funds_deducted",
            EventKind::FundsReleased => "wallet.funds_released",
            EventKind::GatewayApproved => "gateway.payment_approved",
            EventKind::GatewayRejected => "gateway.payment_rejected",
            EventKind::Other(s) => s,
        }
    }

    /// Returns true if the kind belongs to the catalog.
    pub fn is_known(&self) -> bool {
        !matches!(self, EventKind::Other(_))
    }

    /// Payload fields an event of this kind must carry, beyond the
    /// envelope's payment and user IDs.
    pub fn required_fields(&self) -> &'static [Field] {
        match self {
            EventKind::PaymentInitiated => &[Field::Amount, Field::Currency],
            EventKind::FundsReserved => &[Field::Amount, Field::Currency, Field::ReservationId],
            EventKind::ReservationFailed => &[Field::Reason],
            EventKind::GatewayApproved => &[Field::ReservationId, Field::GatewayRef],
            EventKind::GatewayRejected => &[Field::ReservationId, Field::Reason],
            EventKind::FundsDeducted => &[Field::Amount, Field::Currency, Field::ReservationId],
            EventKind::FundsReleased => &[Field::ReservationId, Field::Reason],
            EventKind::PaymentCompleted => &[Field::Amount, Field::Currency],
            EventKind::PaymentFailed => &[Field::Reason],
            EventKind::Other(_) => &[],
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<String> for EventKind {
    fn from(s: String) -> Self {
        EventKind::parse(&s)
    }
}

impl From<&str> for EventKind {
    fn from(s: &str) -> Self {
        EventKind::parse(s)
    }
}

impl From<EventKind> for String {
    fn from(kind: EventKind) -> Self {
        kind.as_str().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_names_parse_back_to_the_same_kind() {
        for kind in EventKind::CATALOG {
            assert!(kind.is_known());
            assert_eq!(EventKind::parse(kind.as_str()), kind);
        }
    }

    #[test]
    fn unknown_kind_is_preserved() {
        let kind = EventKind::parse("wallet.topped_up");
        assert_eq!(kind, EventKind::Other("wallet.topped_up".to_string()));
        assert!(!kind.is_known());
        assert_eq!(kind.as_str(), "wallet.topped_up");
        assert!(kind.required_fields().is_empty());
    }

    #[test]
    fn kind_serializes_as_wire_name() {
        let json = serde_json::to_string(&EventKind::GatewayRejected).unwrap();
        assert_eq!(json, "\"gateway.payment_rejected\"");
    }

    #[test]
    fn funds_reserved_requires_reservation() {
        assert!(
            EventKind::FundsReserved
                .required_fields()
                .contains(&Field::ReservationId)
        );
    }
}
