//! Identifier types shared by every crate in the payment saga.

pub mod types;

pub use types::{EventId, PaymentId, ReservationId, UserId, WalletId};
