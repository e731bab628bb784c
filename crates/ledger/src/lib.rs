//! Funds bookkeeping for the payment saga.
//!
//! - [`WalletLedger`] owns wallet balances. Every debit is a compare-and-swap
//!   on the wallet's version counter, so two debits computed from the same
//!   balance can never both apply.
//! - [`ReservationManager`] owns the funds-hold lifecycle: a reservation is
//!   created `active` without touching the wallet, then either `confirmed`
//!   (the wallet is debited) or `released` (nothing is debited).
//! - [`PaymentRegistry`] owns payment records and their advisory status.

pub mod error;
pub mod payment;
pub mod reservation;
pub mod wallet;

pub use error::{LedgerError, Result};
pub use payment::{NewPayment, PaymentRegistry};
pub use reservation::{
    EXPIRED_REASON, ExpiryReport, RejectReason, ReservationManager, ReserveOutcome, Settlement,
};
pub use wallet::WalletLedger;
