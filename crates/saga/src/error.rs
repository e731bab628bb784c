//! Saga error types.

use common::PaymentId;
use events::EventError;
use ledger::{LedgerError, RejectReason};
use store::StoreError;
use thiserror::Error;

/// Errors that can occur while running saga steps.
#[derive(Debug, Error)]
pub enum SagaError {
    /// Ledger error.
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// Store error.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// The message could not be decoded or lacks a required field.
    #[error("Event error: {0}")]
    Event(#[from] EventError),

    /// Funds could not be reserved for a payment.
    #[error("reservation rejected for payment {payment_id}: {reason}")]
    ReservationRejected {
        payment_id: PaymentId,
        reason: RejectReason,
    },

    /// The message queue refused the event.
    #[error("failed to publish to {destination}: {reason}")]
    Publish { destination: String, reason: String },

    /// The payment gateway could not be reached.
    #[error("gateway error: {0}")]
    Gateway(String),
}

impl SagaError {
    /// Returns true for infrastructure failures that redelivery may cure.
    pub fn is_transient(&self) -> bool {
        match self {
            SagaError::Ledger(e) => e.is_transient(),
            SagaError::Store(e) => e.is_transient(),
            SagaError::Publish { .. } | SagaError::Gateway(_) => true,
            SagaError::Event(_) | SagaError::ReservationRejected { .. } => false,
        }
    }
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;
