//! Ledger error types.

use common::{PaymentId, ReservationId, UserId, WalletId};
use rust_decimal::Decimal;
use store::{StoreError, Version};
use thiserror::Error;

/// Errors that can occur during ledger operations.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// The owner has no wallet.
    #[error("wallet not found for user {0}")]
    WalletNotFound(UserId),

    #[error("reservation not found: {0}")]
    ReservationNotFound(ReservationId),

    #[error("payment not found: {0}")]
    PaymentNotFound(PaymentId),

    /// The wallet changed since it was read. Re-read and retry.
    #[error(
        "concurrency conflict on wallet {wallet_id}: expected {expected}, found {actual}"
    )]
    ConcurrencyConflict {
        wallet_id: WalletId,
        expected: Version,
        actual: Version,
    },

    #[error("insufficient funds in wallet {wallet_id}: balance {balance}, requested {requested}")]
    InsufficientFunds {
        wallet_id: WalletId,
        balance: Decimal,
        requested: Decimal,
    },

    /// The record is in a status that does not allow the action.
    #[error("cannot {action} {entity} {id}: it is {status}")]
    InvalidTransition {
        entity: &'static str,
        id: String,
        status: String,
        action: &'static str,
    },

    /// The request was malformed.
    #[error("validation error: {0}")]
    Validation(String),

    #[error("store error: {0}")]
    Store(StoreError),
}

impl LedgerError {
    /// Returns true if repeating the operation against fresh state may
    /// succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            LedgerError::ConcurrencyConflict { .. } => true,
            LedgerError::Store(e) => e.is_transient(),
            _ => false,
        }
    }
}

impl From<StoreError> for LedgerError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::ConcurrencyConflict {
                wallet_id,
                expected,
                actual,
            } => LedgerError::ConcurrencyConflict {
                wallet_id,
                expected,
                actual,
            },
            StoreError::InsufficientBalance {
                wallet_id,
                balance,
                requested,
            } => LedgerError::InsufficientFunds {
                wallet_id,
                balance,
                requested,
            },
            other => LedgerError::Store(other),
        }
    }
}

/// Result type for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;
