use rust_decimal::Decimal;
use thiserror::Error;

use crate::{Version, WalletId};

/// Errors that can occur when reading or writing saga state.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The wallet's stored version did not match the expected version.
    #[error(
        "Concurrency conflict for wallet {wallet_id}: expected {expected}, found {actual}"
    )]
    ConcurrencyConflict {
        wallet_id: WalletId,
        expected: Version,
        actual: Version,
    },

    /// The wallet's balance is lower than the requested debit.
    #[error("Insufficient balance in wallet {wallet_id}: balance {balance}, requested {requested}")]
    InsufficientBalance {
        wallet_id: WalletId,
        balance: Decimal,
        requested: Decimal,
    },

    /// A conditional status transition found the record in another status.
    #[error("{entity} {id} is {actual}, expected {expected}")]
    StatusConflict {
        entity: &'static str,
        id: String,
        expected: String,
        actual: String,
    },

    /// The record does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// A record with the same key already exists.
    #[error("{entity} already exists: {id}")]
    Duplicate { entity: &'static str, id: String },

    /// A stored value could not be interpreted.
    #[error("Invalid stored data: {0}")]
    InvalidData(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl StoreError {
    /// Returns true for failures of the storage backend itself, which are
    /// worth redelivering.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Database(_))
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
