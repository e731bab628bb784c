//! Wallet ledger: balances guarded by optimistic concurrency.

use chrono::Utc;
use common::{UserId, WalletId};
use rust_decimal::Decimal;
use store::{AMOUNT_SCALE, Version, Wallet, WalletDebit, WalletStore};

use crate::error::{LedgerError, Result};

/// Rejects amounts with more decimal places than the store keeps.
pub(crate) fn ensure_storable(amount: Decimal) -> Result<()> {
    if amount.normalize().scale() > AMOUNT_SCALE {
        return Err(LedgerError::Validation(format!(
            "amount {amount} has more than {AMOUNT_SCALE} decimal places"
        )));
    }
    Ok(())
}

/// Reads wallets and applies version-checked debits.
///
/// The store's compare-and-swap is the only thing protecting a balance
/// from concurrent debits; the ledger takes no locks of its own.
#[derive(Clone)]
pub struct WalletLedger<S: WalletStore> {
    store: S,
}

impl<S: WalletStore> WalletLedger<S> {
    /// Creates a new wallet ledger over the given store.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Opens a wallet for `owner` with an initial balance.
    #[tracing::instrument(skip(self))]
    pub async fn open(
        &self,
        owner: UserId,
        balance: Decimal,
        currency: &str,
    ) -> Result<Wallet> {
        if owner.is_empty() {
            return Err(LedgerError::Validation("owner is required".to_string()));
        }
        if balance.is_sign_negative() {
            return Err(LedgerError::Validation(
                "opening balance cannot be negative".to_string(),
            ));
        }
        ensure_storable(balance)?;
        if currency.trim().is_empty() {
            return Err(LedgerError::Validation("currency is required".to_string()));
        }

        let wallet = Wallet::open(owner, balance, currency);
        self.store.insert_wallet(wallet.clone()).await?;
        tracing::info!(wallet_id = %wallet.id, owner = %wallet.owner, "wallet opened");
        Ok(wallet)
    }

    /// Returns the wallet belonging to `owner`.
    #[tracing::instrument(skip(self))]
    pub async fn find_by_owner(&self, owner: &UserId) -> Result<Wallet> {
        self.store
            .find_wallet_by_owner(owner)
            .await?
            .ok_or_else(|| LedgerError::WalletNotFound(owner.clone()))
    }

    /// Debits `amount` from a wallet, provided it is still at
    /// `expected_version` and its balance covers the amount.
    ///
    /// A stale version fails with `ConcurrencyConflict` and nothing is
    /// written; the caller should re-read the wallet before trying again.
    #[tracing::instrument(skip(self))]
    pub async fn debit(
        &self,
        wallet_id: WalletId,
        amount: Decimal,
        expected_version: Version,
    ) -> Result<Wallet> {
        if amount <= Decimal::ZERO {
            return Err(LedgerError::Validation(format!(
                "debit amount must be positive, got {amount}"
            )));
        }
        ensure_storable(amount)?;

        let result = self
            .store
            .debit_wallet(WalletDebit {
                wallet_id,
                amount,
                expected_version,
                at: Utc::now(),
            })
            .await
            .map_err(LedgerError::from);

        let outcome = match &result {
            Ok(_) => "applied",
            Err(LedgerError::ConcurrencyConflict { .. }) => "conflict",
            Err(LedgerError::InsufficientFunds { .. }) => "insufficient_funds",
            Err(_) => "error",
        };
        metrics::counter!("ledger_debits_total", "outcome" => outcome).increment(1);

        match &result {
            Ok(wallet) => tracing::info!(
                %wallet_id,
                %amount,
                balance = %wallet.balance,
                version = %wallet.version,
                "wallet debited"
            ),
            Err(e) => tracing::warn!(%wallet_id, %amount, error = %e, "wallet debit refused"),
        }
        result
    }

    /// Debits the wallet of `owner`, re-reading and retrying up to
    /// `max_attempts` times when another writer wins the race.
    ///
    /// Insufficient funds is never retried.
    #[tracing::instrument(skip(self))]
    pub async fn debit_owner(
        &self,
        owner: &UserId,
        amount: Decimal,
        max_attempts: u32,
    ) -> Result<Wallet> {
        let mut attempt = 1;
        loop {
            let wallet = self.find_by_owner(owner).await?;
            match self.debit(wallet.id, amount, wallet.version).await {
                Err(LedgerError::ConcurrencyConflict { .. }) if attempt < max_attempts => {
                    attempt += 1;
                    tracing::debug!(%owner, attempt, "retrying debit after conflict");
                }
                other => return other,
            }
        }
    }
}
