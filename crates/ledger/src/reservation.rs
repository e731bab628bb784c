//! Reservation manager: the funds-hold lifecycle.

use chrono::{DateTime, Duration, Utc};
use common::{PaymentId, ReservationId, UserId};
use rust_decimal::Decimal;
use store::{
    Reservation, ReservationStatus, ReservationStore, ReservationTransition, StoreError,
    WalletStore,
};

use crate::error::{LedgerError, Result};
use crate::wallet::{WalletLedger, ensure_storable};

/// Reason recorded on holds released by the expiry sweep.
pub const EXPIRED_REASON: &str = "expired";

/// Why a reservation was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    WalletNotFound,
    InsufficientFunds,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::WalletNotFound => "wallet not found",
            RejectReason::InsufficientFunds => "insufficient funds",
        }
    }
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Result of a reserve call.
#[derive(Debug, Clone, PartialEq)]
pub enum ReserveOutcome {
    /// An active hold was created.
    Reserved(Reservation),
    /// The hold was refused; nothing was written.
    Rejected(RejectReason),
}

/// Result of a confirm or release call.
#[derive(Debug, Clone, PartialEq)]
pub struct Settlement {
    /// The reservation in its terminal status.
    pub reservation: Reservation,
    /// True if the reservation was already in the requested status and
    /// the call changed nothing.
    pub already_settled: bool,
}

/// Outcome of one expiry pass.
#[derive(Debug, Default)]
pub struct ExpiryReport {
    /// Reservations this pass moved to `released`.
    pub released: Vec<Reservation>,
    /// Expired holds that could not be released, with the reason.
    pub failures: Vec<(ReservationId, LedgerError)>,
}

/// Creates, confirms and releases funds reservations.
#[derive(Clone)]
pub struct ReservationManager<S>
where
    S: WalletStore + ReservationStore + Clone,
{
    store: S,
    wallets: WalletLedger<S>,
    hold: Duration,
}

impl<S> ReservationManager<S>
where
    S: WalletStore + ReservationStore + Clone,
{
    /// Creates a manager whose holds last `hold` before they expire.
    pub fn new(store: S, hold: Duration) -> Self {
        Self {
            wallets: WalletLedger::new(store.clone()),
            store,
            hold,
        }
    }

    /// Returns the wallet ledger used for confirmations.
    pub fn wallets(&self) -> &WalletLedger<S> {
        &self.wallets
    }

    /// Loads a reservation.
    pub async fn get(&self, id: ReservationId) -> Result<Reservation> {
        self.store
            .get_reservation(id)
            .await?
            .ok_or(LedgerError::ReservationNotFound(id))
    }

    /// Places a hold of `amount` on the owner's wallet for a payment.
    ///
    /// The balance check is logical only: the wallet is neither debited
    /// nor versioned, so concurrent holds from other payments are not
    /// counted against it.
    #[tracing::instrument(skip(self))]
    pub async fn reserve(
        &self,
        payment_id: PaymentId,
        owner: &UserId,
        amount: Decimal,
        currency: &str,
    ) -> Result<ReserveOutcome> {
        if amount <= Decimal::ZERO {
            return Err(LedgerError::Validation(format!(
                "reservation amount must be positive, got {amount}"
            )));
        }
        ensure_storable(amount)?;

        let wallet = match self.wallets.find_by_owner(owner).await {
            Ok(wallet) => wallet,
            Err(LedgerError::WalletNotFound(_)) => {
                return Ok(self.reject(RejectReason::WalletNotFound));
            }
            Err(e) => return Err(e),
        };

        if wallet.balance < amount {
            tracing::info!(balance = %wallet.balance, %amount, "balance does not cover hold");
            return Ok(self.reject(RejectReason::InsufficientFunds));
        }

        let reservation = Reservation::hold(
            payment_id,
            owner.clone(),
            amount,
            currency,
            self.hold,
            Utc::now(),
        );
        self.store.insert_reservation(reservation.clone()).await?;

        metrics::counter!("reservations_total", "outcome" => "reserved").increment(1);
        tracing::info!(reservation_id = %reservation.id, %amount, "funds reserved");
        Ok(ReserveOutcome::Reserved(reservation))
    }

    fn reject(&self, reason: RejectReason) -> ReserveOutcome {
        metrics::counter!("reservations_total", "outcome" => "rejected").increment(1);
        tracing::info!(%reason, "reservation rejected");
        ReserveOutcome::Rejected(reason)
    }

    /// Debits the wallet for an active reservation, then marks it confirmed.
    ///
    /// Confirming an already confirmed reservation is a no-op. If the debit
    /// fails the reservation stays active and the error is returned; the
    /// hold is not released automatically.
    #[tracing::instrument(skip(self))]
    pub async fn confirm(
        &self,
        reservation_id: ReservationId,
        gateway_ref: &str,
    ) -> Result<Settlement> {
        let reservation = self.get(reservation_id).await?;
        match reservation.status {
            ReservationStatus::Confirmed => {
                tracing::info!("reservation already confirmed");
                return Ok(Settlement {
                    reservation,
                    already_settled: true,
                });
            }
            ReservationStatus::Released => {
                return Err(invalid_transition(&reservation, "confirm"));
            }
            ReservationStatus::Active => {}
        }

        let wallet = self.wallets.find_by_owner(&reservation.owner).await?;
        self.wallets
            .debit(wallet.id, reservation.amount, wallet.version)
            .await?;

        match self
            .store
            .transition_reservation(ReservationTransition::confirm(reservation_id, gateway_ref))
            .await
        {
            Ok(confirmed) => {
                metrics::counter!("reservations_total", "outcome" => "confirmed").increment(1);
                tracing::info!(amount = %confirmed.amount, gateway_ref, "reservation confirmed");
                Ok(Settlement {
                    reservation: confirmed,
                    already_settled: false,
                })
            }
            Err(StoreError::StatusConflict { .. }) => {
                let current = self.get(reservation_id).await?;
                tracing::error!(
                    wallet_id = %wallet.id,
                    status = %current.status,
                    "wallet debited but reservation was settled concurrently"
                );
                Err(invalid_transition(&current, "confirm"))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Marks an active reservation released. The wallet is never touched.
    ///
    /// Releasing an already released reservation is a no-op; a confirmed
    /// one cannot be released.
    #[tracing::instrument(skip(self))]
    pub async fn release(&self, reservation_id: ReservationId, reason: &str) -> Result<Settlement> {
        let reservation = self.get(reservation_id).await?;
        match reservation.status {
            ReservationStatus::Released => {
                tracing::info!("reservation already released");
                return Ok(Settlement {
                    reservation,
                    already_settled: true,
                });
            }
            ReservationStatus::Confirmed => {
                return Err(invalid_transition(&reservation, "release"));
            }
            ReservationStatus::Active => {}
        }

        match self
            .store
            .transition_reservation(ReservationTransition::release(reservation_id, reason))
            .await
        {
            Ok(released) => {
                metrics::counter!("reservations_total", "outcome" => "released").increment(1);
                tracing::info!(reason, "reservation released");
                Ok(Settlement {
                    reservation: released,
                    already_settled: false,
                })
            }
            Err(StoreError::StatusConflict { .. }) => {
                let current = self.get(reservation_id).await?;
                if current.status == ReservationStatus::Released {
                    Ok(Settlement {
                        reservation: current,
                        already_settled: true,
                    })
                } else {
                    Err(invalid_transition(&current, "release"))
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Releases every active reservation whose hold expired at or before
    /// `now`, recording the reason "expired".
    ///
    /// Reservations settled by another step in the meantime are skipped.
    /// A failure on one reservation does not stop the others; it is kept in
    /// the report and the hold stays active for the next pass.
    #[tracing::instrument(skip(self))]
    pub async fn release_expired(&self, now: DateTime<Utc>) -> Result<ExpiryReport> {
        let expired = self.store.expired_reservations(now).await?;
        let mut report = ExpiryReport::default();

        for reservation in expired {
            match self.release(reservation.id, EXPIRED_REASON).await {
                Ok(settlement) if !settlement.already_settled => {
                    metrics::counter!("reservations_expired_total").increment(1);
                    report.released.push(settlement.reservation);
                }
                Ok(_) => {}
                Err(LedgerError::InvalidTransition { .. }) => {
                    tracing::debug!(reservation_id = %reservation.id, "expired hold settled concurrently");
                }
                Err(e) => {
                    tracing::error!(reservation_id = %reservation.id, error = %e, "failed to release expired hold");
                    report.failures.push((reservation.id, e));
                }
            }
        }

        if !report.released.is_empty() {
            tracing::info!(count = report.released.len(), "expired reservations released");
        }
        Ok(report)
    }

    /// Returns holds released on expiry whose payment is still waiting for
    /// the outcome.
    pub async fn stranded_expiries(&self) -> Result<Vec<Reservation>> {
        Ok(self.store.stranded_releases(EXPIRED_REASON).await?)
    }
}

fn invalid_transition(reservation: &Reservation, action: &'static str) -> LedgerError {
    LedgerError::InvalidTransition {
        entity: "reservation",
        id: reservation.id.to_string(),
        status: reservation.status.to_string(),
        action,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;

    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use store::{InMemoryStore, Wallet, WalletDebit};
    use tokio::sync::RwLock;

    use super::*;

    /// Delegates to an in-memory store but refuses to move chosen
    /// reservations.
    #[derive(Clone, Default)]
    struct StuckStore {
        inner: InMemoryStore,
        stuck: Arc<RwLock<HashSet<ReservationId>>>,
    }

    #[async_trait]
    impl WalletStore for StuckStore {
        async fn insert_wallet(&self, wallet: Wallet) -> store::Result<()> {
            self.inner.insert_wallet(wallet).await
        }

        async fn get_wallet(&self, id: common::WalletId) -> store::Result<Option<Wallet>> {
            self.inner.get_wallet(id).await
        }

        async fn find_wallet_by_owner(&self, owner: &UserId) -> store::Result<Option<Wallet>> {
            self.inner.find_wallet_by_owner(owner).await
        }

        async fn debit_wallet(&self, debit: WalletDebit) -> store::Result<Wallet> {
            self.inner.debit_wallet(debit).await
        }
    }

    #[async_trait]
    impl ReservationStore for StuckStore {
        async fn insert_reservation(&self, reservation: Reservation) -> store::Result<()> {
            self.inner.insert_reservation(reservation).await
        }

        async fn get_reservation(&self, id: ReservationId) -> store::Result<Option<Reservation>> {
            self.inner.get_reservation(id).await
        }

        async fn reservations_for_payment(
            &self,
            payment_id: PaymentId,
        ) -> store::Result<Vec<Reservation>> {
            self.inner.reservations_for_payment(payment_id).await
        }

        async fn expired_reservations(
            &self,
            now: DateTime<Utc>,
        ) -> store::Result<Vec<Reservation>> {
            self.inner.expired_reservations(now).await
        }

        async fn stranded_releases(&self, reason: &str) -> store::Result<Vec<Reservation>> {
            self.inner.stranded_releases(reason).await
        }

        async fn transition_reservation(
            &self,
            transition: ReservationTransition,
        ) -> store::Result<Reservation> {
            if self.stuck.read().await.contains(&transition.reservation_id) {
                return Err(StoreError::InvalidData("row locked".to_string()));
            }
            self.inner.transition_reservation(transition).await
        }
    }

    const HOLD_MINUTES: i64 = 15;

    async fn setup(balance: Decimal) -> (ReservationManager<InMemoryStore>, InMemoryStore) {
        let store = InMemoryStore::new();
        let manager = ReservationManager::new(store.clone(), Duration::minutes(HOLD_MINUTES));
        manager
            .wallets()
            .open(UserId::new("alice"), balance, "USD")
            .await
            .unwrap();
        (manager, store)
    }

    async fn reserve(manager: &ReservationManager<InMemoryStore>, amount: Decimal) -> Reservation {
        match manager
            .reserve(PaymentId::new(), &UserId::new("alice"), amount, "USD")
            .await
            .unwrap()
        {
            ReserveOutcome::Reserved(r) => r,
            ReserveOutcome::Rejected(reason) => panic!("unexpected rejection: {reason}"),
        }
    }

    async fn balance(manager: &ReservationManager<InMemoryStore>) -> Decimal {
        manager
            .wallets()
            .find_by_owner(&UserId::new("alice"))
            .await
            .unwrap()
            .balance
    }

    #[tokio::test]
    async fn test_reserve_leaves_wallet_untouched() {
        let (manager, _) = setup(dec!(500)).await;

        let reservation = reserve(&manager, dec!(100)).await;

        assert_eq!(reservation.status, ReservationStatus::Active);
        assert_eq!(
            reservation.expires_at - reservation.created_at,
            Duration::minutes(HOLD_MINUTES)
        );
        let wallet = manager
            .wallets()
            .find_by_owner(&UserId::new("alice"))
            .await
            .unwrap();
        assert_eq!(wallet.balance, dec!(500));
        assert_eq!(wallet.version.as_i64(), 0);
    }

    #[tokio::test]
    async fn test_reserve_rejects_insufficient_funds() {
        let (manager, store) = setup(dec!(50)).await;

        let outcome = manager
            .reserve(PaymentId::new(), &UserId::new("alice"), dec!(100), "USD")
            .await
            .unwrap();

        assert_eq!(outcome, ReserveOutcome::Rejected(RejectReason::InsufficientFunds));
        assert_eq!(RejectReason::InsufficientFunds.to_string(), "insufficient funds");
        assert_eq!(store.reservation_count().await, 0);
        assert_eq!(balance(&manager).await, dec!(50));
    }

    #[tokio::test]
    async fn test_reserve_boundary_exact_balance() {
        let (manager, _) = setup(dec!(100)).await;

        reserve(&manager, dec!(100)).await;
        let over = manager
            .reserve(PaymentId::new(), &UserId::new("alice"), dec!(100.01), "USD")
            .await
            .unwrap();

        assert_eq!(over, ReserveOutcome::Rejected(RejectReason::InsufficientFunds));
    }

    #[tokio::test]
    async fn test_reserve_without_wallet() {
        let (manager, _) = setup(dec!(100)).await;

        let outcome = manager
            .reserve(PaymentId::new(), &UserId::new("bob"), dec!(1), "USD")
            .await
            .unwrap();

        assert_eq!(outcome, ReserveOutcome::Rejected(RejectReason::WalletNotFound));
    }

    #[tokio::test]
    async fn test_confirm_debits_wallet() {
        let (manager, _) = setup(dec!(500)).await;
        let reservation = reserve(&manager, dec!(100)).await;

        let settlement = manager.confirm(reservation.id, "GW-1a2b3c4d").await.unwrap();

        assert!(!settlement.already_settled);
        assert_eq!(settlement.reservation.status, ReservationStatus::Confirmed);
        assert_eq!(
            settlement.reservation.gateway_ref.as_deref(),
            Some("GW-1a2b3c4d")
        );
        let wallet = manager
            .wallets()
            .find_by_owner(&UserId::new("alice"))
            .await
            .unwrap();
        assert_eq!(wallet.balance, dec!(400));
        assert_eq!(wallet.version.as_i64(), 1);
    }

    #[tokio::test]
    async fn test_confirm_twice_debits_once() {
        let (manager, _) = setup(dec!(500)).await;
        let reservation = reserve(&manager, dec!(100)).await;

        manager.confirm(reservation.id, "GW-1").await.unwrap();
        let again = manager.confirm(reservation.id, "GW-1").await.unwrap();

        assert!(again.already_settled);
        assert_eq!(balance(&manager).await, dec!(400));
    }

    #[tokio::test]
    async fn test_confirm_failure_keeps_reservation_active() {
        let (manager, _) = setup(dec!(150)).await;
        let first = reserve(&manager, dec!(100)).await;
        let second = reserve(&manager, dec!(100)).await;
        manager.confirm(first.id, "GW-1").await.unwrap();

        let result = manager.confirm(second.id, "GW-2").await;

        assert!(matches!(result, Err(LedgerError::InsufficientFunds { .. })));
        let second = manager.get(second.id).await.unwrap();
        assert_eq!(second.status, ReservationStatus::Active);
        assert_eq!(balance(&manager).await, dec!(50));
    }

    #[tokio::test]
    async fn test_release_is_pure_status_change() {
        let (manager, _) = setup(dec!(500)).await;
        let reservation = reserve(&manager, dec!(100)).await;

        let settlement = manager
            .release(reservation.id, "declined by issuer")
            .await
            .unwrap();

        assert_eq!(settlement.reservation.status, ReservationStatus::Released);
        assert_eq!(
            settlement.reservation.release_reason.as_deref(),
            Some("declined by issuer")
        );
        assert_eq!(balance(&manager).await, dec!(500));
    }

    #[tokio::test]
    async fn test_release_twice_is_noop() {
        let (manager, _) = setup(dec!(500)).await;
        let reservation = reserve(&manager, dec!(100)).await;

        manager.release(reservation.id, "declined").await.unwrap();
        let again = manager.release(reservation.id, "declined").await.unwrap();

        assert!(again.already_settled);
        assert_eq!(again.reservation.release_reason.as_deref(), Some("declined"));
    }

    #[tokio::test]
    async fn test_terminal_reservations_do_not_cross_over() {
        let (manager, _) = setup(dec!(500)).await;
        let confirmed = reserve(&manager, dec!(100)).await;
        let released = reserve(&manager, dec!(100)).await;
        manager.confirm(confirmed.id, "GW-1").await.unwrap();
        manager.release(released.id, "declined").await.unwrap();

        let release_confirmed = manager.release(confirmed.id, "late").await;
        let confirm_released = manager.confirm(released.id, "GW-2").await;

        assert!(matches!(
            release_confirmed,
            Err(LedgerError::InvalidTransition { .. })
        ));
        assert!(matches!(
            confirm_released,
            Err(LedgerError::InvalidTransition { .. })
        ));
        assert_eq!(balance(&manager).await, dec!(400));
    }

    #[tokio::test]
    async fn test_unknown_reservation() {
        let (manager, _) = setup(dec!(500)).await;

        let result = manager.confirm(ReservationId::new(), "GW-1").await;
        assert!(matches!(result, Err(LedgerError::ReservationNotFound(_))));
    }

    #[tokio::test]
    async fn test_release_expired_only_touches_expired_active_holds() {
        let (manager, _) = setup(dec!(500)).await;
        let expiring = reserve(&manager, dec!(10)).await;
        let confirmed = reserve(&manager, dec!(10)).await;
        manager.confirm(confirmed.id, "GW-1").await.unwrap();

        let later = Utc::now() + Duration::minutes(HOLD_MINUTES + 1);
        let report = manager.release_expired(later).await.unwrap();

        assert_eq!(report.released.len(), 1);
        assert_eq!(report.released[0].id, expiring.id);
        assert_eq!(
            report.released[0].release_reason.as_deref(),
            Some(EXPIRED_REASON)
        );
        assert!(report.failures.is_empty());
        assert!(manager.release_expired(later).await.unwrap().released.is_empty());
    }

    #[tokio::test]
    async fn test_release_expired_keeps_going_past_a_failed_release() {
        let store = StuckStore::default();
        let manager = ReservationManager::new(store.clone(), Duration::minutes(HOLD_MINUTES));
        let owner = UserId::new("alice");
        manager.wallets().open(owner.clone(), dec!(500), "USD").await.unwrap();
        let mut holds = Vec::new();
        for _ in 0..2 {
            match manager
                .reserve(PaymentId::new(), &owner, dec!(10), "USD")
                .await
                .unwrap()
            {
                ReserveOutcome::Reserved(r) => holds.push(r),
                ReserveOutcome::Rejected(reason) => panic!("unexpected rejection: {reason}"),
            }
        }
        store.stuck.write().await.insert(holds[0].id);

        let later = Utc::now() + Duration::minutes(HOLD_MINUTES + 1);
        let report = manager.release_expired(later).await.unwrap();

        assert_eq!(report.released.len(), 1);
        assert_eq!(report.released[0].id, holds[1].id);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].0, holds[0].id);
        assert_eq!(
            manager.get(holds[0].id).await.unwrap().status,
            ReservationStatus::Active
        );

        store.stuck.write().await.clear();
        let retry = manager.release_expired(later).await.unwrap();
        assert_eq!(retry.released.len(), 1);
        assert_eq!(retry.released[0].id, holds[0].id);
    }
}
