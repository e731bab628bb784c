use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::{
    FailedEvent, Payment, PaymentId, PaymentStatus, Reservation, ReservationId,
    ReservationStatus, ReservationTransition, Result, StoreError, UserId, Wallet, WalletDebit,
    WalletId,
    store::{FailedEventStore, PaymentStore, ReservationStore, WalletStore},
};

/// In-memory store for tests and local runs.
///
/// Every check-and-set runs under a single write lock, which gives the
/// same atomicity the PostgreSQL conditional updates provide.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    wallets: Arc<RwLock<HashMap<WalletId, Wallet>>>,
    reservations: Arc<RwLock<HashMap<ReservationId, Reservation>>>,
    payments: Arc<RwLock<HashMap<PaymentId, Payment>>>,
    failed_events: Arc<RwLock<Vec<FailedEvent>>>,
}

impl InMemoryStore {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored reservations.
    pub async fn reservation_count(&self) -> usize {
        self.reservations.read().await.len()
    }

    /// Returns the number of stored failed events.
    pub async fn failed_event_count(&self) -> usize {
        self.failed_events.read().await.len()
    }
}

#[async_trait]
impl WalletStore for InMemoryStore {
    async fn insert_wallet(&self, wallet: Wallet) -> Result<()> {
        let mut wallets = self.wallets.write().await;
        if wallets.contains_key(&wallet.id) {
            return Err(StoreError::Duplicate {
                entity: "wallet",
                id: wallet.id.to_string(),
            });
        }
        if wallets.values().any(|w| w.owner == wallet.owner) {
            return Err(StoreError::Duplicate {
                entity: "wallet owner",
                id: wallet.owner.to_string(),
            });
        }
        wallets.insert(wallet.id, wallet);
        Ok(())
    }

    async fn get_wallet(&self, id: WalletId) -> Result<Option<Wallet>> {
        Ok(self.wallets.read().await.get(&id).cloned())
    }

    async fn find_wallet_by_owner(&self, owner: &UserId) -> Result<Option<Wallet>> {
        let wallets = self.wallets.read().await;
        Ok(wallets.values().find(|w| &w.owner == owner).cloned())
    }

    async fn debit_wallet(&self, debit: WalletDebit) -> Result<Wallet> {
        let mut wallets = self.wallets.write().await;
        let wallet = wallets
            .get_mut(&debit.wallet_id)
            .ok_or_else(|| StoreError::NotFound {
                entity: "wallet",
                id: debit.wallet_id.to_string(),
            })?;

        if wallet.version != debit.expected_version {
            return Err(StoreError::ConcurrencyConflict {
                wallet_id: wallet.id,
                expected: debit.expected_version,
                actual: wallet.version,
            });
        }
        if wallet.balance < debit.amount {
            return Err(StoreError::InsufficientBalance {
                wallet_id: wallet.id,
                balance: wallet.balance,
                requested: debit.amount,
            });
        }

        wallet.balance -= debit.amount;
        wallet.version = wallet.version.next();
        wallet.updated_at = debit.at;
        Ok(wallet.clone())
    }
}

#[async_trait]
impl ReservationStore for InMemoryStore {
    async fn insert_reservation(&self, reservation: Reservation) -> Result<()> {
        let mut reservations = self.reservations.write().await;
        if reservations.contains_key(&reservation.id) {
            return Err(StoreError::Duplicate {
                entity: "reservation",
                id: reservation.id.to_string(),
            });
        }
        reservations.insert(reservation.id, reservation);
        Ok(())
    }

    async fn get_reservation(&self, id: ReservationId) -> Result<Option<Reservation>> {
        Ok(self.reservations.read().await.get(&id).cloned())
    }

    async fn reservations_for_payment(&self, payment_id: PaymentId) -> Result<Vec<Reservation>> {
        let reservations = self.reservations.read().await;
        let mut found: Vec<_> = reservations
            .values()
            .filter(|r| r.payment_id == payment_id)
            .cloned()
            .collect();
        found.sort_by_key(|r| r.created_at);
        Ok(found)
    }

    async fn expired_reservations(&self, now: DateTime<Utc>) -> Result<Vec<Reservation>> {
        let reservations = self.reservations.read().await;
        let mut expired: Vec<_> = reservations
            .values()
            .filter(|r| r.is_expired(now))
            .cloned()
            .collect();
        expired.sort_by_key(|r| r.expires_at);
        Ok(expired)
    }

    async fn stranded_releases(&self, reason: &str) -> Result<Vec<Reservation>> {
        let reservations = self.reservations.read().await;
        let payments = self.payments.read().await;
        let settling = |payment_id: PaymentId| {
            reservations.values().any(|r| {
                r.payment_id == payment_id
                    && matches!(
                        r.status,
                        ReservationStatus::Active | ReservationStatus::Confirmed
                    )
            })
        };

        let mut stranded: Vec<_> = reservations
            .values()
            .filter(|r| {
                r.status == ReservationStatus::Released
                    && r.release_reason.as_deref() == Some(reason)
            })
            .filter(|r| {
                payments
                    .get(&r.payment_id)
                    .is_some_and(|p| p.status == PaymentStatus::Pending)
            })
            .filter(|r| !settling(r.payment_id))
            .cloned()
            .collect();
        stranded.sort_by_key(|r| r.updated_at);
        Ok(stranded)
    }

    async fn transition_reservation(
        &self,
        transition: ReservationTransition,
    ) -> Result<Reservation> {
        let mut reservations = self.reservations.write().await;
        let reservation = reservations
            .get_mut(&transition.reservation_id)
            .ok_or_else(|| StoreError::NotFound {
                entity: "reservation",
                id: transition.reservation_id.to_string(),
            })?;

        if reservation.status != transition.from {
            return Err(StoreError::StatusConflict {
                entity: "reservation",
                id: reservation.id.to_string(),
                expected: transition.from.to_string(),
                actual: reservation.status.to_string(),
            });
        }

        reservation.status = transition.to;
        if transition.release_reason.is_some() {
            reservation.release_reason = transition.release_reason;
        }
        if transition.gateway_ref.is_some() {
            reservation.gateway_ref = transition.gateway_ref;
        }
        reservation.updated_at = transition.at;
        Ok(reservation.clone())
    }
}

#[async_trait]
impl PaymentStore for InMemoryStore {
    async fn insert_payment(&self, payment: Payment) -> Result<()> {
        let mut payments = self.payments.write().await;
        if payments.contains_key(&payment.id) {
            return Err(StoreError::Duplicate {
                entity: "payment",
                id: payment.id.to_string(),
            });
        }
        payments.insert(payment.id, payment);
        Ok(())
    }

    async fn get_payment(&self, id: PaymentId) -> Result<Option<Payment>> {
        Ok(self.payments.read().await.get(&id).cloned())
    }

    async fn transition_payment(
        &self,
        id: PaymentId,
        from: PaymentStatus,
        to: PaymentStatus,
        at: DateTime<Utc>,
    ) -> Result<Payment> {
        let mut payments = self.payments.write().await;
        let payment = payments.get_mut(&id).ok_or_else(|| StoreError::NotFound {
            entity: "payment",
            id: id.to_string(),
        })?;

        if payment.status != from {
            return Err(StoreError::StatusConflict {
                entity: "payment",
                id: id.to_string(),
                expected: from.to_string(),
                actual: payment.status.to_string(),
            });
        }

        payment.status = to;
        payment.updated_at = at;
        Ok(payment.clone())
    }
}

#[async_trait]
impl FailedEventStore for InMemoryStore {
    async fn insert_failed_event(&self, event: FailedEvent) -> Result<bool> {
        let mut failed = self.failed_events.write().await;
        if failed.iter().any(|e| e.message_id == event.message_id) {
            return Ok(false);
        }
        failed.push(event);
        Ok(true)
    }

    async fn get_failed_event(&self, message_id: &str) -> Result<Option<FailedEvent>> {
        let failed = self.failed_events.read().await;
        Ok(failed.iter().find(|e| e.message_id == message_id).cloned())
    }

    async fn list_failed_events(&self) -> Result<Vec<FailedEvent>> {
        Ok(self.failed_events.read().await.clone())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use rust_decimal_macros::dec;

    use super::*;
    use crate::{FailedEventStatus, Version};

    fn debit(wallet: &Wallet, amount: rust_decimal::Decimal, expected: Version) -> WalletDebit {
        WalletDebit {
            wallet_id: wallet.id,
            amount,
            expected_version: expected,
            at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn debit_applies_and_bumps_version() {
        let store = InMemoryStore::new();
        let wallet = Wallet::open("u1", dec!(500), "USD");
        store.insert_wallet(wallet.clone()).await.unwrap();

        let updated = store
            .debit_wallet(debit(&wallet, dec!(100), Version::initial()))
            .await
            .unwrap();

        assert_eq!(updated.balance, dec!(400));
        assert_eq!(updated.version, Version::new(1));
    }

    #[tokio::test]
    async fn stale_version_is_a_conflict() {
        let store = InMemoryStore::new();
        let wallet = Wallet::open("u1", dec!(500), "USD");
        store.insert_wallet(wallet.clone()).await.unwrap();
        store
            .debit_wallet(debit(&wallet, dec!(100), Version::initial()))
            .await
            .unwrap();

        let result = store
            .debit_wallet(debit(&wallet, dec!(100), Version::initial()))
            .await;

        assert!(matches!(
            result,
            Err(StoreError::ConcurrencyConflict { actual, .. }) if actual == Version::new(1)
        ));
        let stored = store.get_wallet(wallet.id).await.unwrap().unwrap();
        assert_eq!(stored.balance, dec!(400));
    }

    #[tokio::test]
    async fn debit_beyond_balance_leaves_wallet_untouched() {
        let store = InMemoryStore::new();
        let wallet = Wallet::open("u1", dec!(50), "USD");
        store.insert_wallet(wallet.clone()).await.unwrap();

        let result = store
            .debit_wallet(debit(&wallet, dec!(50.01), Version::initial()))
            .await;

        assert!(matches!(result, Err(StoreError::InsufficientBalance { .. })));
        let stored = store.get_wallet(wallet.id).await.unwrap().unwrap();
        assert_eq!(stored, wallet);
    }

    #[tokio::test]
    async fn one_wallet_per_owner() {
        let store = InMemoryStore::new();
        store
            .insert_wallet(Wallet::open("u1", dec!(1), "USD"))
            .await
            .unwrap();

        let result = store.insert_wallet(Wallet::open("u1", dec!(2), "USD")).await;
        assert!(matches!(result, Err(StoreError::Duplicate { .. })));
    }

    #[tokio::test]
    async fn transition_requires_expected_status() {
        let store = InMemoryStore::new();
        let reservation = Reservation::hold(
            PaymentId::new(),
            UserId::new("u1"),
            dec!(10),
            "USD",
            Duration::minutes(15),
            Utc::now(),
        );
        store.insert_reservation(reservation.clone()).await.unwrap();

        let released = store
            .transition_reservation(ReservationTransition::release(reservation.id, "declined"))
            .await
            .unwrap();
        assert_eq!(released.status, ReservationStatus::Released);
        assert_eq!(released.release_reason.as_deref(), Some("declined"));

        let again = store
            .transition_reservation(ReservationTransition::confirm(reservation.id, "GW-1"))
            .await;
        assert!(matches!(again, Err(StoreError::StatusConflict { .. })));
    }

    #[tokio::test]
    async fn expired_reservations_only_lists_active_past_expiry() {
        let store = InMemoryStore::new();
        let past = Utc::now() - Duration::minutes(30);
        let expired = Reservation::hold(
            PaymentId::new(),
            UserId::new("u1"),
            dec!(10),
            "USD",
            Duration::minutes(15),
            past,
        );
        let fresh = Reservation::hold(
            PaymentId::new(),
            UserId::new("u1"),
            dec!(10),
            "USD",
            Duration::minutes(15),
            Utc::now(),
        );
        store.insert_reservation(expired.clone()).await.unwrap();
        store.insert_reservation(fresh).await.unwrap();

        let found = store.expired_reservations(Utc::now()).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, expired.id);
    }

    fn pending_payment(id: PaymentId) -> Payment {
        let now = Utc::now();
        Payment {
            id,
            owner: UserId::new("u1"),
            service_id: "svc".to_string(),
            amount: dec!(10),
            currency: "USD".to_string(),
            description: String::new(),
            status: PaymentStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn stranded_releases_skip_settled_payments() {
        let store = InMemoryStore::new();
        let stranded_payment = PaymentId::new();
        let finished_payment = PaymentId::new();
        let retried_payment = PaymentId::new();
        for id in [stranded_payment, finished_payment, retried_payment] {
            store.insert_payment(pending_payment(id)).await.unwrap();
        }
        store
            .transition_payment(
                finished_payment,
                PaymentStatus::Pending,
                PaymentStatus::Failed,
                Utc::now(),
            )
            .await
            .unwrap();

        let mut expired = Vec::new();
        for payment_id in [stranded_payment, finished_payment, retried_payment] {
            let hold = Reservation::hold(
                payment_id,
                UserId::new("u1"),
                dec!(10),
                "USD",
                Duration::minutes(15),
                Utc::now(),
            );
            store.insert_reservation(hold.clone()).await.unwrap();
            store
                .transition_reservation(ReservationTransition::release(hold.id, "expired"))
                .await
                .unwrap();
            expired.push(hold);
        }
        let second_hold = Reservation::hold(
            retried_payment,
            UserId::new("u1"),
            dec!(10),
            "USD",
            Duration::minutes(15),
            Utc::now(),
        );
        store.insert_reservation(second_hold).await.unwrap();

        let found = store.stranded_releases("expired").await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, expired[0].id);
        assert!(store.stranded_releases("declined").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn duplicate_failed_event_is_ignored() {
        let store = InMemoryStore::new();
        let event = FailedEvent {
            message_id: "m-1".to_string(),
            original_event: "{}".to_string(),
            event_kind: "unknown".to_string(),
            payment_id: None,
            error_message: "boom".to_string(),
            source: "dlq".to_string(),
            retry_count: 1,
            status: FailedEventStatus::Failed,
            created_at: Utc::now(),
        };

        assert!(store.insert_failed_event(event.clone()).await.unwrap());
        assert!(!store.insert_failed_event(event).await.unwrap());
        assert_eq!(store.failed_event_count().await, 1);
    }
}
