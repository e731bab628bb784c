use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    FailedEvent, Payment, PaymentId, PaymentStatus, Reservation, ReservationId,
    ReservationTransition, Result, UserId, Wallet, WalletDebit, WalletId,
};

/// Storage for wallets.
#[async_trait]
pub trait WalletStore: Send + Sync {
    /// Stores a new wallet. Fails with `Duplicate` if the ID or owner is taken.
    async fn insert_wallet(&self, wallet: Wallet) -> Result<()>;

    async fn get_wallet(&self, id: WalletId) -> Result<Option<Wallet>>;

    /// Looks up the wallet belonging to `owner`.
    async fn find_wallet_by_owner(&self, owner: &UserId) -> Result<Option<Wallet>>;

    /// Applies a debit as a single compare-and-swap.
    ///
    /// Fails with `ConcurrencyConflict` if the stored version differs from
    /// the expected one, and with `InsufficientBalance` if the balance does
    /// not cover the amount. On success the balance is reduced, the version
    /// incremented, and the updated wallet returned.
    async fn debit_wallet(&self, debit: WalletDebit) -> Result<Wallet>;
}

/// Storage for reservations.
#[async_trait]
pub trait ReservationStore: Send + Sync {
    async fn insert_reservation(&self, reservation: Reservation) -> Result<()>;

    async fn get_reservation(&self, id: ReservationId) -> Result<Option<Reservation>>;

    /// Returns every reservation created for a payment, oldest first.
    async fn reservations_for_payment(&self, payment_id: PaymentId) -> Result<Vec<Reservation>>;

    /// Returns active reservations whose expiry is at or before `now`.
    async fn expired_reservations(&self, now: DateTime<Utc>) -> Result<Vec<Reservation>>;

    /// Returns reservations released with `reason` whose payment is still
    /// pending and has no other active or confirmed reservation.
    async fn stranded_releases(&self, reason: &str) -> Result<Vec<Reservation>>;

    /// Moves a reservation from `transition.from` to `transition.to`.
    ///
    /// Fails with `StatusConflict` if the stored status is not `from`.
    async fn transition_reservation(&self, transition: ReservationTransition)
    -> Result<Reservation>;
}

/// Storage for payments.
#[async_trait]
pub trait PaymentStore: Send + Sync {
    async fn insert_payment(&self, payment: Payment) -> Result<()>;

    async fn get_payment(&self, id: PaymentId) -> Result<Option<Payment>>;

    /// Moves a payment from `from` to `to`, failing with `StatusConflict`
    /// if the stored status is not `from`.
    async fn transition_payment(
        &self,
        id: PaymentId,
        from: PaymentStatus,
        to: PaymentStatus,
        at: DateTime<Utc>,
    ) -> Result<Payment>;
}

/// Storage for failed events.
#[async_trait]
pub trait FailedEventStore: Send + Sync {
    /// Stores a failed event. Returns false if one with the same message ID
    /// already exists; the existing record is left untouched.
    async fn insert_failed_event(&self, event: FailedEvent) -> Result<bool>;

    async fn get_failed_event(&self, message_id: &str) -> Result<Option<FailedEvent>>;

    /// Returns all failed events, oldest first.
    async fn list_failed_events(&self) -> Result<Vec<FailedEvent>>;
}

/// Everything the saga persists.
pub trait Store: WalletStore + ReservationStore + PaymentStore + FailedEventStore {}

impl<T> Store for T where T: WalletStore + ReservationStore + PaymentStore + FailedEventStore {}
