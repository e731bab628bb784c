//! Release of reservations whose hold window has passed.

use chrono::{DateTime, Utc};
use events::{Event, EventKind};
use ledger::ReservationManager;
use store::{Reservation, ReservationStore, WalletStore};

use crate::config::QueueNames;
use crate::error::Result;
use crate::handlers::emit;
use crate::services::Publisher;

/// Counts from one [`ExpirySweeper::sweep`].
#[derive(Debug, Default)]
pub struct SweepReport {
    /// Holds this sweep released.
    pub released: Vec<Reservation>,
    /// `wallet.funds_released` events published. Includes holds released by
    /// an earlier sweep whose announcement did not get out.
    pub announced: usize,
    /// Holds that could not be released or announced. They are picked up
    /// again by the next sweep.
    pub failed: usize,
}

/// Releases expired active reservations and announces each release.
pub struct ExpirySweeper<S, P>
where
    S: WalletStore + ReservationStore + Clone,
    P: Publisher,
{
    reservations: ReservationManager<S>,
    publisher: P,
    queues: QueueNames,
}

impl<S, P> ExpirySweeper<S, P>
where
    S: WalletStore + ReservationStore + Clone,
    P: Publisher,
{
    pub fn new(reservations: ReservationManager<S>, publisher: P, queues: QueueNames) -> Self {
        Self {
            reservations,
            publisher,
            queues,
        }
    }

    /// Releases every active reservation that expired at or before `now`,
    /// then publishes `wallet.funds_released` for every expired hold whose
    /// payment is still pending.
    ///
    /// The release is committed before the announcement, so a hold whose
    /// event failed to publish stays visible to the next sweep until its
    /// payment is finalized.
    #[tracing::instrument(skip(self))]
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let expiry = self.reservations.release_expired(now).await?;
        let mut report = SweepReport {
            released: expiry.released,
            announced: 0,
            failed: expiry.failures.len(),
        };

        for reservation in self.reservations.stranded_expiries().await? {
            let reason = reservation
                .release_reason
                .as_deref()
                .unwrap_or(ledger::EXPIRED_REASON);
            let event = Event::new(
                EventKind::FundsReleased,
                reservation.payment_id,
                reservation.owner.clone(),
            )
            .with_amount(reservation.amount, reservation.currency.clone())
            .with_reservation(reservation.id)
            .with_reason(reason);

            match emit(&self.publisher, &self.queues, &event).await {
                Ok(()) => report.announced += 1,
                Err(e) => {
                    tracing::error!(reservation_id = %reservation.id, error = %e, "failed to announce expired reservation");
                    report.failed += 1;
                }
            }
        }

        if report.announced > 0 || report.failed > 0 {
            tracing::info!(
                released = report.released.len(),
                announced = report.announced,
                failed = report.failed,
                "expiry sweep finished"
            );
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use common::UserId;
    use ledger::{NewPayment, PaymentRegistry, ReserveOutcome};
    use rust_decimal_macros::dec;
    use store::{InMemoryStore, ReservationStatus};

    use super::*;
    use crate::services::InMemoryQueue;

    struct Fixture {
        store: InMemoryStore,
        manager: ReservationManager<InMemoryStore>,
        queue: InMemoryQueue,
        queues: QueueNames,
        sweeper: ExpirySweeper<InMemoryStore, InMemoryQueue>,
    }

    fn fixture() -> Fixture {
        let store = InMemoryStore::new();
        let queue = InMemoryQueue::new(3, "dlq");
        let queues = QueueNames::default();
        let manager = ReservationManager::new(store.clone(), Duration::minutes(15));
        let sweeper = ExpirySweeper::new(manager.clone(), queue.clone(), queues.clone());
        Fixture {
            store,
            manager,
            queue,
            queues,
            sweeper,
        }
    }

    async fn pending_hold(f: &Fixture) -> Reservation {
        let owner = UserId::new("alice");
        f.manager
            .wallets()
            .open(owner.clone(), dec!(500), "USD")
            .await
            .unwrap();
        let payment = PaymentRegistry::new(f.store.clone())
            .create(NewPayment {
                owner: owner.clone(),
                service_id: "svc".to_string(),
                amount: dec!(100),
                currency: "USD".to_string(),
                description: String::new(),
            })
            .await
            .unwrap();
        let ReserveOutcome::Reserved(reservation) = f
            .manager
            .reserve(payment.id, &owner, dec!(100), "USD")
            .await
            .unwrap()
        else {
            panic!("expected a reservation");
        };
        reservation
    }

    #[tokio::test]
    async fn test_sweep_releases_and_announces() {
        let f = fixture();
        let reservation = pending_hold(&f).await;

        let early = f.sweeper.sweep(Utc::now()).await.unwrap();
        assert!(early.released.is_empty());
        assert_eq!(early.announced, 0);

        let report = f
            .sweeper
            .sweep(reservation.expires_at + Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(report.released.len(), 1);
        assert_eq!(report.announced, 1);
        assert_eq!(
            f.manager.get(reservation.id).await.unwrap().status,
            ReservationStatus::Released
        );

        let messages = f.queue.peek(&f.queues.payments).await;
        assert_eq!(messages.len(), 1);
        let event = Event::from_json(&messages[0].body).unwrap();
        assert_eq!(event.kind, EventKind::FundsReleased);
        assert_eq!(event.reason.as_deref(), Some("expired"));
    }

    #[tokio::test]
    async fn test_unannounced_release_is_announced_by_next_sweep() {
        let f = fixture();
        let reservation = pending_hold(&f).await;
        let later = reservation.expires_at + Duration::seconds(1);

        f.queue.set_fail_on_publish(true).await;
        let first = f.sweeper.sweep(later).await.unwrap();
        assert_eq!(first.released.len(), 1);
        assert_eq!(first.announced, 0);
        assert_eq!(first.failed, 1);
        assert_eq!(f.queue.depth(&f.queues.payments).await, 0);

        f.queue.set_fail_on_publish(false).await;
        let second = f.sweeper.sweep(later).await.unwrap();
        assert!(second.released.is_empty());
        assert_eq!(second.announced, 1);

        let messages = f.queue.peek(&f.queues.payments).await;
        assert_eq!(messages.len(), 1);
        let event = Event::from_json(&messages[0].body).unwrap();
        assert_eq!(event.reservation_id, Some(reservation.id));
    }
}
