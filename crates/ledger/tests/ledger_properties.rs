//! Property tests for wallet balance invariants.

use common::{PaymentId, UserId};
use ledger::{LedgerError, ReservationManager, ReserveOutcome, WalletLedger};
use proptest::prelude::*;
use rust_decimal::Decimal;
use store::{InMemoryStore, Version};

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

proptest! {
    // Sequential debits match a simple model: applied iff covered, never negative.
    #[test]
    fn sequential_debits_follow_model(
        opening in 0i64..5_000,
        amounts in prop::collection::vec(1i64..800, 1..40),
    ) {
        runtime().block_on(async {
            let ledger = WalletLedger::new(InMemoryStore::new());
            let owner = UserId::new("alice");
            ledger.open(owner.clone(), Decimal::new(opening, 2), "USD").await.unwrap();

            let mut expected_balance = Decimal::new(opening, 2);
            let mut expected_version = Version::initial();

            for cents in amounts {
                let amount = Decimal::new(cents, 2);
                let wallet = ledger.find_by_owner(&owner).await.unwrap();
                let result = ledger.debit(wallet.id, amount, wallet.version).await;

                if amount <= expected_balance {
                    prop_assert!(result.is_ok());
                    expected_balance -= amount;
                    expected_version = expected_version.next();
                } else {
                    let insufficient = matches!(result, Err(LedgerError::InsufficientFunds { .. }));
                    prop_assert!(insufficient);
                }

                let wallet = ledger.find_by_owner(&owner).await.unwrap();
                prop_assert!(wallet.balance >= Decimal::ZERO);
                prop_assert_eq!(wallet.balance, expected_balance);
                prop_assert_eq!(wallet.version, expected_version);
            }
            Ok(())
        })?;
    }

    // A debit computed against an older version never applies.
    #[test]
    fn stale_version_never_applies(opening in 1_000i64..10_000, first in 1i64..500, second in 1i64..500) {
        runtime().block_on(async {
            let ledger = WalletLedger::new(InMemoryStore::new());
            let owner = UserId::new("alice");
            let stale = ledger.open(owner.clone(), Decimal::from(opening), "USD").await.unwrap();

            ledger.debit(stale.id, Decimal::from(first), stale.version).await.unwrap();
            let result = ledger.debit(stale.id, Decimal::from(second), stale.version).await;

            let conflict = matches!(result, Err(LedgerError::ConcurrencyConflict { .. }));
            prop_assert!(conflict);
            let wallet = ledger.find_by_owner(&owner).await.unwrap();
            prop_assert_eq!(wallet.balance, Decimal::from(opening - first));
            Ok(())
        })?;
    }

    // Reserving never changes the wallet, whatever the outcome.
    #[test]
    fn reserve_never_mutates_wallet(balance in 0i64..1_000, amount in 1i64..1_500) {
        runtime().block_on(async {
            let store = InMemoryStore::new();
            let manager = ReservationManager::new(store, chrono::Duration::minutes(15));
            let owner = UserId::new("alice");
            let opened = manager
                .wallets()
                .open(owner.clone(), Decimal::from(balance), "USD")
                .await
                .unwrap();

            let outcome = manager
                .reserve(PaymentId::new(), &owner, Decimal::from(amount), "USD")
                .await
                .unwrap();

            prop_assert_eq!(matches!(outcome, ReserveOutcome::Reserved(_)), amount <= balance);
            let wallet = manager.wallets().find_by_owner(&owner).await.unwrap();
            prop_assert_eq!(wallet.balance, opened.balance);
            prop_assert_eq!(wallet.version, opened.version);
            Ok(())
        })?;
    }
}
