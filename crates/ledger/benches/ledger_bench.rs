use chrono::Duration;
use common::{PaymentId, UserId};
use criterion::{Criterion, criterion_group, criterion_main};
use ledger::{ReservationManager, ReserveOutcome, WalletLedger};
use rust_decimal::Decimal;
use store::InMemoryStore;

fn bench_debit(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let ledger = WalletLedger::new(InMemoryStore::new());
    let owner = UserId::new("bench");
    rt.block_on(async {
        ledger
            .open(owner.clone(), Decimal::from(1_000_000_000), "USD")
            .await
            .unwrap();
    });

    c.bench_function("ledger/debit_owner", |b| {
        b.iter(|| {
            rt.block_on(async {
                ledger
                    .debit_owner(&owner, Decimal::new(1, 2), 3)
                    .await
                    .unwrap();
            });
        });
    });
}

fn bench_reserve_and_confirm(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let manager = ReservationManager::new(InMemoryStore::new(), Duration::minutes(15));
    let owner = UserId::new("bench");
    rt.block_on(async {
        manager
            .wallets()
            .open(owner.clone(), Decimal::from(1_000_000_000), "USD")
            .await
            .unwrap();
    });

    c.bench_function("ledger/reserve_and_confirm", |b| {
        b.iter(|| {
            rt.block_on(async {
                let outcome = manager
                    .reserve(PaymentId::new(), &owner, Decimal::from(1), "USD")
                    .await
                    .unwrap();
                if let ReserveOutcome::Reserved(reservation) = outcome {
                    manager.confirm(reservation.id, "GW-bench").await.unwrap();
                }
            });
        });
    });
}

criterion_group!(benches, bench_debit, bench_reserve_and_confirm);
criterion_main!(benches);
