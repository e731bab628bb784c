//! Durable state for the payment saga.
//!
//! Records for wallets, reservations, payments and failed events, the
//! repository traits the ledger works against, and two implementations:
//! an in-memory store for tests and local runs, and a PostgreSQL store.
//!
//! Every mutation that other steps may race on is a conditional update:
//! wallet debits are keyed on the version counter, and reservation and
//! payment transitions are keyed on the status the caller expects.

pub mod error;
pub mod memory;
pub mod postgres;
pub mod records;
pub mod store;
pub mod version;

pub use common::{PaymentId, ReservationId, UserId, WalletId};
pub use error::{Result, StoreError};
pub use memory::InMemoryStore;
pub use postgres::PostgresStore;
pub use records::{
    AMOUNT_SCALE, FailedEvent, FailedEventStatus, Payment, PaymentStatus, Reservation, ReservationStatus,
    ReservationTransition, Wallet, WalletDebit,
};
pub use store::{FailedEventStore, PaymentStore, ReservationStore, Store, WalletStore};
pub use version::Version;
