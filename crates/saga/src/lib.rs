//! Choreographed payment saga.
//!
//! A payment moves through independent steps that communicate only by
//! publishing events:
//!
//! 1. Intake records the payment and emits `payment.initiated`
//! 2. Reserve places a hold on the owner's wallet
//! 3. Authorize asks the payment gateway
//! 4. Settle confirms the hold (debiting the wallet) or releases it
//! 5. Finalize marks the payment completed or failed
//!
//! Messages a step keeps failing on end up in a dead-letter queue, where
//! the [`RecoveryHandler`] either re-drives them or records them as
//! [`store::FailedEvent`]s.

pub mod config;
pub mod consumer;
pub mod delivery;
pub mod error;
pub mod handlers;
pub mod recovery;
pub mod runtime;
pub mod services;
pub mod sweeper;

pub use config::{GatewaySettings, QueueNames, RetryPolicy, SagaConfig};
pub use consumer::Consumer;
pub use delivery::{BatchFailure, BatchReport, Delivery};
pub use error::{Result, SagaError};
pub use handlers::{
    AuthorizeHandler, EventHandler, FinalizeHandler, PaymentIntake, ReserveFundsHandler,
    SettlementHandler,
};
pub use recovery::{Classification, FailureClassifier, RecoveryHandler, RecoveryOutcome};
pub use runtime::{PumpStats, SagaRuntime};
pub use services::{
    GatewayResponse, InMemoryGateway, InMemoryQueue, PaymentGateway, Publisher, SimulatedGateway,
};
pub use sweeper::{ExpirySweeper, SweepReport};
