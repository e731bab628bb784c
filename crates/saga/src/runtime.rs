//! In-process wiring of every saga step over an [`InMemoryQueue`].

use chrono::{DateTime, Utc};
use events::Event;
use ledger::ReservationManager;
use store::Store;

use crate::config::SagaConfig;
use crate::consumer::Consumer;
use crate::error::Result;
use crate::handlers::{
    AuthorizeHandler, FinalizeHandler, PaymentIntake, ReserveFundsHandler, SettlementHandler,
};
use crate::recovery::{FailureClassifier, RecoveryHandler};
use crate::services::{InMemoryQueue, PaymentGateway};
use crate::sweeper::{ExpirySweeper, SweepReport};

/// Counts from one [`SagaRuntime::pump`] pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PumpStats {
    /// Messages handed to step consumers.
    pub delivered: usize,
    /// Step deliveries that failed and were handed back to their queue.
    pub failed: usize,
    /// Dead-lettered messages taken by the recovery handler.
    pub recovered: usize,
}

impl PumpStats {
    /// Returns true if the pass found no work.
    pub fn is_idle(&self) -> bool {
        self.delivered == 0 && self.recovered == 0
    }
}

/// Runs the whole choreography in one process.
///
/// Each consumed queue has its own [`Consumer`]; the steps still only talk
/// to each other through published events.
pub struct SagaRuntime<S: Store + Clone + 'static> {
    config: SagaConfig,
    store: S,
    queue: InMemoryQueue,
    reservations: ReservationManager<S>,
    intake: PaymentIntake<S, InMemoryQueue>,
    consumers: Vec<(String, Consumer)>,
    recovery: RecoveryHandler<S, InMemoryQueue>,
    sweeper: ExpirySweeper<S, InMemoryQueue>,
}

impl<S: Store + Clone + 'static> SagaRuntime<S> {
    pub fn new<G: PaymentGateway + 'static>(config: SagaConfig, store: S, gateway: G) -> Self {
        let queue = InMemoryQueue::from_config(&config);
        let queues = config.queues.clone();
        let reservations = ReservationManager::new(store.clone(), config.hold_duration);

        let wallet_steps = Consumer::new("wallet")
            .with_handler(ReserveFundsHandler::new(
                reservations.clone(),
                queue.clone(),
                queues.clone(),
            ))
            .with_handler(SettlementHandler::new(
                reservations.clone(),
                queue.clone(),
                queues.clone(),
            ));
        let gateway_steps = Consumer::new("gateway").with_handler(AuthorizeHandler::new(
            gateway,
            queue.clone(),
            queues.clone(),
        ));
        let payment_steps = Consumer::new("payments").with_handler(FinalizeHandler::new(
            store.clone(),
            queue.clone(),
            queues.clone(),
        ));

        Self {
            intake: PaymentIntake::new(store.clone(), queue.clone(), queues.clone()),
            consumers: vec![
                (queues.wallet.clone(), wallet_steps),
                (queues.gateway.clone(), gateway_steps),
                (queues.payments.clone(), payment_steps),
            ],
            recovery: RecoveryHandler::new(
                FailureClassifier::from_config(&config),
                store.clone(),
                queue.clone(),
            ),
            sweeper: ExpirySweeper::new(reservations.clone(), queue.clone(), queues),
            reservations,
            queue,
            store,
            config,
        }
    }

    pub fn config(&self) -> &SagaConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn queue(&self) -> &InMemoryQueue {
        &self.queue
    }

    pub fn reservations(&self) -> &ReservationManager<S> {
        &self.reservations
    }

    /// Entry point for new payments.
    pub fn intake(&self) -> &PaymentIntake<S, InMemoryQueue> {
        &self.intake
    }

    /// Runs one receive and process pass over every consumed queue, then
    /// over the dead-letter queue.
    ///
    /// Successful deliveries are acknowledged by dropping them. Failed ones
    /// are handed back to the queue, which dead-letters them once their
    /// receive budget is spent.
    pub async fn pump(&self) -> PumpStats {
        let mut stats = PumpStats::default();
        let batch_size = self.config.batch_size.max(1);

        for (queue_name, consumer) in &self.consumers {
            let deliveries = self.queue.receive(queue_name, batch_size).await;
            if deliveries.is_empty() {
                continue;
            }
            let report = consumer.process_batch(&deliveries).await;
            stats.delivered += deliveries.len();
            for delivery in deliveries {
                if report.failed(&delivery.message_id) {
                    stats.failed += 1;
                    self.queue.nack(queue_name, delivery).await;
                }
            }
        }

        let dead_letter = self.queue.dead_letter().to_string();
        let dead = self.queue.receive(&dead_letter, batch_size).await;
        if !dead.is_empty() {
            let report = self.recovery.process_batch(&dead).await;
            stats.recovered += dead.len();
            for delivery in dead {
                if report.failed(&delivery.message_id) {
                    self.queue.nack(&dead_letter, delivery).await;
                }
            }
        }

        stats
    }

    /// Pumps until a pass finds no work or `max_rounds` passes ran.
    /// Returns the number of passes that found work.
    pub async fn drain(&self, max_rounds: usize) -> usize {
        let mut rounds = 0;
        while rounds < max_rounds {
            if self.pump().await.is_idle() {
                break;
            }
            rounds += 1;
        }
        rounds
    }

    /// Takes every event published to the event bus.
    pub async fn drain_bus(&self) -> Vec<Event> {
        let bus = &self.config.queues.event_bus;
        let depth = self.queue.depth(bus).await;
        self.queue
            .receive(bus, depth)
            .await
            .into_iter()
            .filter_map(|delivery| match Event::from_json(&delivery.body) {
                Ok(event) => Some(event),
                Err(e) => {
                    tracing::warn!(message_id = %delivery.message_id, error = %e, "undecodable bus event");
                    None
                }
            })
            .collect()
    }

    /// Releases reservations whose hold expired at or before `now` and
    /// announces any expired hold still waiting on its payment.
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        self.sweeper.sweep(now).await
    }
}
