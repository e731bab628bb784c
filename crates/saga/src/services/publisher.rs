//! Publishing events to queues and topics.

use async_trait::async_trait;
use events::Event;

use crate::error::SagaError;

/// Capability to put an event on a queue or topic.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Publishes `event` to `destination`.
    async fn publish(&self, destination: &str, event: &Event) -> Result<(), SagaError>;

    /// Publishes an event that already used `attempts` deliveries.
    ///
    /// Queues that track delivery counts can carry the count forward so a
    /// re-driven message keeps its attempt budget. The default ignores it.
    async fn republish(
        &self,
        destination: &str,
        event: &Event,
        attempts: u32,
    ) -> Result<(), SagaError> {
        let _ = attempts;
        self.publish(destination, event).await
    }
}
