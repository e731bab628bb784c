//! Messages as handed over by the queue, and batch outcomes.

use crate::error::{Result, SagaError};

/// One message received from a queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Message ID assigned by the queue.
    pub message_id: String,
    /// The raw message body.
    pub body: String,
    /// How many times the message has been received, this time included.
    pub receive_count: u32,
    /// Label of the queue the message was first published to.
    pub source: String,
}

/// A message in a batch whose processing failed.
#[derive(Debug)]
pub struct BatchFailure {
    pub message_id: String,
    pub error: SagaError,
}

/// Outcome of processing a batch of deliveries.
///
/// Every message in the batch is attempted; a failure does not stop the
/// messages after it.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub processed: usize,
    pub failures: Vec<BatchFailure>,
}

impl BatchReport {
    pub(crate) fn record(&mut self, message_id: &str, result: Result<()>) {
        self.processed += 1;
        if let Err(error) = result {
            self.failures.push(BatchFailure {
                message_id: message_id.to_string(),
                error,
            });
        }
    }

    /// Returns true if any message failed.
    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }

    /// Returns true if the message with `message_id` failed.
    pub fn failed(&self, message_id: &str) -> bool {
        self.failures.iter().any(|f| f.message_id == message_id)
    }

    /// Collapses the report into the error of the last failed message.
    pub fn into_result(self) -> Result<()> {
        match self.failures.into_iter().last() {
            Some(failure) => Err(failure.error),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_keeps_last_error() {
        let mut report = BatchReport::default();
        report.record("m1", Err(SagaError::Gateway("first".to_string())));
        report.record("m2", Ok(()));
        report.record("m3", Err(SagaError::Gateway("last".to_string())));

        assert_eq!(report.processed, 3);
        assert!(report.failed("m1"));
        assert!(!report.failed("m2"));
        let err = report.into_result().unwrap_err();
        assert_eq!(err.to_string(), "gateway error: last");
    }

    #[test]
    fn test_empty_report_is_ok() {
        assert!(BatchReport::default().into_result().is_ok());
    }
}
