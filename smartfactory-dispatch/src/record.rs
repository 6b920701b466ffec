//! Delivery bookkeeping for the batch at the head of the queue.

use std::time::Duration;

use smartfactory_common::Backoff;
use smartfactory_store::{Batch, BatchId};
use tokio::time::Instant;

use crate::error::DeliveryError;

/// Attempts made for one batch.
///
/// Lives only while the batch is being retried; dropped on acknowledge or
/// dead-letter.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryRecord {
    pub batch_id: BatchId,
    /// Store sequences of the batch the attempts were made for.
    pub sequences: Vec<u64>,
    pub attempts: u32,
    pub last_error: Option<DeliveryError>,
    pub next_retry: Option<Instant>,
}

impl DeliveryRecord {
    pub fn new(batch_id: BatchId, sequences: Vec<u64>) -> Self {
        Self {
            batch_id,
            sequences,
            attempts: 0,
            last_error: None,
            next_retry: None,
        }
    }

    /// Start a record for `batch`.
    pub fn for_batch(batch: &Batch) -> Self {
        Self::new(batch.id(), batch.sequences().to_vec())
    }

    /// Whether the attempts counted here were made for exactly `batch`.
    pub fn tracks(&self, batch: &Batch) -> bool {
        self.batch_id == batch.id() && self.sequences == batch.sequences()
    }

    /// Count a failed attempt and schedule the next one.
    ///
    /// Returns the delay until the next attempt.
    pub fn record_failure(
        &mut self,
        error: DeliveryError,
        backoff: &Backoff,
        now: Instant,
    ) -> Duration {
        self.attempts = self.attempts.saturating_add(1);
        let delay = backoff.delay_for_attempt(self.attempts - 1);
        self.last_error = Some(error);
        self.next_retry = Some(now + delay);
        delay
    }

    /// Whether the next attempt may run at `now`.
    pub fn is_due(&self, now: Instant) -> bool {
        self.next_retry.is_none_or(|at| now >= at)
    }

    /// Whether `max_attempts` have been used up.
    pub fn is_exhausted(&self, max_attempts: u32) -> bool {
        self.attempts >= max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failures_schedule_growing_retries() {
        let backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(10), 2.0);
        let start = Instant::now();
        let mut record = DeliveryRecord::new(BatchId(1), vec![1, 2]);
        assert!(record.is_due(start));

        let error = DeliveryError::Unreachable("refused".to_string());
        assert_eq!(
            record.record_failure(error.clone(), &backoff, start),
            Duration::from_secs(1)
        );
        assert!(!record.is_due(start));
        assert!(record.is_due(start + Duration::from_secs(1)));

        assert_eq!(
            record.record_failure(error.clone(), &backoff, start),
            Duration::from_secs(2)
        );
        assert_eq!(record.attempts, 2);
        assert_eq!(record.last_error, Some(error));
        assert!(!record.is_exhausted(3));
        assert!(record.is_exhausted(2));
    }
}
