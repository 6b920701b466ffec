//! Periodic dispatch loop.
//!
//! One task owns the loop, so dispatch cycles never overlap. A tick that
//! comes due while a delivery is still running is deferred rather than
//! queued up, and a pending retry deadline wakes the loop between ticks.

use std::future::pending;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use smartfactory_common::{Backoff, Shutdown, current_timestamp_millis};
use smartfactory_store::{Batch, BatchId, LocalStore, retry_transient};
use tokio::time::{Instant, MissedTickBehavior, interval, sleep_until, timeout};
use tracing::{debug, error, info, warn};

use crate::config::DispatchConfig;
use crate::error::DeliveryError;
use crate::record::DeliveryRecord;
use crate::sink::BatchSink;

const DEFAULT_STORE_RETRY_ATTEMPTS: u32 = 5;

/// Dispatch counters, as exposed in health snapshots.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DispatchStats {
    /// Dispatch cycles run.
    pub cycles: u64,
    /// Batches accepted by the endpoint.
    pub batches_delivered: u64,
    /// Readings accepted by the endpoint.
    pub readings_delivered: u64,
    /// Failed delivery attempts.
    pub failed_attempts: u64,
    /// Batches moved to the dead-letter table.
    pub batches_dead_lettered: u64,
    /// Readings moved to the dead-letter table.
    pub readings_dead_lettered: u64,
    /// Last delivery or storage error.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Last accepted delivery (millis since epoch).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_success: Option<i64>,
}

/// Shared, cloneable view of a scheduler's counters.
#[derive(Debug, Clone, Default)]
pub struct StatsHandle {
    inner: Arc<RwLock<DispatchStats>>,
}

impl StatsHandle {
    /// Current counters.
    pub fn snapshot(&self) -> DispatchStats {
        self.inner.read().clone()
    }

    fn update(&self, f: impl FnOnce(&mut DispatchStats)) {
        f(&mut self.inner.write());
    }
}

/// Drains the local store and hands batches to a [`BatchSink`].
pub struct DispatchScheduler {
    store: Arc<LocalStore>,
    sink: Box<dyn BatchSink>,
    interval: Duration,
    max_batch_size: usize,
    max_attempts: u32,
    delivery_timeout: Duration,
    backoff: Backoff,
    store_retry_attempts: u32,
    record: Option<DeliveryRecord>,
    pending_ack: Option<BatchId>,
    stats: StatsHandle,
}

impl DispatchScheduler {
    pub fn new(config: &DispatchConfig, store: Arc<LocalStore>, sink: Box<dyn BatchSink>) -> Self {
        Self {
            store,
            sink,
            interval: config.send_interval(),
            max_batch_size: config.max_batch_size,
            max_attempts: config.max_attempts.max(1),
            delivery_timeout: config.request_timeout(),
            backoff: config.retry,
            store_retry_attempts: DEFAULT_STORE_RETRY_ATTEMPTS,
            record: None,
            pending_ack: None,
            stats: StatsHandle::default(),
        }
    }

    /// Attempts for transient storage errors on acknowledge and dead-letter.
    pub fn with_store_retry_attempts(mut self, attempts: u32) -> Self {
        self.store_retry_attempts = attempts.max(1);
        self
    }

    /// Handle for reading the counters while the loop runs.
    pub fn stats(&self) -> StatsHandle {
        self.stats.clone()
    }

    /// Run cycles until shutdown is signalled.
    ///
    /// The first cycle runs immediately so readings recovered from a previous
    /// run go out without waiting a full interval.
    pub async fn run(mut self, mut shutdown: Shutdown) {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            destination = %self.sink.destination(),
            interval_secs = self.interval.as_secs(),
            max_batch_size = self.max_batch_size,
            max_attempts = self.max_attempts,
            "Starting dispatch scheduler"
        );

        loop {
            let retry_at = self.record.as_ref().and_then(|r| r.next_retry);

            tokio::select! {
                _ = shutdown.wait() => break,
                _ = ticker.tick() => {}
                _ = wake_at(retry_at) => {}
            }

            self.run_cycle(&shutdown).await;
        }

        let stats = self.stats.snapshot();
        info!(
            batches_delivered = stats.batches_delivered,
            readings_delivered = stats.readings_delivered,
            batches_dead_lettered = stats.batches_dead_lettered,
            pending = self.store.pending_len(),
            "Dispatch scheduler stopped"
        );
    }

    /// Run one cycle: drain and deliver until the store is empty, a delivery
    /// fails, or shutdown is requested.
    pub async fn run_cycle(&mut self, shutdown: &Shutdown) {
        self.stats.update(|s| s.cycles += 1);

        if !self.settle_pending_ack().await {
            return;
        }

        loop {
            if shutdown.is_triggered() {
                break;
            }
            if let Some(record) = &self.record {
                if !record.is_due(Instant::now()) {
                    debug!(batch = %record.batch_id, "Retry not due yet");
                    break;
                }
            }

            let Some(batch) = self.store.drain(self.max_batch_size) else {
                self.record = None;
                break;
            };

            if self
                .record
                .as_ref()
                .is_some_and(|r| !r.tracks(&batch))
            {
                self.record = None;
            }

            let result = match timeout(self.delivery_timeout, self.sink.deliver(&batch)).await {
                Ok(result) => result,
                Err(_) => Err(DeliveryError::Timeout(self.delivery_timeout)),
            };

            let proceed = match result {
                Ok(()) => self.on_delivered(&batch).await,
                Err(e) => self.on_failed(&batch, e).await,
            };
            if !proceed {
                break;
            }
        }
    }

    /// Retry an acknowledge that failed in an earlier cycle.
    async fn settle_pending_ack(&mut self) -> bool {
        let Some(batch_id) = self.pending_ack else {
            return true;
        };

        let store = &self.store;
        match retry_transient("acknowledge", self.store_retry_attempts, || {
            store.acknowledge(batch_id)
        })
        .await
        {
            Ok(_) => {
                info!(batch = %batch_id, "Deferred acknowledge completed");
                self.pending_ack = None;
                true
            }
            Err(e) => {
                error!(batch = %batch_id, error = %e, "Deferred acknowledge failed again");
                self.stats.update(|s| s.last_error = Some(e.to_string()));
                false
            }
        }
    }

    async fn on_delivered(&mut self, batch: &Batch) -> bool {
        let batch_id = batch.id();
        let count = batch.len();
        self.record = None;

        self.stats.update(|s| {
            s.batches_delivered += 1;
            s.readings_delivered += count as u64;
            s.last_success = Some(current_timestamp_millis());
        });

        let store = &self.store;
        match retry_transient("acknowledge", self.store_retry_attempts, || {
            store.acknowledge(batch_id)
        })
        .await
        {
            Ok(_) => {
                debug!(batch = %batch_id, readings = count, "Batch delivered");
                true
            }
            Err(e) => {
                error!(
                    batch = %batch_id,
                    readings = count,
                    error = %e,
                    "Batch delivered but acknowledge failed, will retry before next drain"
                );
                self.pending_ack = Some(batch_id);
                self.stats.update(|s| s.last_error = Some(e.to_string()));
                false
            }
        }
    }

    async fn on_failed(&mut self, batch: &Batch, error: DeliveryError) -> bool {
        let batch_id = batch.id();
        let message = error.to_string();
        let auth = matches!(error, DeliveryError::Auth { .. });

        let record = self
            .record
            .get_or_insert_with(|| DeliveryRecord::for_batch(batch));
        let delay = record.record_failure(error, &self.backoff, Instant::now());
        let attempts = record.attempts;
        let exhausted = record.is_exhausted(self.max_attempts);

        self.stats.update(|s| {
            s.failed_attempts += 1;
            s.last_error = Some(message.clone());
        });

        if exhausted {
            let store = &self.store;
            let result = retry_transient("dead_letter", self.store_retry_attempts, || {
                store.dead_letter(batch_id, attempts, &message)
            })
            .await;

            match result {
                Ok(count) => {
                    warn!(
                        batch = %batch_id,
                        attempts,
                        readings = count,
                        error = %message,
                        "Batch dead-lettered after exhausting delivery attempts"
                    );
                    self.record = None;
                    self.stats.update(|s| {
                        s.batches_dead_lettered += 1;
                        s.readings_dead_lettered += count as u64;
                    });
                    return true;
                }
                Err(e) => {
                    error!(batch = %batch_id, error = %e, "Failed to dead-letter batch");
                    self.stats.update(|s| s.last_error = Some(e.to_string()));
                }
            }
        }

        if let Err(e) = self.store.requeue(batch_id) {
            error!(batch = %batch_id, error = %e, "Failed to requeue batch");
        }

        if auth {
            error!(
                batch = %batch_id,
                attempt = attempts,
                max_attempts = self.max_attempts,
                retry_in_ms = delay.as_millis() as u64,
                error = %message,
                "Endpoint rejected API key, batch requeued"
            );
        } else {
            warn!(
                batch = %batch_id,
                attempt = attempts,
                max_attempts = self.max_attempts,
                retry_in_ms = delay.as_millis() as u64,
                error = %message,
                "Delivery failed, batch requeued"
            );
        }
        false
    }
}

async fn wake_at(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep_until(at).await,
        None => pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use smartfactory_common::{Reading, TagValue, shutdown};

    /// Sink that fails a scripted number of times, then accepts.
    struct ScriptedSink {
        failures_left: Mutex<u32>,
        delivered: Arc<Mutex<Vec<BatchId>>>,
    }

    #[async_trait]
    impl BatchSink for ScriptedSink {
        async fn deliver(&self, batch: &Batch) -> Result<(), DeliveryError> {
            let mut failures = self.failures_left.lock();
            if *failures > 0 {
                *failures -= 1;
                return Err(DeliveryError::Rejected {
                    status: 503,
                    body: String::new(),
                });
            }
            self.delivered.lock().push(batch.id());
            Ok(())
        }

        fn destination(&self) -> &str {
            "scripted"
        }
    }

    fn config() -> DispatchConfig {
        DispatchConfig {
            endpoint_url: "http://localhost/ingest".to_string(),
            api_key: Some("k".to_string()),
            max_batch_size: 2,
            max_attempts: 3,
            retry: Backoff::new(Duration::from_secs(1), Duration::from_secs(4), 2.0),
            ..DispatchConfig::default()
        }
    }

    fn store_with(n: i64) -> Arc<LocalStore> {
        let store = LocalStore::open_in_memory(100).unwrap();
        for i in 0..n {
            store
                .append(Reading::new("plc01", "T1", TagValue::Integer(i)).with_timestamp(i))
                .unwrap();
        }
        Arc::new(store)
    }

    #[tokio::test(start_paused = true)]
    async fn test_cycle_drains_everything_on_success() {
        let store = store_with(5);
        let delivered = Arc::new(Mutex::new(Vec::new()));
        let sink = ScriptedSink {
            failures_left: Mutex::new(0),
            delivered: delivered.clone(),
        };
        let mut scheduler = DispatchScheduler::new(&config(), store.clone(), Box::new(sink));
        let (_trigger, shutdown) = shutdown::channel();

        scheduler.run_cycle(&shutdown).await;

        assert_eq!(delivered.lock().len(), 3);
        assert_eq!(store.stats().pending, 0);
        assert_eq!(store.stats().in_flight, 0);
        let stats = scheduler.stats().snapshot();
        assert_eq!(stats.batches_delivered, 3);
        assert_eq!(stats.readings_delivered, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_stops_cycle_and_requeues() {
        let store = store_with(4);
        let delivered = Arc::new(Mutex::new(Vec::new()));
        let sink = ScriptedSink {
            failures_left: Mutex::new(1),
            delivered: delivered.clone(),
        };
        let mut scheduler = DispatchScheduler::new(&config(), store.clone(), Box::new(sink));
        let (_trigger, shutdown) = shutdown::channel();

        scheduler.run_cycle(&shutdown).await;
        assert!(delivered.lock().is_empty());
        assert_eq!(store.pending_len(), 4);

        // Not due yet: nothing happens.
        scheduler.run_cycle(&shutdown).await;
        assert!(delivered.lock().is_empty());

        tokio::time::advance(Duration::from_secs(1)).await;
        scheduler.run_cycle(&shutdown).await;
        assert_eq!(delivered.lock().len(), 2);
        assert_eq!(store.pending_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_draining() {
        let store = store_with(4);
        let sink = ScriptedSink {
            failures_left: Mutex::new(0),
            delivered: Arc::new(Mutex::new(Vec::new())),
        };
        let mut scheduler = DispatchScheduler::new(&config(), store.clone(), Box::new(sink));
        let (trigger, shutdown) = shutdown::channel();
        trigger.trigger();

        scheduler.run_cycle(&shutdown).await;
        assert_eq!(store.pending_len(), 4);
    }
}
