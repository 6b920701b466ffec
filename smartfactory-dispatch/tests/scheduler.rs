//! Dispatch scheduler behavior on paused tokio time.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use smartfactory_common::{Backoff, Reading, TagValue, shutdown};
use smartfactory_dispatch::{BatchSink, DeliveryError, DispatchConfig, DispatchScheduler};
use smartfactory_store::{Batch, BatchId, LocalStore};
use tokio::time::Instant;

fn reading(i: i64) -> Reading {
    Reading::new("plc01", "T1", TagValue::Integer(i)).with_timestamp(i)
}

fn config() -> DispatchConfig {
    DispatchConfig {
        endpoint_url: "http://localhost/ingest".to_string(),
        api_key: Some("k".to_string()),
        send_interval_secs: 60,
        request_timeout_ms: 120_000,
        max_attempts: 3,
        retry: Backoff::new(Duration::from_secs(5), Duration::from_secs(30), 2.0),
        ..DispatchConfig::default()
    }
}

/// Rejects every batch.
#[derive(Default)]
struct FailingSink {
    calls: Arc<Mutex<Vec<BatchId>>>,
    sequences: Arc<Mutex<Vec<Vec<u64>>>>,
}

#[async_trait]
impl BatchSink for FailingSink {
    async fn deliver(&self, batch: &Batch) -> Result<(), DeliveryError> {
        self.calls.lock().push(batch.id());
        self.sequences.lock().push(batch.sequences().to_vec());
        Err(DeliveryError::Rejected {
            status: 500,
            body: "boom".to_string(),
        })
    }

    fn destination(&self) -> &str {
        "failing"
    }
}

/// Accepts every batch after a fixed delay, tracking overlap.
struct SlowSink {
    delay: Duration,
    active: AtomicUsize,
    max_active: AtomicUsize,
    starts: Mutex<Vec<Instant>>,
}

#[async_trait]
impl BatchSink for SlowSink {
    async fn deliver(&self, _batch: &Batch) -> Result<(), DeliveryError> {
        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now_active, Ordering::SeqCst);
        self.starts.lock().push(Instant::now());

        tokio::time::sleep(self.delay).await;

        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }

    fn destination(&self) -> &str {
        "slow"
    }
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_batch_dead_lettered_exactly_once() {
    let store = Arc::new(LocalStore::open_in_memory(100).unwrap());
    store.append_all((0..3).map(reading).collect()).unwrap();

    let calls = Arc::new(Mutex::new(Vec::new()));
    let sink = FailingSink {
        calls: calls.clone(),
        ..FailingSink::default()
    };
    let scheduler = DispatchScheduler::new(&config(), store.clone(), Box::new(sink));
    let stats = scheduler.stats();

    let (trigger, shutdown) = shutdown::channel();
    let handle = tokio::spawn(scheduler.run(shutdown));
    tokio::time::sleep(Duration::from_secs(600)).await;
    trigger.trigger();
    handle.await.unwrap();

    // Attempts at 0s, 5s (retry) and 15s (retry), then dead-lettered.
    let calls = calls.lock();
    assert_eq!(calls.len(), 3);
    assert!(calls.iter().all(|id| *id == calls[0]));

    let letters = store.dead_letters().unwrap();
    assert_eq!(letters.len(), 1);
    assert_eq!(letters[0].batch_id, calls[0]);
    assert_eq!(letters[0].attempts, 3);
    assert!(letters[0].last_error.contains("HTTP 500"));
    assert_eq!(letters[0].readings.len(), 3);

    let store_stats = store.stats();
    assert_eq!(store_stats.pending, 0);
    assert_eq!(store_stats.in_flight, 0);
    assert_eq!(store_stats.dead_lettered, 3);

    let stats = stats.snapshot();
    assert_eq!(stats.failed_attempts, 3);
    assert_eq!(stats.batches_dead_lettered, 1);
    assert_eq!(stats.batches_delivered, 0);
}

#[tokio::test(start_paused = true)]
async fn test_readings_appended_during_retry_get_their_own_attempts() {
    let store = Arc::new(LocalStore::open_in_memory(100).unwrap());
    store.append(reading(1)).unwrap();

    let sequences = Arc::new(Mutex::new(Vec::new()));
    let sink = FailingSink {
        sequences: sequences.clone(),
        ..FailingSink::default()
    };
    let scheduler = DispatchScheduler::new(&config(), store.clone(), Box::new(sink));

    let (trigger, shutdown) = shutdown::channel();
    let handle = tokio::spawn(scheduler.run(shutdown));
    tokio::time::sleep(Duration::from_secs(1)).await;
    store.append(reading(2)).unwrap();
    tokio::time::sleep(Duration::from_secs(600)).await;
    trigger.trigger();
    handle.await.unwrap();

    // The retried batch never grows; the late reading starts at attempt one.
    let sequences = sequences.lock();
    assert_eq!(sequences.len(), 6);
    assert!(sequences[..3].iter().all(|s| *s == sequences[0]));
    assert!(sequences[3..].iter().all(|s| *s == sequences[3]));
    assert_eq!(sequences[0].len(), 1);
    assert_eq!(sequences[3].len(), 1);
    assert_ne!(sequences[0], sequences[3]);

    let letters = store.dead_letters().unwrap();
    assert_eq!(letters.len(), 2);
    assert!(letters.iter().all(|l| l.attempts == 3 && l.readings.len() == 1));
    assert_eq!(letters[0].readings[0].timestamp, 1);
    assert_eq!(letters[1].readings[0].timestamp, 2);
}

#[tokio::test(start_paused = true)]
async fn test_slow_delivery_never_overlaps_cycles() {
    let store = Arc::new(LocalStore::open_in_memory(100).unwrap());
    store.append(reading(1)).unwrap();

    let sink = Arc::new(SlowSink {
        delay: Duration::from_secs(65),
        active: AtomicUsize::new(0),
        max_active: AtomicUsize::new(0),
        starts: Mutex::new(Vec::new()),
    });

    struct Shared(Arc<SlowSink>);

    #[async_trait]
    impl BatchSink for Shared {
        async fn deliver(&self, batch: &Batch) -> Result<(), DeliveryError> {
            self.0.deliver(batch).await
        }

        fn destination(&self) -> &str {
            self.0.destination()
        }
    }

    let scheduler = DispatchScheduler::new(&config(), store.clone(), Box::new(Shared(sink.clone())));
    let stats = scheduler.stats();
    let start = Instant::now();

    let (trigger, shutdown) = shutdown::channel();
    let handle = tokio::spawn(scheduler.run(shutdown));

    tokio::time::sleep(Duration::from_secs(30)).await;
    store.append(reading(2)).unwrap();
    tokio::time::sleep(Duration::from_secs(200)).await;
    trigger.trigger();
    handle.await.unwrap();

    assert_eq!(sink.max_active.load(Ordering::SeqCst), 1);

    let starts = sink.starts.lock();
    assert_eq!(starts.len(), 2);
    assert!(starts[1] - start >= Duration::from_secs(65));

    let stats = stats.snapshot();
    assert_eq!(stats.batches_delivered, 2);
    assert_eq!(stats.readings_delivered, 2);
    assert_eq!(store.stats().pending, 0);
}

#[tokio::test(start_paused = true)]
async fn test_idle_scheduler_stops_promptly() {
    let store = Arc::new(LocalStore::open_in_memory(100).unwrap());
    let scheduler =
        DispatchScheduler::new(&config(), store.clone(), Box::new(FailingSink::default()));
    let stats = scheduler.stats();

    let (trigger, shutdown) = shutdown::channel();
    let handle = tokio::spawn(scheduler.run(shutdown));
    tokio::time::sleep(Duration::from_secs(125)).await;
    trigger.trigger();
    handle.await.unwrap();

    // Ticks at 0s, 60s and 120s.
    assert_eq!(stats.snapshot().cycles, 3);
    assert_eq!(stats.snapshot().failed_attempts, 0);
}
