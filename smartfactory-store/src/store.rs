//! SQLite-backed local store.
//!
//! Readings are persisted as they are appended and deleted only once their
//! batch is acknowledged or dead-lettered, so a restart recovers every
//! undelivered reading in collection order.
//!
//! # Schema
//!
//! ```sql
//! CREATE TABLE readings (
//!     seq INTEGER PRIMARY KEY AUTOINCREMENT,
//!     endpoint TEXT NOT NULL,
//!     tag TEXT NOT NULL,
//!     value TEXT NOT NULL,          -- JSON, `null` for unreadable tags
//!     quality TEXT NOT NULL,
//!     timestamp_ms INTEGER NOT NULL,
//!     monotonic_ms INTEGER NOT NULL
//! );
//! CREATE TABLE dead_letters (
//!     id INTEGER PRIMARY KEY AUTOINCREMENT,
//!     batch_id INTEGER NOT NULL,
//!     attempts INTEGER NOT NULL,
//!     last_error TEXT NOT NULL,
//!     created_ms INTEGER NOT NULL,
//!     readings TEXT NOT NULL        -- JSON array of readings
//! );
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use parking_lot::Mutex;
use rusqlite::{Connection, params};
use serde::{Deserialize, Serialize};
use smartfactory_common::{Quality, Reading, TagValue, current_timestamp_millis};
use tracing::{debug, info, warn};

use crate::batch::{Batch, BatchId};
use crate::config::StoreConfig;
use crate::error::{Result, StoreError};

const INSERT_READING: &str = "INSERT INTO readings
    (endpoint, tag, value, quality, timestamp_ms, monotonic_ms)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6)";

const DELETE_READING: &str = "DELETE FROM readings WHERE seq = ?1";

/// Result of an append call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppendOutcome {
    /// Readings persisted by this call.
    pub accepted: usize,
    /// Readings rejected by this call because the store was at capacity.
    pub dropped: usize,
    /// Readings dropped since the store was opened.
    pub dropped_total: u64,
}

/// Store counters, as exposed in health snapshots.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    /// Readings waiting to be drained.
    pub pending: usize,
    /// Readings drained but not yet settled.
    pub in_flight: usize,
    /// Readings persisted since open.
    pub appended: u64,
    /// Readings acknowledged since open.
    pub acknowledged: u64,
    /// Readings returned to pending since open.
    pub requeued: u64,
    /// Readings rejected at the capacity ceiling since open.
    pub dropped: u64,
    /// Readings moved to the dead-letter table since open.
    pub dead_lettered: u64,
}

/// A batch set aside after exhausting its delivery attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetter {
    pub id: i64,
    pub batch_id: BatchId,
    pub attempts: u32,
    pub last_error: String,
    /// Unix millis when the batch was dead-lettered.
    pub created_ms: i64,
    pub readings: Vec<Reading>,
}

struct Inner {
    conn: Connection,
    pending: BTreeMap<u64, Reading>,
    in_flight: BTreeMap<BatchId, Vec<(u64, Reading)>>,
    /// Size of each requeued batch, keyed by its first sequence.
    requeued: BTreeMap<u64, usize>,
    stats: StoreStats,
}

impl Inner {
    fn undelivered(&self) -> usize {
        self.pending.len() + self.in_flight.values().map(Vec::len).sum::<usize>()
    }
}

/// Durable buffer of readings awaiting delivery.
///
/// Thread-safe via an internal mutex; every critical section is a single
/// statement or transaction.
pub struct LocalStore {
    inner: Mutex<Inner>,
    capacity: usize,
    location: String,
}

impl LocalStore {
    /// Open the store described by `config`, creating the file if needed.
    pub fn open(config: &StoreConfig) -> Result<Self> {
        if let Some(parent) = config.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(&config.path)?;
        conn.busy_timeout(Duration::from_millis(config.busy_timeout_ms))?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        debug!(path = %config.path.display(), journal_mode = %mode, "Opened local store");

        Self::with_connection(conn, config.capacity, config.path.display().to_string())
    }

    /// Open a file-backed store with default settings and the given capacity.
    pub fn open_path(path: impl AsRef<Path>, capacity: usize) -> Result<Self> {
        Self::open(&StoreConfig {
            path: path.as_ref().to_path_buf(),
            capacity,
            ..StoreConfig::default()
        })
    }

    /// Create an in-memory store (for testing).
    pub fn open_in_memory(capacity: usize) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::with_connection(conn, capacity, ":memory:".to_string())
    }

    fn with_connection(conn: Connection, capacity: usize, location: String) -> Result<Self> {
        init_schema(&conn)?;
        let pending = load_pending(&conn)?;

        if !pending.is_empty() {
            info!(
                store = %location,
                recovered = pending.len(),
                "Recovered undelivered readings"
            );
        }

        let stats = StoreStats {
            pending: pending.len(),
            ..StoreStats::default()
        };

        Ok(Self {
            inner: Mutex::new(Inner {
                conn,
                pending,
                in_flight: BTreeMap::new(),
                requeued: BTreeMap::new(),
                stats,
            }),
            capacity,
            location,
        })
    }

    /// Where the store lives (file path or `:memory:`).
    pub fn location(&self) -> &str {
        &self.location
    }

    /// Maximum undelivered readings.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Persist a single reading.
    pub fn append(&self, reading: Reading) -> Result<AppendOutcome> {
        self.append_all(vec![reading])
    }

    /// Persist readings in one transaction, preserving their order.
    ///
    /// When the store is at capacity the newest readings of this call are
    /// dropped; already buffered readings are never evicted.
    pub fn append_all(&self, mut readings: Vec<Reading>) -> Result<AppendOutcome> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        let room = self.capacity.saturating_sub(inner.undelivered());
        let dropped = readings.len().saturating_sub(room);
        readings.truncate(room);

        let mut stored = Vec::with_capacity(readings.len());
        if !readings.is_empty() {
            let tx = inner.conn.transaction()?;
            {
                let mut stmt = tx.prepare_cached(INSERT_READING)?;
                for reading in readings {
                    let value = serde_json::to_string(&reading.value)?;
                    stmt.execute(params![
                        reading.endpoint,
                        reading.tag,
                        value,
                        reading.quality.as_str(),
                        reading.timestamp,
                        reading.monotonic_ms as i64,
                    ])?;
                    stored.push((tx.last_insert_rowid() as u64, reading));
                }
            }
            tx.commit()?;
        }

        let accepted = stored.len();
        inner.pending.extend(stored);
        inner.stats.appended += accepted as u64;
        inner.stats.dropped += dropped as u64;

        if dropped > 0 {
            warn!(
                store = %self.location,
                dropped,
                dropped_total = inner.stats.dropped,
                capacity = self.capacity,
                "Local store at capacity, dropping newest readings"
            );
        }

        Ok(AppendOutcome {
            accepted,
            dropped,
            dropped_total: inner.stats.dropped,
        })
    }

    /// Take up to `max_batch_size` of the oldest pending readings as a batch.
    ///
    /// The readings stay persisted and in flight until the batch is
    /// acknowledged, requeued, or dead-lettered. Returns `None` when nothing
    /// is pending.
    ///
    /// A requeued batch at the head of the queue is handed out again with
    /// exactly the readings it had, even if newer readings arrived since.
    pub fn drain(&self, max_batch_size: usize) -> Option<Batch> {
        if max_batch_size == 0 {
            return None;
        }

        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let head = *inner.pending.first_key_value()?.0;
        let limit = match inner.requeued.remove(&head) {
            Some(len) => len.min(max_batch_size),
            None => max_batch_size,
        };

        let mut entries = Vec::with_capacity(limit.min(inner.pending.len()));
        while entries.len() < limit {
            match inner.pending.pop_first() {
                Some(entry) => entries.push(entry),
                None => break,
            }
        }

        let batch = Batch::new(entries.clone())?;
        inner.in_flight.insert(batch.id(), entries);
        Some(batch)
    }

    /// Mark a batch as delivered and delete its readings.
    pub fn acknowledge(&self, batch_id: BatchId) -> Result<usize> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        let entries = inner
            .in_flight
            .get(&batch_id)
            .ok_or(StoreError::UnknownBatch(batch_id))?;
        let count = entries.len();

        let tx = inner.conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(DELETE_READING)?;
            for (seq, _) in entries {
                stmt.execute(params![*seq as i64])?;
            }
        }
        tx.commit()?;

        inner.in_flight.remove(&batch_id);
        inner.stats.acknowledged += count as u64;
        debug!(batch = %batch_id, readings = count, "Batch acknowledged");

        Ok(count)
    }

    /// Return a batch's readings to pending, at their original position.
    pub fn requeue(&self, batch_id: BatchId) -> Result<usize> {
        let mut inner = self.inner.lock();
        let entries = inner
            .in_flight
            .remove(&batch_id)
            .ok_or(StoreError::UnknownBatch(batch_id))?;
        let count = entries.len();

        if let Some((first, _)) = entries.first() {
            inner.requeued.insert(*first, count);
        }
        inner.pending.extend(entries);
        inner.stats.requeued += count as u64;
        debug!(batch = %batch_id, readings = count, "Batch requeued");

        Ok(count)
    }

    /// Move a batch's readings into the dead-letter table.
    pub fn dead_letter(&self, batch_id: BatchId, attempts: u32, last_error: &str) -> Result<usize> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        let entries = inner
            .in_flight
            .get(&batch_id)
            .ok_or(StoreError::UnknownBatch(batch_id))?;
        let count = entries.len();
        let readings: Vec<&Reading> = entries.iter().map(|(_, reading)| reading).collect();
        let payload = serde_json::to_string(&readings)?;

        let tx = inner.conn.transaction()?;
        tx.execute(
            "INSERT INTO dead_letters (batch_id, attempts, last_error, created_ms, readings)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                batch_id.0 as i64,
                attempts,
                last_error,
                current_timestamp_millis(),
                payload,
            ],
        )?;
        {
            let mut stmt = tx.prepare_cached(DELETE_READING)?;
            for (seq, _) in entries {
                stmt.execute(params![*seq as i64])?;
            }
        }
        tx.commit()?;

        inner.in_flight.remove(&batch_id);
        inner.stats.dead_lettered += count as u64;

        Ok(count)
    }

    /// List dead-lettered batches, oldest first.
    pub fn dead_letters(&self) -> Result<Vec<DeadLetter>> {
        let inner = self.inner.lock();
        let mut stmt = inner.conn.prepare(
            "SELECT id, batch_id, attempts, last_error, created_ms, readings
             FROM dead_letters ORDER BY id",
        )?;

        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, u32>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, i64>(4)?,
                row.get::<_, String>(5)?,
            ))
        })?;

        let mut letters = Vec::new();
        for row in rows {
            let (id, batch_id, attempts, last_error, created_ms, payload) = row?;
            let readings: Vec<Reading> =
                serde_json::from_str(&payload).map_err(|e| StoreError::Corrupt {
                    seq: batch_id as u64,
                    message: format!("dead letter {}: {}", id, e),
                })?;
            letters.push(DeadLetter {
                id,
                batch_id: BatchId(batch_id as u64),
                attempts,
                last_error,
                created_ms,
                readings,
            });
        }

        Ok(letters)
    }

    /// Number of readings waiting to be drained.
    pub fn pending_len(&self) -> usize {
        self.inner.lock().pending.len()
    }

    /// Snapshot of the store counters.
    pub fn stats(&self) -> StoreStats {
        let inner = self.inner.lock();
        StoreStats {
            pending: inner.pending.len(),
            in_flight: inner.in_flight.values().map(Vec::len).sum(),
            ..inner.stats
        }
    }
}

fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS readings (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            endpoint TEXT NOT NULL,
            tag TEXT NOT NULL,
            value TEXT NOT NULL,
            quality TEXT NOT NULL,
            timestamp_ms INTEGER NOT NULL,
            monotonic_ms INTEGER NOT NULL
        );
        CREATE TABLE IF NOT EXISTS dead_letters (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            batch_id INTEGER NOT NULL,
            attempts INTEGER NOT NULL,
            last_error TEXT NOT NULL,
            created_ms INTEGER NOT NULL,
            readings TEXT NOT NULL
        );",
    )?;
    Ok(())
}

fn load_pending(conn: &Connection) -> Result<BTreeMap<u64, Reading>> {
    let mut stmt = conn.prepare(
        "SELECT seq, endpoint, tag, value, quality, timestamp_ms, monotonic_ms
         FROM readings ORDER BY seq",
    )?;

    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, i64>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, String>(3)?,
            row.get::<_, String>(4)?,
            row.get::<_, i64>(5)?,
            row.get::<_, i64>(6)?,
        ))
    })?;

    let mut pending = BTreeMap::new();
    for row in rows {
        let (seq, endpoint, tag, value, quality, timestamp, monotonic_ms) = row?;
        let seq = seq as u64;

        let value: Option<TagValue> =
            serde_json::from_str(&value).map_err(|e| StoreError::Corrupt {
                seq,
                message: format!("invalid value '{}': {}", value, e),
            })?;
        let quality = Quality::parse(&quality).ok_or_else(|| StoreError::Corrupt {
            seq,
            message: format!("invalid quality '{}'", quality),
        })?;

        pending.insert(
            seq,
            Reading {
                endpoint,
                tag,
                value,
                quality,
                timestamp,
                monotonic_ms: monotonic_ms as u64,
            },
        );
    }

    Ok(pending)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reading(tag: &str, value: i64, ts: i64) -> Reading {
        Reading::new("plc01", tag, TagValue::Integer(value)).with_timestamp(ts)
    }

    #[test]
    fn test_drain_empty_store() {
        let store = LocalStore::open_in_memory(10).unwrap();
        assert!(store.drain(5).is_none());
    }

    #[test]
    fn test_drain_zero_is_noop() {
        let store = LocalStore::open_in_memory(10).unwrap();
        store.append(reading("T1", 1, 1)).unwrap();
        assert!(store.drain(0).is_none());
        assert_eq!(store.pending_len(), 1);
    }

    #[test]
    fn test_batch_id_is_first_sequence() {
        let store = LocalStore::open_in_memory(10).unwrap();
        store
            .append_all(vec![reading("T1", 1, 1), reading("T1", 2, 2)])
            .unwrap();

        let batch = store.drain(10).unwrap();
        assert_eq!(batch.id(), BatchId(batch.sequences()[0]));
        assert_eq!(batch.len(), 2);
    }

    #[test]
    fn test_unknown_batch() {
        let store = LocalStore::open_in_memory(10).unwrap();
        assert!(matches!(
            store.acknowledge(BatchId(42)),
            Err(StoreError::UnknownBatch(BatchId(42)))
        ));
        assert!(matches!(
            store.requeue(BatchId(42)),
            Err(StoreError::UnknownBatch(_))
        ));
    }

    #[test]
    fn test_double_acknowledge_fails() {
        let store = LocalStore::open_in_memory(10).unwrap();
        store.append(reading("T1", 1, 1)).unwrap();
        let batch = store.drain(1).unwrap();

        assert_eq!(store.acknowledge(batch.id()).unwrap(), 1);
        assert!(store.acknowledge(batch.id()).is_err());
    }

    #[test]
    fn test_capacity_counts_in_flight() {
        let store = LocalStore::open_in_memory(3).unwrap();
        store
            .append_all(vec![reading("T1", 1, 1), reading("T1", 2, 2)])
            .unwrap();
        let _batch = store.drain(2).unwrap();

        let outcome = store
            .append_all(vec![reading("T1", 3, 3), reading("T1", 4, 4)])
            .unwrap();
        assert_eq!(outcome.accepted, 1);
        assert_eq!(outcome.dropped, 1);
        assert_eq!(outcome.dropped_total, 1);
    }

    #[test]
    fn test_stats() {
        let store = LocalStore::open_in_memory(10).unwrap();
        store
            .append_all(vec![
                reading("T1", 1, 1),
                reading("T1", 2, 2),
                reading("T1", 3, 3),
            ])
            .unwrap();

        let first = store.drain(1).unwrap();
        let second = store.drain(1).unwrap();
        store.acknowledge(first.id()).unwrap();
        store.requeue(second.id()).unwrap();

        let stats = store.stats();
        assert_eq!(stats.appended, 3);
        assert_eq!(stats.acknowledged, 1);
        assert_eq!(stats.requeued, 1);
        assert_eq!(stats.pending, 2);
        assert_eq!(stats.in_flight, 0);
    }

    #[test]
    fn test_bad_quality_reading_persists() {
        let store = LocalStore::open_in_memory(10).unwrap();
        store.append(Reading::bad("plc01", "coil/4")).unwrap();

        let batch = store.drain(1).unwrap();
        assert_eq!(batch.readings()[0].quality, Quality::Bad);
        assert_eq!(batch.readings()[0].value, None);
    }
}
