//! Batches of readings handed out by the store.

use serde::{Deserialize, Serialize};
use smartfactory_common::Reading;

/// Identifier of an in-flight batch.
///
/// Equal to the store sequence number of the batch's first reading. A
/// requeued batch keeps its id and its readings when drained again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchId(pub u64);

impl std::fmt::Display for BatchId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// An ordered group of readings drained from the store.
///
/// Readings appear in collection order. The batch stays in flight inside the
/// store until it is acknowledged, requeued, or dead-lettered.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    id: BatchId,
    sequences: Vec<u64>,
    readings: Vec<Reading>,
}

impl Batch {
    pub(crate) fn new(entries: Vec<(u64, Reading)>) -> Option<Self> {
        let first = entries.first()?.0;
        let (sequences, readings) = entries.into_iter().unzip();
        Some(Self {
            id: BatchId(first),
            sequences,
            readings,
        })
    }

    /// Batch identifier.
    pub fn id(&self) -> BatchId {
        self.id
    }

    /// Readings in collection order.
    pub fn readings(&self) -> &[Reading] {
        &self.readings
    }

    /// Store sequence numbers, parallel to [`readings`](Self::readings).
    pub fn sequences(&self) -> &[u64] {
        &self.sequences
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }
}
