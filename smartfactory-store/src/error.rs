//! Error types for the local store.

use thiserror::Error;

use crate::batch::BatchId;

/// Result type alias using [`StoreError`].
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors raised by the local store.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Underlying SQLite failure.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Reading could not be encoded for storage.
    #[error("Failed to encode reading: {0}")]
    Encode(#[from] serde_json::Error),

    /// A persisted row could not be decoded.
    #[error("Corrupt row {seq}: {message}")]
    Corrupt { seq: u64, message: String },

    /// The batch is not in flight (never drained, or already settled).
    #[error("Unknown batch {0}")]
    UnknownBatch(BatchId),

    /// I/O error while preparing the store location.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Whether the operation may succeed if retried shortly.
    ///
    /// Lock contention and I/O-level failures are transient; schema, encoding
    /// and bookkeeping errors are not.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Sqlite(rusqlite::Error::SqliteFailure(e, _)) => matches!(
                e.code,
                rusqlite::ErrorCode::DatabaseBusy
                    | rusqlite::ErrorCode::DatabaseLocked
                    | rusqlite::ErrorCode::SystemIoFailure
                    | rusqlite::ErrorCode::DiskFull
            ),
            StoreError::Io(_) => true,
            _ => false,
        }
    }
}
