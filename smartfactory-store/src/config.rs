//! Local store configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Local store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// SQLite database file (default: `<data dir>/smartfactory/buffer.db`).
    #[serde(default = "default_path")]
    pub path: PathBuf,

    /// Maximum undelivered readings (pending + in flight) kept before new
    /// readings are dropped.
    #[serde(default = "default_capacity")]
    pub capacity: usize,

    /// How long SQLite waits on a locked database before failing, in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    /// Attempts for transient storage errors during operation.
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
}

fn default_path() -> PathBuf {
    dirs::data_local_dir()
        .map(|dir| dir.join("smartfactory").join("buffer.db"))
        .unwrap_or_else(|| PathBuf::from("smartfactory-buffer.db"))
}

fn default_capacity() -> usize {
    100_000
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

fn default_retry_attempts() -> u32 {
    5
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_path(),
            capacity: default_capacity(),
            busy_timeout_ms: default_busy_timeout_ms(),
            retry_attempts: default_retry_attempts(),
        }
    }
}

impl StoreConfig {
    /// Validate the settings.
    pub fn validate(&self) -> Result<(), String> {
        if self.path.as_os_str().is_empty() {
            return Err("store.path cannot be empty".to_string());
        }
        if self.capacity == 0 {
            return Err("store.capacity must be greater than 0".to_string());
        }
        if self.retry_attempts == 0 {
            return Err("store.retry_attempts must be at least 1".to_string());
        }
        Ok(())
    }
}
