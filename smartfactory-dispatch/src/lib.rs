//! SmartFactory Dispatch Scheduler
//!
//! Periodically drains the local store and delivers batches to the remote
//! collection endpoint:
//!
//! - delivered batches are acknowledged (removed from the store);
//! - failed batches are requeued and retried with backoff;
//! - batches that exhaust `max_attempts` are dead-lettered.
//!
//! [`HttpSink`] is the production [`BatchSink`]; tests substitute their own.

pub mod config;
pub mod error;
pub mod record;
pub mod scheduler;
pub mod sink;

pub use config::DispatchConfig;
pub use error::{DeliveryError, DispatchError, Result};
pub use record::DeliveryRecord;
pub use scheduler::{DispatchScheduler, DispatchStats, StatsHandle};
pub use sink::{BatchPayload, BatchSink, HttpSink};
