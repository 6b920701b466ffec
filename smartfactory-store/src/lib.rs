//! SmartFactory Local Store
//!
//! Durable, crash-tolerant buffer of controller readings awaiting delivery
//! to the remote collection endpoint.
//!
//! # Lifecycle of a reading
//!
//! ```text
//! append ──► pending ──drain──► in flight ──acknowledge──► deleted
//!               ▲                   │
//!               └──────requeue──────┤
//!                                   └──dead_letter──► dead_letters table
//! ```
//!
//! Readings are persisted in SQLite on append, so reopening the store after
//! a crash recovers every reading that was not acknowledged or dead-lettered.

mod batch;
mod config;
mod error;
mod retry;
mod store;

pub use batch::{Batch, BatchId};
pub use config::StoreConfig;
pub use error::{Result, StoreError};
pub use retry::retry_transient;
pub use store::{AppendOutcome, DeadLetter, LocalStore, StoreStats};
