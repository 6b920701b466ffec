//! SmartFactory collection gateway.
//!
//! Ties the pieces together for the `smartfactory-gateway` binary:
//!
//! - [`config`] - JSON5 configuration, validated before any I/O
//! - [`runner`] - Task lifecycle and graceful shutdown
//! - [`health`] - Periodic health snapshots
//! - [`args`] - Command-line arguments

pub mod args;
pub mod config;
pub mod error;
pub mod health;
pub mod runner;
pub mod status;

pub use args::GatewayArgs;
pub use config::{ConfigError, GatewayConfig, GatewaySettings, HistorianConfig};
pub use error::{GatewayError, Result};
pub use health::HealthReporter;
pub use runner::GatewayRunner;
pub use status::{GatewayState, HealthSnapshot, write_status_file};
