//! SmartFactory Common Library
//!
//! Shared types and utilities for the SmartFactory collection gateway:
//!
//! - [`reading`] - Controller sample model (`Reading`, `TagValue`, `Quality`)
//! - [`serialization`] - JSON/CBOR encoding and decoding
//! - [`backoff`] - Exponential backoff policy
//! - [`config`] - Configuration loading (JSON5 format) and logging settings
//! - [`shutdown`] - Cooperative shutdown signal for long-running loops
//! - [`error`] - Error types

pub mod backoff;
pub mod config;
pub mod error;
pub mod reading;
pub mod serialization;
pub mod shutdown;

// Re-export commonly used types at the crate root
pub use backoff::Backoff;
pub use config::{LogFormat, LoggingConfig, load_config, parse_config};
pub use error::{Error, Result};
pub use reading::{Quality, Reading, TagValue, current_timestamp_millis, monotonic_millis};
pub use serialization::{Format, decode, encode};
pub use shutdown::{Shutdown, ShutdownTrigger};

/// Initialize tracing with the given configuration.
///
/// `RUST_LOG` takes precedence over `config.level` when set.
///
/// # Example
///
/// ```ignore
/// use smartfactory_common::{LoggingConfig, LogFormat, init_tracing};
///
/// let config = LoggingConfig {
///     level: "info".to_string(),
///     format: LogFormat::Json,
/// };
/// init_tracing(&config)?;
/// ```
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    match config.format {
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(fmt::layer())
                .with(filter)
                .try_init()
                .map_err(|e| Error::Config(format!("Failed to initialize tracing: {}", e)))?;
        }
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(fmt::layer().json())
                .with(filter)
                .try_init()
                .map_err(|e| Error::Config(format!("Failed to initialize tracing: {}", e)))?;
        }
    }

    Ok(())
}
