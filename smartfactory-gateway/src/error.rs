//! Gateway error types.

use thiserror::Error;

use crate::config::ConfigError;

/// Errors that stop the gateway from starting.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Local store unavailable: {0}")]
    Store(#[from] smartfactory_store::StoreError),

    #[error("Dispatch setup failed: {0}")]
    Dispatch(#[from] smartfactory_dispatch::DispatchError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias using GatewayError.
pub type Result<T> = std::result::Result<T, GatewayError>;
