//! Dispatch errors.

use std::time::Duration;

use thiserror::Error;

/// Why a batch could not be delivered.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeliveryError {
    /// The endpoint rejected the API key (HTTP 401/403).
    #[error("Endpoint rejected credentials (HTTP {status})")]
    Auth { status: u16 },

    /// The endpoint answered with another non-2xx status.
    #[error("Endpoint rejected batch (HTTP {status}): {body}")]
    Rejected { status: u16, body: String },

    /// Connection refused, DNS failure, TLS failure and similar.
    #[error("Endpoint unreachable: {0}")]
    Unreachable(String),

    #[error("Delivery timed out after {0:?}")]
    Timeout(Duration),

    #[error("Failed to encode batch: {0}")]
    Encode(String),
}

/// Errors building the dispatch components.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Invalid dispatch configuration: {0}")]
    Config(String),

    #[error("Failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Result type for dispatch setup.
pub type Result<T> = std::result::Result<T, DispatchError>;
