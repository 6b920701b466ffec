//! Controller session errors.

use std::time::Duration;

use thiserror::Error;

/// Errors raised by controller drivers and sessions.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Network or protocol failure establishing or keeping a session.
    #[error("Connection failed: {0}")]
    Connection(String),

    /// The controller rejected the configured credentials.
    #[error("Authentication rejected: {0}")]
    Auth(String),

    /// A connect, poll or disconnect exceeded its timeout.
    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },

    /// The controller answered with something the driver cannot interpret.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// An operation that needs a session was called without one.
    #[error("Not connected")]
    NotConnected,
}

impl ControllerError {
    /// Whether the error is a credential rejection.
    pub fn is_auth(&self) -> bool {
        matches!(self, ControllerError::Auth(_))
    }
}

/// Result type for controller operations.
pub type Result<T> = std::result::Result<T, ControllerError>;
