//! SmartFactory Controller Client
//!
//! Maintains one long-lived session per industrial controller, samples its
//! tags on a fixed interval and appends the readings to the local store.
//!
//! - [`ControllerDriver`] - protocol seam (`modbus`, `opcua`, `simulated`)
//! - [`SessionState`] - pure reconnect state machine
//! - [`ControllerSession`] - the read loop with timeouts and backoff
//! - [`MetricsRegistry`] - per-endpoint connection metrics
//!
//! # Example
//!
//! ```ignore
//! let store = Arc::new(LocalStore::open(&store_config)?);
//! let metrics = MetricsRegistry::new();
//! let (trigger, shutdown) = smartfactory_common::shutdown::channel();
//!
//! for controller in &controllers {
//!     let session = ControllerSession::from_config(controller, store.clone(), metrics.clone());
//!     tokio::spawn(session.run(shutdown.clone()));
//! }
//! ```

pub mod config;
pub mod driver;
pub mod error;
pub mod metrics;
pub mod modbus;
pub mod opcua;
pub mod session;
pub mod simulated;
pub mod state;

pub use config::{ControllerConfig, DriverConfig, validate_controllers};
pub use driver::{ControllerDriver, build_driver};
pub use error::{ControllerError, Result};
pub use metrics::{ConnectionMetrics, ConnectionStatus, MetricsRegistry};
pub use session::ControllerSession;
pub use state::{SessionEvent, SessionState};
