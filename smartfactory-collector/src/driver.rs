//! Protocol-agnostic controller driver interface.

use async_trait::async_trait;
use smartfactory_common::{Reading, TagValue};

use crate::config::{ControllerConfig, DriverConfig};
use crate::error::Result;
use crate::modbus::ModbusDriver;
use crate::opcua::OpcuaDriver;
use crate::simulated::SimulatedDriver;

/// A session-oriented connection to one controller.
///
/// Sessions call `connect` once and then `poll` repeatedly until a poll
/// fails, at which point the session is considered lost. Implementations do
/// not apply timeouts themselves; the session wraps every call.
#[async_trait]
pub trait ControllerDriver: Send {
    /// Endpoint name stamped on every reading.
    fn endpoint(&self) -> &str;

    /// Establish a session.
    ///
    /// Fails with [`ControllerError::Auth`](crate::ControllerError::Auth)
    /// when credentials are rejected and
    /// [`ControllerError::Connection`](crate::ControllerError::Connection)
    /// otherwise.
    async fn connect(&mut self) -> Result<()>;

    /// Read every configured tag once.
    async fn poll(&mut self) -> Result<Vec<Reading>>;

    /// Close the session. Safe to call when not connected.
    async fn disconnect(&mut self) -> Result<()>;
}

/// Build the driver described by an endpoint's configuration.
pub fn build_driver(config: &ControllerConfig) -> Box<dyn ControllerDriver> {
    match &config.driver {
        DriverConfig::Modbus(modbus) => Box::new(ModbusDriver::new(&config.name, modbus.clone())),
        DriverConfig::Opcua(opcua) => Box::new(OpcuaDriver::new(&config.name, opcua.clone())),
        DriverConfig::Simulated(sim) => Box::new(SimulatedDriver::new(&config.name, sim.clone())),
    }
}

/// Build the reading for a decoded value.
///
/// NaN and infinite floats carry no usable value and are recorded as bad.
pub fn tag_reading(endpoint: &str, tag: &str, value: TagValue) -> Reading {
    match value {
        TagValue::Float(v) if !v.is_finite() => Reading::bad(endpoint, tag),
        value => Reading::new(endpoint, tag, value),
    }
}
