//! Controller endpoint configuration.

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use opcua::types::NodeId;
use smartfactory_common::Backoff;

/// Configuration for a single controller endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Endpoint name (stamped on every reading)
    pub name: String,

    /// Protocol driver and its parameters
    pub driver: DriverConfig,

    /// Poll interval in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Timeout for each connect, poll and disconnect in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Reconnect backoff
    #[serde(default)]
    pub reconnect: Backoff,
}

fn default_poll_interval_ms() -> u64 {
    1_000
}

fn default_timeout_ms() -> u64 {
    10_000
}

impl ControllerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Validate the endpoint settings.
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("Controller name cannot be empty".to_string());
        }
        if self.poll_interval_ms == 0 {
            return Err(format!(
                "Controller '{}': poll_interval_ms must be greater than 0",
                self.name
            ));
        }
        if self.timeout_ms == 0 {
            return Err(format!(
                "Controller '{}': timeout_ms must be greater than 0",
                self.name
            ));
        }
        self.reconnect
            .validate()
            .map_err(|e| format!("Controller '{}': reconnect: {}", self.name, e))?;
        self.driver
            .validate()
            .map_err(|e| format!("Controller '{}': {}", self.name, e))
    }
}

/// Validate a set of endpoints, including name uniqueness.
pub fn validate_controllers(controllers: &[ControllerConfig]) -> Result<(), String> {
    if controllers.is_empty() {
        return Err("At least one controller must be configured".to_string());
    }

    let mut seen = HashSet::new();
    for controller in controllers {
        controller.validate()?;
        if !seen.insert(controller.name.as_str()) {
            return Err(format!("Duplicate controller name '{}'", controller.name));
        }
    }

    Ok(())
}

/// Protocol driver selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DriverConfig {
    /// Modbus TCP or RTU controller
    Modbus(ModbusDriverConfig),
    /// OPC UA server
    Opcua(OpcuaDriverConfig),
    /// Built-in signal generator
    Simulated(SimulatedDriverConfig),
}

impl DriverConfig {
    /// Driver name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            DriverConfig::Modbus(_) => "modbus",
            DriverConfig::Opcua(_) => "opcua",
            DriverConfig::Simulated(_) => "simulated",
        }
    }

    fn validate(&self) -> Result<(), String> {
        match self {
            DriverConfig::Modbus(config) => config.validate(),
            DriverConfig::Opcua(config) => config.validate(),
            DriverConfig::Simulated(config) => config.validate(),
        }
    }
}

/// Modbus driver settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModbusDriverConfig {
    /// Connection type and address
    pub connection: ConnectionConfig,

    /// Modbus unit/slave ID (1-247)
    #[serde(default = "default_unit_id")]
    pub unit_id: u8,

    /// Tags to sample on every poll
    pub tags: Vec<ModbusTag>,
}

fn default_unit_id() -> u8 {
    1
}

impl ModbusDriverConfig {
    fn validate(&self) -> Result<(), String> {
        if self.unit_id == 0 || self.unit_id > 247 {
            return Err(format!("unit_id must be 1-247, got {}", self.unit_id));
        }
        if self.tags.is_empty() {
            return Err("at least one tag must be configured".to_string());
        }
        validate_tag_names(self.tags.iter().map(|t| t.name.as_str()))?;

        match &self.connection {
            ConnectionConfig::Tcp { host, .. } => {
                if host.trim().is_empty() {
                    return Err("tcp host cannot be empty".to_string());
                }
            }
            ConnectionConfig::Rtu {
                port,
                parity,
                data_bits,
                stop_bits,
                ..
            } => {
                if port.trim().is_empty() {
                    return Err("rtu port cannot be empty".to_string());
                }
                match parity.to_lowercase().as_str() {
                    "none" | "even" | "odd" => {}
                    _ => {
                        return Err(format!(
                            "invalid parity '{}' (use none, even, or odd)",
                            parity
                        ));
                    }
                }
                if !(5..=8).contains(data_bits) {
                    return Err(format!("data_bits must be 5-8, got {}", data_bits));
                }
                if !matches!(stop_bits, 1 | 2) {
                    return Err(format!("stop_bits must be 1 or 2, got {}", stop_bits));
                }
            }
        }

        Ok(())
    }
}

/// Connection configuration (TCP or RTU).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ConnectionConfig {
    /// Modbus TCP connection
    Tcp {
        /// Host address (IP or hostname)
        host: String,
        /// TCP port (default: 502)
        #[serde(default = "default_modbus_port")]
        port: u16,
    },
    /// Modbus RTU (serial) connection
    Rtu {
        /// Serial port path (e.g., "/dev/ttyUSB0" or "COM1")
        port: String,
        /// Baud rate (default: 9600)
        #[serde(default = "default_baud_rate")]
        baud_rate: u32,
        /// Data bits (default: 8)
        #[serde(default = "default_data_bits")]
        data_bits: u8,
        /// Parity: "none", "even", or "odd" (default: "none")
        #[serde(default = "default_parity")]
        parity: String,
        /// Stop bits: 1 or 2 (default: 1)
        #[serde(default = "default_stop_bits")]
        stop_bits: u8,
    },
}

fn default_modbus_port() -> u16 {
    502
}

fn default_baud_rate() -> u32 {
    9600
}

fn default_data_bits() -> u8 {
    8
}

fn default_parity() -> String {
    "none".to_string()
}

fn default_stop_bits() -> u8 {
    1
}

/// A Modbus tag: one value read from a register address.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModbusTag {
    /// Tag identifier on emitted readings
    pub name: String,

    /// Register type
    #[serde(rename = "type")]
    pub register_type: RegisterType,

    /// Register address (0-based)
    pub address: u16,

    /// Data type interpretation for holding/input registers
    #[serde(default)]
    pub data_type: DataType,

    /// Scaling factor (value * scale)
    #[serde(default = "default_scale")]
    pub scale: f64,

    /// Offset (value * scale + offset)
    #[serde(default)]
    pub offset: f64,
}

fn default_scale() -> f64 {
    1.0
}

impl ModbusTag {
    /// Whether scale or offset change the raw value.
    pub fn is_scaled(&self) -> bool {
        self.scale != 1.0 || self.offset != 0.0
    }
}

/// Modbus register types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegisterType {
    /// Discrete output coils (read/write, 1-bit)
    Coil,
    /// Discrete input contacts (read-only, 1-bit)
    Discrete,
    /// Input registers (read-only, 16-bit)
    Input,
    /// Holding registers (read/write, 16-bit)
    Holding,
}

impl RegisterType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RegisterType::Coil => "coil",
            RegisterType::Discrete => "discrete",
            RegisterType::Input => "input",
            RegisterType::Holding => "holding",
        }
    }
}

/// Data type interpretation for 16-bit registers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    /// Unsigned 16-bit integer (default)
    #[default]
    U16,
    /// Signed 16-bit integer
    I16,
    /// Unsigned 32-bit integer (2 registers, big-endian)
    U32,
    /// Signed 32-bit integer (2 registers, big-endian)
    I32,
    /// 32-bit float (2 registers, big-endian)
    F32,
    /// Unsigned 32-bit integer (2 registers, little-endian word order)
    U32Le,
    /// Signed 32-bit integer (2 registers, little-endian word order)
    I32Le,
    /// 32-bit float (2 registers, little-endian word order)
    F32Le,
}

impl DataType {
    /// Number of 16-bit registers one value occupies.
    pub fn register_count(&self) -> u16 {
        match self {
            DataType::U16 | DataType::I16 => 1,
            _ => 2,
        }
    }

    pub fn is_float(&self) -> bool {
        matches!(self, DataType::F32 | DataType::F32Le)
    }
}

/// OPC UA driver settings.
#[derive(Clone, Serialize, Deserialize)]
pub struct OpcuaDriverConfig {
    /// Server endpoint (e.g., "opc.tcp://10.0.0.7:4840")
    pub endpoint_url: String,

    /// User name; anonymous when absent
    #[serde(default)]
    pub user: Option<String>,

    /// Password for `user`
    #[serde(default)]
    pub password: Option<String>,

    /// Directory holding the client certificate and trusted server certificates
    #[serde(default = "default_pki_dir")]
    pub pki_dir: PathBuf,

    /// Nodes to sample on every poll
    pub tags: Vec<OpcuaTag>,
}

fn default_pki_dir() -> PathBuf {
    PathBuf::from("pki")
}

impl OpcuaDriverConfig {
    fn validate(&self) -> Result<(), String> {
        if !self.endpoint_url.starts_with("opc.tcp://") {
            return Err(format!(
                "endpoint_url must start with opc.tcp://, got '{}'",
                self.endpoint_url
            ));
        }
        if self.password.is_some() && self.user.is_none() {
            return Err("password set without user".to_string());
        }
        if self.tags.is_empty() {
            return Err("at least one tag must be configured".to_string());
        }
        for tag in &self.tags {
            tag.parse_node_id()
                .map_err(|e| format!("tag '{}': {}", tag.name, e))?;
        }
        validate_tag_names(self.tags.iter().map(|t| t.name.as_str()))
    }
}

impl std::fmt::Debug for OpcuaDriverConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpcuaDriverConfig")
            .field("endpoint_url", &self.endpoint_url)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("pki_dir", &self.pki_dir)
            .field("tags", &self.tags)
            .finish()
    }
}

/// An OPC UA tag: the value attribute of one node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpcuaTag {
    /// Tag identifier on emitted readings
    pub name: String,

    /// Node identifier (e.g., "ns=2;s=Line1.Temperature")
    pub node_id: String,
}

impl OpcuaTag {
    pub fn parse_node_id(&self) -> Result<NodeId, String> {
        self.node_id
            .parse::<NodeId>()
            .map_err(|_| format!("invalid node id '{}'", self.node_id))
    }
}

/// Simulated driver settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SimulatedDriverConfig {
    /// Generated tags
    pub tags: Vec<SimulatedTag>,

    /// Drop the session on every Nth poll
    #[serde(default)]
    pub drop_every: Option<u64>,

    /// Fail the first N connect attempts
    #[serde(default)]
    pub fail_connects: u32,

    /// Reject every connect attempt with an authentication error
    #[serde(default)]
    pub reject_credentials: bool,

    /// Artificial delay per poll in milliseconds
    #[serde(default)]
    pub response_delay_ms: u64,
}

impl SimulatedDriverConfig {
    fn validate(&self) -> Result<(), String> {
        if self.tags.is_empty() {
            return Err("at least one tag must be configured".to_string());
        }
        if self.drop_every == Some(0) {
            return Err("drop_every must be greater than 0".to_string());
        }
        for tag in &self.tags {
            if tag.period == 0 {
                return Err(format!("tag '{}': period must be greater than 0", tag.name));
            }
        }
        validate_tag_names(self.tags.iter().map(|t| t.name.as_str()))
    }
}

/// A generated tag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatedTag {
    /// Tag identifier on emitted readings
    pub name: String,

    /// Waveform
    #[serde(default)]
    pub signal: Signal,

    /// Peak deviation from `offset` (sine, ramp, square)
    #[serde(default = "default_amplitude")]
    pub amplitude: f64,

    /// Baseline value (value of `constant`)
    #[serde(default)]
    pub offset: f64,

    /// Waveform period in polls
    #[serde(default = "default_period")]
    pub period: u64,
}

fn default_amplitude() -> f64 {
    1.0
}

fn default_period() -> u64 {
    60
}

/// Simulated waveforms.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Signal {
    #[default]
    Sine,
    Ramp,
    Square,
    Counter,
    Constant,
}

fn validate_tag_names<'a>(names: impl Iterator<Item = &'a str>) -> Result<(), String> {
    let mut seen = HashSet::new();
    for name in names {
        if name.trim().is_empty() {
            return Err("tag name cannot be empty".to_string());
        }
        if !seen.insert(name) {
            return Err(format!("duplicate tag '{}'", name));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_modbus_tcp() {
        let json = r#"{
            name: "plc01",
            driver: {
                type: "modbus",
                connection: { type: "tcp", host: "192.168.1.10" },
                tags: [
                    { name: "temperature", type: "holding", address: 0, data_type: "f32" },
                    { name: "running", type: "coil", address: 4 }
                ]
            }
        }"#;

        let config: ControllerConfig = json5::from_str(json).unwrap();
        config.validate().unwrap();
        assert_eq!(config.poll_interval_ms, 1_000);
        assert_eq!(config.timeout_ms, 10_000);

        let DriverConfig::Modbus(modbus) = &config.driver else {
            panic!("Expected modbus driver");
        };
        assert_eq!(modbus.unit_id, 1);
        assert_eq!(modbus.tags[0].data_type, DataType::F32);
        assert_eq!(modbus.tags[1].register_type, RegisterType::Coil);
        if let ConnectionConfig::Tcp { host, port } = &modbus.connection {
            assert_eq!(host, "192.168.1.10");
            assert_eq!(*port, 502);
        } else {
            panic!("Expected TCP connection");
        }
    }

    #[test]
    fn test_parse_modbus_rtu() {
        let json = r#"{
            name: "sensor01",
            driver: {
                type: "modbus",
                unit_id: 5,
                connection: { type: "rtu", port: "/dev/ttyUSB0", baud_rate: 19200, parity: "even" },
                tags: [ { name: "flow", type: "input", address: 2, data_type: "i32le", scale: 0.1 } ]
            },
            poll_interval_ms: 500,
            reconnect: { initial_delay_ms: 200, max_delay_ms: 5000 }
        }"#;

        let config: ControllerConfig = json5::from_str(json).unwrap();
        config.validate().unwrap();
        assert_eq!(config.reconnect.max_delay(), Duration::from_secs(5));

        let DriverConfig::Modbus(modbus) = &config.driver else {
            panic!("Expected modbus driver");
        };
        assert_eq!(modbus.unit_id, 5);
        assert!(modbus.tags[0].is_scaled());
        assert_eq!(modbus.tags[0].data_type.register_count(), 2);
    }

    #[test]
    fn test_invalid_parity() {
        let json = r#"{
            name: "sensor01",
            driver: {
                type: "modbus",
                connection: { type: "rtu", port: "/dev/ttyUSB0", parity: "mark" },
                tags: [ { name: "flow", type: "input", address: 2 } ]
            }
        }"#;

        let config: ControllerConfig = json5::from_str(json).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.contains("parity"));
    }

    #[test]
    fn test_parse_opcua() {
        let json = r#"{
            name: "press01",
            driver: {
                type: "opcua",
                endpoint_url: "opc.tcp://10.0.0.7:4840",
                user: "reader",
                password: "s3cret",
                tags: [
                    { name: "pressure", node_id: "ns=2;s=Press1.Pressure" },
                    { name: "cycles", node_id: "ns=2;i=1042" }
                ]
            }
        }"#;

        let config: ControllerConfig = json5::from_str(json).unwrap();
        config.validate().unwrap();
        assert_eq!(config.driver.kind(), "opcua");

        let DriverConfig::Opcua(opcua) = &config.driver else {
            panic!("Expected opcua driver");
        };
        assert_eq!(opcua.pki_dir, PathBuf::from("pki"));
        assert_eq!(opcua.tags[1].parse_node_id().unwrap(), NodeId::new(2, 1042u32));

        let debug = format!("{:?}", opcua);
        assert!(!debug.contains("s3cret"));
    }

    #[test]
    fn test_opcua_rejects_bad_node_id() {
        let json = r#"{
            name: "press01",
            driver: {
                type: "opcua",
                endpoint_url: "opc.tcp://10.0.0.7:4840",
                tags: [ { name: "pressure", node_id: "Press1.Pressure" } ]
            }
        }"#;

        let config: ControllerConfig = json5::from_str(json).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.contains("pressure"), "{err}");
    }

    #[test]
    fn test_opcua_rejects_non_opc_url() {
        let json = r#"{
            name: "press01",
            driver: {
                type: "opcua",
                endpoint_url: "http://10.0.0.7:4840",
                tags: [ { name: "pressure", node_id: "ns=2;s=Press1.Pressure" } ]
            }
        }"#;

        let config: ControllerConfig = json5::from_str(json).unwrap();
        assert!(config.validate().unwrap_err().contains("opc.tcp"));
    }

    #[test]
    fn test_parse_simulated() {
        let json = r#"{
            name: "sim",
            driver: {
                type: "simulated",
                drop_every: 10,
                tags: [
                    { name: "T1", signal: "counter" },
                    { name: "T2", signal: "sine", amplitude: 5.0, offset: 20.0, period: 12 }
                ]
            }
        }"#;

        let config: ControllerConfig = json5::from_str(json).unwrap();
        config.validate().unwrap();
        assert_eq!(config.driver.kind(), "simulated");
    }

    #[test]
    fn test_zero_interval_rejected() {
        let json = r#"{
            name: "sim",
            poll_interval_ms: 0,
            driver: { type: "simulated", tags: [ { name: "T1" } ] }
        }"#;

        let config: ControllerConfig = json5::from_str(json).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_duplicate_tags_rejected() {
        let json = r#"{
            name: "sim",
            driver: { type: "simulated", tags: [ { name: "T1" }, { name: "T1" } ] }
        }"#;

        let config: ControllerConfig = json5::from_str(json).unwrap();
        assert!(config.validate().unwrap_err().contains("duplicate tag"));
    }

    #[test]
    fn test_validate_controllers() {
        let sim = |name: &str| -> ControllerConfig {
            json5::from_str(&format!(
                r#"{{ name: "{}", driver: {{ type: "simulated", tags: [ {{ name: "T1" }} ] }} }}"#,
                name
            ))
            .unwrap()
        };

        assert!(validate_controllers(&[]).is_err());
        assert!(validate_controllers(&[sim("a"), sim("b")]).is_ok());
        assert!(
            validate_controllers(&[sim("a"), sim("a")])
                .unwrap_err()
                .contains("Duplicate")
        );
    }
}
