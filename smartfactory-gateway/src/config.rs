//! Gateway configuration.
//!
//! Loaded once from a JSON5 file and validated before anything touches the
//! network or the local store. Not reloaded at runtime.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use smartfactory_collector::{ControllerConfig, validate_controllers};
use smartfactory_common::{LoggingConfig, load_config, parse_config};
use smartfactory_dispatch::DispatchConfig;
use smartfactory_store::StoreConfig;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    NotFound { path: String },
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Parse(#[from] smartfactory_common::Error),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Historian config {path}: {message}")]
    Historian { path: String, message: String },
}

/// Complete gateway configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Gateway identity and process settings
    #[serde(default)]
    pub gateway: GatewaySettings,

    /// Remote collection endpoint
    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// Local store
    #[serde(default)]
    pub store: StoreConfig,

    /// Controllers to sample
    #[serde(default)]
    pub controllers: Vec<ControllerConfig>,

    /// Path to a separate Historian document, relative to this file
    #[serde(default)]
    pub historian_config: Option<PathBuf>,

    /// Historian settings loaded from `historian_config`
    #[serde(skip)]
    pub historian: Option<HistorianConfig>,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Gateway identity and process settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewaySettings {
    /// Gateway name sent with every batch
    #[serde(default = "default_gateway_name")]
    pub name: String,

    /// Seconds to wait for tasks to stop before aborting them
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,

    /// Seconds between health snapshots
    #[serde(default = "default_health_interval_secs")]
    pub health_interval_secs: u64,

    /// Write each health snapshot to this file as JSON
    #[serde(default)]
    pub status_file: Option<PathBuf>,
}

fn default_gateway_name() -> String {
    "smartfactory".to_string()
}

fn default_shutdown_grace_secs() -> u64 {
    10
}

fn default_health_interval_secs() -> u64 {
    60
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            name: default_gateway_name(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
            health_interval_secs: default_health_interval_secs(),
            status_file: None,
        }
    }
}

/// Historian database connection settings.
///
/// Loaded and validated only; the gateway does not connect to the Historian.
#[derive(Clone, Serialize, Deserialize)]
pub struct HistorianConfig {
    pub host: String,
    pub user: String,
    #[serde(default)]
    pub password: String,
}

impl std::fmt::Debug for HistorianConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HistorianConfig")
            .field("host", &self.host)
            .field("user", &self.user)
            .field("password", &"***")
            .finish()
    }
}

impl HistorianConfig {
    fn validate(&self) -> Result<(), String> {
        if self.host.trim().is_empty() {
            return Err("host cannot be empty".to_string());
        }
        if self.user.trim().is_empty() {
            return Err("user cannot be empty".to_string());
        }
        Ok(())
    }
}

impl GatewayConfig {
    /// Load and validate configuration from a JSON5 file.
    ///
    /// A relative `historian_config` path is resolved against the directory
    /// of `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::NotFound {
                path: path.display().to_string(),
            });
        }

        let content = std::fs::read_to_string(path)?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        Self::parse(&content, base_dir)
    }

    /// Parse and validate configuration text.
    pub fn parse(content: &str, base_dir: &Path) -> Result<Self, ConfigError> {
        let mut config: GatewayConfig = parse_config(content)?;
        config.validate()?;

        if let Some(historian_path) = &config.historian_config {
            let resolved = if historian_path.is_absolute() {
                historian_path.clone()
            } else {
                base_dir.join(historian_path)
            };
            config.historian = Some(load_historian(&resolved)?);
        }

        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.gateway.name.trim().is_empty() {
            return Err(ConfigError::Validation(
                "gateway.name cannot be empty".to_string(),
            ));
        }
        if self.gateway.shutdown_grace_secs == 0 {
            return Err(ConfigError::Validation(
                "gateway.shutdown_grace_secs must be greater than 0".to_string(),
            ));
        }
        if self.gateway.health_interval_secs == 0 {
            return Err(ConfigError::Validation(
                "gateway.health_interval_secs must be greater than 0".to_string(),
            ));
        }

        self.dispatch.validate().map_err(ConfigError::Validation)?;
        self.store.validate().map_err(ConfigError::Validation)?;
        validate_controllers(&self.controllers).map_err(ConfigError::Validation)?;

        Ok(())
    }
}

fn load_historian(path: &Path) -> Result<HistorianConfig, ConfigError> {
    let historian_error = |message: String| ConfigError::Historian {
        path: path.display().to_string(),
        message,
    };

    let historian: HistorianConfig =
        load_config(path).map_err(|e| historian_error(e.to_string()))?;
    historian.validate().map_err(historian_error)?;

    Ok(historian)
}

#[cfg(test)]
mod tests {
    use super::*;
    use smartfactory_collector::DriverConfig;

    const MINIMAL: &str = r#"{
        dispatch: { endpoint_url: "https://collector.example.com/ingest", api_key: "secret" },
        controllers: [
            { name: "sim", driver: { type: "simulated", tags: [ { name: "T1" } ] } }
        ]
    }"#;

    #[test]
    fn test_minimal_config() {
        let config = GatewayConfig::parse(MINIMAL, Path::new(".")).unwrap();

        assert_eq!(config.gateway.name, "smartfactory");
        assert_eq!(config.gateway.shutdown_grace_secs, 10);
        assert_eq!(config.dispatch.send_interval_secs, 60);
        assert_eq!(config.controllers.len(), 1);
        assert!(matches!(
            config.controllers[0].driver,
            DriverConfig::Simulated(_)
        ));
        assert!(config.historian.is_none());
    }

    #[test]
    fn test_full_config() {
        let json = r#"{
            gateway: { name: "line-1", health_interval_secs: 30, status_file: "/tmp/status.json" },
            dispatch: {
                endpoint_url: "https://collector.example.com/ingest",
                api_key: "secret",
                taxa_de_envio: 30,
                format: "cbor",
            },
            store: { path: "/var/lib/smartfactory/buffer.db", capacity: 5000 },
            controllers: [
                {
                    name: "plc01",
                    driver: {
                        type: "modbus",
                        connection: { type: "tcp", host: "10.0.0.5" },
                        tags: [ { name: "temp", type: "holding", address: 0, data_type: "f32" } ]
                    },
                    poll_interval_ms: 500,
                },
            ],
            logging: { level: "debug", format: "json" },
        }"#;

        let config = GatewayConfig::parse(json, Path::new(".")).unwrap();
        assert_eq!(config.gateway.name, "line-1");
        assert_eq!(config.dispatch.send_interval_secs, 30);
        assert_eq!(config.store.capacity, 5000);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_no_controllers() {
        let json = r#"{
            dispatch: { endpoint_url: "https://collector.example.com/ingest", api_key: "secret" }
        }"#;
        let err = GatewayConfig::parse(json, Path::new(".")).unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn test_malformed_json() {
        let err = GatewayConfig::parse("{ dispatch: ", Path::new(".")).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_missing_file() {
        let err = GatewayConfig::load("/nonexistent/smartfactory.json5").unwrap_err();
        assert!(matches!(err, ConfigError::NotFound { .. }));
    }

    #[test]
    fn test_historian_password_redacted() {
        let historian = HistorianConfig {
            host: "historian.local".to_string(),
            user: "reader".to_string(),
            password: "hunter2".to_string(),
        };
        let debug = format!("{:?}", historian);
        assert!(debug.contains("historian.local"));
        assert!(!debug.contains("hunter2"));
    }
}
