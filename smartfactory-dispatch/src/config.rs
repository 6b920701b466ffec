//! Dispatch configuration.

use std::time::Duration;

use reqwest::header::{HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use smartfactory_common::{Backoff, Format};

/// Settings for batch delivery to the remote collection endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Collection endpoint URL (http or https)
    #[serde(default)]
    pub endpoint_url: String,

    /// API key sent with every request
    #[serde(default)]
    pub api_key: Option<String>,

    /// Header carrying the API key
    #[serde(default = "default_api_key_header")]
    pub api_key_header: String,

    /// Seconds between dispatch cycles
    #[serde(default = "default_send_interval_secs", alias = "taxa_de_envio")]
    pub send_interval_secs: u64,

    /// Maximum readings per batch
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,

    /// Per-request timeout in milliseconds
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Delivery attempts before a batch is dead-lettered
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay between delivery attempts of the same batch
    #[serde(default)]
    pub retry: Backoff,

    /// Payload encoding
    #[serde(default)]
    pub format: Format,
}

fn default_api_key_header() -> String {
    "x-api-key".to_string()
}

fn default_send_interval_secs() -> u64 {
    60
}

fn default_max_batch_size() -> usize {
    500
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_max_attempts() -> u32 {
    5
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            endpoint_url: String::new(),
            api_key: None,
            api_key_header: default_api_key_header(),
            send_interval_secs: default_send_interval_secs(),
            max_batch_size: default_max_batch_size(),
            request_timeout_ms: default_request_timeout_ms(),
            max_attempts: default_max_attempts(),
            retry: Backoff::default(),
            format: Format::default(),
        }
    }
}

impl DispatchConfig {
    pub fn send_interval(&self) -> Duration {
        Duration::from_secs(self.send_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// The API key, if one is set and non-empty.
    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref().filter(|key| !key.trim().is_empty())
    }

    /// Validate the settings.
    pub fn validate(&self) -> Result<(), String> {
        let url = self.endpoint_url.trim();
        if url.is_empty() {
            return Err("dispatch.endpoint_url is required".to_string());
        }
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(format!(
                "dispatch.endpoint_url must start with http:// or https:// (got '{}')",
                url
            ));
        }

        let key = self
            .api_key()
            .ok_or_else(|| "dispatch.api_key is required".to_string())?;
        HeaderValue::from_str(key)
            .map_err(|_| "dispatch.api_key contains characters not allowed in a header".to_string())?;
        HeaderName::from_bytes(self.api_key_header.as_bytes()).map_err(|_| {
            format!(
                "dispatch.api_key_header '{}' is not a valid header name",
                self.api_key_header
            )
        })?;

        if self.send_interval_secs == 0 {
            return Err("dispatch.send_interval_secs must be greater than 0".to_string());
        }
        if self.max_batch_size == 0 {
            return Err("dispatch.max_batch_size must be greater than 0".to_string());
        }
        if self.request_timeout_ms == 0 {
            return Err("dispatch.request_timeout_ms must be greater than 0".to_string());
        }
        if self.max_attempts == 0 {
            return Err("dispatch.max_attempts must be at least 1".to_string());
        }
        self.retry
            .validate()
            .map_err(|e| format!("dispatch.retry: {}", e))
    }
}
