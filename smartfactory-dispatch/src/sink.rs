//! Batch delivery targets.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::{CONTENT_TYPE, HeaderName, HeaderValue};
use serde::Serialize;
use smartfactory_common::{Format, Reading, current_timestamp_millis, encode};
use smartfactory_store::{Batch, BatchId};
use tracing::debug;

use crate::config::DispatchConfig;
use crate::error::{DeliveryError, DispatchError, Result};

/// Longest response body kept in a rejection error.
const MAX_ERROR_BODY: usize = 256;

/// Somewhere batches can be delivered.
#[async_trait]
pub trait BatchSink: Send + Sync {
    /// Deliver one batch. `Ok` means the endpoint accepted it.
    async fn deliver(&self, batch: &Batch) -> std::result::Result<(), DeliveryError>;

    /// Destination for logs.
    fn destination(&self) -> &str;
}

/// Wire payload of one batch.
#[derive(Debug, Serialize)]
pub struct BatchPayload<'a> {
    pub batch_id: BatchId,
    pub gateway: &'a str,
    /// Unix millis when the request was built.
    pub sent_at: i64,
    pub readings: &'a [Reading],
}

/// Delivers batches with an HTTP POST.
#[derive(Debug, Clone)]
pub struct HttpSink {
    client: reqwest::Client,
    url: String,
    api_key_header: HeaderName,
    api_key: HeaderValue,
    gateway: String,
    format: Format,
    timeout: Duration,
}

impl HttpSink {
    /// Build a sink from validated dispatch settings.
    pub fn new(config: &DispatchConfig, gateway: impl Into<String>) -> Result<Self> {
        let api_key = config
            .api_key()
            .ok_or_else(|| DispatchError::Config("api_key is required".to_string()))?;
        let mut api_key = HeaderValue::from_str(api_key)
            .map_err(|_| DispatchError::Config("api_key is not a valid header value".to_string()))?;
        api_key.set_sensitive(true);

        let api_key_header = HeaderName::from_bytes(config.api_key_header.as_bytes())
            .map_err(|e| DispatchError::Config(format!("api_key_header: {}", e)))?;

        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .user_agent(concat!("smartfactory-gateway/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            url: config.endpoint_url.trim().to_string(),
            api_key_header,
            api_key,
            gateway: gateway.into(),
            format: config.format,
            timeout: config.request_timeout(),
        })
    }

    fn classify(&self, error: reqwest::Error) -> DeliveryError {
        if error.is_timeout() {
            DeliveryError::Timeout(self.timeout)
        } else {
            DeliveryError::Unreachable(error.to_string())
        }
    }
}

#[async_trait]
impl BatchSink for HttpSink {
    async fn deliver(&self, batch: &Batch) -> std::result::Result<(), DeliveryError> {
        let payload = BatchPayload {
            batch_id: batch.id(),
            gateway: &self.gateway,
            sent_at: current_timestamp_millis(),
            readings: batch.readings(),
        };
        let body = encode(&payload, self.format).map_err(|e| DeliveryError::Encode(e.to_string()))?;

        let response = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, self.format.mime_type())
            .header(self.api_key_header.clone(), self.api_key.clone())
            .body(body)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status();
        if status.is_success() {
            debug!(batch = %batch.id(), status = status.as_u16(), "Batch accepted");
            return Ok(());
        }

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(DeliveryError::Auth {
                status: status.as_u16(),
            });
        }

        let body = response.text().await.unwrap_or_default();
        Err(DeliveryError::Rejected {
            status: status.as_u16(),
            body: body.chars().take(MAX_ERROR_BODY).collect(),
        })
    }

    fn destination(&self) -> &str {
        &self.url
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(api_key: Option<&str>) -> DispatchConfig {
        DispatchConfig {
            endpoint_url: "http://127.0.0.1:9/ingest".to_string(),
            api_key: api_key.map(str::to_string),
            ..DispatchConfig::default()
        }
    }

    #[test]
    fn test_requires_api_key() {
        assert!(matches!(
            HttpSink::new(&config(None), "line-1"),
            Err(DispatchError::Config(_))
        ));
        assert!(HttpSink::new(&config(Some("secret")), "line-1").is_ok());
    }

    #[test]
    fn test_payload_shape() {
        let readings = vec![Reading::new("plc01", "T1", 10i64.into()).with_timestamp(1)];
        let payload = BatchPayload {
            batch_id: BatchId(7),
            gateway: "line-1",
            sent_at: 2,
            readings: &readings,
        };

        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["batch_id"], 7);
        assert_eq!(json["gateway"], "line-1");
        assert_eq!(json["readings"][0]["tag"], "T1");
        assert_eq!(json["readings"][0]["value"], 10);
    }
}
