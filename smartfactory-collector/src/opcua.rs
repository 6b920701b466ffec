//! OPC UA client driver.
//!
//! One session per controller, with the session's own reconnect disabled so
//! that the collector's backoff stays in charge. Every poll is a single read
//! of the value attribute of all configured nodes. Per-node status codes map
//! onto reading quality; only a failed read call ends the session.

use std::sync::Arc;

use async_trait::async_trait;
use opcua::client::{Client, ClientBuilder, IdentityToken, Session};
use opcua::crypto::SecurityPolicy;
use opcua::types::{
    DataValue, MessageSecurityMode, ReadValueId, StatusCode, TimestampsToReturn, UserTokenPolicy,
    Variant,
};
use smartfactory_common::{Quality, Reading, TagValue};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::OpcuaDriverConfig;
use crate::driver::{ControllerDriver, tag_reading};
use crate::error::{ControllerError, Result};

struct OpenSession {
    session: Arc<Session>,
    event_loop: JoinHandle<StatusCode>,
}

/// Driver for one OPC UA server.
pub struct OpcuaDriver {
    endpoint: String,
    config: OpcuaDriverConfig,
    client: Option<Client>,
    nodes: Vec<ReadValueId>,
    session: Option<OpenSession>,
}

impl OpcuaDriver {
    pub fn new(endpoint: impl Into<String>, config: OpcuaDriverConfig) -> Self {
        Self {
            endpoint: endpoint.into(),
            config,
            client: None,
            nodes: Vec::new(),
            session: None,
        }
    }

    fn identity(&self) -> IdentityToken {
        match &self.config.user {
            Some(user) => IdentityToken::UserName(
                user.clone(),
                self.config.password.clone().unwrap_or_default(),
            ),
            None => IdentityToken::Anonymous,
        }
    }

    /// Build the client and resolve node ids on first use.
    fn prepare(&mut self) -> Result<()> {
        if self.nodes.is_empty() {
            self.nodes = self
                .config
                .tags
                .iter()
                .map(|tag| {
                    tag.parse_node_id()
                        .map(ReadValueId::from)
                        .map_err(ControllerError::Protocol)
                })
                .collect::<Result<_>>()?;
        }

        if self.client.is_none() {
            let client = ClientBuilder::new()
                .application_name("SmartFactory Gateway")
                .application_uri(format!("urn:smartfactory:{}", self.endpoint))
                .product_uri("urn:smartfactory")
                .pki_dir(self.config.pki_dir.clone())
                .trust_server_certs(true)
                .create_sample_keypair(true)
                .session_retry_limit(0)
                .client()
                .map_err(|errors| {
                    ControllerError::Connection(format!(
                        "Invalid OPC UA client settings: {}",
                        errors.join("; ")
                    ))
                })?;
            self.client = Some(client);
        }

        Ok(())
    }

    async fn close(&mut self) {
        if let Some(open) = self.session.take() {
            if let Err(status) = open.session.disconnect().await {
                debug!(endpoint = %self.endpoint, status = %status, "OPC UA disconnect failed");
            }
            open.event_loop.abort();
        }
    }
}

#[async_trait]
impl ControllerDriver for OpcuaDriver {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn connect(&mut self) -> Result<()> {
        self.close().await;
        self.prepare()?;

        let identity = self.identity();
        let client = self.client.as_mut().ok_or(ControllerError::NotConnected)?;
        let (session, event_loop) = client
            .connect_to_matching_endpoint(
                (
                    self.config.endpoint_url.as_str(),
                    SecurityPolicy::None.to_str(),
                    MessageSecurityMode::None,
                    UserTokenPolicy::anonymous(),
                ),
                identity,
            )
            .await
            .map_err(|status| connect_error(&self.config.endpoint_url, status))?;

        let event_loop = event_loop.spawn();
        if !session.wait_for_connection().await {
            let status = event_loop.await.unwrap_or(StatusCode::BadConnectionClosed);
            return Err(connect_error(&self.config.endpoint_url, status));
        }

        self.session = Some(OpenSession {
            session,
            event_loop,
        });
        debug!(endpoint = %self.endpoint, url = %self.config.endpoint_url, "OPC UA session opened");
        Ok(())
    }

    async fn poll(&mut self) -> Result<Vec<Reading>> {
        let open = self.session.as_ref().ok_or(ControllerError::NotConnected)?;

        let result = open
            .session
            .read(&self.nodes, TimestampsToReturn::Source, 0.0)
            .await;
        let values = match result {
            Ok(values) => values,
            Err(status) => {
                self.close().await;
                return Err(ControllerError::Connection(format!("Read failed: {}", status)));
            }
        };

        if values.len() != self.config.tags.len() {
            return Err(ControllerError::Protocol(format!(
                "Expected {} values, got {}",
                self.config.tags.len(),
                values.len()
            )));
        }

        let readings = self
            .config
            .tags
            .iter()
            .zip(&values)
            .map(|(tag, value)| {
                let reading = data_value_reading(&self.endpoint, &tag.name, value);
                if reading.quality != Quality::Good {
                    warn!(
                        endpoint = %self.endpoint,
                        tag = %tag.name,
                        node_id = %tag.node_id,
                        status = %value.status.unwrap_or(StatusCode::Good),
                        quality = %reading.quality,
                        "OPC UA node not good"
                    );
                }
                reading
            })
            .collect();

        Ok(readings)
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.close().await;
        Ok(())
    }
}

/// Classify a failed connect.
///
/// Rejected identities are authentication failures; everything else is a
/// connection failure.
pub fn connect_error(url: &str, status: StatusCode) -> ControllerError {
    let rejected = [
        StatusCode::BadUserAccessDenied,
        StatusCode::BadIdentityTokenRejected,
        StatusCode::BadIdentityTokenInvalid,
    ];

    if rejected.contains(&status) {
        ControllerError::Auth(format!("{}: {}", url, status))
    } else {
        ControllerError::Connection(format!("{}: {}", url, status))
    }
}

/// Map a server status code onto reading quality.
///
/// A missing status means good.
pub fn status_quality(status: Option<StatusCode>) -> Quality {
    match status {
        None => Quality::Good,
        Some(status) if status.is_good() => Quality::Good,
        Some(status) if status.is_uncertain() => Quality::Uncertain,
        Some(_) => Quality::Bad,
    }
}

/// Convert a scalar variant to a tag value.
///
/// Strings, arrays and other non-numeric variants are not sampled.
pub fn variant_value(variant: &Variant) -> Option<TagValue> {
    let value = match variant {
        Variant::Boolean(v) => TagValue::Boolean(*v),
        Variant::SByte(v) => TagValue::Integer(*v as i64),
        Variant::Byte(v) => TagValue::Integer(*v as i64),
        Variant::Int16(v) => TagValue::Integer(*v as i64),
        Variant::UInt16(v) => TagValue::Integer(*v as i64),
        Variant::Int32(v) => TagValue::Integer(*v as i64),
        Variant::UInt32(v) => TagValue::Integer(*v as i64),
        Variant::Int64(v) => TagValue::Integer(*v),
        Variant::UInt64(v) => match i64::try_from(*v) {
            Ok(v) => TagValue::Integer(v),
            Err(_) => TagValue::Float(*v as f64),
        },
        Variant::Float(v) => TagValue::Float(*v as f64),
        Variant::Double(v) => TagValue::Float(*v),
        _ => return None,
    };
    Some(value)
}

/// Build the reading for one node's data value.
pub fn data_value_reading(endpoint: &str, tag: &str, data_value: &DataValue) -> Reading {
    let quality = status_quality(data_value.status);
    if quality == Quality::Bad {
        return Reading::bad(endpoint, tag);
    }

    match data_value.value.as_ref().and_then(variant_value) {
        Some(value) => {
            let reading = tag_reading(endpoint, tag, value);
            if reading.quality == Quality::Good {
                reading.with_quality(quality)
            } else {
                reading
            }
        }
        None => Reading::bad(endpoint, tag),
    }
}
