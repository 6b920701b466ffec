//! Per-endpoint connection metrics.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use smartfactory_common::current_timestamp_millis;

use crate::state::SessionState;

/// Connection status as surfaced in health snapshots.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    /// Session starting, first connect not yet resolved.
    #[default]
    Connecting,
    Connected,
    Disconnected,
    /// Waiting out a backoff delay before the next connect.
    Reconnecting,
    Stopped,
}

impl From<&SessionState> for ConnectionStatus {
    fn from(state: &SessionState) -> Self {
        match state {
            SessionState::Disconnected => ConnectionStatus::Disconnected,
            SessionState::Connected { .. } => ConnectionStatus::Connected,
            SessionState::Reconnecting { .. } => ConnectionStatus::Reconnecting,
            SessionState::Stopped => ConnectionStatus::Stopped,
        }
    }
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Reconnecting => "reconnecting",
            ConnectionStatus::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Metrics for one controller endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectionMetrics {
    /// Endpoint name.
    pub endpoint: String,
    /// Current status.
    pub status: ConnectionStatus,
    /// Successful polls.
    pub polls: u64,
    /// Readings collected across all polls.
    pub readings_collected: u64,
    /// Readings the store refused (capacity) or failed to persist.
    pub readings_lost: u64,
    /// Failed connects or polls since the last success.
    pub consecutive_failures: u32,
    /// Sessions re-established after a loss.
    pub reconnects: u64,
    /// Last error message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Duration of the last successful poll in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    /// Last successful poll (millis since epoch).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_success: Option<i64>,
}

/// Shared registry of connection metrics, keyed by endpoint.
///
/// Cheap to clone; every session holds a handle and updates its own entry.
#[derive(Debug, Clone, Default)]
pub struct MetricsRegistry {
    endpoints: Arc<RwLock<BTreeMap<String, ConnectionMetrics>>>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an endpoint in the `connecting` state.
    pub fn register(&self, endpoint: &str) {
        self.endpoints
            .write()
            .entry(endpoint.to_string())
            .or_insert_with(|| ConnectionMetrics {
                endpoint: endpoint.to_string(),
                ..ConnectionMetrics::default()
            });
    }

    fn update(&self, endpoint: &str, f: impl FnOnce(&mut ConnectionMetrics)) {
        let mut endpoints = self.endpoints.write();
        let metrics = endpoints
            .entry(endpoint.to_string())
            .or_insert_with(|| ConnectionMetrics {
                endpoint: endpoint.to_string(),
                ..ConnectionMetrics::default()
            });
        f(metrics);
    }

    pub fn set_status(&self, endpoint: &str, status: ConnectionStatus) {
        self.update(endpoint, |m| m.status = status);
    }

    /// Record a successful connect. `reconnect` is set when a previous
    /// session existed.
    pub fn record_connected(&self, endpoint: &str, reconnect: bool) {
        self.update(endpoint, |m| {
            m.status = ConnectionStatus::Connected;
            if reconnect {
                m.reconnects += 1;
            }
        });
    }

    /// Record a successful poll.
    pub fn record_poll(&self, endpoint: &str, readings: usize, latency: Duration) {
        let now = current_timestamp_millis();
        self.update(endpoint, |m| {
            m.polls += 1;
            m.readings_collected += readings as u64;
            m.consecutive_failures = 0;
            m.latency_ms = Some(latency.as_millis() as u64);
            m.last_success = Some(now);
            m.last_error = None;
        });
    }

    /// Record a failed connect or poll.
    pub fn record_failure(&self, endpoint: &str, error: &str) {
        self.update(endpoint, |m| {
            m.consecutive_failures = m.consecutive_failures.saturating_add(1);
            m.last_error = Some(error.to_string());
        });
    }

    /// Record readings that could not be stored.
    pub fn record_lost(&self, endpoint: &str, count: usize) {
        self.update(endpoint, |m| m.readings_lost += count as u64);
    }

    /// Metrics for one endpoint.
    pub fn get(&self, endpoint: &str) -> Option<ConnectionMetrics> {
        self.endpoints.read().get(endpoint).cloned()
    }

    /// Metrics for all endpoints, ordered by name.
    pub fn snapshot(&self) -> Vec<ConnectionMetrics> {
        self.endpoints.read().values().cloned().collect()
    }

    /// Number of endpoints currently connected.
    pub fn connected_count(&self) -> usize {
        self.endpoints
            .read()
            .values()
            .filter(|m| m.status == ConnectionStatus::Connected)
            .count()
    }
}
