//! Health snapshots and the optional status file.

use std::path::Path;

use serde::{Deserialize, Serialize};
use smartfactory_collector::ConnectionMetrics;
use smartfactory_dispatch::DispatchStats;
use smartfactory_store::StoreStats;

/// Gateway lifecycle state reported in snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GatewayState {
    Running,
    Stopping,
    Stopped,
}

/// Point-in-time view of the whole gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSnapshot {
    /// Gateway name.
    pub gateway: String,
    /// Gateway version.
    pub version: String,
    pub state: GatewayState,
    /// RFC 3339 time the snapshot was taken.
    pub timestamp: String,
    pub uptime_secs: u64,
    /// One entry per controller endpoint.
    pub controllers: Vec<ConnectionMetrics>,
    pub store: StoreStats,
    pub dispatch: DispatchStats,
}

impl HealthSnapshot {
    /// Controllers currently connected.
    pub fn connected(&self) -> usize {
        self.controllers
            .iter()
            .filter(|c| c.status == smartfactory_collector::ConnectionStatus::Connected)
            .count()
    }
}

/// Write a snapshot as pretty JSON, replacing the file atomically.
pub fn write_status_file(path: &Path, snapshot: &HealthSnapshot) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let json = serde_json::to_vec_pretty(snapshot).map_err(std::io::Error::other)?;
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, json)?;
    std::fs::rename(&tmp, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use smartfactory_collector::ConnectionStatus;

    fn snapshot() -> HealthSnapshot {
        HealthSnapshot {
            gateway: "line-1".to_string(),
            version: "0.1.0".to_string(),
            state: GatewayState::Running,
            timestamp: "2026-01-01T00:00:00Z".to_string(),
            uptime_secs: 42,
            controllers: vec![
                ConnectionMetrics {
                    endpoint: "plc01".to_string(),
                    status: ConnectionStatus::Connected,
                    ..Default::default()
                },
                ConnectionMetrics {
                    endpoint: "plc02".to_string(),
                    status: ConnectionStatus::Reconnecting,
                    ..Default::default()
                },
            ],
            store: StoreStats::default(),
            dispatch: DispatchStats::default(),
        }
    }

    #[test]
    fn test_connected_count() {
        assert_eq!(snapshot().connected(), 1);
    }

    #[test]
    fn test_write_status_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run").join("status.json");

        write_status_file(&path, &snapshot()).unwrap();

        let written: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(written["gateway"], "line-1");
        assert_eq!(written["state"], "running");
        assert_eq!(written["controllers"][1]["endpoint"], "plc02");
        assert!(!path.with_extension("tmp").exists());
    }
}
