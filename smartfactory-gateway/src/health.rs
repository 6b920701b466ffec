//! Periodic health reporting.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use smartfactory_collector::MetricsRegistry;
use smartfactory_common::Shutdown;
use smartfactory_dispatch::StatsHandle;
use smartfactory_store::LocalStore;
use tokio::time::{Instant, MissedTickBehavior, interval};
use tracing::{info, warn};

use crate::status::{GatewayState, HealthSnapshot, write_status_file};

/// Collects counters from every component into a [`HealthSnapshot`].
#[derive(Clone)]
pub struct HealthReporter {
    gateway: String,
    started: Instant,
    metrics: MetricsRegistry,
    store: Arc<LocalStore>,
    dispatch: StatsHandle,
    status_file: Option<PathBuf>,
}

impl HealthReporter {
    pub fn new(
        gateway: impl Into<String>,
        metrics: MetricsRegistry,
        store: Arc<LocalStore>,
        dispatch: StatsHandle,
    ) -> Self {
        Self {
            gateway: gateway.into(),
            started: Instant::now(),
            metrics,
            store,
            dispatch,
            status_file: None,
        }
    }

    /// Also write every snapshot to `path`.
    pub fn with_status_file(mut self, path: Option<PathBuf>) -> Self {
        self.status_file = path;
        self
    }

    pub fn snapshot(&self, state: GatewayState) -> HealthSnapshot {
        HealthSnapshot {
            gateway: self.gateway.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            state,
            timestamp: chrono::Utc::now().to_rfc3339(),
            uptime_secs: self.started.elapsed().as_secs(),
            controllers: self.metrics.snapshot(),
            store: self.store.stats(),
            dispatch: self.dispatch.snapshot(),
        }
    }

    /// Take a snapshot, log it, and write the status file if configured.
    pub fn report(&self, state: GatewayState) -> HealthSnapshot {
        let snapshot = self.snapshot(state);

        info!(
            state = ?snapshot.state,
            uptime_secs = snapshot.uptime_secs,
            controllers = snapshot.controllers.len(),
            connected = snapshot.connected(),
            pending = snapshot.store.pending,
            in_flight = snapshot.store.in_flight,
            dropped = snapshot.store.dropped,
            delivered = snapshot.dispatch.readings_delivered,
            dead_lettered = snapshot.dispatch.readings_dead_lettered,
            "Gateway health"
        );
        for controller in &snapshot.controllers {
            info!(
                endpoint = %controller.endpoint,
                status = %controller.status,
                polls = controller.polls,
                readings = controller.readings_collected,
                lost = controller.readings_lost,
                reconnects = controller.reconnects,
                latency_ms = controller.latency_ms,
                "Controller health"
            );
        }

        if let Some(path) = &self.status_file {
            if let Err(e) = write_status_file(path, &snapshot) {
                warn!(path = %path.display(), error = %e, "Failed to write status file");
            }
        }

        snapshot
    }

    /// Report every `period` until shutdown.
    pub async fn run(self, period: Duration, mut shutdown: Shutdown) {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; skip it so the first
        // snapshot shows a period of activity.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.wait() => break,
                _ = ticker.tick() => {
                    self.report(GatewayState::Running);
                }
            }
        }
    }
}
