//! Gateway runner: wires the store, collector sessions and dispatch scheduler
//! together and owns their lifecycle.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use smartfactory_collector::{ControllerSession, MetricsRegistry};
use smartfactory_common::{ShutdownTrigger, shutdown};
use smartfactory_dispatch::{BatchSink, DispatchScheduler, HttpSink, StatsHandle};
use smartfactory_store::LocalStore;
use tokio::task::JoinHandle;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, error, info, warn};

use crate::config::GatewayConfig;
use crate::error::Result;
use crate::health::HealthReporter;
use crate::status::{GatewayState, HealthSnapshot};

/// Runs the gateway until a shutdown signal arrives.
///
/// Construction opens the local store and builds the dispatch client, so a
/// runner that exists has everything it needs to start. Tasks are spawned in
/// [`run_until`](Self::run_until).
pub struct GatewayRunner {
    config: GatewayConfig,
    store: Arc<LocalStore>,
    sink: Box<dyn BatchSink>,
    metrics: MetricsRegistry,
}

impl GatewayRunner {
    /// Open the local store and build the HTTP sink from `config`.
    pub fn new(config: GatewayConfig) -> Result<Self> {
        let sink = HttpSink::new(&config.dispatch, config.gateway.name.clone())?;
        Self::with_sink(config, Box::new(sink))
    }

    /// Open the local store and deliver through `sink`.
    pub fn with_sink(config: GatewayConfig, sink: Box<dyn BatchSink>) -> Result<Self> {
        let store = LocalStore::open(&config.store)?;
        info!(
            path = %store.location(),
            capacity = store.capacity(),
            pending = store.pending_len(),
            "Local store opened"
        );

        Ok(Self {
            config,
            store: Arc::new(store),
            sink,
            metrics: MetricsRegistry::new(),
        })
    }

    pub fn store(&self) -> Arc<LocalStore> {
        self.store.clone()
    }

    pub fn metrics(&self) -> MetricsRegistry {
        self.metrics.clone()
    }

    /// Run until Ctrl+C or SIGTERM.
    pub async fn run(self) -> Result<HealthSnapshot> {
        self.run_until(shutdown_signal()).await
    }

    /// Run until `signal` completes, then stop every task within the
    /// configured grace period. Returns the final health snapshot.
    pub async fn run_until<F>(self, signal: F) -> Result<HealthSnapshot>
    where
        F: Future<Output = ()>,
    {
        let GatewayRunner {
            config,
            store,
            sink,
            metrics,
        } = self;
        let (trigger, shutdown) = shutdown::channel();

        if let Some(historian) = &config.historian {
            info!(host = %historian.host, user = %historian.user, "Historian configuration loaded");
        }

        let mut tasks: Vec<(String, JoinHandle<()>)> = Vec::new();

        for controller in &config.controllers {
            metrics.register(&controller.name);
            let session = ControllerSession::from_config(controller, store.clone(), metrics.clone())
                .with_store_retry_attempts(config.store.retry_attempts);
            debug!(
                endpoint = %controller.name,
                driver = controller.driver.kind(),
                "Spawning controller session"
            );
            tasks.push((
                format!("controller:{}", controller.name),
                tokio::spawn(session.run(shutdown.clone())),
            ));
        }

        let scheduler = DispatchScheduler::new(&config.dispatch, store.clone(), sink)
            .with_store_retry_attempts(config.store.retry_attempts);
        let dispatch_stats: StatsHandle = scheduler.stats();
        tasks.push((
            "dispatch".to_string(),
            tokio::spawn(scheduler.run(shutdown.clone())),
        ));

        let reporter = HealthReporter::new(
            config.gateway.name.clone(),
            metrics.clone(),
            store.clone(),
            dispatch_stats,
        )
        .with_status_file(config.gateway.status_file.clone());
        tasks.push((
            "health".to_string(),
            tokio::spawn(
                reporter
                    .clone()
                    .run(Duration::from_secs(config.gateway.health_interval_secs), shutdown.clone()),
            ),
        ));

        info!(
            gateway = %config.gateway.name,
            controllers = config.controllers.len(),
            endpoint = %config.dispatch.endpoint_url,
            "Gateway running. Press Ctrl+C to stop."
        );

        signal.await;

        info!("Shutting down...");
        reporter.report(GatewayState::Stopping);
        stop_tasks(trigger, tasks, Duration::from_secs(config.gateway.shutdown_grace_secs)).await;

        let snapshot = reporter.report(GatewayState::Stopped);
        info!(
            pending = snapshot.store.pending + snapshot.store.in_flight,
            "Goodbye!"
        );
        Ok(snapshot)
    }
}

/// Signal shutdown and wait for tasks, aborting any still running after `grace`.
async fn stop_tasks(trigger: ShutdownTrigger, tasks: Vec<(String, JoinHandle<()>)>, grace: Duration) {
    trigger.trigger();

    let deadline = Instant::now() + grace;
    for (name, mut handle) in tasks {
        match timeout_at(deadline, &mut handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(task = %name, error = %e, "Task failed"),
            Err(_) => {
                warn!(task = %name, grace_secs = grace.as_secs(), "Task did not stop in time, aborting");
                handle.abort();
            }
        }
    }
}

/// Completes on Ctrl+C, or SIGTERM on Unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_stop_tasks_aborts_stuck_task() {
        let (trigger, shutdown) = shutdown::channel();
        let finished = Arc::new(AtomicBool::new(false));

        let cooperative = {
            let mut shutdown = shutdown.clone();
            tokio::spawn(async move { shutdown.wait().await })
        };
        let stuck = {
            let finished = finished.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                finished.store(true, Ordering::SeqCst);
            })
        };

        let started = Instant::now();
        stop_tasks(
            trigger,
            vec![("cooperative".into(), cooperative), ("stuck".into(), stuck)],
            Duration::from_secs(2),
        )
        .await;

        assert!(started.elapsed() >= Duration::from_secs(2));
        assert!(started.elapsed() < Duration::from_secs(3));
        tokio::time::sleep(Duration::from_secs(7200)).await;
        assert!(!finished.load(Ordering::SeqCst));
    }
}
