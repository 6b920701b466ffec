//! Long-lived controller session loop.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use smartfactory_common::{Backoff, Reading, Shutdown};
use smartfactory_store::{LocalStore, retry_transient};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::ControllerConfig;
use crate::driver::{ControllerDriver, build_driver};
use crate::error::{ControllerError, Result};
use crate::metrics::MetricsRegistry;
use crate::state::{SessionEvent, SessionState};

const DEFAULT_STORE_RETRY_ATTEMPTS: u32 = 5;

/// One controller endpoint's read loop.
///
/// Owns the driver, walks the [`SessionState`] machine, and appends every
/// successful poll to the local store in one transaction.
pub struct ControllerSession {
    driver: Box<dyn ControllerDriver>,
    store: Arc<LocalStore>,
    metrics: MetricsRegistry,
    poll_interval: Duration,
    timeout: Duration,
    backoff: Backoff,
    store_retry_attempts: u32,
    state: SessionState,
    has_connected: bool,
}

impl ControllerSession {
    /// Create a session around an existing driver.
    pub fn new(
        driver: Box<dyn ControllerDriver>,
        config: &ControllerConfig,
        store: Arc<LocalStore>,
        metrics: MetricsRegistry,
    ) -> Self {
        Self {
            driver,
            store,
            metrics,
            poll_interval: config.poll_interval(),
            timeout: config.timeout(),
            backoff: config.reconnect,
            store_retry_attempts: DEFAULT_STORE_RETRY_ATTEMPTS,
            state: SessionState::Disconnected,
            has_connected: false,
        }
    }

    /// Create a session with the driver named in `config`.
    pub fn from_config(
        config: &ControllerConfig,
        store: Arc<LocalStore>,
        metrics: MetricsRegistry,
    ) -> Self {
        Self::new(build_driver(config), config, store, metrics)
    }

    /// Attempts for transient storage errors on append.
    pub fn with_store_retry_attempts(mut self, attempts: u32) -> Self {
        self.store_retry_attempts = attempts.max(1);
        self
    }

    pub fn endpoint(&self) -> &str {
        self.driver.endpoint()
    }

    /// Run until shutdown is signalled.
    ///
    /// Connection failures never end the loop; the session reconnects with
    /// backoff indefinitely. On exit the driver is disconnected.
    pub async fn run(mut self, mut shutdown: Shutdown) {
        let endpoint = self.endpoint().to_string();
        self.metrics.register(&endpoint);

        info!(
            endpoint = %endpoint,
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            timeout_ms = self.timeout.as_millis() as u64,
            "Starting controller session"
        );

        loop {
            if shutdown.is_triggered() {
                self.apply(SessionEvent::Stop);
            }

            match self.state {
                SessionState::Stopped => break,
                SessionState::Disconnected => self.connect().await,
                SessionState::Reconnecting { attempt, delay } => {
                    debug!(
                        endpoint = %endpoint,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Waiting before reconnect"
                    );
                    if shutdown.sleep(delay).await {
                        continue;
                    }
                    self.connect().await;
                }
                SessionState::Connected { .. } => {
                    let started = Instant::now();
                    if self.poll().await {
                        let remaining = self.poll_interval.saturating_sub(started.elapsed());
                        shutdown.sleep(remaining).await;
                    }
                }
            }
        }

        if let Err(e) = with_timeout("disconnect", self.timeout, self.driver.disconnect()).await {
            warn!(endpoint = %endpoint, error = %e, "Controller disconnect failed");
        }
        info!(endpoint = %endpoint, "Controller session stopped");
    }

    fn apply(&mut self, event: SessionEvent) {
        self.state = self.state.transition(event, &self.backoff);
        self.metrics
            .set_status(self.driver.endpoint(), (&self.state).into());
    }

    async fn connect(&mut self) {
        let result = with_timeout("connect", self.timeout, self.driver.connect()).await;
        let endpoint = self.driver.endpoint().to_string();

        match result {
            Ok(()) => {
                info!(endpoint = %endpoint, reconnect = self.has_connected, "Controller connected");
                self.metrics.record_connected(&endpoint, self.has_connected);
                self.has_connected = true;
                self.apply(SessionEvent::ConnectSucceeded);
            }
            Err(e) => {
                self.metrics.record_failure(&endpoint, &e.to_string());
                self.apply(SessionEvent::ConnectFailed { auth: e.is_auth() });

                if let SessionState::Reconnecting { attempt, delay } = self.state {
                    if e.is_auth() {
                        error!(
                            endpoint = %endpoint,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "Controller rejected credentials, backing off"
                        );
                    } else {
                        warn!(
                            endpoint = %endpoint,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "Controller connect failed, backing off"
                        );
                    }
                }
            }
        }
    }

    /// Poll once. Returns `false` if the session was lost.
    async fn poll(&mut self) -> bool {
        let started = Instant::now();
        let result = with_timeout("poll", self.timeout, self.driver.poll()).await;
        let endpoint = self.driver.endpoint().to_string();

        match result {
            Ok(readings) => {
                let latency = started.elapsed();
                let count = readings.len();
                self.metrics.record_poll(&endpoint, count, latency);
                self.apply(SessionEvent::PollSucceeded);
                debug!(
                    endpoint = %endpoint,
                    readings = count,
                    latency_ms = latency.as_millis() as u64,
                    "Poll complete"
                );
                self.store_readings(&endpoint, readings).await;
                true
            }
            Err(e) => {
                warn!(endpoint = %endpoint, error = %e, "Controller session lost");
                self.metrics.record_failure(&endpoint, &e.to_string());
                if let Err(e) =
                    with_timeout("disconnect", self.timeout, self.driver.disconnect()).await
                {
                    debug!(endpoint = %endpoint, error = %e, "Disconnect after session loss failed");
                }
                self.apply(SessionEvent::SessionLost);
                false
            }
        }
    }

    async fn store_readings(&mut self, endpoint: &str, readings: Vec<Reading>) {
        if readings.is_empty() {
            return;
        }

        let count = readings.len();
        let store = &self.store;
        let result = retry_transient("append", self.store_retry_attempts, || {
            store.append_all(readings.clone())
        })
        .await;

        match result {
            Ok(outcome) if outcome.dropped > 0 => {
                self.metrics.record_lost(endpoint, outcome.dropped);
            }
            Ok(_) => {}
            Err(e) => {
                error!(
                    endpoint = %endpoint,
                    lost = count,
                    error = %e,
                    "Failed to store readings, poll discarded"
                );
                self.metrics.record_lost(endpoint, count);
            }
        }
    }
}

async fn with_timeout<T>(
    operation: &'static str,
    timeout: Duration,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| ControllerError::Timeout { operation, timeout })?
}
