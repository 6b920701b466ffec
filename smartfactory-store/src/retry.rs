//! Retry helper for transient storage errors.

use std::time::Duration;

use smartfactory_common::Backoff;
use tokio::time::sleep;
use tracing::debug;

use crate::error::Result;

const RETRY_BASE_DELAY_MS: u64 = 50;
const RETRY_MAX_DELAY_MS: u64 = 2_000;

/// Run a store operation, retrying transient failures up to `attempts` times.
///
/// Non-transient errors are returned immediately.
pub async fn retry_transient<T, F>(op_name: &'static str, attempts: u32, mut op: F) -> Result<T>
where
    F: FnMut() -> Result<T>,
{
    let backoff = Backoff::new(
        Duration::from_millis(RETRY_BASE_DELAY_MS),
        Duration::from_millis(RETRY_MAX_DELAY_MS),
        2.0,
    );
    let attempts = attempts.max(1);
    let mut attempt = 0;

    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(err) => {
                attempt += 1;
                if !err.is_transient() || attempt >= attempts {
                    return Err(err);
                }

                let delay = backoff.delay_for_attempt(attempt - 1);
                debug!(
                    op = op_name,
                    attempt,
                    max = attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Transient storage error, retrying"
                );
                sleep(delay).await;
            }
        }
    }
}
