//! Exponential backoff shared by controller reconnects and delivery retries.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Exponential backoff policy.
///
/// The delay for attempt `n` (0-indexed) is `initial_delay_ms * multiplier^n`,
/// capped at `max_delay_ms`. With `multiplier >= 1.0` the sequence is
/// non-decreasing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Backoff {
    /// Delay before the first retry, in milliseconds.
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    /// Upper bound for any delay, in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Growth factor between consecutive attempts.
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

fn default_initial_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    60_000
}

fn default_multiplier() -> f64 {
    2.0
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            multiplier: default_multiplier(),
        }
    }
}

impl Backoff {
    /// Create a policy from durations.
    pub fn new(initial: Duration, max: Duration, multiplier: f64) -> Self {
        Self {
            initial_delay_ms: initial.as_millis() as u64,
            max_delay_ms: max.as_millis() as u64,
            multiplier,
        }
    }

    /// Compute the delay for a given attempt number (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        // Exponents past 63 already saturate any sane cap; clamp to keep powi finite.
        let factor = self.multiplier.powi(attempt.min(63) as i32);
        let raw = self.initial_delay_ms as f64 * factor;
        let capped = if raw.is_finite() {
            raw.min(self.max_delay_ms as f64)
        } else {
            self.max_delay_ms as f64
        };
        Duration::from_millis(capped as u64)
    }

    /// The configured maximum delay.
    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    /// Check that the policy is usable.
    pub fn validate(&self) -> Result<(), String> {
        if self.initial_delay_ms == 0 {
            return Err("initial_delay_ms must be greater than 0".to_string());
        }
        if self.max_delay_ms < self.initial_delay_ms {
            return Err(format!(
                "max_delay_ms ({}) must be >= initial_delay_ms ({})",
                self.max_delay_ms, self.initial_delay_ms
            ));
        }
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(format!("multiplier must be >= 1.0 (got {})", self.multiplier));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_is_deterministic() {
        let backoff = Backoff::new(Duration::from_millis(100), Duration::from_secs(10), 2.0);
        assert_eq!(backoff.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(backoff.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(backoff.delay_for_attempt(2), Duration::from_millis(400));
    }

    #[test]
    fn test_delay_respects_max_cap() {
        let backoff = Backoff::new(Duration::from_millis(500), Duration::from_secs(5), 2.0);
        assert_eq!(backoff.delay_for_attempt(10), Duration::from_secs(5));
        assert_eq!(backoff.delay_for_attempt(u32::MAX), Duration::from_secs(5));
    }

    #[test]
    fn test_delays_never_decrease() {
        let backoff = Backoff::new(Duration::from_millis(250), Duration::from_secs(30), 1.5);
        let mut previous = Duration::ZERO;
        for attempt in 0..100 {
            let delay = backoff.delay_for_attempt(attempt);
            assert!(delay >= previous, "attempt {} went backwards", attempt);
            assert!(delay <= backoff.max_delay());
            previous = delay;
        }
    }

    #[test]
    fn test_validate() {
        assert!(Backoff::default().validate().is_ok());

        let shrinking = Backoff {
            multiplier: 0.5,
            ..Backoff::default()
        };
        assert!(shrinking.validate().is_err());

        let inverted = Backoff {
            initial_delay_ms: 10_000,
            max_delay_ms: 1_000,
            multiplier: 2.0,
        };
        assert!(inverted.validate().is_err());
    }
}
