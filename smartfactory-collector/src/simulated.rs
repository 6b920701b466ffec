//! Deterministic signal generator standing in for a real controller.
//!
//! Values depend only on the poll index, so tests can predict them exactly.
//! Optional fault injection exercises the reconnect path.

use std::f64::consts::TAU;
use std::time::Duration;

use async_trait::async_trait;
use smartfactory_common::{Reading, TagValue};
use tracing::debug;

use crate::config::{Signal, SimulatedDriverConfig, SimulatedTag};
use crate::driver::ControllerDriver;
use crate::error::{ControllerError, Result};

/// Simulated controller.
pub struct SimulatedDriver {
    endpoint: String,
    config: SimulatedDriverConfig,
    connected: bool,
    connect_attempts: u32,
    /// Polls served across all sessions.
    polls: u64,
}

impl SimulatedDriver {
    pub fn new(endpoint: impl Into<String>, config: SimulatedDriverConfig) -> Self {
        Self {
            endpoint: endpoint.into(),
            config,
            connected: false,
            connect_attempts: 0,
            polls: 0,
        }
    }
}

#[async_trait]
impl ControllerDriver for SimulatedDriver {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn connect(&mut self) -> Result<()> {
        self.connect_attempts += 1;

        if self.config.reject_credentials {
            return Err(ControllerError::Auth(
                "simulated credential rejection".to_string(),
            ));
        }
        if self.connect_attempts <= self.config.fail_connects {
            return Err(ControllerError::Connection(format!(
                "simulated connect failure {}/{}",
                self.connect_attempts, self.config.fail_connects
            )));
        }

        self.connected = true;
        debug!(endpoint = %self.endpoint, "Simulated session opened");
        Ok(())
    }

    async fn poll(&mut self) -> Result<Vec<Reading>> {
        if !self.connected {
            return Err(ControllerError::NotConnected);
        }
        if self.config.response_delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.config.response_delay_ms)).await;
        }

        let n = self.polls;
        self.polls += 1;

        if let Some(every) = self.config.drop_every {
            if self.polls % every == 0 {
                self.connected = false;
                return Err(ControllerError::Connection(
                    "simulated session drop".to_string(),
                ));
            }
        }

        Ok(self
            .config
            .tags
            .iter()
            .map(|tag| Reading::new(&self.endpoint, &tag.name, sample(tag, n)))
            .collect())
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.connected = false;
        Ok(())
    }
}

/// Value of `tag` at poll index `n`.
pub fn sample(tag: &SimulatedTag, n: u64) -> TagValue {
    let period = tag.period.max(1);
    let phase = (n % period) as f64 / period as f64;

    match tag.signal {
        Signal::Sine => TagValue::Float(tag.offset + tag.amplitude * (TAU * phase).sin()),
        Signal::Ramp => TagValue::Float(tag.offset + tag.amplitude * phase),
        Signal::Square => TagValue::Boolean(phase < 0.5),
        Signal::Counter => TagValue::Integer(n as i64),
        Signal::Constant => TagValue::Float(tag.offset),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tag(signal: Signal) -> SimulatedTag {
        SimulatedTag {
            name: "T1".to_string(),
            signal,
            amplitude: 10.0,
            offset: 5.0,
            period: 4,
        }
    }

    #[test]
    fn test_signals() {
        assert_eq!(sample(&tag(Signal::Counter), 7), TagValue::Integer(7));
        assert_eq!(sample(&tag(Signal::Constant), 3), TagValue::Float(5.0));
        assert_eq!(sample(&tag(Signal::Ramp), 2), TagValue::Float(10.0));
        assert_eq!(sample(&tag(Signal::Square), 1), TagValue::Boolean(true));
        assert_eq!(sample(&tag(Signal::Square), 2), TagValue::Boolean(false));

        let TagValue::Float(peak) = sample(&tag(Signal::Sine), 1) else {
            panic!("Expected float");
        };
        assert!((peak - 15.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_drop_every() {
        let config = SimulatedDriverConfig {
            tags: vec![tag(Signal::Counter)],
            drop_every: Some(3),
            ..Default::default()
        };
        let mut driver = SimulatedDriver::new("sim", config);
        driver.connect().await.unwrap();

        assert_eq!(driver.poll().await.unwrap()[0].value, Some(TagValue::Integer(0)));
        assert_eq!(driver.poll().await.unwrap()[0].value, Some(TagValue::Integer(1)));
        assert!(matches!(
            driver.poll().await,
            Err(ControllerError::Connection(_))
        ));
        assert!(matches!(
            driver.poll().await,
            Err(ControllerError::NotConnected)
        ));

        driver.connect().await.unwrap();
        assert_eq!(driver.poll().await.unwrap()[0].value, Some(TagValue::Integer(3)));
    }

    #[tokio::test]
    async fn test_connect_faults() {
        let config = SimulatedDriverConfig {
            tags: vec![tag(Signal::Counter)],
            fail_connects: 2,
            ..Default::default()
        };
        let mut driver = SimulatedDriver::new("sim", config);
        assert!(driver.connect().await.is_err());
        assert!(driver.connect().await.is_err());
        assert!(driver.connect().await.is_ok());

        let config = SimulatedDriverConfig {
            tags: vec![tag(Signal::Counter)],
            reject_credentials: true,
            ..Default::default()
        };
        let mut driver = SimulatedDriver::new("sim", config);
        assert!(driver.connect().await.unwrap_err().is_auth());
    }
}
