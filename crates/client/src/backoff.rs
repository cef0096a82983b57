//! Delays between progress socket connection attempts.

use std::time::Duration;

/// Shape of the retry schedule after the socket drops.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffConfig {
    /// Wait before the first retry of an outage.
    pub initial_delay: Duration,
    /// Upper bound for any single wait.
    pub max_delay: Duration,
    /// Growth per failed attempt. Values below 1 are treated as 1.
    pub multiplier: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

/// Retry schedule for one outage. The feed resets it once a subscription
/// goes through, so a later drop starts again from `initial_delay`.
#[derive(Debug)]
pub struct Backoff {
    config: BackoffConfig,
    attempts: u32,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            attempts: 0,
        }
    }

    /// Failed or pending attempts since the last reset.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Wait before the next attempt, counting that attempt.
    pub fn next_delay(&mut self) -> Duration {
        let growth = self
            .config
            .multiplier
            .max(1.0)
            .powi(self.attempts.min(i32::MAX as u32) as i32);
        let secs = (self.config.initial_delay.as_secs_f64() * growth)
            .min(self.config.max_delay.as_secs_f64());
        self.attempts = self.attempts.saturating_add(1);
        Duration::from_secs_f64(secs)
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
    }
}
