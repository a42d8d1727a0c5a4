//! Exponential backoff with jitter.
//!
//! Shared by REST retry loops and the user-stream reconnect path. Jitter is
//! applied on every delay so multiple connectors hammering the same venue
//! after an outage do not reconnect in lockstep.

use rand::Rng;
use std::time::Duration;

/// Backoff parameters.
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Ceiling for the computed delay (before jitter).
    pub max_delay: Duration,
    /// Multiplier applied per attempt, typically 2.0.
    pub multiplier: f64,
    /// Randomisation applied to each delay, `0.0..=1.0` of its length.
    pub jitter_factor: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter_factor: 0.2,
        }
    }
}

/// Exponential backoff state machine.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    config: BackoffConfig,
    attempt: u32,
}

impl ExponentialBackoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self { config, attempt: 0 }
    }

    /// The delay to sleep before the next attempt, advancing internal state.
    pub fn next_delay(&mut self) -> Duration {
        let exp = (self.config.initial_delay.as_secs_f64()
            * self.config.multiplier.powi(self.attempt as i32))
        .min(self.config.max_delay.as_secs_f64());
        self.attempt = self.attempt.saturating_add(1);

        let jitter_span = exp * self.config.jitter_factor;
        let jitter = if jitter_span > 0.0 {
            rand::rng().random_range(-jitter_span..=jitter_span)
        } else {
            0.0
        };

        Duration::from_secs_f64((exp + jitter).max(0.0))
    }

    /// Attempts made so far.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Reset after a success so the next failure starts from the initial delay.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(BackoffConfig::default())
    }
}
