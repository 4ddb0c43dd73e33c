//! Backoff schedule for transient model failures.

use rand::Rng;
use std::time::Duration;

use crate::domain::models::RetryConfig;

/// Exponential backoff with multiplicative jitter.
///
/// The base delay doubles with each attempt up to `max_backoff_ms`; the
/// jittered delay is the base multiplied by a factor drawn from `[1.0, 1.5)`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempts per (credential, model) pair, first call included
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Ceiling for delays requested by the server
    pub max_server_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            initial_backoff_ms: config.initial_backoff_ms,
            max_backoff_ms: config.max_backoff_ms,
            max_server_delay_ms: config.max_server_delay_ms,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_backoff_ms: u64, max_backoff_ms: u64) -> Self {
        Self {
            max_attempts,
            initial_backoff_ms,
            max_backoff_ms,
            max_server_delay_ms: max_backoff_ms,
        }
    }

    /// Whether another call is allowed after `attempt` (zero-based) failed.
    pub fn has_attempts_left(&self, attempt: u32) -> bool {
        attempt + 1 < self.max_attempts
    }

    /// Un-jittered delay after the zero-based `attempt`: `initial * 2^attempt`, capped.
    pub fn calculate_backoff(&self, attempt: u32) -> Duration {
        let factor = 2_u64.saturating_pow(attempt);
        let backoff_ms = self
            .initial_backoff_ms
            .saturating_mul(factor)
            .min(self.max_backoff_ms);
        Duration::from_millis(backoff_ms)
    }

    /// Delay to sleep before the next attempt.
    ///
    /// A server-provided delay is honoured up to `max_server_delay_ms`;
    /// otherwise the jittered backoff is used.
    pub fn delay_for(&self, attempt: u32, server_delay: Option<Duration>) -> Duration {
        if let Some(delay) = server_delay {
            return delay.min(Duration::from_millis(self.max_server_delay_ms));
        }
        let jitter: f64 = rand::thread_rng().gen_range(1.0..1.5);
        self.calculate_backoff(attempt).mul_f64(jitter)
    }
}
