//! Reconnect backoff with jitter

use chat_common::ClientConfig;
use rand::Rng;
use std::time::Duration;

const MULTIPLIER: f64 = 2.0;

/// Exponential backoff calculator
///
/// Delay for attempt `n` is `base * 2^n`, capped at `max`, then spread by
/// `±jitter` and clamped back into `[base, max]`.
#[derive(Debug, Clone)]
pub struct Backoff {
    base_ms: f64,
    max_ms: f64,
    jitter: f64,
    attempt: u32,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration, jitter: f64) -> Self {
        let base_ms = base.as_millis() as f64;
        Self {
            base_ms,
            max_ms: (max.as_millis() as f64).max(base_ms),
            jitter: jitter.clamp(0.0, 1.0),
            attempt: 0,
        }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(config.backoff_base, config.backoff_max, config.backoff_jitter)
    }

    /// Compute the next delay and advance the attempt counter
    pub fn next_delay(&mut self) -> Duration {
        let exp = MULTIPLIER.powi(self.attempt.min(32) as i32);
        let capped = (self.base_ms * exp).min(self.max_ms);

        let jitter_range = capped * self.jitter;
        let jitter = if jitter_range > 0.0 {
            rand::thread_rng().gen_range(-jitter_range..=jitter_range)
        } else {
            0.0
        };
        let final_ms = (capped + jitter).clamp(self.base_ms, self.max_ms);

        self.attempt = self.attempt.saturating_add(1);
        Duration::from_millis(final_ms as u64)
    }

    /// Reset after a successful handshake
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Attempts made since the last reset
    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}
