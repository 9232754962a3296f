//! Exponential backoff with optional jitter.

use std::time::Duration;

use rand::Rng;

use crate::config::RetryConfig;

/// Backoff schedule: the delay before attempt `n` is `unit * 2^n`, capped.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    /// The time unit the doubling is expressed in.
    pub unit: Duration,
    /// Upper bound for a single delay, applied before jitter.
    pub max: Duration,
    /// Fraction of the delay added as random jitter, in `[0.0, 1.0]`.
    pub jitter_ratio: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl BackoffPolicy {
    pub fn new(unit: Duration, max: Duration) -> Self {
        Self {
            unit,
            max,
            jitter_ratio: 0.0,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            unit: config.backoff_unit(),
            max: config.max_backoff(),
            jitter_ratio: config.jitter_ratio,
        }
    }

    pub fn with_jitter(mut self, ratio: f64) -> Self {
        self.jitter_ratio = ratio.clamp(0.0, 1.0);
        self
    }

    /// Delay to wait before attempt `attempt` (0 = first call, no wait).
    pub fn delay(&self, attempt: u32) -> Duration {
        calculate_backoff(attempt, self.unit, self.max, self.jitter_ratio)
    }
}

/// Calculate exponential backoff delay with jitter.
pub fn calculate_backoff(attempt: u32, unit: Duration, max: Duration, jitter_ratio: f64) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }

    let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
    let capped = unit.checked_mul(factor).unwrap_or(max).min(max);

    if jitter_ratio <= 0.0 {
        return capped;
    }

    let jitter_range = capped.mul_f64(jitter_ratio.min(1.0));
    if jitter_range.is_zero() {
        return capped;
    }
    let jitter = rand::thread_rng().gen_range(Duration::ZERO..jitter_range);
    capped + jitter
}
