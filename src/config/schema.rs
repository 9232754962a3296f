//! Configuration schema definitions.
//!
//! All types derive Serde traits for deserialization from TOML files and every
//! field has a default, so an empty file is a valid configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GuardConfig {
    /// Default retry settings, inherited by every upstream.
    pub retry: RetryConfig,

    /// Default circuit breaker settings, inherited by every upstream.
    pub circuit_breaker: CircuitBreakerConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Guarded upstream dependencies.
    pub upstreams: Vec<UpstreamConfig>,
}

impl GuardConfig {
    /// Look up an upstream definition by name.
    pub fn upstream(&self, name: &str) -> Option<&UpstreamConfig> {
        self.upstreams.iter().find(|u| u.name == name)
    }
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of retries after the first attempt.
    pub max_retries: u32,

    /// Backoff unit in milliseconds. The delay before attempt `n` is
    /// `backoff_unit_ms * 2^n`.
    pub backoff_unit_ms: u64,

    /// Upper bound for a single backoff delay in milliseconds.
    pub max_backoff_ms: u64,

    /// Fraction of the delay added as random jitter (0.0 disables jitter).
    pub jitter_ratio: f64,

    /// Response statuses treated as transient and retried.
    pub transient_statuses: Vec<u16>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_unit_ms: 1000,
            max_backoff_ms: 30_000,
            jitter_ratio: 0.0,
            transient_statuses: vec![404],
        }
    }
}

impl RetryConfig {
    pub fn backoff_unit(&self) -> Duration {
        Duration::from_millis(self.backoff_unit_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,

    /// Cooldown in milliseconds before an open circuit admits a trial call.
    pub reset_timeout_ms: u64,

    /// Successful response statuses that still count as failures.
    pub soft_failure_statuses: Vec<u16>,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout_ms: 60_000,
            soft_failure_statuses: Vec::new(),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn reset_timeout(&self) -> Duration {
        Duration::from_millis(self.reset_timeout_ms)
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Compact,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log line format.
    pub log_format: LogFormat,

    /// Enable the Prometheus metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

/// A guarded upstream dependency.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UpstreamConfig {
    /// Unique upstream identifier for logging/metrics.
    pub name: String,

    /// Base URL requests are resolved against (e.g. "https://api.spotify.com/v1/").
    pub base_url: String,

    /// Per-request timeout enforced by the HTTP client.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Overrides the top-level retry settings.
    #[serde(default)]
    pub retry: Option<RetryConfig>,

    /// Overrides the top-level circuit breaker settings.
    #[serde(default)]
    pub circuit_breaker: Option<CircuitBreakerConfig>,
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

impl UpstreamConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Effective retry settings: the override if present, else `defaults`.
    pub fn retry_or<'a>(&'a self, defaults: &'a RetryConfig) -> &'a RetryConfig {
        self.retry.as_ref().unwrap_or(defaults)
    }

    /// Effective breaker settings: the override if present, else `defaults`.
    pub fn circuit_breaker_or<'a>(
        &'a self,
        defaults: &'a CircuitBreakerConfig,
    ) -> &'a CircuitBreakerConfig {
        self.circuit_breaker.as_ref().unwrap_or(defaults)
    }
}
