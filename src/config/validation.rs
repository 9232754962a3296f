//! Configuration validation.
//!
//! Serde handles syntax; this module checks value ranges and referential
//! constraints. All errors are collected, not just the first.

use std::collections::HashSet;
use std::fmt;

use url::Url;

use crate::config::schema::{CircuitBreakerConfig, GuardConfig, RetryConfig};

/// A single semantic problem found in a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path to the offending field.
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate a configuration, returning every error found.
pub fn validate_config(config: &GuardConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    check_retry("retry", &config.retry, &mut errors);
    check_breaker("circuit_breaker", &config.circuit_breaker, &mut errors);

    if config.observability.metrics_enabled
        && config
            .observability
            .metrics_address
            .parse::<std::net::SocketAddr>()
            .is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("invalid socket address '{}'", config.observability.metrics_address),
        ));
    }

    let mut seen = HashSet::new();
    for (i, upstream) in config.upstreams.iter().enumerate() {
        let prefix = format!("upstreams[{}]", i);

        if upstream.name.trim().is_empty() {
            errors.push(ValidationError::new(format!("{prefix}.name"), "must not be empty"));
        } else if !seen.insert(upstream.name.as_str()) {
            errors.push(ValidationError::new(
                format!("{prefix}.name"),
                format!("duplicate upstream '{}'", upstream.name),
            ));
        }

        match Url::parse(&upstream.base_url) {
            Ok(url) if url.scheme() == "http" || url.scheme() == "https" => {}
            Ok(url) => errors.push(ValidationError::new(
                format!("{prefix}.base_url"),
                format!("unsupported scheme '{}'", url.scheme()),
            )),
            Err(e) => errors.push(ValidationError::new(
                format!("{prefix}.base_url"),
                format!("invalid URL '{}': {}", upstream.base_url, e),
            )),
        }

        if upstream.request_timeout_ms == 0 {
            errors.push(ValidationError::new(
                format!("{prefix}.request_timeout_ms"),
                "must be greater than zero",
            ));
        }

        if let Some(retry) = &upstream.retry {
            check_retry(&format!("{prefix}.retry"), retry, &mut errors);
        }
        if let Some(breaker) = &upstream.circuit_breaker {
            check_breaker(&format!("{prefix}.circuit_breaker"), breaker, &mut errors);
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_retry(prefix: &str, retry: &RetryConfig, errors: &mut Vec<ValidationError>) {
    if retry.backoff_unit_ms == 0 {
        errors.push(ValidationError::new(
            format!("{prefix}.backoff_unit_ms"),
            "must be greater than zero",
        ));
    }
    if retry.max_backoff_ms < retry.backoff_unit_ms {
        errors.push(ValidationError::new(
            format!("{prefix}.max_backoff_ms"),
            "must be at least backoff_unit_ms",
        ));
    }
    if !(0.0..=1.0).contains(&retry.jitter_ratio) {
        errors.push(ValidationError::new(
            format!("{prefix}.jitter_ratio"),
            "must be between 0.0 and 1.0",
        ));
    }
    check_statuses(&format!("{prefix}.transient_statuses"), &retry.transient_statuses, errors);
}

fn check_breaker(prefix: &str, breaker: &CircuitBreakerConfig, errors: &mut Vec<ValidationError>) {
    if breaker.failure_threshold == 0 {
        errors.push(ValidationError::new(
            format!("{prefix}.failure_threshold"),
            "must be greater than zero",
        ));
    }
    check_statuses(
        &format!("{prefix}.soft_failure_statuses"),
        &breaker.soft_failure_statuses,
        errors,
    );
}

fn check_statuses(field: &str, statuses: &[u16], errors: &mut Vec<ValidationError>) {
    for status in statuses {
        if !(100..=599).contains(status) {
            errors.push(ValidationError::new(field, format!("{} is not an HTTP status", status)));
        }
    }
}
