//! Metrics collection and exposition.
//!
//! # Metrics
//! - `upstream_retries_total` (counter): retries by upstream and reason
//! - `circuit_breaker_state` (gauge): 0=closed, 1=half_open, 2=open
//! - `circuit_breaker_transitions_total` (counter): state changes by from/to
//! - `circuit_breaker_rejections_total` (counter): calls short-circuited while open
//! - `upstream_fallbacks_total` (counter): fallback invocations by reason

use std::net::SocketAddr;

use metrics::{counter, gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::resilience::CircuitState;

/// Install the Prometheus recorder and its HTTP scrape listener.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

pub fn record_retry(upstream: &str, reason: &'static str) {
    counter!(
        "upstream_retries_total",
        "upstream" => upstream.to_string(),
        "reason" => reason
    )
    .increment(1);
}

pub fn record_breaker_state(breaker: &str, state: CircuitState) {
    let value = match state {
        CircuitState::Closed => 0.0,
        CircuitState::HalfOpen => 1.0,
        CircuitState::Open => 2.0,
    };
    gauge!("circuit_breaker_state", "breaker" => breaker.to_string()).set(value);
}

pub fn record_breaker_transition(breaker: &str, from: CircuitState, to: CircuitState) {
    counter!(
        "circuit_breaker_transitions_total",
        "breaker" => breaker.to_string(),
        "from" => from.as_str(),
        "to" => to.as_str()
    )
    .increment(1);
    record_breaker_state(breaker, to);
}

pub fn record_rejected(breaker: &str) {
    counter!("circuit_breaker_rejections_total", "breaker" => breaker.to_string()).increment(1);
}

pub fn record_fallback(breaker: &str, reason: &'static str) {
    counter!(
        "upstream_fallbacks_total",
        "breaker" => breaker.to_string(),
        "reason" => reason
    )
    .increment(1);
}
