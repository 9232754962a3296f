//! Retry and circuit-breaker guards for calls to flaky upstream APIs.

pub mod config;
pub mod observability;
pub mod resilience;
pub mod upstream;

pub use config::GuardConfig;
pub use resilience::{CircuitBreaker, CircuitState, ResilienceError, RetryExecutor};
pub use upstream::{HttpUpstream, RequestOptions, UpstreamRegistry};
