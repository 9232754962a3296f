//! One guarded upstream: a circuit breaker wrapped around a retry executor.

use std::fmt::Display;
use std::future::{Future, Ready};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::{CircuitBreakerConfig, RetryConfig};
use crate::resilience::{
    CircuitBreaker, Outcome, ResilienceError, ResilienceResult, RetryExecutor, StatusResponse,
};

/// Breaker → retry → call, for one named dependency.
///
/// The breaker is shared (`Arc`) so several front ends to the same upstream
/// see the same failure state.
#[derive(Debug, Clone)]
pub struct GuardedUpstream {
    name: String,
    breaker: Arc<CircuitBreaker>,
    retry: RetryExecutor,
    soft_failure_statuses: Vec<u16>,
}

impl GuardedUpstream {
    pub fn new(breaker: Arc<CircuitBreaker>, retry: RetryExecutor) -> Self {
        Self {
            name: breaker.name().to_string(),
            retry: retry.with_name(breaker.name()),
            breaker,
            soft_failure_statuses: Vec::new(),
        }
    }

    pub fn from_config(
        breaker: Arc<CircuitBreaker>,
        retry: &RetryConfig,
        breaker_config: &CircuitBreakerConfig,
    ) -> Self {
        let retry = RetryExecutor::from_config(breaker.name(), retry);
        Self::new(breaker, retry)
            .with_soft_failure_statuses(breaker_config.soft_failure_statuses.clone())
    }

    /// Statuses that count as breaker failures even though the call returned.
    pub fn with_soft_failure_statuses(mut self, statuses: Vec<u16>) -> Self {
        self.soft_failure_statuses = statuses;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn retry(&self) -> &RetryExecutor {
        &self.retry
    }

    pub fn soft_failure_statuses(&self) -> &[u16] {
        &self.soft_failure_statuses
    }

    /// Run `operation` with retries inside the breaker, without a fallback.
    pub async fn call<O, R, E, F, Fut>(&self, options: &O, operation: F) -> ResilienceResult<R, E>
    where
        O: ?Sized,
        R: StatusResponse,
        E: Display,
        F: FnMut(&O) -> Fut,
        Fut: Future<Output = Result<R, E>>,
    {
        self.run(None, options, operation, None::<fn() -> Ready<ResilienceResult<R, E>>>)
            .await
    }

    /// Run `operation` with retries inside the breaker, using `fallback` when
    /// the circuit is open or the retried call still fails.
    pub async fn call_with_fallback<O, R, E, F, Fut, FB, FBFut>(
        &self,
        options: &O,
        operation: F,
        fallback: FB,
    ) -> ResilienceResult<R, E>
    where
        O: ?Sized,
        R: StatusResponse,
        E: Display,
        F: FnMut(&O) -> Fut,
        Fut: Future<Output = Result<R, E>>,
        FB: FnOnce() -> FBFut,
        FBFut: Future<Output = ResilienceResult<R, E>>,
    {
        self.run(None, options, operation, Some(fallback)).await
    }

    /// Cancellable form. A cancelled call is not counted by the breaker and
    /// never triggers the fallback.
    pub async fn call_cancellable<O, R, E, F, Fut, FB, FBFut>(
        &self,
        token: &CancellationToken,
        options: &O,
        operation: F,
        fallback: Option<FB>,
    ) -> ResilienceResult<R, E>
    where
        O: ?Sized,
        R: StatusResponse,
        E: Display,
        F: FnMut(&O) -> Fut,
        Fut: Future<Output = Result<R, E>>,
        FB: FnOnce() -> FBFut,
        FBFut: Future<Output = ResilienceResult<R, E>>,
    {
        self.run(Some(token), options, operation, fallback).await
    }

    async fn run<O, R, E, F, Fut, FB, FBFut>(
        &self,
        token: Option<&CancellationToken>,
        options: &O,
        operation: F,
        fallback: Option<FB>,
    ) -> ResilienceResult<R, E>
    where
        O: ?Sized,
        R: StatusResponse,
        E: Display,
        F: FnMut(&O) -> Fut,
        Fut: Future<Output = Result<R, E>>,
        FB: FnOnce() -> FBFut,
        FBFut: Future<Output = ResilienceResult<R, E>>,
    {
        let soft = &self.soft_failure_statuses;
        self.breaker
            .call_with(
                || self.retry.run(options, operation, token),
                fallback,
                |result| classify(result, soft),
            )
            .await
    }
}

/// Breaker classification for retried calls.
pub fn classify<R: StatusResponse, E>(result: &ResilienceResult<R, E>, soft_failures: &[u16]) -> Outcome {
    match result {
        Ok(response) if soft_failures.contains(&response.status_code()) => Outcome::Failure,
        Ok(_) => Outcome::Success,
        Err(ResilienceError::Cancelled) => Outcome::Ignored,
        Err(_) => Outcome::Failure,
    }
}
