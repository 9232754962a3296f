//! Retry logic.
//!
//! # Responsibilities
//! - Re-run an operation that failed outright (transport errors)
//! - Re-run an operation whose response carries a transient status (404 by default)
//! - Wait an exponentially growing backoff between attempts
//! - Abort the wait and the in-flight call when cancelled
//!
//! # Exhaustion
//! When retries run out after an error the last error is returned. When they
//! run out after transient statuses the last response is returned as `Ok`, so
//! callers can still read it as a domain-level "not found". Other statuses
//! (500, 503, ...) are returned on the first attempt.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::config::RetryConfig;
use crate::observability::metrics;
use crate::resilience::backoff::BackoffPolicy;
use crate::resilience::error::{ResilienceError, ResilienceResult};

/// A response with an inspectable status code.
pub trait StatusResponse {
    fn status_code(&self) -> u16;
}

impl StatusResponse for u16 {
    fn status_code(&self) -> u16 {
        *self
    }
}

impl StatusResponse for reqwest::StatusCode {
    fn status_code(&self) -> u16 {
        self.as_u16()
    }
}

impl StatusResponse for reqwest::Response {
    fn status_code(&self) -> u16 {
        self.status().as_u16()
    }
}

/// Executes one operation with bounded retries and exponential backoff.
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    name: String,
    max_retries: u32,
    backoff: BackoffPolicy,
    transient_statuses: Vec<u16>,
}

impl Default for RetryExecutor {
    fn default() -> Self {
        Self::from_config("default", &RetryConfig::default())
    }
}

impl RetryExecutor {
    /// Create an executor that retries 404 responses and errors.
    pub fn new(max_retries: u32, backoff: BackoffPolicy) -> Self {
        Self {
            name: "default".to_string(),
            max_retries,
            backoff,
            transient_statuses: vec![404],
        }
    }

    pub fn from_config(name: impl Into<String>, config: &RetryConfig) -> Self {
        Self {
            name: name.into(),
            max_retries: config.max_retries,
            backoff: BackoffPolicy::from_config(config),
            transient_statuses: config.transient_statuses.clone(),
        }
    }

    /// Name used in logs and metric labels.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_transient_statuses(mut self, statuses: Vec<u16>) -> Self {
        self.transient_statuses = statuses;
        self
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn backoff(&self) -> &BackoffPolicy {
        &self.backoff
    }

    pub fn is_transient(&self, status: u16) -> bool {
        self.transient_statuses.contains(&status)
    }

    /// Run `operation` with `options`, retrying as described in the module docs.
    ///
    /// `options` is handed to every attempt untouched.
    pub async fn execute<O, R, E, F, Fut>(&self, options: &O, operation: F) -> ResilienceResult<R, E>
    where
        O: ?Sized,
        R: StatusResponse,
        E: Display,
        F: FnMut(&O) -> Fut,
        Fut: Future<Output = Result<R, E>>,
    {
        self.run(options, operation, None).await
    }

    /// Like [`execute`](Self::execute), but returns `Cancelled` as soon as
    /// `token` fires, dropping the in-flight call or backoff wait.
    pub async fn execute_cancellable<O, R, E, F, Fut>(
        &self,
        token: &CancellationToken,
        options: &O,
        operation: F,
    ) -> ResilienceResult<R, E>
    where
        O: ?Sized,
        R: StatusResponse,
        E: Display,
        F: FnMut(&O) -> Fut,
        Fut: Future<Output = Result<R, E>>,
    {
        self.run(options, operation, Some(token)).await
    }

    pub(crate) async fn run<O, R, E, F, Fut>(
        &self,
        options: &O,
        mut operation: F,
        token: Option<&CancellationToken>,
    ) -> ResilienceResult<R, E>
    where
        O: ?Sized,
        R: StatusResponse,
        E: Display,
        F: FnMut(&O) -> Fut,
        Fut: Future<Output = Result<R, E>>,
    {
        let max_attempts = self.max_retries.saturating_add(1);
        let mut attempt = 0u32;

        // Every exit is inside the loop: the last attempt always returns.
        loop {
            let result = match token {
                Some(token) => tokio::select! {
                    biased;
                    _ = token.cancelled() => return Err(ResilienceError::Cancelled),
                    result = operation(options) => result,
                },
                None => operation(options).await,
            };
            let retries_left = attempt < self.max_retries;

            let delay = match result {
                Ok(response) => {
                    let status = response.status_code();
                    if !(retries_left && self.is_transient(status)) {
                        return Ok(response);
                    }
                    let delay = self.backoff.delay(attempt + 1);
                    tracing::warn!(
                        upstream = %self.name,
                        attempt = attempt + 1,
                        max_attempts,
                        status,
                        delay = ?delay,
                        "Transient status from upstream, retrying"
                    );
                    metrics::record_retry(&self.name, "status");
                    delay
                }
                Err(e) => {
                    if !retries_left {
                        return Err(ResilienceError::Upstream(e));
                    }
                    let delay = self.backoff.delay(attempt + 1);
                    tracing::warn!(
                        upstream = %self.name,
                        attempt = attempt + 1,
                        max_attempts,
                        error = %e,
                        delay = ?delay,
                        "Upstream call failed, retrying"
                    );
                    metrics::record_retry(&self.name, "error");
                    delay
                }
            };

            if !wait(delay, token).await {
                return Err(ResilienceError::Cancelled);
            }
            attempt += 1;
        }
    }
}

/// Sleep for `delay`; returns false if cancelled first.
async fn wait(delay: Duration, token: Option<&CancellationToken>) -> bool {
    match token {
        Some(token) => tokio::select! {
            biased;
            _ = token.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        },
        None => {
            tokio::time::sleep(delay).await;
            true
        }
    }
}
