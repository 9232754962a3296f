//! HTTP upstream client.
//!
//! # Responsibilities
//! - Resolve request paths against the upstream's base URL
//! - Forward caller-supplied headers and query parameters verbatim
//! - Send every request through the guarded upstream (breaker → retry)
//! - Decode JSON bodies, treating non-2xx responses as failures
//!
//! # Design Decisions
//! - The reqwest client timeout is the only per-attempt deadline
//! - Raw `send` counts only errors and soft-failure statuses against the breaker
//! - `get_json` counts non-2xx as a failure, except a transient status left
//!   over after retries, which is a "not found" answer unless listed as soft
//! - Malformed caller input fails before the retry loop and is never counted

use std::sync::Arc;
use std::time::Duration;

use reqwest::{Method, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::config::{CircuitBreakerConfig, RetryConfig, UpstreamConfig};
use crate::resilience::{CircuitBreaker, Outcome, ResilienceError, ResilienceResult, RetryExecutor};
use crate::upstream::guarded::GuardedUpstream;

/// Errors raised by the HTTP layer.
#[derive(Debug, Error)]
pub enum UpstreamError {
    /// Transport failure, timeout, or body decoding failure.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid URL '{url}': {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("invalid request body: {0}")]
    Body(#[from] serde_json::Error),

    /// A JSON request got a non-2xx response.
    #[error("upstream '{upstream}' returned status {status}")]
    Status { upstream: String, status: u16 },
}

/// Per-request options, forwarded to the upstream without inspection.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub headers: Vec<(String, String)>,
    pub query: Vec<(String, String)>,
    pub bearer_token: Option<String>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn bearer(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    fn apply(&self, mut request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        for (name, value) in &self.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if !self.query.is_empty() {
            request = request.query(&self.query);
        }
        if let Some(token) = &self.bearer_token {
            request = request.bearer_auth(token);
        }
        request
    }
}

/// A `reqwest`-backed guarded upstream.
#[derive(Debug, Clone)]
pub struct HttpUpstream {
    guard: GuardedUpstream,
    client: reqwest::Client,
    base_url: Url,
}

impl HttpUpstream {
    pub fn new(guard: GuardedUpstream, base_url: Url, request_timeout: Duration) -> Result<Self, UpstreamError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()?;
        Ok(Self {
            guard,
            client,
            base_url: with_trailing_slash(base_url),
        })
    }

    /// Build from an upstream definition, sharing `breaker`.
    pub fn from_config(
        config: &UpstreamConfig,
        breaker: Arc<CircuitBreaker>,
        retry_defaults: &RetryConfig,
        breaker_defaults: &CircuitBreakerConfig,
    ) -> Result<Self, UpstreamError> {
        let base_url = Url::parse(&config.base_url).map_err(|source| UpstreamError::InvalidUrl {
            url: config.base_url.clone(),
            source,
        })?;
        let guard = GuardedUpstream::from_config(
            breaker,
            config.retry_or(retry_defaults),
            config.circuit_breaker_or(breaker_defaults),
        );
        Self::new(guard, base_url, config.request_timeout())
    }

    pub fn name(&self) -> &str {
        self.guard.name()
    }

    pub fn guard(&self) -> &GuardedUpstream {
        &self.guard
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Resolve `path` relative to the base URL.
    pub fn url(&self, path: &str) -> Result<Url, UpstreamError> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|source| UpstreamError::InvalidUrl {
                url: path.to_string(),
                source,
            })
    }

    /// Send a request and return the raw response, whatever its status.
    ///
    /// A request the caller built badly (invalid header name or value) is
    /// returned straight away: it is not retried and the breaker never sees it.
    pub async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
        options: &RequestOptions,
        token: Option<&CancellationToken>,
    ) -> ResilienceResult<Response, UpstreamError> {
        let url = self.url(path).map_err(ResilienceError::Upstream)?;
        self.check_request(&method, &url, body, options)?;
        let operation = |opts: &RequestOptions| {
            let request = self.request(&method, &url, body, opts);
            async move { request.send().await.map_err(UpstreamError::Http) }
        };

        match token {
            Some(token) => {
                self.guard
                    .call_cancellable(
                        token,
                        options,
                        operation,
                        None::<fn() -> std::future::Ready<ResilienceResult<Response, UpstreamError>>>,
                    )
                    .await
            }
            None => self.guard.call(options, operation).await,
        }
    }

    pub async fn get(&self, path: &str, options: &RequestOptions) -> ResilienceResult<Response, UpstreamError> {
        self.send(Method::GET, path, None, options, None).await
    }

    /// GET and decode a JSON body.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        options: &RequestOptions,
    ) -> ResilienceResult<T, UpstreamError> {
        self.fetch_json(
            Method::GET,
            path,
            None,
            options,
            None,
            None::<fn() -> std::future::Ready<ResilienceResult<T, UpstreamError>>>,
        )
        .await
    }

    /// Cancellable [`get_json`](Self::get_json). A cancelled request is not
    /// counted by the breaker.
    pub async fn get_json_cancellable<T: DeserializeOwned>(
        &self,
        path: &str,
        options: &RequestOptions,
        token: &CancellationToken,
    ) -> ResilienceResult<T, UpstreamError> {
        self.fetch_json(
            Method::GET,
            path,
            None,
            options,
            Some(token),
            None::<fn() -> std::future::Ready<ResilienceResult<T, UpstreamError>>>,
        )
        .await
    }

    /// GET and decode a JSON body; `fallback` answers when the circuit is
    /// open or the request ultimately fails.
    pub async fn get_json_or_else<T, FB, FBFut>(
        &self,
        path: &str,
        options: &RequestOptions,
        fallback: FB,
    ) -> ResilienceResult<T, UpstreamError>
    where
        T: DeserializeOwned,
        FB: FnOnce() -> FBFut,
        FBFut: std::future::Future<Output = ResilienceResult<T, UpstreamError>>,
    {
        self.fetch_json(Method::GET, path, None, options, None, Some(fallback))
            .await
    }

    /// POST a JSON body and decode a JSON response.
    pub async fn post_json<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
        options: &RequestOptions,
    ) -> ResilienceResult<T, UpstreamError> {
        let body = serde_json::to_value(body)
            .map_err(|e| ResilienceError::Upstream(UpstreamError::Body(e)))?;
        self.fetch_json(
            Method::POST,
            path,
            Some(&body),
            options,
            None,
            None::<fn() -> std::future::Ready<ResilienceResult<T, UpstreamError>>>,
        )
        .await
    }

    async fn fetch_json<T, FB, FBFut>(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
        options: &RequestOptions,
        token: Option<&CancellationToken>,
        fallback: Option<FB>,
    ) -> ResilienceResult<T, UpstreamError>
    where
        T: DeserializeOwned,
        FB: FnOnce() -> FBFut,
        FBFut: std::future::Future<Output = ResilienceResult<T, UpstreamError>>,
    {
        let url = self.url(path).map_err(ResilienceError::Upstream)?;
        self.check_request(&method, &url, body, options)?;
        let retry = self.guard.retry();
        let soft = self.guard.soft_failure_statuses();

        let primary = || async {
            let response = retry
                .run(
                    options,
                    |opts: &RequestOptions| {
                        let request = self.request(&method, &url, body, opts);
                        async move { request.send().await.map_err(UpstreamError::Http) }
                    },
                    token,
                )
                .await?;

            let status = response.status();
            if !status.is_success() {
                return Err(ResilienceError::Upstream(UpstreamError::Status {
                    upstream: self.name().to_string(),
                    status: status.as_u16(),
                }));
            }
            response
                .json::<T>()
                .await
                .map_err(|e| ResilienceError::Upstream(UpstreamError::Http(e)))
        };

        self.guard
            .breaker()
            .call_with(primary, fallback, |result| classify_json(result, retry, soft))
            .await
    }

    fn request(
        &self,
        method: &Method,
        url: &Url,
        body: Option<&serde_json::Value>,
        options: &RequestOptions,
    ) -> reqwest::RequestBuilder {
        let mut request = options.apply(self.client.request(method.clone(), url.clone()));
        if let Some(body) = body {
            request = request.json(body);
        }
        request
    }

    /// Reject malformed caller input before it reaches the retry loop.
    fn check_request(
        &self,
        method: &Method,
        url: &Url,
        body: Option<&serde_json::Value>,
        options: &RequestOptions,
    ) -> ResilienceResult<(), UpstreamError> {
        self.request(method, url, body, options)
            .build()
            .map(drop)
            .map_err(|e| ResilienceError::Upstream(UpstreamError::Http(e)))
    }
}

/// Breaker classification for decoded JSON calls.
///
/// A transient status that outlived its retries is the upstream answering
/// "not found", so it closes the breaker like any other answer unless it is
/// listed as a soft failure.
fn classify_json<T>(
    result: &ResilienceResult<T, UpstreamError>,
    retry: &RetryExecutor,
    soft_failures: &[u16],
) -> Outcome {
    match result {
        Ok(_) => Outcome::Success,
        Err(ResilienceError::Cancelled) => Outcome::Ignored,
        Err(ResilienceError::Upstream(UpstreamError::Status { status, .. })) => {
            if soft_failures.contains(status) || !retry.is_transient(*status) {
                Outcome::Failure
            } else {
                Outcome::Success
            }
        }
        Err(_) => Outcome::Failure,
    }
}

fn with_trailing_slash(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}
