//! Circuit breaker for upstream protection.
//!
//! # States
//! - Closed: normal operation, calls pass through
//! - Open: upstream assumed down, calls go to the fallback or fail fast
//! - Half-Open: one trial call tests whether the upstream recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open: consecutive failures >= failure_threshold
//! Open → Half-Open: first call after reset_timeout since the last failure
//! Half-Open → Closed: trial call succeeds
//! Half-Open → Open: trial call fails
//! ```
//!
//! # Design Decisions
//! - One breaker per upstream dependency (not global, not per call)
//! - No background timer; the cooldown is checked lazily on the next call
//! - State lives behind a mutex that is never held across an await
//! - A single success clears all accumulated failures
//! - Half-Open admits one trial; callers arriving meanwhile are treated as Open

use std::future::{Future, Ready};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::config::CircuitBreakerConfig;
use crate::observability::metrics;
use crate::resilience::error::CircuitOpenError;

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

/// How a finished primary call affects the breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Resets the failure count and closes the circuit.
    Success,
    /// Counts toward opening the circuit and triggers the fallback on `Err`.
    Failure,
    /// Leaves the counters alone (e.g. the caller cancelled).
    Ignored,
}

/// Default classification: `Ok` succeeds, `Err` fails.
pub fn outcome_of<T, E>(result: &Result<T, E>) -> Outcome {
    match result {
        Ok(_) => Outcome::Success,
        Err(_) => Outcome::Failure,
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    last_failure: Option<Instant>,
    probe_in_flight: bool,
}

/// Point-in-time view of a breaker, for logs and admin output.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub failure_threshold: u32,
    pub reset_timeout_ms: u64,
    /// Milliseconds since the most recent failure, if any.
    pub since_last_failure_ms: Option<u64>,
}

enum Admission {
    Primary { probe: bool },
    Reject,
}

/// A three-state failure gate around one upstream dependency.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    failure_threshold: u32,
    reset_timeout: Duration,
    inner: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, failure_threshold: u32, reset_timeout: Duration) -> Self {
        let breaker = Self {
            name: name.into(),
            failure_threshold: failure_threshold.max(1),
            reset_timeout,
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failure_count: 0,
                last_failure: None,
                probe_in_flight: false,
            }),
        };
        metrics::record_breaker_state(&breaker.name, CircuitState::Closed);
        breaker
    }

    pub fn from_config(name: impl Into<String>, config: &CircuitBreakerConfig) -> Self {
        Self::new(name, config.failure_threshold, config.reset_timeout())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn failure_threshold(&self) -> u32 {
        self.failure_threshold
    }

    pub fn reset_timeout(&self) -> Duration {
        self.reset_timeout
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn failure_count(&self) -> u32 {
        self.lock().failure_count
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.lock();
        BreakerSnapshot {
            name: self.name.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            failure_threshold: self.failure_threshold,
            reset_timeout_ms: millis(self.reset_timeout),
            since_last_failure_ms: inner.last_failure.map(|t| millis(t.elapsed())),
        }
    }

    /// Force the breaker back to Closed with no recorded failures.
    pub fn reset(&self) {
        let mut inner = self.lock();
        let from = inner.state;
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
        inner.last_failure = None;
        inner.probe_in_flight = false;
        drop(inner);
        if from != CircuitState::Closed {
            self.transitioned(from, CircuitState::Closed);
        }
    }

    /// Run `primary` through the breaker with no fallback.
    ///
    /// Fails with `E::from(CircuitOpenError)` while the circuit is open.
    pub async fn call<T, E, P, PFut>(&self, primary: P) -> Result<T, E>
    where
        P: FnOnce() -> PFut,
        PFut: Future<Output = Result<T, E>>,
        E: From<CircuitOpenError>,
    {
        self.call_with(primary, None::<fn() -> Ready<Result<T, E>>>, outcome_of)
            .await
    }

    /// Run `primary` through the breaker, using `fallback` when the circuit
    /// is open or the primary fails. Errors from `fallback` are returned as-is.
    pub async fn call_with_fallback<T, E, P, PFut, F, FFut>(&self, primary: P, fallback: F) -> Result<T, E>
    where
        P: FnOnce() -> PFut,
        PFut: Future<Output = Result<T, E>>,
        F: FnOnce() -> FFut,
        FFut: Future<Output = Result<T, E>>,
        E: From<CircuitOpenError>,
    {
        self.call_with(primary, Some(fallback), outcome_of).await
    }

    /// General form: `classify` decides how the primary's result is counted.
    ///
    /// A result classified as `Failure` is counted even when it is `Ok`; such
    /// a soft failure is still returned to the caller unchanged. The fallback
    /// only replaces `Err` results.
    pub async fn call_with<T, E, P, PFut, F, FFut, C>(
        &self,
        primary: P,
        fallback: Option<F>,
        classify: C,
    ) -> Result<T, E>
    where
        P: FnOnce() -> PFut,
        PFut: Future<Output = Result<T, E>>,
        F: FnOnce() -> FFut,
        FFut: Future<Output = Result<T, E>>,
        E: From<CircuitOpenError>,
        C: FnOnce(&Result<T, E>) -> Outcome,
    {
        let probe = match self.admit() {
            Admission::Primary { probe } => probe,
            Admission::Reject => {
                metrics::record_rejected(&self.name);
                return match fallback {
                    Some(fallback) => {
                        tracing::debug!(breaker = %self.name, "Circuit open, using fallback");
                        metrics::record_fallback(&self.name, "open");
                        fallback().await
                    }
                    None => Err(CircuitOpenError {
                        name: self.name.clone(),
                    }
                    .into()),
                };
            }
        };

        // Releases the half-open slot if this future is dropped mid-call.
        let mut slot = ProbeSlot {
            breaker: self,
            armed: probe,
        };

        let result = primary().await;
        let outcome = classify(&result);
        match outcome {
            Outcome::Success => self.on_success(),
            Outcome::Failure => self.on_failure(),
            Outcome::Ignored => self.release_probe(probe),
        }
        slot.armed = false;

        match result {
            Err(e) if outcome == Outcome::Failure => match fallback {
                Some(fallback) => {
                    tracing::warn!(breaker = %self.name, "Primary call failed, using fallback");
                    metrics::record_fallback(&self.name, "failure");
                    fallback().await
                }
                None => Err(e),
            },
            other => other,
        }
    }

    fn admit(&self) -> Admission {
        let mut inner = self.lock();
        let state = inner.state;
        match state {
            CircuitState::Closed => Admission::Primary { probe: false },
            CircuitState::Open => {
                let cooled_down = inner
                    .last_failure
                    .map_or(true, |t| t.elapsed() > self.reset_timeout);
                if !cooled_down {
                    return Admission::Reject;
                }
                inner.state = CircuitState::HalfOpen;
                inner.probe_in_flight = true;
                drop(inner);
                self.transitioned(CircuitState::Open, CircuitState::HalfOpen);
                Admission::Primary { probe: true }
            }
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    Admission::Reject
                } else {
                    inner.probe_in_flight = true;
                    Admission::Primary { probe: true }
                }
            }
        }
    }

    fn on_success(&self) {
        let mut inner = self.lock();
        let from = inner.state;
        inner.failure_count = 0;
        inner.state = CircuitState::Closed;
        inner.probe_in_flight = false;
        drop(inner);
        if from != CircuitState::Closed {
            self.transitioned(from, CircuitState::Closed);
        }
    }

    fn on_failure(&self) {
        let mut inner = self.lock();
        let from = inner.state;
        inner.failure_count = inner.failure_count.saturating_add(1);
        inner.last_failure = Some(Instant::now());
        inner.probe_in_flight = false;
        let failures = inner.failure_count;
        let opens = from == CircuitState::HalfOpen || failures >= self.failure_threshold;
        if opens {
            inner.state = CircuitState::Open;
        }
        drop(inner);

        if opens && from != CircuitState::Open {
            tracing::warn!(
                breaker = %self.name,
                failures,
                threshold = self.failure_threshold,
                "Circuit opened"
            );
            self.transitioned(from, CircuitState::Open);
        } else {
            tracing::debug!(breaker = %self.name, failures, "Failure recorded");
        }
    }

    fn release_probe(&self, probe: bool) {
        if probe {
            self.lock().probe_in_flight = false;
        }
    }

    fn transitioned(&self, from: CircuitState, to: CircuitState) {
        tracing::info!(
            breaker = %self.name,
            from = from.as_str(),
            to = to.as_str(),
            "Circuit state changed"
        );
        metrics::record_breaker_transition(&self.name, from, to);
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

struct ProbeSlot<'a> {
    breaker: &'a CircuitBreaker,
    armed: bool,
}

impl Drop for ProbeSlot<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.breaker.release_probe(true);
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
