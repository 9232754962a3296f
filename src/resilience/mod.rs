//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Call to an upstream:
//!     → circuit_breaker.rs (fail fast / fallback while open, count failures)
//!     → retries.rs (retry errors and transient statuses)
//!     → backoff.rs (delay before each retry)
//!     → the wrapped operation (its own client timeout applies)
//! ```
//!
//! # Design Decisions
//! - The primitives add no timeout of their own
//! - Retry is status-specific: only configured transient statuses are retried
//! - Breaker state is per upstream and shared by all callers
//! - Cancellation is explicit via `CancellationToken`

pub mod backoff;
pub mod circuit_breaker;
pub mod error;
pub mod retries;

pub use backoff::BackoffPolicy;
pub use circuit_breaker::{outcome_of, BreakerSnapshot, CircuitBreaker, CircuitState, Outcome};
pub use error::{CircuitOpenError, ResilienceError, ResilienceResult};
pub use retries::{RetryExecutor, StatusResponse};
