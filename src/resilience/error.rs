//! Error types shared by the resilience primitives.

use thiserror::Error;

/// Raised by a [`CircuitBreaker`](super::CircuitBreaker) that is open, still
/// cooling down, and has no fallback to run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("circuit '{name}' is open and no fallback was provided")]
pub struct CircuitOpenError {
    pub name: String,
}

/// Terminal failures surfaced by the retry executor and the guarded upstream.
///
/// `E` is the wrapped operation's own error type; it is carried unchanged.
#[derive(Debug, Error)]
pub enum ResilienceError<E> {
    /// The operation itself failed. After retries this is the last error seen.
    #[error("upstream call failed: {0}")]
    Upstream(E),

    /// Retries ran out with nothing else to report. `RetryExecutor` always
    /// has a last error or response, so it never builds this itself.
    #[error("max retries reached after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },

    /// The circuit is open and no fallback was provided.
    #[error("circuit '{name}' is open and no fallback was provided")]
    CircuitOpen { name: String },

    /// The caller's cancellation token fired.
    #[error("operation cancelled")]
    Cancelled,
}

impl<E> ResilienceError<E> {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ResilienceError::Cancelled)
    }

    pub fn is_circuit_open(&self) -> bool {
        matches!(self, ResilienceError::CircuitOpen { .. })
    }

    /// The wrapped operation error, if this is one.
    pub fn into_upstream(self) -> Option<E> {
        match self {
            ResilienceError::Upstream(e) => Some(e),
            _ => None,
        }
    }
}

impl<E> From<CircuitOpenError> for ResilienceError<E> {
    fn from(err: CircuitOpenError) -> Self {
        ResilienceError::CircuitOpen { name: err.name }
    }
}

/// Result type for resilience operations.
pub type ResilienceResult<T, E> = Result<T, ResilienceError<E>>;
