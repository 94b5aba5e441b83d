//! Error types for circuit breaker operations

use std::time::Duration;
use thiserror::Error;

/// Errors returned by [`CircuitBreaker::call`](crate::CircuitBreaker::call)
#[derive(Debug, Error)]
pub enum CircuitError<E> {
    /// Circuit is open, the operation was not invoked
    #[error("circuit '{circuit}' is open (opened at {opened_at:.3}s)")]
    Open { circuit: String, opened_at: f64 },
    /// The wrapped operation failed on its last attempt
    #[error("{0}")]
    Execution(#[source] E),
}

impl<E> CircuitError<E> {
    /// True when the call was rejected without running the operation
    pub fn is_open(&self) -> bool {
        matches!(self, CircuitError::Open { .. })
    }

    /// The operation's own failure value, if the operation ran
    pub fn execution(&self) -> Option<&E> {
        match self {
            CircuitError::Execution(e) => Some(e),
            CircuitError::Open { .. } => None,
        }
    }

    /// Consume the error and hand back the operation's failure value
    pub fn into_execution(self) -> Option<E> {
        match self {
            CircuitError::Execution(e) => Some(e),
            CircuitError::Open { .. } => None,
        }
    }
}

/// Configuration rejected at construction time
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("missing required setting `{0}`")]
    Missing(&'static str),
    #[error("failure_threshold must be greater than 0")]
    ZeroFailureThreshold,
    #[error("reset_timeout must be greater than 0")]
    ZeroResetTimeout,
    #[error("success_threshold must be greater than 0")]
    ZeroSuccessThreshold,
    #[error("base_retry_delay must be greater than 0")]
    ZeroBaseRetryDelay,
    #[error("max_retry_delay ({max:?}) must not be shorter than base_retry_delay ({base:?})")]
    RetryDelayOrder { base: Duration, max: Duration },
    #[error("jitter_factor must be within 0.0..=1.0, got {0}")]
    InvalidJitter(f64),
}
