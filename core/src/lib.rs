//! backoff-breaker - circuit breaker with built-in retry backoff
//!
//! This crate guards calls to an unreliable dependency:
//! - State machine for the breaker lifecycle (Closed → Open → HalfOpen → Closed)
//! - Lazy Open → HalfOpen probing, evaluated on the next call (no background timer)
//! - Bounded exponential backoff between retries inside a single call
//! - Thread-safe: one breaker is shared by reference across threads
//!
//! # Example
//!
//! ```rust
//! use backoff_breaker::{CircuitBreaker, CircuitState};
//! use std::time::Duration;
//!
//! let circuit = CircuitBreaker::builder("payments")
//!     .failure_threshold(3)
//!     .reset_timeout(Duration::from_secs(5))
//!     .success_threshold(2)
//!     .max_retries(0)
//!     .retry_delays(Duration::from_millis(100), Duration::from_secs(2))
//!     .on_open(|name| println!("Circuit {} opened!", name))
//!     .build()
//!     .expect("valid configuration");
//!
//! let result = circuit.call(|| Ok::<_, String>("charged"));
//! assert_eq!(result.unwrap(), "charged");
//! assert_eq!(circuit.state(), CircuitState::Closed);
//! ```

pub mod builder;
pub mod callbacks;
pub mod circuit;
pub mod clock;
pub mod errors;
pub mod ledger;
pub mod retry;

pub use builder::CircuitBuilder;
pub use circuit::{CircuitBreaker, CircuitSnapshot, Config};
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use errors::{CircuitError, ConfigError};
pub use ledger::{Ledger, Totals};
pub use retry::RetryPolicy;

use std::fmt;

/// Admission mode of a circuit breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CircuitState {
    /// Calls pass through; failures are counted
    Closed,
    /// Calls are rejected until the reset timeout has elapsed
    Open,
    /// Calls are probes; one failure reopens, enough successes close
    HalfOpen,
}

impl CircuitState {
    /// State name as reported by the underlying state machine
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "Closed",
            CircuitState::Open => "Open",
            CircuitState::HalfOpen => "HalfOpen",
        }
    }

    pub(crate) fn from_machine(name: &str) -> Self {
        match name {
            "Open" => CircuitState::Open,
            "HalfOpen" => CircuitState::HalfOpen,
            _ => CircuitState::Closed,
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
