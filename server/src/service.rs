//! Simulated external dependency.

use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("external service error")]
pub struct ServiceError;

/// Flaky service that fails on a fraction of calls.
///
/// A call fails when the current wall-clock time in nanoseconds is divisible
/// by `failure_modulus`, so about one call in `failure_modulus` fails.
#[derive(Debug, Clone)]
pub struct SimulatedService {
    failure_modulus: u64,
}

impl SimulatedService {
    pub fn new(failure_modulus: u64) -> Self {
        Self { failure_modulus }
    }

    pub fn call(&self) -> Result<(), ServiceError> {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |elapsed| elapsed.as_nanos());
        self.outcome_at(nanos)
    }

    fn outcome_at(&self, nanos: u128) -> Result<(), ServiceError> {
        match self.failure_modulus {
            0 => Ok(()),
            modulus if nanos % u128::from(modulus) == 0 => Err(ServiceError),
            _ => Ok(()),
        }
    }
}
