//! Observers for circuit state transitions
//!
//! Callbacks run while the breaker holds its lock, so every observer sees
//! transitions in the order they happened. They must not call back into the
//! same breaker.

use crate::CircuitState;
use std::sync::Arc;

pub type StateCallback = Arc<dyn Fn(&str) + Send + Sync>;
pub type TransitionCallback = Arc<dyn Fn(&str, CircuitState, CircuitState) + Send + Sync>;

/// Callbacks for circuit breaker transitions
#[derive(Clone, Default)]
pub struct Callbacks {
    pub on_open: Option<StateCallback>,
    pub on_close: Option<StateCallback>,
    pub on_half_open: Option<StateCallback>,
    pub on_transition: Option<TransitionCallback>,
}

impl Callbacks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire the generic observer, then the one registered for `to`
    pub fn notify(&self, circuit: &str, from: CircuitState, to: CircuitState) {
        if let Some(ref callback) = self.on_transition {
            callback(circuit, from, to);
        }

        let specific = match to {
            CircuitState::Open => &self.on_open,
            CircuitState::Closed => &self.on_close,
            CircuitState::HalfOpen => &self.on_half_open,
        };
        if let Some(callback) = specific {
            callback(circuit);
        }
    }
}

impl std::fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Callbacks")
            .field("on_open", &self.on_open.is_some())
            .field("on_close", &self.on_close.is_some())
            .field("on_half_open", &self.on_half_open.is_some())
            .field("on_transition", &self.on_transition.is_some())
            .finish()
    }
}
