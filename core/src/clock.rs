//! Time sources for circuit breakers
//!
//! This module provides the clock a breaker reads and sleeps on:
//! - `MonotonicClock`: real time anchored at creation, immune to NTP adjustments
//! - `ManualClock`: virtual time for tests; sleeping advances it instead of blocking

use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Time source used for reset timeouts and retry backoff
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Get monotonic time in seconds (relative to clock creation)
    fn monotonic_time(&self) -> f64;

    /// Block the calling thread for `duration`
    fn sleep(&self, duration: Duration);
}

/// Wall-clock-independent time backed by [`Instant`]
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    start_time: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn monotonic_time(&self) -> f64 {
        self.start_time.elapsed().as_secs_f64()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Deterministic clock that only moves when told to
///
/// Every [`Clock::sleep`] advances the clock by the requested duration and
/// is recorded, so tests can assert the exact backoff schedule without
/// waiting for it.
///
/// # Example
///
/// ```rust
/// use backoff_breaker::{Clock, ManualClock};
/// use std::time::Duration;
///
/// let clock = ManualClock::new();
/// clock.advance(Duration::from_secs(2));
/// clock.sleep(Duration::from_millis(500));
///
/// assert_eq!(clock.monotonic_time(), 2.5);
/// assert_eq!(clock.sleeps(), vec![Duration::from_millis(500)]);
/// ```
#[derive(Debug, Default)]
pub struct ManualClock {
    state: Mutex<ManualState>,
}

#[derive(Debug, Default)]
struct ManualState {
    now: Duration,
    sleeps: Vec<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move time forward without recording a sleep
    pub fn advance(&self, duration: Duration) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.now += duration;
    }

    /// Durations passed to `sleep`, oldest first
    pub fn sleeps(&self) -> Vec<Duration> {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.sleeps.clone()
    }
}

impl Clock for ManualClock {
    fn monotonic_time(&self) -> f64 {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.now.as_secs_f64()
    }

    fn sleep(&self, duration: Duration) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.now += duration;
        state.sleeps.push(duration);
    }
}
