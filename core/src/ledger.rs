//! Outcome counters shared by a breaker and its state machine
//!
//! The ledger holds the current failure count consulted by the trip guard,
//! plus lifetime totals that are reported but never drive transitions.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Lifetime outcome totals for one circuit
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Totals {
    /// Successful operation attempts
    pub successes: u64,
    /// Failed operation attempts (every retry counts)
    pub failures: u64,
    /// Calls rejected while the circuit was open
    pub rejections: u64,
}

/// Thread-safe outcome counters
///
/// Mutations that matter for state transitions happen while the owning
/// breaker holds its lock; the atomics only make the counters shareable
/// with the state machine's guards.
#[derive(Debug, Default)]
pub struct Ledger {
    failure_count: AtomicUsize,
    successes: AtomicU64,
    failures: AtomicU64,
    rejections: AtomicU64,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a successful attempt
    pub fn record_success(&self) {
        self.successes.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a failed attempt and return the updated failure count
    pub fn record_failure(&self) -> usize {
        self.failures.fetch_add(1, Ordering::Relaxed);
        self.failure_count.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Record a call rejected by the admission check
    pub fn record_rejection(&self) {
        self.rejections.fetch_add(1, Ordering::Relaxed);
    }

    /// Failures counted since the last reset
    pub fn failure_count(&self) -> usize {
        self.failure_count.load(Ordering::Acquire)
    }

    /// Reset the failure count to zero
    pub fn clear_failures(&self) {
        self.failure_count.store(0, Ordering::Release);
    }

    pub fn totals(&self) -> Totals {
        Totals {
            successes: self.successes.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            rejections: self.rejections.load(Ordering::Relaxed),
        }
    }
}
