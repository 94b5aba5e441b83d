//! Circuit breaker implementation using state machines
//!
//! This module provides the breaker itself: configuration, the lifecycle
//! state machine, and the thread-safe `call` loop with retry backoff.

use crate::{
    CircuitState, Clock, Ledger, MonotonicClock, Totals, callbacks::Callbacks,
    errors::{CircuitError, ConfigError},
    retry::RetryPolicy,
};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Circuit breaker configuration
///
/// All fields except `jitter_factor` are required; [`Config::validate`]
/// rejects values the breaker cannot operate with.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Failures counted while Closed that open the circuit
    pub failure_threshold: usize,

    /// Minimum time the circuit stays Open before a probe is admitted
    pub reset_timeout: Duration,

    /// Consecutive probe successes in HalfOpen needed to close the circuit
    pub success_threshold: usize,

    /// Additional attempts within one call after the first failure
    pub max_retries: u32,

    /// Delay before the first retry
    pub base_retry_delay: Duration,

    /// Upper bound for the exponential retry delay
    pub max_retry_delay: Duration,

    /// Jitter factor for reset_timeout (0.0 = no jitter, 1.0 = full jitter)
    /// Uses chrono-machines formula: timeout * (1 - jitter + rand * jitter)
    pub jitter_factor: f64,
}

impl Config {
    /// Check the configuration, returning the first violated constraint
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::ZeroFailureThreshold);
        }
        if self.reset_timeout.is_zero() {
            return Err(ConfigError::ZeroResetTimeout);
        }
        if self.success_threshold == 0 {
            return Err(ConfigError::ZeroSuccessThreshold);
        }
        if self.base_retry_delay.is_zero() {
            return Err(ConfigError::ZeroBaseRetryDelay);
        }
        if self.max_retry_delay < self.base_retry_delay {
            return Err(ConfigError::RetryDelayOrder {
                base: self.base_retry_delay,
                max: self.max_retry_delay,
            });
        }
        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(ConfigError::InvalidJitter(self.jitter_factor));
        }
        Ok(())
    }

    /// Reset timeout in seconds, with jitter applied when configured
    ///
    /// The policy runs on microseconds so sub-millisecond timeouts survive.
    fn effective_reset_timeout_secs(&self) -> f64 {
        if self.jitter_factor > 0.0 {
            let timeout_us = u64::try_from(self.reset_timeout.as_micros()).unwrap_or(u64::MAX);
            let policy = chrono_machines::Policy {
                max_attempts: 1,
                base_delay_ms: timeout_us,
                multiplier: 1.0,
                max_delay_ms: timeout_us,
            };
            let timeout_us = policy.calculate_delay(1, self.jitter_factor);
            (timeout_us as f64) / 1_000_000.0
        } else {
            self.reset_timeout.as_secs_f64()
        }
    }
}

/// Inert configuration for a context that was never given one
const UNCONFIGURED: Config = Config {
    failure_threshold: usize::MAX,
    reset_timeout: Duration::MAX,
    success_threshold: usize::MAX,
    max_retries: 0,
    base_retry_delay: Duration::ZERO,
    max_retry_delay: Duration::ZERO,
    jitter_factor: 0.0,
};

/// Circuit breaker context - shared data across all states
#[derive(Debug, Clone)]
pub struct CircuitContext {
    pub name: String,
    pub config: Config,
    pub clock: Arc<dyn Clock>,
    pub ledger: Arc<Ledger>,
}

impl Default for CircuitContext {
    fn default() -> Self {
        Self {
            name: String::new(),
            config: UNCONFIGURED,
            clock: Arc::new(MonotonicClock::new()),
            ledger: Arc::new(Ledger::new()),
        }
    }
}

/// Data specific to the Open state
#[derive(Debug, Clone, Default)]
pub struct OpenData {
    pub opened_at: f64,
}

/// Data specific to the HalfOpen state
#[derive(Debug, Clone, Default)]
pub struct HalfOpenData {
    pub consecutive_successes: usize,
}

use machine::{CircuitEvent, DynamicCircuit};

mod machine {
    use super::{CircuitContext, HalfOpenData, OpenData};
    use state_machines::state_machine;

    // Define the circuit breaker state machine with dynamic mode
    state_machine! {
        name: Circuit,
        context: CircuitContext,
        dynamic: true,  // Enable dynamic mode for runtime state transitions

        initial: Closed,
        states: [
            Closed,
            Open(OpenData),
            HalfOpen(HalfOpenData),
        ],
        events {
            trip {
                guards: [should_open],
                transition: { from: [Closed, HalfOpen], to: Open }
            }
            attempt_reset {
                guards: [timeout_elapsed],
                transition: { from: Open, to: HalfOpen }
            }
            close {
                guards: [should_close],
                transition: { from: HalfOpen, to: Closed }
            }
        }
    }

    impl Circuit<Closed> {
        /// Open once the accumulated failures reach the threshold
        fn should_open(&self, ctx: &CircuitContext) -> bool {
            ctx.ledger.failure_count() >= ctx.config.failure_threshold
        }
    }

    impl Circuit<HalfOpen> {
        /// A single failed probe reopens the circuit
        fn should_open(&self, _ctx: &CircuitContext) -> bool {
            true
        }

        /// Check if enough successes to close circuit
        fn should_close(&self, ctx: &CircuitContext) -> bool {
            self.state_data_half_open()
                .is_some_and(|data| data.consecutive_successes >= ctx.config.success_threshold)
        }
    }

    impl Circuit<Open> {
        /// Check if timeout has elapsed for Open -> HalfOpen transition
        fn timeout_elapsed(&self, ctx: &CircuitContext) -> bool {
            let Some(data) = self.state_data_open() else {
                return false;
            };
            let elapsed = ctx.clock.monotonic_time() - data.opened_at;

            elapsed > ctx.config.effective_reset_timeout_secs()
        }
    }
}

/// Point-in-time view of a breaker's state and counters
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitSnapshot {
    pub state: CircuitState,
    /// Failures counted since the circuit last closed or saw a success
    pub failure_count: usize,
    /// Probe successes since entering HalfOpen (0 in other states)
    pub half_open_successes: usize,
    /// Time since the last state transition (or construction)
    pub since_last_transition: Duration,
    pub totals: Totals,
}

/// Mutable breaker state, only touched under the lock
struct Inner {
    machine: DynamicCircuit,
    last_transition_at: f64,
}

impl Inner {
    fn state(&self) -> CircuitState {
        CircuitState::from_machine(self.machine.current_state())
    }
}

/// Thread-safe circuit breaker guarding one dependency
///
/// All state reads and transitions happen under a single mutex; the guarded
/// operation itself and retry sleeps run without holding it.
pub struct CircuitBreaker {
    context: CircuitContext,
    retry: RetryPolicy,
    callbacks: Callbacks,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    /// Create a circuit breaker on the monotonic clock (use builder() for more options)
    pub fn new(name: impl Into<String>, config: Config) -> Result<Self, ConfigError> {
        config.validate()?;

        let context = CircuitContext {
            name: name.into(),
            config,
            clock: Arc::new(MonotonicClock::new()),
            ledger: Arc::new(Ledger::new()),
        };

        Ok(Self::with_context_and_callbacks(context, Callbacks::new()))
    }

    /// Create a circuit breaker from a validated context (used by builder)
    pub(crate) fn with_context_and_callbacks(
        context: CircuitContext,
        callbacks: Callbacks,
    ) -> Self {
        let inner = Inner {
            machine: DynamicCircuit::new(context.clone()),
            last_transition_at: context.clock.monotonic_time(),
        };

        Self {
            retry: RetryPolicy::from(&context.config),
            context,
            callbacks,
            inner: Mutex::new(inner),
        }
    }

    /// Create a new circuit breaker builder
    pub fn builder(name: impl Into<String>) -> crate::builder::CircuitBuilder {
        crate::builder::CircuitBuilder::new(name)
    }

    /// Execute a fallible operation with circuit breaker protection
    ///
    /// The admission check runs once. If the circuit is open the operation is
    /// never invoked and [`CircuitError::Open`] is returned. Otherwise the
    /// operation runs up to `max_retries + 1` times, sleeping the backoff
    /// delay between attempts, and every attempt's outcome is recorded.
    ///
    /// Retries are not re-admitted: a call that trips the circuit mid-loop
    /// still spends its remaining retry budget.
    pub fn call<T, E, F>(&self, mut operation: F) -> Result<T, CircuitError<E>>
    where
        F: FnMut() -> Result<T, E>,
    {
        self.admit()?;

        let mut retry = 0;
        loop {
            match operation() {
                Ok(value) => {
                    self.on_success();
                    if retry > 0 {
                        tracing::debug!(
                            circuit = %self.context.name,
                            attempt = retry + 1,
                            "Operation succeeded after retry"
                        );
                    }
                    return Ok(value);
                }
                Err(error) => {
                    self.on_failure();

                    if retry >= self.retry.max_retries {
                        return Err(CircuitError::Execution(error));
                    }

                    let delay = self.retry.delay_for(retry);
                    tracing::debug!(
                        circuit = %self.context.name,
                        attempt = retry + 1,
                        max_attempts = self.retry.max_attempts(),
                        delay_ms = delay.as_millis(),
                        "Operation failed, sleeping before retry"
                    );
                    self.context.clock.sleep(delay);
                    retry += 1;
                }
            }
        }
    }

    /// Current state; read-only
    pub fn state(&self) -> CircuitState {
        self.lock().state()
    }

    /// Check if circuit is open
    pub fn is_open(&self) -> bool {
        self.state() == CircuitState::Open
    }

    /// Check if circuit is closed
    pub fn is_closed(&self) -> bool {
        self.state() == CircuitState::Closed
    }

    /// Check if circuit is probing
    pub fn is_half_open(&self) -> bool {
        self.state() == CircuitState::HalfOpen
    }

    /// Get current state name
    pub fn state_name(&self) -> &'static str {
        self.state().as_str()
    }

    pub fn name(&self) -> &str {
        &self.context.name
    }

    pub fn config(&self) -> &Config {
        &self.context.config
    }

    /// Consistent view of state and counters
    pub fn snapshot(&self) -> CircuitSnapshot {
        let inner = self.lock();
        let now = self.context.clock.monotonic_time();

        CircuitSnapshot {
            state: inner.state(),
            failure_count: self.context.ledger.failure_count(),
            half_open_successes: inner
                .machine
                .half_open_data()
                .map_or(0, |data| data.consecutive_successes),
            since_last_transition: Duration::from_secs_f64(
                (now - inner.last_transition_at).max(0.0),
            ),
            totals: self.context.ledger.totals(),
        }
    }

    /// Force the circuit back to Closed and clear the failure count
    pub fn reset(&self) {
        let mut inner = self.lock();
        let from = inner.state();

        // Recreate machine in Closed state
        inner.machine = DynamicCircuit::new(self.context.clone());
        self.context.ledger.clear_failures();

        if from != CircuitState::Closed {
            self.transitioned(&mut inner, from, CircuitState::Closed);
            let transition = format!("{from} -> Closed");
            tracing::info!(
                circuit = %self.context.name,
                state = %transition,
                "Circuit breaker manually reset to Closed"
            );
        }
    }

    /// Admission check: Closed and HalfOpen admit, Open admits only once
    /// the reset timeout has elapsed, moving to HalfOpen as it does.
    fn admit<E>(&self) -> Result<(), CircuitError<E>> {
        let mut inner = self.lock();

        if inner.state() == CircuitState::Open
            && inner.machine.handle(CircuitEvent::AttemptReset).is_ok()
        {
            self.transitioned(&mut inner, CircuitState::Open, CircuitState::HalfOpen);
            tracing::info!(
                circuit = %self.context.name,
                state = "Open -> HalfOpen",
                "Circuit breaker admitting probe after reset timeout"
            );
        }

        if inner.state() == CircuitState::Open {
            self.context.ledger.record_rejection();
            let opened_at = inner.machine.open_data().map_or(0.0, |data| data.opened_at);
            return Err(CircuitError::Open {
                circuit: self.context.name.clone(),
                opened_at,
            });
        }

        Ok(())
    }

    fn on_success(&self) {
        let mut inner = self.lock();
        self.context.ledger.record_success();

        match inner.state() {
            CircuitState::Closed => self.context.ledger.clear_failures(),
            CircuitState::HalfOpen => {
                if let Some(data) = inner.machine.half_open_data_mut() {
                    data.consecutive_successes += 1;
                }

                if inner.machine.handle(CircuitEvent::Close).is_ok() {
                    self.context.ledger.clear_failures();
                    self.transitioned(
                        &mut inner,
                        CircuitState::HalfOpen,
                        CircuitState::Closed,
                    );
                    tracing::info!(
                        circuit = %self.context.name,
                        state = "HalfOpen -> Closed",
                        success_threshold = self.context.config.success_threshold,
                        "Circuit breaker closed after successful recovery"
                    );
                }
            }
            CircuitState::Open => {}
        }
    }

    fn on_failure(&self) {
        let mut inner = self.lock();
        let failures = self.context.ledger.record_failure();
        let from = inner.state();

        if inner.machine.handle(CircuitEvent::Trip).is_ok() {
            self.transitioned(&mut inner, from, CircuitState::Open);
            let transition = format!("{from} -> Open");
            tracing::warn!(
                circuit = %self.context.name,
                state = %transition,
                failure_count = failures,
                failure_threshold = self.context.config.failure_threshold,
                "Circuit breaker opened"
            );
        }
    }

    /// Transition bookkeeping: timestamps, then callbacks
    fn transitioned(&self, inner: &mut Inner, from: CircuitState, to: CircuitState) {
        let now = self.context.clock.monotonic_time();
        inner.last_transition_at = now;
        if let Some(data) = inner.machine.open_data_mut() {
            data.opened_at = now;
        }
        self.callbacks.notify(&self.context.name, from, to);
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.context.name)
            .field("state", &self.state())
            .field("failure_count", &self.context.ledger.failure_count())
            .field("config", &self.context.config)
            .field("callbacks", &self.callbacks)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ManualClock;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn config(failure_threshold: usize, max_retries: u32, success_threshold: usize) -> Config {
        Config {
            failure_threshold,
            reset_timeout: Duration::from_secs(5),
            success_threshold,
            max_retries,
            base_retry_delay: Duration::from_millis(100),
            max_retry_delay: Duration::from_secs(2),
            jitter_factor: 0.0,
        }
    }

    fn manual_circuit(clock: &Arc<ManualClock>, config: Config) -> CircuitBreaker {
        CircuitBreaker::builder("test")
            .config(config)
            .clock(clock.clone())
            .build()
            .expect("valid config")
    }

    /// Drive a manual-clock circuit with threshold 1 into HalfOpen
    fn half_open_circuit(clock: &Arc<ManualClock>, success_threshold: usize) -> CircuitBreaker {
        let circuit = manual_circuit(clock, config(1, 0, success_threshold));

        let _ = circuit.call(|| Err::<(), _>("boom"));
        assert!(circuit.is_open());

        clock.advance(Duration::from_secs(6));
        circuit.call(|| Ok::<_, &str>(())).expect("probe admitted");
        circuit
    }

    #[test]
    fn test_circuit_breaker_creation() {
        let circuit = CircuitBreaker::new("test", config(5, 3, 2)).expect("valid config");

        assert!(circuit.is_closed());
        assert!(!circuit.is_open());
        assert_eq!(circuit.name(), "test");
        assert_eq!(circuit.state_name(), "Closed");
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let result = CircuitBreaker::new(
            "test",
            Config {
                max_retry_delay: Duration::from_millis(50),
                ..config(5, 3, 2)
            },
        );
        assert!(matches!(result, Err(ConfigError::RetryDelayOrder { .. })));

        let result = CircuitBreaker::new(
            "test",
            Config {
                failure_threshold: 0,
                ..config(5, 3, 2)
            },
        );
        assert!(matches!(result, Err(ConfigError::ZeroFailureThreshold)));
    }

    #[test]
    fn test_config_validation() {
        assert_eq!(config(1, 0, 1).validate(), Ok(()));
        assert_eq!(
            Config {
                reset_timeout: Duration::ZERO,
                ..config(1, 0, 1)
            }
            .validate(),
            Err(ConfigError::ZeroResetTimeout)
        );
        assert_eq!(
            Config {
                success_threshold: 0,
                ..config(1, 0, 1)
            }
            .validate(),
            Err(ConfigError::ZeroSuccessThreshold)
        );
        assert_eq!(
            Config {
                base_retry_delay: Duration::ZERO,
                max_retry_delay: Duration::ZERO,
                ..config(1, 0, 1)
            }
            .validate(),
            Err(ConfigError::ZeroBaseRetryDelay)
        );
        assert!(matches!(
            Config {
                jitter_factor: 1.5,
                ..config(1, 0, 1)
            }
            .validate(),
            Err(ConfigError::InvalidJitter(_))
        ));
        assert!(
            Config {
                jitter_factor: f64::NAN,
                ..config(1, 0, 1)
            }
            .validate()
            .is_err()
        );
    }

    #[test]
    fn test_circuit_opens_after_threshold() {
        let circuit = CircuitBreaker::new("test", config(3, 0, 2)).expect("valid config");

        let _ = circuit.call(|| Err::<(), _>("error 1"));
        let _ = circuit.call(|| Err::<(), _>("error 2"));
        assert!(circuit.is_closed());

        let _ = circuit.call(|| Err::<(), _>("error 3"));
        assert!(circuit.is_open());
    }

    #[test]
    fn test_open_rejects_without_invoking_operation() {
        let clock = Arc::new(ManualClock::new());
        let circuit = manual_circuit(&clock, config(1, 3, 2));
        let invocations = AtomicUsize::new(0);

        let _ = circuit.call(|| {
            invocations.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>("down")
        });
        assert!(circuit.is_open());
        assert_eq!(invocations.load(Ordering::SeqCst), 4);
        let sleeps_before = clock.sleeps().len();

        for _ in 0..5 {
            let result = circuit.call(|| {
                invocations.fetch_add(1, Ordering::SeqCst);
                Ok::<_, &str>(())
            });
            assert!(matches!(result, Err(CircuitError::Open { .. })));
        }

        assert_eq!(invocations.load(Ordering::SeqCst), 4);
        assert_eq!(clock.sleeps().len(), sleeps_before, "rejections never back off");
        assert_eq!(circuit.snapshot().totals.rejections, 5);
    }

    #[test]
    fn test_open_probes_only_after_timeout_elapsed() {
        let clock = Arc::new(ManualClock::new());
        let circuit = manual_circuit(&clock, config(1, 0, 2));

        let _ = circuit.call(|| Err::<(), _>("down"));
        assert!(circuit.is_open());

        // Exactly the reset timeout is not enough; it must be exceeded
        clock.advance(Duration::from_secs(5));
        let result = circuit.call(|| Ok::<_, &str>("probe"));
        assert!(matches!(result, Err(CircuitError::Open { .. })));
        assert!(circuit.is_open());

        clock.advance(Duration::from_millis(1));
        let result = circuit.call(|| Ok::<_, &str>("probe"));
        assert_eq!(result.expect("probe admitted"), "probe");
        assert!(circuit.is_half_open());
    }

    #[test]
    fn test_open_error_carries_opened_at() {
        let clock = Arc::new(ManualClock::new());
        let circuit = manual_circuit(&clock, config(1, 0, 2));

        clock.advance(Duration::from_secs(3));
        let _ = circuit.call(|| Err::<(), _>("down"));

        match circuit.call(|| Ok::<_, &str>(())) {
            Err(CircuitError::Open { circuit, opened_at }) => {
                assert_eq!(circuit, "test");
                assert_eq!(opened_at, 3.0);
            }
            other => panic!("Expected CircuitError::Open, got: {:?}", other),
        }
    }

    #[test]
    fn test_half_open_closes_after_success_threshold() {
        let clock = Arc::new(ManualClock::new());
        let circuit = half_open_circuit(&clock, 3);
        assert!(circuit.is_half_open());
        assert_eq!(circuit.snapshot().half_open_successes, 1);

        circuit.call(|| Ok::<_, &str>(())).expect("probe");
        assert!(circuit.is_half_open());
        assert_eq!(circuit.snapshot().half_open_successes, 2);

        circuit.call(|| Ok::<_, &str>(())).expect("probe");
        assert!(circuit.is_closed());
        assert_eq!(circuit.snapshot().failure_count, 0);
    }

    #[test]
    fn test_half_open_reopens_on_any_failure() {
        let clock = Arc::new(ManualClock::new());
        let circuit = half_open_circuit(&clock, 3);
        circuit.call(|| Ok::<_, &str>(())).expect("probe");
        assert_eq!(circuit.snapshot().half_open_successes, 2);

        let _ = circuit.call(|| Err::<(), _>("relapse"));
        assert!(circuit.is_open());

        // Probe successes are discarded; the next HalfOpen starts from zero
        clock.advance(Duration::from_secs(6));
        circuit.call(|| Ok::<_, &str>(())).expect("probe");
        assert!(circuit.is_half_open());
        assert_eq!(circuit.snapshot().half_open_successes, 1);
    }

    #[test]
    fn test_success_resets_failure_count() {
        let circuit = CircuitBreaker::new("test", config(3, 0, 2)).expect("valid config");

        let _ = circuit.call(|| Err::<(), _>("error 1"));
        let _ = circuit.call(|| Err::<(), _>("error 2"));
        assert_eq!(circuit.snapshot().failure_count, 2);

        circuit.call(|| Ok::<_, &str>(())).expect("success");
        assert_eq!(circuit.snapshot().failure_count, 0);

        let _ = circuit.call(|| Err::<(), _>("error 3"));
        let _ = circuit.call(|| Err::<(), _>("error 4"));
        assert!(circuit.is_closed(), "two failures after a success must not open");

        let _ = circuit.call(|| Err::<(), _>("error 5"));
        assert!(circuit.is_open());
    }

    #[test]
    fn test_retries_follow_backoff_schedule() {
        let clock = Arc::new(ManualClock::new());
        let circuit = manual_circuit(&clock, config(100, 5, 2));

        let _ = circuit.call(|| Err::<(), _>("down"));

        let sleeps: Vec<u128> = clock.sleeps().iter().map(|d| d.as_millis()).collect();
        assert_eq!(sleeps, vec![100, 200, 400, 800, 1600]);
    }

    #[test]
    fn test_backoff_is_capped_at_max_retry_delay() {
        let clock = Arc::new(ManualClock::new());
        let circuit = manual_circuit(&clock, config(100, 7, 2));

        let _ = circuit.call(|| Err::<(), _>("down"));

        let sleeps: Vec<u128> = clock.sleeps().iter().map(|d| d.as_millis()).collect();
        assert_eq!(sleeps, vec![100, 200, 400, 800, 1600, 2000, 2000]);
    }

    #[test]
    fn test_retry_failures_count_toward_threshold() {
        let clock = Arc::new(ManualClock::new());
        let circuit = manual_circuit(&clock, config(3, 3, 2));
        let invocations = AtomicUsize::new(0);

        let result = circuit.call(|| {
            let attempt = invocations.fetch_add(1, Ordering::SeqCst) + 1;
            Err::<(), _>(attempt)
        });

        // The third failed attempt opens the circuit, but the call keeps its budget
        assert_eq!(invocations.load(Ordering::SeqCst), 4);
        assert!(circuit.is_open());
        assert_eq!(result.unwrap_err().into_execution(), Some(4));
        assert_eq!(clock.sleeps().len(), 3);
    }

    #[test]
    fn test_success_on_retry_stops_loop() {
        let clock = Arc::new(ManualClock::new());
        let circuit = manual_circuit(&clock, config(10, 5, 2));
        let invocations = AtomicUsize::new(0);

        let result = circuit.call(|| {
            if invocations.fetch_add(1, Ordering::SeqCst) < 2 {
                Err("flaky")
            } else {
                Ok("recovered")
            }
        });

        assert_eq!(result.expect("third attempt succeeds"), "recovered");
        assert_eq!(invocations.load(Ordering::SeqCst), 3);
        assert_eq!(clock.sleeps().len(), 2);
        assert_eq!(circuit.snapshot().failure_count, 0);
    }

    #[test]
    fn test_returns_last_operation_error_verbatim() {
        #[derive(Debug, PartialEq)]
        enum ApiError {
            Timeout,
            ServerError(u16),
        }

        let clock = Arc::new(ManualClock::new());
        let circuit = manual_circuit(&clock, config(10, 1, 2));
        let invocations = AtomicUsize::new(0);

        let result = circuit.call(|| {
            if invocations.fetch_add(1, Ordering::SeqCst) == 0 {
                Err::<(), _>(ApiError::Timeout)
            } else {
                Err(ApiError::ServerError(503))
            }
        });

        match result {
            Err(CircuitError::Execution(e)) => assert_eq!(e, ApiError::ServerError(503)),
            other => panic!("Expected CircuitError::Execution, got: {:?}", other),
        }
    }

    #[test]
    fn test_failure_while_open_does_not_move_timestamp() {
        let clock = Arc::new(ManualClock::new());
        let circuit = manual_circuit(&clock, config(1, 0, 2));

        let _ = circuit.call(|| Err::<(), _>("down"));
        clock.advance(Duration::from_secs(2));

        // Late failure reported by a call admitted before the circuit opened
        circuit.on_failure();
        assert!(circuit.is_open());
        assert_eq!(
            circuit.snapshot().since_last_transition,
            Duration::from_secs(2)
        );

        clock.advance(Duration::from_secs(4));
        circuit.call(|| Ok::<_, &str>(())).expect("probe admitted");
        assert!(circuit.is_half_open());
    }

    #[test]
    fn test_success_while_open_is_noop() {
        let clock = Arc::new(ManualClock::new());
        let circuit = manual_circuit(&clock, config(1, 0, 1));

        let _ = circuit.call(|| Err::<(), _>("down"));
        circuit.on_success();

        assert!(circuit.is_open());
        assert_eq!(circuit.snapshot().half_open_successes, 0);
    }

    #[test]
    fn test_snapshot_tracks_transition_time() {
        let clock = Arc::new(ManualClock::new());
        let circuit = manual_circuit(&clock, config(2, 0, 2));

        clock.advance(Duration::from_secs(1));
        let _ = circuit.call(|| Err::<(), _>("error 1"));
        assert_eq!(
            circuit.snapshot().since_last_transition,
            Duration::from_secs(1),
            "a failure below threshold is not a transition"
        );

        let _ = circuit.call(|| Err::<(), _>("error 2"));
        let snapshot = circuit.snapshot();
        assert_eq!(snapshot.state, CircuitState::Open);
        assert_eq!(snapshot.since_last_transition, Duration::ZERO);
        assert_eq!(snapshot.failure_count, 2);
        assert_eq!(
            snapshot.totals,
            Totals {
                successes: 0,
                failures: 2,
                rejections: 0,
            }
        );
    }

    #[test]
    fn test_reset_clears_state() {
        let circuit = CircuitBreaker::new("test", config(2, 0, 2)).expect("valid config");

        let _ = circuit.call(|| Err::<(), _>("error 1"));
        let _ = circuit.call(|| Err::<(), _>("error 2"));
        assert!(circuit.is_open());

        circuit.reset();
        assert!(circuit.is_closed());
        assert_eq!(circuit.snapshot().failure_count, 0);

        let result = circuit.call(|| Ok::<_, &str>("back"));
        assert_eq!(result.expect("closed circuit admits"), "back");
    }

    #[test]
    fn test_reset_is_a_transition_only_when_not_closed() {
        let clock = Arc::new(ManualClock::new());
        let closes = Arc::new(AtomicUsize::new(0));
        let closes_clone = Arc::clone(&closes);

        let circuit = CircuitBreaker::builder("test")
            .config(config(2, 0, 3))
            .clock(clock.clone())
            .on_close(move |_name| {
                closes_clone.fetch_add(1, Ordering::SeqCst);
            })
            .build()
            .expect("valid config");

        // Closed: nothing moves
        clock.advance(Duration::from_secs(2));
        circuit.reset();
        assert!(circuit.is_closed());
        assert_eq!(closes.load(Ordering::SeqCst), 0);
        assert_eq!(
            circuit.snapshot().since_last_transition,
            Duration::from_secs(2)
        );

        // Open: back to Closed with a fresh timestamp
        let _ = circuit.call(|| Err::<(), _>("error 1"));
        let _ = circuit.call(|| Err::<(), _>("error 2"));
        assert!(circuit.is_open());
        clock.advance(Duration::from_secs(1));

        circuit.reset();
        let snapshot = circuit.snapshot();
        assert_eq!(snapshot.state, CircuitState::Closed);
        assert_eq!(snapshot.failure_count, 0);
        assert_eq!(snapshot.since_last_transition, Duration::ZERO);
        assert_eq!(closes.load(Ordering::SeqCst), 1);

        // HalfOpen: probe progress is discarded
        let _ = circuit.call(|| Err::<(), _>("error 3"));
        let _ = circuit.call(|| Err::<(), _>("error 4"));
        clock.advance(Duration::from_secs(6));
        circuit.call(|| Ok::<_, &str>(())).expect("probe admitted");
        assert!(circuit.is_half_open());
        assert_eq!(circuit.snapshot().half_open_successes, 1);

        circuit.reset();
        let snapshot = circuit.snapshot();
        assert_eq!(snapshot.state, CircuitState::Closed);
        assert_eq!(snapshot.half_open_successes, 0);
        assert_eq!(closes.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_transition_callbacks_observe_full_cycle() {
        let transitions = Arc::new(Mutex::new(Vec::new()));
        let recorder = Arc::clone(&transitions);
        let clock = Arc::new(ManualClock::new());

        let circuit = CircuitBreaker::builder("test")
            .config(config(1, 0, 1))
            .clock(clock.clone())
            .on_transition(move |_name, from, to| {
                recorder.lock().unwrap().push((from, to));
            })
            .build()
            .expect("valid config");

        let _ = circuit.call(|| Err::<(), _>("down"));
        clock.advance(Duration::from_secs(6));
        circuit.call(|| Ok::<_, &str>(())).expect("probe");

        assert_eq!(
            *transitions.lock().unwrap(),
            vec![
                (CircuitState::Closed, CircuitState::Open),
                (CircuitState::Open, CircuitState::HalfOpen),
                (CircuitState::HalfOpen, CircuitState::Closed),
            ]
        );
    }

    #[test]
    fn test_real_clock_probe_after_timeout() {
        let circuit = CircuitBreaker::new(
            "test",
            Config {
                reset_timeout: Duration::from_millis(10),
                base_retry_delay: Duration::from_millis(1),
                max_retry_delay: Duration::from_millis(1),
                ..config(1, 0, 2)
            },
        )
        .expect("valid config");

        let _ = circuit.call(|| Err::<(), _>("down"));
        assert!(circuit.is_open());

        std::thread::sleep(Duration::from_millis(20));

        circuit.call(|| Ok::<_, &str>(())).expect("probe admitted");
        assert!(circuit.is_half_open());
    }

    #[test]
    fn test_state_machine_closed_to_open_transition() {
        let ledger = Arc::new(Ledger::new());
        let ctx = CircuitContext {
            name: "test_circuit".to_string(),
            config: config(3, 0, 2),
            clock: Arc::new(ManualClock::new()),
            ledger: ledger.clone(),
        };

        let mut circuit = DynamicCircuit::new(ctx);

        // Initially closed - trip should fail guard
        let result = circuit.handle(CircuitEvent::Trip);
        assert!(result.is_err(), "Should fail guard when below threshold");

        ledger.record_failure();
        ledger.record_failure();
        ledger.record_failure();

        circuit
            .handle(CircuitEvent::Trip)
            .expect("Should open after reaching threshold");
        assert_eq!(circuit.current_state(), "Open");
    }

    #[test]
    fn test_state_machine_transitions_are_idempotent() {
        let clock = Arc::new(ManualClock::new());
        let ledger = Arc::new(Ledger::new());
        let ctx = CircuitContext {
            name: "test_circuit".to_string(),
            config: config(1, 0, 2),
            clock: clock.clone(),
            ledger: ledger.clone(),
        };

        let mut circuit = DynamicCircuit::new(ctx);
        ledger.record_failure();
        circuit.handle(CircuitEvent::Trip).expect("Should open");

        // Re-tripping an open circuit is rejected and leaves it untouched
        assert!(circuit.handle(CircuitEvent::Trip).is_err());
        assert_eq!(circuit.current_state(), "Open");

        clock.advance(Duration::from_secs(6));
        circuit
            .handle(CircuitEvent::AttemptReset)
            .expect("Should reset after timeout");
        assert_eq!(
            circuit
                .half_open_data()
                .expect("HalfOpen data")
                .consecutive_successes,
            0
        );

        // A second reset attempt from HalfOpen is harmless
        assert!(circuit.handle(CircuitEvent::AttemptReset).is_err());
        assert_eq!(circuit.current_state(), "HalfOpen");
    }

    #[test]
    fn test_zero_jitter_produces_exact_timeout() {
        let config = config(1, 0, 1);

        for _ in 0..10 {
            assert_eq!(config.effective_reset_timeout_secs(), 5.0);
        }
    }

    #[test]
    fn test_jitter_distribution_within_bounds() {
        // With 25% jitter on a 1s timeout, expect 0.75s-1.0s
        let config = Config {
            reset_timeout: Duration::from_secs(1),
            jitter_factor: 0.25,
            ..config(1, 0, 1)
        };

        for _ in 0..50 {
            let timeout = config.effective_reset_timeout_secs();
            assert!(
                (0.74..=1.01).contains(&timeout),
                "Jittered timeout {} outside 0.75..=1.0",
                timeout
            );
        }
    }

    #[test]
    fn test_jitter_keeps_sub_millisecond_timeout() {
        let clock = Arc::new(ManualClock::new());
        let circuit = manual_circuit(
            &clock,
            Config {
                reset_timeout: Duration::from_micros(900),
                jitter_factor: 0.1,
                ..config(1, 0, 1)
            },
        );

        let _ = circuit.call(|| Err::<(), _>("down"));
        assert!(circuit.is_open());

        // Jittered timeout lies in 810us..=900us
        clock.advance(Duration::from_micros(1));
        let result = circuit.call(|| Ok::<_, &str>(()));
        assert!(result.unwrap_err().is_open());

        clock.advance(Duration::from_micros(800));
        let result = circuit.call(|| Ok::<_, &str>(()));
        assert!(result.unwrap_err().is_open());

        clock.advance(Duration::from_micros(150));
        circuit.call(|| Ok::<_, &str>(())).expect("probe admitted");
        assert!(circuit.is_closed());
    }

    #[test]
    fn test_jitter_keeps_sub_millisecond_remainder() {
        let config = Config {
            reset_timeout: Duration::from_micros(1_500),
            jitter_factor: 0.2,
            ..config(1, 0, 1)
        };

        for _ in 0..50 {
            let timeout = config.effective_reset_timeout_secs();
            assert!(
                (0.001_199..=0.001_501).contains(&timeout),
                "Jittered timeout {} outside 1.2ms..=1.5ms",
                timeout
            );
        }
    }
}
