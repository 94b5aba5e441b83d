//! Builder API for ergonomic circuit breaker configuration

use crate::{
    CircuitState, Clock, ConfigError, Ledger, MonotonicClock,
    callbacks::Callbacks,
    circuit::{CircuitBreaker, CircuitContext, Config},
};
use std::sync::Arc;
use std::time::Duration;

/// Builder for creating circuit breakers with fluent API
///
/// Every setting of [`Config`] except `jitter_factor` must be provided;
/// [`CircuitBuilder::build`] reports the first missing or invalid one.
pub struct CircuitBuilder {
    name: String,
    failure_threshold: Option<usize>,
    reset_timeout: Option<Duration>,
    success_threshold: Option<usize>,
    max_retries: Option<u32>,
    base_retry_delay: Option<Duration>,
    max_retry_delay: Option<Duration>,
    jitter_factor: f64,
    clock: Option<Arc<dyn Clock>>,
    callbacks: Callbacks,
}

impl CircuitBuilder {
    /// Create a new builder for a circuit with the given name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            failure_threshold: None,
            reset_timeout: None,
            success_threshold: None,
            max_retries: None,
            base_retry_delay: None,
            max_retry_delay: None,
            jitter_factor: 0.0,
            clock: None,
            callbacks: Callbacks::new(),
        }
    }

    /// Take every setting from an existing configuration
    pub fn config(mut self, config: Config) -> Self {
        self.failure_threshold = Some(config.failure_threshold);
        self.reset_timeout = Some(config.reset_timeout);
        self.success_threshold = Some(config.success_threshold);
        self.max_retries = Some(config.max_retries);
        self.base_retry_delay = Some(config.base_retry_delay);
        self.max_retry_delay = Some(config.max_retry_delay);
        self.jitter_factor = config.jitter_factor;
        self
    }

    /// Set the failure threshold (failures counted while Closed that open the circuit)
    pub fn failure_threshold(mut self, threshold: usize) -> Self {
        self.failure_threshold = Some(threshold);
        self
    }

    /// Set how long the circuit stays Open before admitting a probe
    pub fn reset_timeout(mut self, timeout: Duration) -> Self {
        self.reset_timeout = Some(timeout);
        self
    }

    /// Set the success threshold (successes needed to close from half-open)
    pub fn success_threshold(mut self, threshold: usize) -> Self {
        self.success_threshold = Some(threshold);
        self
    }

    /// Set how many times a failed call is retried before giving up
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = Some(retries);
        self
    }

    pub fn base_retry_delay(mut self, delay: Duration) -> Self {
        self.base_retry_delay = Some(delay);
        self
    }

    pub fn max_retry_delay(mut self, delay: Duration) -> Self {
        self.max_retry_delay = Some(delay);
        self
    }

    /// Set both backoff bounds at once
    pub fn retry_delays(self, base: Duration, max: Duration) -> Self {
        self.base_retry_delay(base).max_retry_delay(max)
    }

    /// Set the jitter factor (0.0 = no jitter, 1.0 = full jitter)
    /// Uses chrono-machines formula: timeout * (1 - jitter + rand * jitter)
    pub fn jitter_factor(mut self, factor: f64) -> Self {
        self.jitter_factor = factor;
        self
    }

    /// Use a custom time source instead of [`MonotonicClock`]
    ///
    /// # Examples
    ///
    /// ```rust
    /// use backoff_breaker::{CircuitBreaker, ManualClock};
    /// use std::sync::Arc;
    /// use std::time::Duration;
    ///
    /// let clock = Arc::new(ManualClock::new());
    /// let circuit = CircuitBreaker::builder("api")
    ///     .failure_threshold(1)
    ///     .reset_timeout(Duration::from_secs(30))
    ///     .success_threshold(1)
    ///     .max_retries(2)
    ///     .retry_delays(Duration::from_millis(100), Duration::from_secs(1))
    ///     .clock(clock.clone())
    ///     .build()
    ///     .unwrap();
    ///
    /// let _ = circuit.call(|| Err::<(), _>("down"));
    /// assert!(circuit.is_open());
    /// assert_eq!(clock.sleeps().len(), 2);
    /// ```
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Set callback for when circuit opens
    pub fn on_open<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.callbacks.on_open = Some(Arc::new(f));
        self
    }

    /// Set callback for when circuit closes
    pub fn on_close<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.callbacks.on_close = Some(Arc::new(f));
        self
    }

    /// Set callback for when circuit enters half-open
    pub fn on_half_open<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.callbacks.on_half_open = Some(Arc::new(f));
        self
    }

    /// Set callback receiving every transition as `(name, from, to)`
    pub fn on_transition<F>(mut self, f: F) -> Self
    where
        F: Fn(&str, CircuitState, CircuitState) + Send + Sync + 'static,
    {
        self.callbacks.on_transition = Some(Arc::new(f));
        self
    }

    /// Validate the settings and build the circuit breaker
    pub fn build(self) -> Result<CircuitBreaker, ConfigError> {
        let config = Config {
            failure_threshold: self
                .failure_threshold
                .ok_or(ConfigError::Missing("failure_threshold"))?,
            reset_timeout: self
                .reset_timeout
                .ok_or(ConfigError::Missing("reset_timeout"))?,
            success_threshold: self
                .success_threshold
                .ok_or(ConfigError::Missing("success_threshold"))?,
            max_retries: self
                .max_retries
                .ok_or(ConfigError::Missing("max_retries"))?,
            base_retry_delay: self
                .base_retry_delay
                .ok_or(ConfigError::Missing("base_retry_delay"))?,
            max_retry_delay: self
                .max_retry_delay
                .ok_or(ConfigError::Missing("max_retry_delay"))?,
            jitter_factor: self.jitter_factor,
        };
        config.validate()?;

        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(MonotonicClock::new()));

        let context = CircuitContext {
            name: self.name,
            config,
            clock,
            ledger: Arc::new(Ledger::new()),
        };

        Ok(CircuitBreaker::with_context_and_callbacks(
            context,
            self.callbacks,
        ))
    }
}
