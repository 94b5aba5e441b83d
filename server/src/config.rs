//! Server configuration.
//!
//! Every field has a default, so the server starts without a config file.
//! Durations in the `[breaker]` table are millisecond integers:
//!
//! ```toml
//! bind_address = "127.0.0.1:9090"
//!
//! [breaker]
//! failure_threshold = 5
//! reset_timeout_ms = 10000
//!
//! [service]
//! failure_modulus = 4
//! ```

use backoff_breaker::{CircuitBreaker, Config};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid breaker settings: {0}")]
    Breaker(#[from] backoff_breaker::ConfigError),
}

/// Root configuration for the demo server.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Circuit breaker guarding the simulated service.
    pub breaker: BreakerSettings,

    /// Simulated external service.
    pub service: ServiceSettings,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            breaker: BreakerSettings::default(),
            service: ServiceSettings::default(),
        }
    }
}

/// Breaker settings as written in the config file.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BreakerSettings {
    /// Circuit name used in logs and errors.
    pub name: String,
    pub failure_threshold: usize,
    pub reset_timeout_ms: u64,
    pub success_threshold: usize,
    pub max_retries: u32,
    pub base_retry_delay_ms: u64,
    pub max_retry_delay_ms: u64,
    /// Reset timeout jitter (0.0 = none).
    pub jitter_factor: f64,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            name: "external-service".to_string(),
            failure_threshold: 3,
            reset_timeout_ms: 5_000,
            success_threshold: 2,
            max_retries: 3,
            base_retry_delay_ms: 100,
            max_retry_delay_ms: 2_000,
            jitter_factor: 0.0,
        }
    }
}

impl BreakerSettings {
    /// Convert to the breaker's own configuration type.
    pub fn to_config(&self) -> Config {
        Config {
            failure_threshold: self.failure_threshold,
            reset_timeout: Duration::from_millis(self.reset_timeout_ms),
            success_threshold: self.success_threshold,
            max_retries: self.max_retries,
            base_retry_delay: Duration::from_millis(self.base_retry_delay_ms),
            max_retry_delay: Duration::from_millis(self.max_retry_delay_ms),
            jitter_factor: self.jitter_factor,
        }
    }
}

/// Simulated service settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServiceSettings {
    /// A call fails when the wall-clock nanoseconds are divisible by this.
    /// 1 fails every call, 0 never fails.
    pub failure_modulus: u64,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self { failure_modulus: 3 }
    }
}

impl ServerConfig {
    /// Build the circuit breaker described by the `[breaker]` table.
    pub fn build_breaker(&self) -> Result<CircuitBreaker, ConfigError> {
        let breaker = CircuitBreaker::new(self.breaker.name.clone(), self.breaker.to_config())?;
        Ok(breaker)
    }
}

/// Parse and validate configuration from TOML text.
pub fn parse_config(content: &str) -> Result<ServerConfig, ConfigError> {
    let config: ServerConfig = toml::from_str(content)?;
    config.breaker.to_config().validate()?;
    Ok(config)
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<ServerConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    parse_config(&content)
}
