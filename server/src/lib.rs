//! Demo HTTP service for backoff-breaker
//!
//! Wraps a simulated flaky dependency in a circuit breaker and exposes the
//! outcome and the breaker state over HTTP.

pub mod config;
pub mod http;
pub mod service;

pub use config::ServerConfig;
pub use http::{AppState, router};
pub use service::SimulatedService;
