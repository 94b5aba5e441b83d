//! HTTP routes.
//!
//! - `/api/request` runs the simulated service through the breaker
//! - `/api/state` reports the breaker's state and counters

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use backoff_breaker::{CircuitBreaker, CircuitState};
use serde::Serialize;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::service::SimulatedService;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub breaker: Arc<CircuitBreaker>,
    pub service: SimulatedService,
}

impl AppState {
    pub fn new(breaker: Arc<CircuitBreaker>, service: SimulatedService) -> Self {
        Self { breaker, service }
    }
}

/// Response envelope for `/api/request`.
#[derive(Debug, Serialize)]
pub struct Envelope {
    pub status: &'static str,
    pub message: String,
}

impl Envelope {
    fn success(message: impl Into<String>) -> Self {
        Self {
            status: "success",
            message: message.into(),
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            status: "error",
            message: message.into(),
        }
    }
}

/// Body of `/api/state`.
#[derive(Debug, Serialize)]
pub struct StateReport {
    pub state: &'static str,
    pub failure_count: usize,
    pub half_open_successes: usize,
    pub since_last_transition_ms: u64,
    pub successes: u64,
    pub failures: u64,
    pub rejections: u64,
}

fn state_label(state: CircuitState) -> &'static str {
    match state {
        CircuitState::Closed => "closed",
        CircuitState::Open => "open",
        CircuitState::HalfOpen => "half_open",
    }
}

/// Build the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/request", get(handle_request).post(handle_request))
        .route("/api/state", get(circuit_state))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn handle_request(State(state): State<AppState>) -> Response {
    let AppState { breaker, service } = state;

    // Retry backoff sleeps on the calling thread
    let outcome = tokio::task::spawn_blocking(move || breaker.call(|| service.call())).await;

    match outcome {
        Ok(Ok(())) => (
            StatusCode::OK,
            Json(Envelope::success("Request processed successfully")),
        )
            .into_response(),
        Ok(Err(err)) => {
            tracing::debug!(error = %err, rejected = err.is_open(), "Guarded request failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(Envelope::error(format!("Service unavailable: {err}"))),
            )
                .into_response()
        }
        Err(join_error) => {
            tracing::error!(error = %join_error, "Guarded request task failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(Envelope::error("Internal server error")),
            )
                .into_response()
        }
    }
}

async fn circuit_state(State(state): State<AppState>) -> Json<StateReport> {
    let snapshot = state.breaker.snapshot();

    Json(StateReport {
        state: state_label(snapshot.state),
        failure_count: snapshot.failure_count,
        half_open_successes: snapshot.half_open_successes,
        since_last_transition_ms: u64::try_from(snapshot.since_last_transition.as_millis())
            .unwrap_or(u64::MAX),
        successes: snapshot.totals.successes,
        failures: snapshot.totals.failures,
        rejections: snapshot.totals.rejections,
    })
}
