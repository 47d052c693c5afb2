//! Health check endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use resilience::{CircuitSnapshot, CircuitState};
use serde::Serialize;

use crate::AppState;

#[derive(Debug, Serialize)]
pub struct BrokerHealth {
    pub connected: bool,
    pub destination: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// `"healthy"` when every circuit is closed, `"degraded"` otherwise.
    pub status: &'static str,
    pub circuits: Vec<CircuitSnapshot>,
    pub broker: BrokerHealth,
    pub degraded_cache_entries: usize,
    pub inconsistencies: usize,
}

/// GET /health: circuit states, broker connection and cache size.
pub async fn check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let mut circuits = state.saga.snapshots();
    circuits.push(state.recorder.snapshot());

    let status = if circuits.iter().all(|c| c.state == CircuitState::Closed) {
        "healthy"
    } else {
        "degraded"
    };
    let publisher = state.saga.publisher();

    Json(HealthResponse {
        status,
        circuits,
        broker: BrokerHealth {
            connected: publisher.is_connected(),
            destination: publisher.destination().to_string(),
        },
        degraded_cache_entries: state.recorder.cache_size(),
        inconsistencies: state.saga.inconsistencies().len(),
    })
}
