//! Observation recording with degraded-mode fallback.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use saga::{Observation, ObservationListing, ReconcileReport, RecordOutcome};
use serde::Serialize;

use crate::AppState;
use crate::error::ApiError;

#[derive(Debug, Serialize)]
pub struct RecordResponse {
    /// `saved`, `degraded` or `failed`.
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// POST /observations: stores an observation, or caches it locally while
/// the record service's circuit is open.
#[tracing::instrument(skip(state, observation))]
pub async fn record(
    State(state): State<Arc<AppState>>,
    Json(observation): Json<Observation>,
) -> Result<(StatusCode, Json<RecordResponse>), ApiError> {
    if observation.is_empty() {
        return Err(ApiError::BadRequest("observation has no fields".to_string()));
    }

    let outcome = state.recorder.record(observation).await;
    let name = outcome.as_str();
    let (status, error) = match outcome {
        RecordOutcome::Saved => (StatusCode::CREATED, None),
        RecordOutcome::Cached => (StatusCode::ACCEPTED, None),
        RecordOutcome::Failed(reason) => (StatusCode::BAD_GATEWAY, Some(reason)),
    };

    Ok((status, Json(RecordResponse { status: name, error })))
}

/// GET /observations: the stored observations, or the cached ones with
/// `degraded: true` when the record service cannot be read.
#[tracing::instrument(skip(state))]
pub async fn list(State(state): State<Arc<AppState>>) -> Json<ObservationListing> {
    Json(state.recorder.list().await)
}

/// POST /observations/reconcile: replays cached observations.
#[tracing::instrument(skip(state))]
pub async fn reconcile(State(state): State<Arc<AppState>>) -> Json<ReconcileReport> {
    Json(state.recorder.reconcile().await)
}
