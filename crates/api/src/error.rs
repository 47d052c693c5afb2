//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use saga::{RefundFailure, SagaError, SagaFailure};
use serde_json::json;

/// API-level error type that maps to HTTP responses.
///
/// Saga and refund failures keep whatever partial results are safe to show
/// (order id and status, payment id, flagged inconsistencies).
#[derive(Debug)]
pub enum ApiError {
    /// Bad request from the client.
    BadRequest(String),
    /// The order saga did not confirm the order.
    Saga(Box<SagaFailure>),
    /// The refund was rejected or could not be fully compensated.
    Refund(Box<RefundFailure>),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, json!({ "error": msg })),
            ApiError::Saga(failure) => {
                let status = status_for(&failure.error);
                log_failure(status, &failure.error);
                let body = json!({
                    "error": failure.error.to_string(),
                    "kind": failure.kind().as_str(),
                    "correlation_id": failure.correlation_id,
                    "saga_state": failure.state,
                    "order_id": failure.order_id,
                    "order_status": failure.order_status,
                    "payment_id": failure.payment_id,
                    "inconsistencies": failure.inconsistencies,
                });
                (status, body)
            }
            ApiError::Refund(failure) => {
                let status = status_for(&failure.error);
                log_failure(status, &failure.error);
                let body = json!({
                    "error": failure.error.to_string(),
                    "kind": failure.kind().as_str(),
                    "correlation_id": failure.correlation_id,
                    "payment_id": failure.payment_id,
                    "refunded": failure.refunded,
                    "order_id": failure.order_id,
                    "inconsistencies": failure.inconsistencies,
                });
                (status, body)
            }
        };

        (status, axum::Json(body)).into_response()
    }
}

fn status_for(err: &SagaError) -> StatusCode {
    match err {
        SagaError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        SagaError::ProductNotFound(_)
        | SagaError::OrderNotFound(_)
        | SagaError::PaymentNotFound(_) => StatusCode::NOT_FOUND,
        SagaError::InsufficientStock { .. } | SagaError::InvalidState(_) => StatusCode::CONFLICT,
        SagaError::PaymentDeclined { .. } => StatusCode::PAYMENT_REQUIRED,
        SagaError::ServiceDegraded { .. }
        | SagaError::DependencyUnavailable { .. }
        | SagaError::Cancelled { .. } => StatusCode::SERVICE_UNAVAILABLE,
        SagaError::StepTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        SagaError::CompensationFailed { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn log_failure(status: StatusCode, err: &SagaError) {
    if status.is_server_error() {
        tracing::error!(status = status.as_u16(), error = %err, "request failed");
    }
}

impl From<SagaFailure> for ApiError {
    fn from(failure: SagaFailure) -> Self {
        ApiError::Saga(Box::new(failure))
    }
}

impl From<RefundFailure> for ApiError {
    fn from(failure: RefundFailure) -> Self {
        ApiError::Refund(Box::new(failure))
    }
}
