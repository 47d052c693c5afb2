//! Refund endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use common::{CorrelationId, OrderId, PaymentId};
use domain::OrderStatus;
use saga::Inconsistency;
use serde::Serialize;

use super::orders::PaymentResponse;
use crate::AppState;
use crate::error::ApiError;

#[derive(Debug, Serialize)]
pub struct RefundResponse {
    pub correlation_id: CorrelationId,
    pub payment: PaymentResponse,
    pub order_id: OrderId,
    pub order_status: OrderStatus,
    pub stock_released: bool,
    pub notification: &'static str,
    pub inconsistencies: Vec<Inconsistency>,
}

/// POST /payments/{id}/refund: refunds a `SUCCESS` payment, cancels its
/// order and releases its stock.
#[tracing::instrument(skip(state))]
pub async fn refund(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<RefundResponse>, ApiError> {
    let report = state.saga.refund(PaymentId::new(id)).await?;

    Ok(Json(RefundResponse {
        correlation_id: report.correlation_id,
        payment: report.payment.into(),
        order_id: report.order_id,
        order_status: report.order_status,
        stock_released: report.stock_released,
        notification: report.notification.as_str(),
        inconsistencies: report.inconsistencies,
    }))
}
