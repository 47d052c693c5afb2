//! Order placement endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use common::{CorrelationId, CustomerId, OrderId, PaymentId, ProductId};
use domain::{Money, Order, OrderStatus, Payment, PaymentStatus};
use saga::{Inconsistency, PlaceOrder, SagaState};
use serde::Serialize;

use crate::AppState;
use crate::error::ApiError;

// -- Response types --

#[derive(Debug, Serialize)]
pub struct OrderResponse {
    pub id: OrderId,
    pub customer_id: CustomerId,
    pub product_id: ProductId,
    pub product_name: String,
    pub quantity: u32,
    #[serde(with = "domain::money::major_units")]
    pub total_price: Money,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
}

impl From<Order> for OrderResponse {
    fn from(order: Order) -> Self {
        Self {
            id: order.id,
            customer_id: order.customer_id,
            product_id: order.product_id,
            product_name: order.product_name,
            quantity: order.quantity,
            total_price: order.total_price,
            status: order.status,
            created_at: order.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PaymentResponse {
    pub id: PaymentId,
    pub order_id: OrderId,
    #[serde(with = "domain::money::major_units")]
    pub amount: Money,
    pub payment_method: String,
    pub payment_gateway: String,
    pub transaction_id: String,
    pub status: PaymentStatus,
    pub created_at: DateTime<Utc>,
}

impl From<Payment> for PaymentResponse {
    fn from(payment: Payment) -> Self {
        Self {
            id: payment.id,
            order_id: payment.order_id,
            amount: payment.amount,
            payment_method: payment.method.as_str().to_string(),
            payment_gateway: payment.gateway,
            transaction_id: payment.transaction_id,
            status: payment.status,
            created_at: payment.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct OrderPlacedResponse {
    pub correlation_id: CorrelationId,
    pub saga_state: SagaState,
    pub order: OrderResponse,
    pub payment: PaymentResponse,
    /// `"enqueued"` or the reason the notification was not handed over.
    pub notification: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inconsistency: Option<Inconsistency>,
}

// -- Handlers --

/// POST /orders: runs the order saga.
///
/// Answers 201 once the order is `CONFIRMED`, or 202 when the payment went
/// through but the order is still `PENDING` and flagged for reconciliation.
#[tracing::instrument(skip(state, request))]
pub async fn place(
    State(state): State<Arc<AppState>>,
    Json(request): Json<PlaceOrder>,
) -> Result<(StatusCode, Json<OrderPlacedResponse>), ApiError> {
    let report = state.saga.place_order(request).await?;

    let status = if report.order.status == OrderStatus::Confirmed {
        StatusCode::CREATED
    } else {
        StatusCode::ACCEPTED
    };

    Ok((
        status,
        Json(OrderPlacedResponse {
            correlation_id: report.correlation_id,
            saga_state: report.state,
            order: report.order.into(),
            payment: report.payment.into(),
            notification: report.notification.as_str(),
            inconsistency: report.inconsistency,
        }),
    ))
}
