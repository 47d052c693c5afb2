//! Order service: order rows and their status.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{CustomerId, OrderId, ProductId};
use domain::{Money, NewOrder, Order, OrderStatus};
use reqwest::StatusCode;
use resilience::{ResilientCall, RetryPolicy};
use serde::{Deserialize, Serialize};

use super::http::{ErrorBody, HttpEndpoint, decode, transport_error, unexpected_status};
use crate::error::{Resource, SagaError, ServiceError};

/// Transport to the order service.
#[async_trait]
pub trait OrderService: Send + Sync {
    /// Persists a new order with status `PENDING`.
    async fn create(&self, order: &NewOrder) -> Result<Order, ServiceError>;

    async fn order(&self, order_id: OrderId) -> Result<Order, ServiceError>;

    async fn update_status(
        &self,
        order_id: OrderId,
        status: OrderStatus,
    ) -> Result<OrderStatus, ServiceError>;
}

// ---------------------------------------------------------------------------
// HTTP
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct CreateOrderBody<'a> {
    customer_id: CustomerId,
    product_id: ProductId,
    product_name: &'a str,
    quantity: u32,
    #[serde(with = "domain::money::major_units")]
    total_price: Money,
}

#[derive(Debug, Deserialize)]
struct OrderBody {
    id: OrderId,
    customer_id: CustomerId,
    product_id: ProductId,
    #[serde(default)]
    product_name: String,
    quantity: u32,
    #[serde(with = "domain::money::major_units")]
    total_price: Money,
    status: OrderStatus,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
}

impl From<OrderBody> for Order {
    fn from(body: OrderBody) -> Self {
        Order {
            id: body.id,
            customer_id: body.customer_id,
            product_id: body.product_id,
            product_name: body.product_name,
            quantity: body.quantity,
            total_price: body.total_price,
            status: body.status,
            created_at: body.created_at.unwrap_or_else(Utc::now),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct StatusBody {
    status: OrderStatus,
}

/// Order service over HTTP.
#[derive(Debug, Clone)]
pub struct HttpOrderService {
    endpoint: HttpEndpoint,
}

impl HttpOrderService {
    pub fn new(endpoint: HttpEndpoint) -> Self {
        Self { endpoint }
    }
}

#[async_trait]
impl OrderService for HttpOrderService {
    async fn create(&self, order: &NewOrder) -> Result<Order, ServiceError> {
        let body = CreateOrderBody {
            customer_id: order.customer_id,
            product_id: order.product_id,
            product_name: &order.product_name,
            quantity: order.quantity,
            total_price: order.total_price,
        };
        let response = self
            .endpoint
            .client()
            .post(self.endpoint.url("/orders"))
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;

        match response.status() {
            StatusCode::CREATED | StatusCode::OK => Ok(decode::<OrderBody>(response).await?.into()),
            StatusCode::BAD_REQUEST => Err(ServiceError::Validation(
                ErrorBody::read(response).await.message(StatusCode::BAD_REQUEST),
            )),
            _ => Err(unexpected_status(response).await),
        }
    }

    async fn order(&self, order_id: OrderId) -> Result<Order, ServiceError> {
        let response = self
            .endpoint
            .client()
            .get(self.endpoint.url(&format!("/orders/{order_id}")))
            .send()
            .await
            .map_err(transport_error)?;

        match response.status() {
            StatusCode::OK => Ok(decode::<OrderBody>(response).await?.into()),
            StatusCode::NOT_FOUND => Err(ServiceError::NotFound(Resource::Order(order_id))),
            _ => Err(unexpected_status(response).await),
        }
    }

    async fn update_status(
        &self,
        order_id: OrderId,
        status: OrderStatus,
    ) -> Result<OrderStatus, ServiceError> {
        let response = self
            .endpoint
            .client()
            .put(self.endpoint.url(&format!("/orders/{order_id}/status")))
            .json(&StatusBody { status })
            .send()
            .await
            .map_err(transport_error)?;

        match response.status() {
            StatusCode::OK => Ok(decode::<StatusBody>(response).await?.status),
            StatusCode::NOT_FOUND => Err(ServiceError::NotFound(Resource::Order(order_id))),
            StatusCode::BAD_REQUEST => Err(ServiceError::Validation(
                ErrorBody::read(response).await.message(StatusCode::BAD_REQUEST),
            )),
            StatusCode::CONFLICT => Err(ServiceError::InvalidState(
                ErrorBody::read(response).await.message(StatusCode::CONFLICT),
            )),
            _ => Err(unexpected_status(response).await),
        }
    }
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct InMemoryOrderState {
    orders: HashMap<OrderId, Order>,
    next_id: i64,
    unavailable: bool,
    failing_statuses: Vec<OrderStatus>,
}

/// In-memory order store for tests and local runs.
///
/// Status updates follow [`OrderStatus::transition_to`].
#[derive(Debug, Clone, Default)]
pub struct InMemoryOrderService {
    state: Arc<Mutex<InMemoryOrderState>>,
}

impl InMemoryOrderService {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, InMemoryOrderState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Makes every call fail with a transient error.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.lock().unavailable = unavailable;
    }

    /// Makes updates to `status` fail with a transient error, leaving other
    /// calls working.
    pub fn fail_status_updates_to(&self, status: OrderStatus) {
        self.lock().failing_statuses.push(status);
    }

    pub fn get(&self, order_id: OrderId) -> Option<Order> {
        self.lock().orders.get(&order_id).cloned()
    }

    pub fn orders(&self) -> Vec<Order> {
        let mut orders: Vec<_> = self.lock().orders.values().cloned().collect();
        orders.sort_by_key(|o| o.id);
        orders
    }

    fn check_available(state: &InMemoryOrderState) -> Result<(), ServiceError> {
        if state.unavailable {
            return Err(ServiceError::Transient("order service unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl OrderService for InMemoryOrderService {
    async fn create(&self, order: &NewOrder) -> Result<Order, ServiceError> {
        let mut state = self.lock();
        Self::check_available(&state)?;
        if order.quantity == 0 {
            return Err(ServiceError::Validation("quantity must be positive".to_string()));
        }
        state.next_id += 1;
        let order = order.clone().into_order(OrderId::new(state.next_id));
        state.orders.insert(order.id, order.clone());
        Ok(order)
    }

    async fn order(&self, order_id: OrderId) -> Result<Order, ServiceError> {
        let state = self.lock();
        Self::check_available(&state)?;
        state
            .orders
            .get(&order_id)
            .cloned()
            .ok_or(ServiceError::NotFound(Resource::Order(order_id)))
    }

    async fn update_status(
        &self,
        order_id: OrderId,
        status: OrderStatus,
    ) -> Result<OrderStatus, ServiceError> {
        let mut state = self.lock();
        Self::check_available(&state)?;
        if state.failing_statuses.contains(&status) {
            return Err(ServiceError::Transient(format!(
                "status update to {status} timed out"
            )));
        }
        let order = state
            .orders
            .get_mut(&order_id)
            .ok_or(ServiceError::NotFound(Resource::Order(order_id)))?;
        order.status = order
            .status
            .transition_to(status)
            .map_err(|e| ServiceError::InvalidState(e.to_string()))?;
        Ok(order.status)
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Order adapter used by the saga.
#[derive(Clone)]
pub struct OrderClient {
    service: Arc<dyn OrderService>,
    call: ResilientCall,
}

impl std::fmt::Debug for OrderClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderClient")
            .field("call", &self.call)
            .finish_non_exhaustive()
    }
}

impl OrderClient {
    pub const SERVICE: &'static str = "order";

    pub fn new(service: Arc<dyn OrderService>, call: ResilientCall) -> Self {
        Self { service, call }
    }

    pub fn call(&self) -> &ResilientCall {
        &self.call
    }

    pub async fn create(&self, order: &NewOrder) -> Result<Order, SagaError> {
        self.call
            .invoke(|| self.service.create(order))
            .await
            .map_err(|e| SagaError::from_call(Self::SERVICE, e))
    }

    pub async fn order(&self, order_id: OrderId) -> Result<Order, SagaError> {
        self.order_with(order_id, self.call.policy()).await
    }

    pub async fn order_with(
        &self,
        order_id: OrderId,
        policy: &RetryPolicy,
    ) -> Result<Order, SagaError> {
        self.call
            .invoke_with(policy, || self.service.order(order_id))
            .await
            .map_err(|e| SagaError::from_call(Self::SERVICE, e))
    }

    pub async fn update_status(
        &self,
        order_id: OrderId,
        status: OrderStatus,
    ) -> Result<OrderStatus, SagaError> {
        self.update_status_with(order_id, status, self.call.policy())
            .await
    }

    pub async fn update_status_with(
        &self,
        order_id: OrderId,
        status: OrderStatus,
        policy: &RetryPolicy,
    ) -> Result<OrderStatus, SagaError> {
        self.call
            .invoke_with(policy, || self.service.update_status(order_id, status))
            .await
            .map_err(|e| SagaError::from_call(Self::SERVICE, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_order() -> NewOrder {
        NewOrder {
            customer_id: CustomerId::new(1),
            product_id: ProductId::new(2),
            product_name: "Laptop".to_string(),
            quantity: 1,
            total_price: Money::from_cents(99999),
        }
    }

    #[tokio::test]
    async fn test_create_starts_pending() {
        let service = InMemoryOrderService::new();
        let order = service.create(&new_order()).await.unwrap();

        assert_eq!(order.id, OrderId::new(1));
        assert_eq!(order.status, OrderStatus::Pending);
    }

    #[tokio::test]
    async fn test_update_status_follows_transition_rules() {
        let service = InMemoryOrderService::new();
        let order = service.create(&new_order()).await.unwrap();

        let status = service
            .update_status(order.id, OrderStatus::Cancelled)
            .await
            .unwrap();
        assert_eq!(status, OrderStatus::Cancelled);

        let err = service
            .update_status(order.id, OrderStatus::Confirmed)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_unknown_order() {
        let service = InMemoryOrderService::new();
        let err = service
            .update_status(OrderId::new(9), OrderStatus::Confirmed)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(Resource::Order(_))));
    }

    #[tokio::test]
    async fn test_scripted_status_failure() {
        let service = InMemoryOrderService::new();
        let order = service.create(&new_order()).await.unwrap();
        service.fail_status_updates_to(OrderStatus::Confirmed);

        let err = service
            .update_status(order.id, OrderStatus::Confirmed)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Transient(_)));
        assert_eq!(service.get(order.id).unwrap().status, OrderStatus::Pending);
    }
}
