//! Payment service: charges, lookups and refunds.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{CustomerId, OrderId, PaymentId};
use domain::{Money, Payment, PaymentMethod, PaymentStatus};
use reqwest::StatusCode;
use resilience::ResilientCall;
use serde::{Deserialize, Serialize};

use super::http::{ErrorBody, HttpEndpoint, decode, transport_error, unexpected_status};
use crate::error::{Resource, SagaError, ServiceError};

/// A charge for one order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChargeRequest {
    pub order_id: OrderId,
    pub customer_id: CustomerId,
    #[serde(with = "domain::money::major_units")]
    pub amount: Money,
    pub payment_method: PaymentMethod,
}

/// Transport to the payment service.
#[async_trait]
pub trait PaymentService: Send + Sync {
    /// Creates a payment row. A decline is reported as
    /// [`ServiceError::Declined`] carrying the `FAILED` row.
    async fn charge(&self, request: &ChargeRequest) -> Result<Payment, ServiceError>;

    async fn payment(&self, payment_id: PaymentId) -> Result<Payment, ServiceError>;

    /// Marks a `SUCCESS` payment as `REFUNDED`.
    async fn refund(&self, payment_id: PaymentId) -> Result<Payment, ServiceError>;
}

// ---------------------------------------------------------------------------
// HTTP
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct PaymentBody {
    id: PaymentId,
    order_id: OrderId,
    #[serde(default)]
    customer_id: Option<CustomerId>,
    #[serde(with = "domain::money::major_units")]
    amount: Money,
    payment_method: PaymentMethod,
    #[serde(default)]
    payment_gateway: String,
    #[serde(default)]
    transaction_id: String,
    status: PaymentStatus,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
}

impl PaymentBody {
    fn into_payment(self, fallback_customer: Option<CustomerId>) -> Payment {
        Payment {
            id: self.id,
            order_id: self.order_id,
            customer_id: self.customer_id.or(fallback_customer),
            amount: self.amount,
            method: self.payment_method,
            gateway: self.payment_gateway,
            transaction_id: self.transaction_id,
            status: self.status,
            created_at: self.created_at.unwrap_or_else(Utc::now),
        }
    }
}

/// Payment service over HTTP.
///
/// `POST /payments` answers 201 on success and 402 with the `FAILED` row on
/// decline; `POST /payments/{id}/refund` answers 400 for a payment that is
/// not `SUCCESS`.
#[derive(Debug, Clone)]
pub struct HttpPaymentService {
    endpoint: HttpEndpoint,
}

impl HttpPaymentService {
    pub fn new(endpoint: HttpEndpoint) -> Self {
        Self { endpoint }
    }
}

#[async_trait]
impl PaymentService for HttpPaymentService {
    async fn charge(&self, request: &ChargeRequest) -> Result<Payment, ServiceError> {
        let response = self
            .endpoint
            .client()
            .post(self.endpoint.url("/payments"))
            .json(request)
            .send()
            .await
            .map_err(transport_error)?;

        match response.status() {
            StatusCode::CREATED | StatusCode::OK => Ok(decode::<PaymentBody>(response)
                .await?
                .into_payment(Some(request.customer_id))),
            StatusCode::PAYMENT_REQUIRED => {
                let payment = decode::<PaymentBody>(response)
                    .await?
                    .into_payment(Some(request.customer_id));
                Err(ServiceError::Declined(Box::new(payment)))
            }
            StatusCode::BAD_REQUEST => Err(ServiceError::Validation(
                ErrorBody::read(response).await.message(StatusCode::BAD_REQUEST),
            )),
            _ => Err(unexpected_status(response).await),
        }
    }

    async fn payment(&self, payment_id: PaymentId) -> Result<Payment, ServiceError> {
        let response = self
            .endpoint
            .client()
            .get(self.endpoint.url(&format!("/payments/{payment_id}")))
            .send()
            .await
            .map_err(transport_error)?;

        match response.status() {
            StatusCode::OK => Ok(decode::<PaymentBody>(response).await?.into_payment(None)),
            StatusCode::NOT_FOUND => Err(ServiceError::NotFound(Resource::Payment(payment_id))),
            _ => Err(unexpected_status(response).await),
        }
    }

    async fn refund(&self, payment_id: PaymentId) -> Result<Payment, ServiceError> {
        let response = self
            .endpoint
            .client()
            .post(self.endpoint.url(&format!("/payments/{payment_id}/refund")))
            .send()
            .await
            .map_err(transport_error)?;

        match response.status() {
            StatusCode::OK => Ok(decode::<PaymentBody>(response).await?.into_payment(None)),
            StatusCode::NOT_FOUND => Err(ServiceError::NotFound(Resource::Payment(payment_id))),
            StatusCode::BAD_REQUEST | StatusCode::CONFLICT => Err(ServiceError::InvalidState(
                ErrorBody::read(response).await.message(StatusCode::BAD_REQUEST),
            )),
            _ => Err(unexpected_status(response).await),
        }
    }
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

const GATEWAYS: [&str; 4] = ["Stripe", "PayPal", "Razorpay", "Square"];

/// Scripted outcome of the next charge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChargeOutcome {
    Approve,
    Decline,
    /// Fails before a row is written, like a dropped connection.
    Unavailable,
}

#[derive(Debug, Default)]
struct InMemoryPaymentState {
    payments: HashMap<PaymentId, Payment>,
    next_id: i64,
    script: VecDeque<ChargeOutcome>,
    decline_all: bool,
    unavailable: bool,
    charge_calls: u32,
}

/// In-memory payment service for tests and local runs.
///
/// Charges are approved unless scripted otherwise; every attempt, declined
/// ones included, is kept as its own row.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPaymentService {
    state: Arc<Mutex<InMemoryPaymentState>>,
}

impl InMemoryPaymentService {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, InMemoryPaymentState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queues outcomes for the next charges, consumed in order.
    pub fn script(&self, outcomes: impl IntoIterator<Item = ChargeOutcome>) {
        self.lock().script.extend(outcomes);
    }

    /// Declines every charge until switched off.
    pub fn set_decline_all(&self, decline: bool) {
        self.lock().decline_all = decline;
    }

    /// Makes every call fail with a transient error.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.lock().unavailable = unavailable;
    }

    /// All rows recorded for `order_id`, oldest first.
    pub fn payments_for_order(&self, order_id: OrderId) -> Vec<Payment> {
        let mut rows: Vec<_> = self
            .lock()
            .payments
            .values()
            .filter(|p| p.order_id == order_id)
            .cloned()
            .collect();
        rows.sort_by_key(|p| p.id);
        rows
    }

    pub fn charge_calls(&self) -> u32 {
        self.lock().charge_calls
    }

    fn check_available(state: &InMemoryPaymentState) -> Result<(), ServiceError> {
        if state.unavailable {
            return Err(ServiceError::Transient("payment service unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl PaymentService for InMemoryPaymentService {
    async fn charge(&self, request: &ChargeRequest) -> Result<Payment, ServiceError> {
        let mut state = self.lock();
        state.charge_calls += 1;
        Self::check_available(&state)?;

        if !request.amount.is_positive() {
            return Err(ServiceError::Validation("Invalid amount".to_string()));
        }

        let outcome = match state.script.pop_front() {
            Some(outcome) => outcome,
            None if state.decline_all => ChargeOutcome::Decline,
            None => ChargeOutcome::Approve,
        };
        if outcome == ChargeOutcome::Unavailable {
            return Err(ServiceError::Transient("connection reset by peer".to_string()));
        }

        state.next_id += 1;
        let id = PaymentId::new(state.next_id);
        let payment = Payment {
            id,
            order_id: request.order_id,
            customer_id: Some(request.customer_id),
            amount: request.amount,
            method: request.payment_method.clone(),
            gateway: GATEWAYS[(state.next_id as usize) % GATEWAYS.len()].to_string(),
            transaction_id: format!("TXN-{:06}", 100_000 + state.next_id),
            status: if outcome == ChargeOutcome::Approve {
                PaymentStatus::Success
            } else {
                PaymentStatus::Failed
            },
            created_at: Utc::now(),
        };
        state.payments.insert(id, payment.clone());

        match payment.status {
            PaymentStatus::Success => Ok(payment),
            _ => Err(ServiceError::Declined(Box::new(payment))),
        }
    }

    async fn payment(&self, payment_id: PaymentId) -> Result<Payment, ServiceError> {
        let state = self.lock();
        Self::check_available(&state)?;
        state
            .payments
            .get(&payment_id)
            .cloned()
            .ok_or(ServiceError::NotFound(Resource::Payment(payment_id)))
    }

    async fn refund(&self, payment_id: PaymentId) -> Result<Payment, ServiceError> {
        let mut state = self.lock();
        Self::check_available(&state)?;
        let payment = state
            .payments
            .get_mut(&payment_id)
            .ok_or(ServiceError::NotFound(Resource::Payment(payment_id)))?;
        payment
            .refund()
            .map_err(|e| ServiceError::InvalidState(e.to_string()))?;
        Ok(payment.clone())
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Payment adapter used by the saga.
#[derive(Clone)]
pub struct PaymentClient {
    service: Arc<dyn PaymentService>,
    call: ResilientCall,
}

impl std::fmt::Debug for PaymentClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaymentClient")
            .field("call", &self.call)
            .finish_non_exhaustive()
    }
}

impl PaymentClient {
    pub const SERVICE: &'static str = "payment";

    pub fn new(service: Arc<dyn PaymentService>, call: ResilientCall) -> Self {
        Self { service, call }
    }

    pub fn call(&self) -> &ResilientCall {
        &self.call
    }

    pub async fn charge(&self, request: &ChargeRequest) -> Result<Payment, SagaError> {
        self.call
            .invoke(|| self.service.charge(request))
            .await
            .map_err(|e| SagaError::from_call(Self::SERVICE, e))
    }

    pub async fn payment(&self, payment_id: PaymentId) -> Result<Payment, SagaError> {
        self.call
            .invoke(|| self.service.payment(payment_id))
            .await
            .map_err(|e| SagaError::from_call(Self::SERVICE, e))
    }

    pub async fn refund(&self, payment_id: PaymentId) -> Result<Payment, SagaError> {
        self.call
            .invoke(|| self.service.refund(payment_id))
            .await
            .map_err(|e| SagaError::from_call(Self::SERVICE, e))
    }
}
