//! Order saga coordinator.

use std::future::Future;
use std::time::Duration;

use common::{CorrelationId, CustomerId, OrderId, PaymentId, ProductId, ShutdownSignal};
use domain::{Money, NewOrder, Order, OrderStatus, Payment};
use notify::{EventType, NotificationEvent, NotificationPublisher, PublishOutcome};
use resilience::{CircuitSnapshot, RetryPolicy};
use serde_json::json;
use thiserror::Error;
use tokio::time::Instant;

use crate::error::{ErrorKind, SagaError};
use crate::events::SagaEvent;
use crate::inconsistency::{Inconsistency, InconsistencyKind, InconsistencyRegister};
use crate::instance::SagaInstance;
use crate::order_fulfillment::{Compensation, SagaStep};
use crate::request::{PlaceOrder, ValidatedOrder};
use crate::services::{ChargeRequest, InventoryClient, OrderClient, PaymentClient};
use crate::state::SagaState;

/// Saga tuning.
///
/// # Default Values
///
/// - `step_timeout`: 30 seconds per forward step
/// - `compensation_policy`: [`RetryPolicy::compensation`]
#[derive(Debug, Clone, PartialEq)]
pub struct SagaConfig {
    /// Upper bound for one forward step, retries and backoff included.
    pub step_timeout: Duration,
    /// Retry policy for releasing stock and cancelling orders.
    pub compensation_policy: RetryPolicy,
}

impl Default for SagaConfig {
    fn default() -> Self {
        Self {
            step_timeout: Duration::from_secs(30),
            compensation_policy: RetryPolicy::compensation(),
        }
    }
}

impl SagaConfig {
    #[must_use]
    pub fn with_step_timeout(mut self, timeout: Duration) -> Self {
        self.step_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_compensation_policy(mut self, policy: RetryPolicy) -> Self {
        self.compensation_policy = policy;
        self
    }
}

/// Outcome of a saga that took payment.
#[derive(Debug, Clone)]
pub struct SagaReport {
    pub correlation_id: CorrelationId,
    pub state: SagaState,
    /// The order as last written; `PENDING` if the confirmation failed.
    pub order: Order,
    pub payment: Payment,
    pub notification: PublishOutcome,
    /// Set when the order could not be moved to `CONFIRMED`.
    pub inconsistency: Option<Inconsistency>,
    pub history: Vec<SagaEvent>,
}

/// A saga that did not take payment, with whatever partial results exist.
#[derive(Debug, Clone, Error)]
#[error("order saga {correlation_id} ended {state}: {error}")]
pub struct SagaFailure {
    pub correlation_id: CorrelationId,
    pub state: SagaState,
    pub order_id: Option<OrderId>,
    /// Last known status of the order row, if one was created.
    pub order_status: Option<OrderStatus>,
    /// The declined payment row, if the charge reached the payment service.
    pub payment_id: Option<PaymentId>,
    #[source]
    pub error: SagaError,
    /// The forward step failure that started compensation.
    pub failure_reason: Option<String>,
    pub notification: Option<PublishOutcome>,
    pub inconsistencies: Vec<Inconsistency>,
    pub history: Vec<SagaEvent>,
}

impl SagaFailure {
    pub fn kind(&self) -> ErrorKind {
        self.error.kind()
    }
}

/// Outcome of a refund.
#[derive(Debug, Clone)]
pub struct RefundReport {
    pub correlation_id: CorrelationId,
    /// The payment, now `REFUNDED`.
    pub payment: Payment,
    pub order_id: OrderId,
    pub order_status: OrderStatus,
    pub stock_released: bool,
    pub notification: PublishOutcome,
    pub inconsistencies: Vec<Inconsistency>,
}

/// A refund that was rejected, or whose compensation could not complete.
#[derive(Debug, Clone, Error)]
#[error("refund of payment {payment_id} failed: {error}")]
pub struct RefundFailure {
    pub correlation_id: CorrelationId,
    pub payment_id: PaymentId,
    /// True if the money was returned before the failure.
    pub refunded: bool,
    pub order_id: Option<OrderId>,
    #[source]
    pub error: SagaError,
    pub notification: Option<PublishOutcome>,
    pub inconsistencies: Vec<Inconsistency>,
}

impl RefundFailure {
    fn before_refund(correlation_id: CorrelationId, payment_id: PaymentId, error: SagaError) -> Self {
        Self {
            correlation_id,
            payment_id,
            refunded: false,
            order_id: None,
            error,
            notification: None,
            inconsistencies: Vec::new(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.error.kind()
    }
}

/// Orchestrates the order fulfillment saga.
///
/// Forward steps: validate → look up product → reserve stock → create order
/// (`PENDING`) → charge payment → confirm order. Stock is always reserved
/// before payment is taken. When a step after the reservation fails, the
/// completed steps are compensated in reverse order under the compensation
/// retry policy.
#[derive(Clone)]
pub struct OrderSaga {
    inventory: InventoryClient,
    orders: OrderClient,
    payments: PaymentClient,
    publisher: NotificationPublisher,
    config: SagaConfig,
    inconsistencies: InconsistencyRegister,
}

impl std::fmt::Debug for OrderSaga {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderSaga")
            .field("config", &self.config)
            .field("publisher", &self.publisher)
            .field("inconsistencies", &self.inconsistencies.len())
            .finish_non_exhaustive()
    }
}

impl OrderSaga {
    pub fn new(
        inventory: InventoryClient,
        orders: OrderClient,
        payments: PaymentClient,
        publisher: NotificationPublisher,
        config: SagaConfig,
    ) -> Self {
        Self {
            inventory,
            orders,
            payments,
            publisher,
            config,
            inconsistencies: InconsistencyRegister::new(),
        }
    }

    pub fn config(&self) -> &SagaConfig {
        &self.config
    }

    pub fn publisher(&self) -> &NotificationPublisher {
        &self.publisher
    }

    /// Circuit snapshots of the inventory, order and payment dependencies.
    pub fn snapshots(&self) -> Vec<CircuitSnapshot> {
        vec![
            self.inventory.call().snapshot(),
            self.orders.call().snapshot(),
            self.payments.call().snapshot(),
        ]
    }

    /// Every inconsistency flagged so far, oldest first.
    pub fn inconsistencies(&self) -> Vec<Inconsistency> {
        self.inconsistencies.entries()
    }

    /// Runs the saga to completion without an external cancel source.
    pub async fn place_order(&self, request: PlaceOrder) -> Result<SagaReport, SagaFailure> {
        self.place_order_with_cancel(request, ShutdownSignal::never())
            .await
    }

    /// Runs the saga; when `cancel` fires, the in-flight step is abandoned
    /// and completed steps are still compensated.
    #[tracing::instrument(skip(self, request, cancel), fields(correlation_id = tracing::field::Empty))]
    pub async fn place_order_with_cancel(
        &self,
        request: PlaceOrder,
        mut cancel: ShutdownSignal,
    ) -> Result<SagaReport, SagaFailure> {
        metrics::counter!("saga_executions_total").increment(1);
        let started = Instant::now();
        let mut saga = SagaInstance::start(CorrelationId::new());
        tracing::Span::current().record(
            "correlation_id",
            tracing::field::display(saga.correlation_id()),
        );
        tracing::info!("order saga started");

        let result = self.execute(&mut saga, &request, &mut cancel).await;

        let duration = started.elapsed().as_secs_f64();
        metrics::histogram!("saga_duration_seconds").record(duration);
        match &result {
            Ok(report) => {
                metrics::counter!("saga_confirmed_total").increment(1);
                tracing::info!(
                    order_id = %report.order.id,
                    payment_id = %report.payment.id,
                    duration,
                    "order saga confirmed"
                );
            }
            Err(failure) => {
                metrics::counter!("saga_failed_total", "kind" => failure.kind().as_str())
                    .increment(1);
                tracing::warn!(
                    state = %failure.state,
                    kind = %failure.kind(),
                    error = %failure.error,
                    duration,
                    "order saga failed"
                );
            }
        }
        result
    }

    async fn execute(
        &self,
        saga: &mut SagaInstance,
        request: &PlaceOrder,
        cancel: &mut ShutdownSignal,
    ) -> Result<SagaReport, SagaFailure> {
        // 1. Validate
        saga.apply(SagaEvent::step_started(SagaStep::ValidateRequest));
        let order = match request.validate() {
            Ok(order) => order,
            Err(error) => {
                saga.apply(SagaEvent::step_failed(
                    SagaStep::ValidateRequest,
                    error.to_string(),
                ));
                return Err(self.abort(saga, error, None, Vec::new()));
            }
        };
        saga.apply(SagaEvent::step_completed(SagaStep::ValidateRequest));

        // 2. Product lookup
        let product = match self
            .run_step(
                saga,
                SagaStep::LookupProduct,
                cancel,
                self.inventory.product(order.product_id),
            )
            .await
        {
            Ok(product) => product,
            Err(error) => return Err(self.abort(saga, error, Some(&order), Vec::new())),
        };
        let Some(total_price) = product.price.multiply(order.quantity) else {
            let error = SagaError::InvalidRequest(format!(
                "total price of {} x {} overflows",
                order.quantity, product.price
            ));
            saga.apply(SagaEvent::step_failed(
                SagaStep::LookupProduct,
                error.to_string(),
            ));
            return Err(self.abort(saga, error, Some(&order), Vec::new()));
        };
        saga.apply(SagaEvent::step_completed(SagaStep::LookupProduct));

        // 3. Reserve stock
        saga.set_reservation(order.product_id, order.quantity);
        if let Err(error) = self
            .run_step(
                saga,
                SagaStep::ReserveStock,
                cancel,
                self.inventory.reserve(order.product_id, order.quantity),
            )
            .await
        {
            let flagged = self.flag_abandoned(saga, SagaStep::ReserveStock, &error);
            return Err(self.abort(saga, error, Some(&order), flagged));
        }
        saga.apply(SagaEvent::step_completed(SagaStep::ReserveStock));

        // 4. Persist the order
        let new_order = NewOrder {
            customer_id: order.customer_id,
            product_id: order.product_id,
            product_name: product.name,
            quantity: order.quantity,
            total_price,
        };
        let created = match self
            .run_step(
                saga,
                SagaStep::CreateOrder,
                cancel,
                self.orders.create(&new_order),
            )
            .await
        {
            Ok(created) => created,
            Err(error) => {
                let flagged = self.flag_abandoned(saga, SagaStep::CreateOrder, &error);
                return Err(self
                    .compensate(saga, SagaStep::CreateOrder, error, &order, total_price, flagged)
                    .await);
            }
        };
        saga.apply(SagaEvent::order_created(created.id));

        // 5. Charge
        let charge = ChargeRequest {
            order_id: created.id,
            customer_id: order.customer_id,
            amount: created.total_price,
            payment_method: order.payment_method.clone(),
        };
        let payment = match self
            .run_step(
                saga,
                SagaStep::ChargePayment,
                cancel,
                self.payments.charge(&charge),
            )
            .await
        {
            Ok(payment) => payment,
            Err(error) => {
                let flagged = self.flag_abandoned(saga, SagaStep::ChargePayment, &error);
                return Err(self
                    .compensate(saga, SagaStep::ChargePayment, error, &order, total_price, flagged)
                    .await);
            }
        };
        saga.apply(SagaEvent::payment_charged(payment.id));

        // 6. Confirm. Payment is taken, so this step is neither cancelled nor
        // compensated; a failure leaves the order PENDING and is flagged.
        saga.apply(SagaEvent::step_started(SagaStep::ConfirmOrder));
        let mut order_row = created;
        let confirmed = self
            .within_step_timeout(
                SagaStep::ConfirmOrder.as_str(),
                self.orders
                    .update_status(order_row.id, OrderStatus::Confirmed),
            )
            .await;
        let inconsistency = match confirmed {
            Ok(status) => {
                order_row.status = status;
                saga.apply(SagaEvent::step_completed(SagaStep::ConfirmOrder));
                None
            }
            Err(error) => {
                saga.apply(SagaEvent::step_failed(
                    SagaStep::ConfirmOrder,
                    error.to_string(),
                ));
                Some(
                    self.inconsistencies.flag(
                        Inconsistency::new(
                            saga.correlation_id(),
                            InconsistencyKind::OrderNotConfirmed,
                            error.to_string(),
                        )
                        .with_order(Some(order_row.id))
                        .with_payment(Some(payment.id)),
                    ),
                )
            }
        };
        saga.apply(SagaEvent::saga_confirmed());

        let notification = self.notify(
            EventType::OrderConfirmed,
            saga.correlation_id(),
            order_payload(
                Some(order_row.id),
                order_row.customer_id,
                order_row.product_id,
                order_row.quantity,
                Some(order_row.total_price),
                None,
            ),
        );

        Ok(SagaReport {
            correlation_id: saga.correlation_id(),
            state: saga.state(),
            order: order_row,
            payment,
            notification,
            inconsistency,
            history: saga.history().to_vec(),
        })
    }

    /// Runs one forward step under the step timeout, abandoning it if
    /// `cancel` fires first.
    async fn run_step<T>(
        &self,
        saga: &mut SagaInstance,
        step: SagaStep,
        cancel: &mut ShutdownSignal,
        operation: impl Future<Output = Result<T, SagaError>>,
    ) -> Result<T, SagaError> {
        saga.apply(SagaEvent::step_started(step));
        tracing::info!(step = step.as_str(), "saga step started");

        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => Err(SagaError::Cancelled { step: step.as_str() }),
            result = self.within_step_timeout(step.as_str(), operation) => result,
        };

        if let Err(error) = &result {
            tracing::warn!(step = step.as_str(), kind = %error.kind(), error = %error, "saga step failed");
            saga.apply(SagaEvent::step_failed(step, error.to_string()));
        }
        result
    }

    async fn within_step_timeout<T>(
        &self,
        step: &'static str,
        operation: impl Future<Output = Result<T, SagaError>>,
    ) -> Result<T, SagaError> {
        let timeout = self.config.step_timeout;
        tokio::time::timeout(timeout, operation)
            .await
            .unwrap_or_else(|_| Err(SagaError::StepTimeout { step, timeout }))
    }

    /// A step abandoned mid-flight may have been applied by its dependency;
    /// it is treated as not completed and flagged.
    fn flag_abandoned(
        &self,
        saga: &SagaInstance,
        step: SagaStep,
        error: &SagaError,
    ) -> Vec<Inconsistency> {
        if !matches!(
            error,
            SagaError::StepTimeout { .. } | SagaError::Cancelled { .. }
        ) {
            return Vec::new();
        }
        let mut entry = Inconsistency::new(
            saga.correlation_id(),
            InconsistencyKind::StepOutcomeUnknown,
            format!("{step} abandoned: {error}"),
        )
        .with_order(saga.order_id());
        if step == SagaStep::ReserveStock {
            entry = entry.with_stock(saga.product_id(), Some(saga.quantity()));
        }
        vec![self.inconsistencies.flag(entry)]
    }

    /// Ends a saga that has nothing to undo.
    fn abort(
        &self,
        saga: &mut SagaInstance,
        error: SagaError,
        order: Option<&ValidatedOrder>,
        inconsistencies: Vec<Inconsistency>,
    ) -> SagaFailure {
        saga.apply(SagaEvent::saga_failed(error.to_string()));

        let notification = match order {
            Some(order) if error.kind() != ErrorKind::Validation => Some(self.notify(
                EventType::OrderFailed,
                saga.correlation_id(),
                order_payload(
                    None,
                    order.customer_id,
                    order.product_id,
                    order.quantity,
                    None,
                    saga.failure_reason(),
                ),
            )),
            _ => None,
        };

        SagaFailure {
            correlation_id: saga.correlation_id(),
            state: saga.state(),
            order_id: None,
            order_status: None,
            payment_id: None,
            error,
            failure_reason: saga.failure_reason().map(str::to_string),
            notification,
            inconsistencies,
            history: saga.history().to_vec(),
        }
    }

    /// Undoes the completed steps in reverse order.
    ///
    /// A failed order cancellation is flagged and compensation continues; a
    /// failed stock release is flagged and becomes the saga's error.
    #[tracing::instrument(skip_all, fields(from_step = from.as_str()))]
    async fn compensate(
        &self,
        saga: &mut SagaInstance,
        from: SagaStep,
        error: SagaError,
        order: &ValidatedOrder,
        total_price: Money,
        mut inconsistencies: Vec<Inconsistency>,
    ) -> SagaFailure {
        let correlation_id = saga.correlation_id();
        saga.apply(SagaEvent::compensation_started(from));
        metrics::counter!("saga_compensations_total").increment(1);
        tracing::warn!(error = %error, "compensating order saga");

        let policy = &self.config.compensation_policy;
        let mut order_status = saga.order_id().map(|_| OrderStatus::Pending);
        let mut compensation_error = None;

        for compensation in saga.pending_compensations() {
            let result = match compensation {
                Compensation::CancelOrder => match saga.order_id() {
                    Some(order_id) => self
                        .orders
                        .update_status_with(order_id, OrderStatus::Cancelled, policy)
                        .await
                        .map(|status| order_status = Some(status)),
                    None => Ok(()),
                },
                Compensation::ReleaseStock => self
                    .inventory
                    .release(order.product_id, order.quantity, policy)
                    .await
                    .map(|_| ()),
            };

            match result {
                Ok(()) => {
                    tracing::info!(compensation = compensation.as_str(), "compensation completed");
                    saga.apply(SagaEvent::compensation_step_completed(compensation));
                }
                Err(err) => {
                    tracing::error!(
                        compensation = compensation.as_str(),
                        error = %err,
                        "compensation failed"
                    );
                    saga.apply(SagaEvent::compensation_step_failed(
                        compensation,
                        err.to_string(),
                    ));
                    let entry = match compensation {
                        Compensation::CancelOrder => Inconsistency::new(
                            correlation_id,
                            InconsistencyKind::OrderNotCancelled,
                            err.to_string(),
                        ),
                        Compensation::ReleaseStock => {
                            compensation_error = Some(SagaError::CompensationFailed {
                                step: compensation.as_str(),
                                order_id: saga.order_id(),
                                reason: err.to_string(),
                            });
                            Inconsistency::new(
                                correlation_id,
                                InconsistencyKind::StockNotReleased,
                                err.to_string(),
                            )
                            .with_stock(Some(order.product_id), Some(order.quantity))
                        }
                    };
                    inconsistencies.push(self.inconsistencies.flag(entry.with_order(saga.order_id())));
                }
            }
        }

        let payment_id = match &error {
            SagaError::PaymentDeclined { payment_id, .. } => Some(*payment_id),
            _ => saga.payment_id(),
        };
        let error = match compensation_error {
            Some(compensation_error) => {
                saga.apply(SagaEvent::saga_failed(compensation_error.to_string()));
                compensation_error
            }
            None => {
                saga.apply(SagaEvent::saga_cancelled(error.to_string()));
                error
            }
        };

        let notification = self.notify(
            EventType::OrderFailed,
            correlation_id,
            order_payload(
                saga.order_id(),
                order.customer_id,
                order.product_id,
                order.quantity,
                Some(total_price),
                saga.failure_reason(),
            ),
        );

        SagaFailure {
            correlation_id,
            state: saga.state(),
            order_id: saga.order_id(),
            order_status,
            payment_id,
            error,
            failure_reason: saga.failure_reason().map(str::to_string),
            notification: Some(notification),
            inconsistencies,
            history: saga.history().to_vec(),
        }
    }

    /// Refunds a `SUCCESS` payment, then cancels its order and releases its
    /// stock.
    ///
    /// A payment in any other status is rejected with
    /// [`SagaError::InvalidState`] before anything is changed. An order that
    /// has already shipped keeps its stock. A failed cancellation is flagged;
    /// a failed release is flagged and returned as
    /// [`SagaError::CompensationFailed`] with `refunded = true`.
    #[tracing::instrument(skip(self), fields(correlation_id = tracing::field::Empty))]
    pub async fn refund(&self, payment_id: PaymentId) -> Result<RefundReport, RefundFailure> {
        let correlation_id = CorrelationId::new();
        tracing::Span::current().record("correlation_id", tracing::field::display(correlation_id));

        let payment = self
            .within_step_timeout("lookup_payment", self.payments.payment(payment_id))
            .await
            .map_err(|e| RefundFailure::before_refund(correlation_id, payment_id, e))?;
        if !payment.status.can_refund() {
            tracing::warn!(status = %payment.status, "refund rejected");
            metrics::counter!("refunds_total", "outcome" => "rejected").increment(1);
            return Err(RefundFailure::before_refund(
                correlation_id,
                payment_id,
                SagaError::InvalidState(format!(
                    "Payment {payment_id} is {}; only SUCCESS payments can be refunded",
                    payment.status
                )),
            ));
        }

        let refunded = self
            .within_step_timeout("refund_payment", self.payments.refund(payment_id))
            .await
            .map_err(|e| RefundFailure::before_refund(correlation_id, payment_id, e))?;
        tracing::info!(order_id = %refunded.order_id, "payment refunded");
        metrics::counter!("saga_compensations_total").increment(1);

        let policy = &self.config.compensation_policy;
        let mut inconsistencies = Vec::new();

        let order = match self.orders.order_with(refunded.order_id, policy).await {
            Ok(order) => order,
            Err(error) => {
                inconsistencies.push(
                    self.inconsistencies.flag(
                        Inconsistency::new(
                            correlation_id,
                            InconsistencyKind::StockNotReleased,
                            format!("order lookup failed after refund: {error}"),
                        )
                        .with_order(Some(refunded.order_id))
                        .with_payment(Some(payment_id)),
                    ),
                );
                let notification =
                    self.notify_refund(correlation_id, &refunded, None, false);
                metrics::counter!("refunds_total", "outcome" => "compensation_failed")
                    .increment(1);
                return Err(RefundFailure {
                    correlation_id,
                    payment_id,
                    refunded: true,
                    order_id: Some(refunded.order_id),
                    error: SagaError::CompensationFailed {
                        step: Compensation::ReleaseStock.as_str(),
                        order_id: Some(refunded.order_id),
                        reason: error.to_string(),
                    },
                    notification: Some(notification),
                    inconsistencies,
                });
            }
        };

        if !order.status.can_cancel() {
            tracing::warn!(
                order_id = %order.id,
                status = %order.status,
                "order can no longer be cancelled, stock stays allocated"
            );
            let notification = self.notify_refund(correlation_id, &refunded, Some(&order), false);
            metrics::counter!("refunds_total", "outcome" => "refunded").increment(1);
            return Ok(RefundReport {
                correlation_id,
                order_id: order.id,
                order_status: order.status,
                payment: refunded,
                stock_released: false,
                notification,
                inconsistencies,
            });
        }

        let order_status = match self
            .orders
            .update_status_with(order.id, OrderStatus::Cancelled, policy)
            .await
        {
            Ok(status) => status,
            Err(error) => {
                inconsistencies.push(
                    self.inconsistencies.flag(
                        Inconsistency::new(
                            correlation_id,
                            InconsistencyKind::OrderNotCancelled,
                            error.to_string(),
                        )
                        .with_order(Some(order.id))
                        .with_payment(Some(payment_id)),
                    ),
                );
                order.status
            }
        };

        let released = self
            .inventory
            .release(order.product_id, order.quantity, policy)
            .await;
        let notification =
            self.notify_refund(correlation_id, &refunded, Some(&order), released.is_ok());

        match released {
            Ok(_) => {
                metrics::counter!("refunds_total", "outcome" => "refunded").increment(1);
                Ok(RefundReport {
                    correlation_id,
                    order_id: order.id,
                    order_status,
                    payment: refunded,
                    stock_released: true,
                    notification,
                    inconsistencies,
                })
            }
            Err(error) => {
                inconsistencies.push(
                    self.inconsistencies.flag(
                        Inconsistency::new(
                            correlation_id,
                            InconsistencyKind::StockNotReleased,
                            error.to_string(),
                        )
                        .with_order(Some(order.id))
                        .with_stock(Some(order.product_id), Some(order.quantity))
                        .with_payment(Some(payment_id)),
                    ),
                );
                metrics::counter!("refunds_total", "outcome" => "compensation_failed")
                    .increment(1);
                Err(RefundFailure {
                    correlation_id,
                    payment_id,
                    refunded: true,
                    order_id: Some(order.id),
                    error: SagaError::CompensationFailed {
                        step: Compensation::ReleaseStock.as_str(),
                        order_id: Some(order.id),
                        reason: error.to_string(),
                    },
                    notification: Some(notification),
                    inconsistencies,
                })
            }
        }
    }

    fn notify_refund(
        &self,
        correlation_id: CorrelationId,
        payment: &Payment,
        order: Option<&Order>,
        stock_released: bool,
    ) -> PublishOutcome {
        self.notify(
            EventType::PaymentRefunded,
            correlation_id,
            json!({
                "payment_id": payment.id,
                "order_id": payment.order_id,
                "customer_id": order.map(|o| o.customer_id).or(payment.customer_id),
                "product_id": order.map(|o| o.product_id),
                "quantity": order.map(|o| o.quantity),
                "total_price": payment.amount.as_major_units(),
                "stock_released": stock_released,
            }),
        )
    }

    /// Publishing is best-effort: an undelivered notification is logged by
    /// the publisher and the saga proceeds.
    fn notify(
        &self,
        event_type: EventType,
        correlation_id: CorrelationId,
        payload: serde_json::Value,
    ) -> PublishOutcome {
        self.publisher
            .publish(NotificationEvent::new(event_type, correlation_id, payload))
    }
}

fn order_payload(
    order_id: Option<OrderId>,
    customer_id: CustomerId,
    product_id: ProductId,
    quantity: u32,
    total_price: Option<Money>,
    reason: Option<&str>,
) -> serde_json::Value {
    let mut payload = json!({
        "order_id": order_id,
        "customer_id": customer_id,
        "product_id": product_id,
        "quantity": quantity,
        "total_price": total_price.map(|p| p.as_major_units()),
    });
    if let Some(reason) = reason {
        payload["reason"] = json!(reason);
    }
    payload
}
