//! Saga instance: the state of one order saga execution.

use common::{CorrelationId, OrderId, PaymentId, ProductId};
use serde::Serialize;

use crate::events::SagaEvent;
use crate::order_fulfillment::{Compensation, SAGA_TYPE, SagaStep};
use crate::state::SagaState;

/// Tracks the state of a saga execution: completed steps, the identifiers
/// they produced, and the full event history.
///
/// State only changes by applying [`SagaEvent`]s; an event that would move
/// the state machine along an edge it does not have is recorded but leaves
/// the state untouched.
#[derive(Debug, Clone, Serialize)]
pub struct SagaInstance {
    correlation_id: CorrelationId,
    state: SagaState,
    product_id: Option<ProductId>,
    quantity: u32,
    completed_steps: Vec<SagaStep>,
    order_id: Option<OrderId>,
    payment_id: Option<PaymentId>,
    failure_reason: Option<String>,
    history: Vec<SagaEvent>,
}

impl SagaInstance {
    /// Starts a saga in `Validating`.
    pub fn start(correlation_id: CorrelationId) -> Self {
        let mut saga = Self {
            correlation_id,
            state: SagaState::Validating,
            product_id: None,
            quantity: 0,
            completed_steps: Vec::new(),
            order_id: None,
            payment_id: None,
            failure_reason: None,
            history: Vec::new(),
        };
        saga.apply(SagaEvent::saga_started(correlation_id, SAGA_TYPE));
        saga
    }

    /// Records what a `ReserveStock` step will reserve, so the release knows
    /// what to give back.
    pub fn set_reservation(&mut self, product_id: ProductId, quantity: u32) {
        self.product_id = Some(product_id);
        self.quantity = quantity;
    }

    pub fn apply(&mut self, event: SagaEvent) {
        match &event {
            SagaEvent::SagaStarted(_) => {}
            SagaEvent::StepStarted(data) => match data.step {
                SagaStep::ReserveStock => self.transition(SagaState::Reserving),
                SagaStep::ChargePayment => self.transition(SagaState::Charging),
                _ => {}
            },
            SagaEvent::StepCompleted(data) => {
                self.completed_steps.push(data.step);
                if let Some(order_id) = data.order_id {
                    self.order_id = Some(order_id);
                }
                if let Some(payment_id) = data.payment_id {
                    self.payment_id = Some(payment_id);
                }
            }
            SagaEvent::StepFailed(data) => {
                self.failure_reason = Some(format!("{}: {}", data.step, data.error));
            }
            SagaEvent::CompensationStarted(_) => self.transition(SagaState::Compensating),
            SagaEvent::CompensationStepCompleted(_) | SagaEvent::CompensationStepFailed(_) => {}
            SagaEvent::SagaConfirmed(_) => self.transition(SagaState::Confirmed),
            SagaEvent::SagaCancelled(_) => self.transition(SagaState::Cancelled),
            SagaEvent::SagaFailed(data) => {
                if self.failure_reason.is_none() {
                    self.failure_reason = data.reason.clone();
                }
                self.transition(SagaState::Failed);
            }
        }
        self.history.push(event);
    }

    fn transition(&mut self, next: SagaState) {
        if self.state.can_transition_to(next) {
            tracing::debug!(
                correlation_id = %self.correlation_id,
                from = %self.state,
                to = %next,
                "saga state changed"
            );
            self.state = next;
        } else {
            tracing::error!(
                correlation_id = %self.correlation_id,
                from = %self.state,
                to = %next,
                "illegal saga state transition ignored"
            );
        }
    }

    /// Compensations for the completed steps, most recent first.
    pub fn pending_compensations(&self) -> Vec<Compensation> {
        self.completed_steps
            .iter()
            .rev()
            .filter_map(SagaStep::compensation)
            .collect()
    }
}

// Query methods
impl SagaInstance {
    pub fn correlation_id(&self) -> CorrelationId {
        self.correlation_id
    }

    pub fn state(&self) -> SagaState {
        self.state
    }

    pub fn completed_steps(&self) -> &[SagaStep] {
        &self.completed_steps
    }

    pub fn has_completed(&self, step: SagaStep) -> bool {
        self.completed_steps.contains(&step)
    }

    pub fn product_id(&self) -> Option<ProductId> {
        self.product_id
    }

    pub fn quantity(&self) -> u32 {
        self.quantity
    }

    pub fn order_id(&self) -> Option<OrderId> {
        self.order_id
    }

    pub fn payment_id(&self) -> Option<PaymentId> {
        self.payment_id
    }

    pub fn failure_reason(&self) -> Option<&str> {
        self.failure_reason.as_deref()
    }

    pub fn history(&self) -> &[SagaEvent] {
        &self.history
    }
}
