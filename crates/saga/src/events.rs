//! Saga history events.
//!
//! Every state change of a [`SagaInstance`](crate::SagaInstance) is recorded
//! as one of these events; the history is returned with the saga's outcome
//! so callers can see exactly which steps ran and which were undone.

use chrono::{DateTime, Utc};
use common::{CorrelationId, OrderId, PaymentId};
use serde::Serialize;

use crate::order_fulfillment::{Compensation, SagaStep};

/// Events that can occur during saga execution.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data")]
pub enum SagaEvent {
    /// Saga execution started.
    SagaStarted(SagaStartedData),

    /// A forward step started.
    StepStarted(StepData),

    /// A forward step completed.
    StepCompleted(StepCompletedData),

    /// A forward step failed, timed out or was cancelled.
    StepFailed(StepFailedData),

    /// Compensation started after a step failure.
    CompensationStarted(CompensationStartedData),

    /// A compensating action completed.
    CompensationStepCompleted(CompensationData),

    /// A compensating action failed after exhausting its retries.
    CompensationStepFailed(CompensationFailedData),

    /// Payment taken and order confirmed.
    SagaConfirmed(SagaEndedData),

    /// Aborted after compensation.
    SagaCancelled(SagaEndedData),

    /// Aborted with nothing to undo, or with a failed compensation.
    SagaFailed(SagaEndedData),
}

impl SagaEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            SagaEvent::SagaStarted(_) => "SagaStarted",
            SagaEvent::StepStarted(_) => "StepStarted",
            SagaEvent::StepCompleted(_) => "StepCompleted",
            SagaEvent::StepFailed(_) => "StepFailed",
            SagaEvent::CompensationStarted(_) => "CompensationStarted",
            SagaEvent::CompensationStepCompleted(_) => "CompensationStepCompleted",
            SagaEvent::CompensationStepFailed(_) => "CompensationStepFailed",
            SagaEvent::SagaConfirmed(_) => "SagaConfirmed",
            SagaEvent::SagaCancelled(_) => "SagaCancelled",
            SagaEvent::SagaFailed(_) => "SagaFailed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SagaStartedData {
    pub correlation_id: CorrelationId,
    pub saga_type: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepData {
    pub step: SagaStep,
    pub at: DateTime<Utc>,
}

/// Identifiers produced by the step, if any.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepCompletedData {
    pub step: SagaStep,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<OrderId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_id: Option<PaymentId>,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepFailedData {
    pub step: SagaStep,
    pub error: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompensationStartedData {
    /// The step whose failure triggered compensation.
    pub from_step: SagaStep,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompensationData {
    pub compensation: Compensation,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompensationFailedData {
    pub compensation: Compensation,
    pub error: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SagaEndedData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub at: DateTime<Utc>,
}

// Convenience constructors
impl SagaEvent {
    pub fn saga_started(correlation_id: CorrelationId, saga_type: impl Into<String>) -> Self {
        SagaEvent::SagaStarted(SagaStartedData {
            correlation_id,
            saga_type: saga_type.into(),
            at: Utc::now(),
        })
    }

    pub fn step_started(step: SagaStep) -> Self {
        SagaEvent::StepStarted(StepData {
            step,
            at: Utc::now(),
        })
    }

    pub fn step_completed(step: SagaStep) -> Self {
        SagaEvent::StepCompleted(StepCompletedData {
            step,
            order_id: None,
            payment_id: None,
            at: Utc::now(),
        })
    }

    pub fn order_created(order_id: OrderId) -> Self {
        SagaEvent::StepCompleted(StepCompletedData {
            step: SagaStep::CreateOrder,
            order_id: Some(order_id),
            payment_id: None,
            at: Utc::now(),
        })
    }

    pub fn payment_charged(payment_id: PaymentId) -> Self {
        SagaEvent::StepCompleted(StepCompletedData {
            step: SagaStep::ChargePayment,
            order_id: None,
            payment_id: Some(payment_id),
            at: Utc::now(),
        })
    }

    pub fn step_failed(step: SagaStep, error: impl Into<String>) -> Self {
        SagaEvent::StepFailed(StepFailedData {
            step,
            error: error.into(),
            at: Utc::now(),
        })
    }

    pub fn compensation_started(from_step: SagaStep) -> Self {
        SagaEvent::CompensationStarted(CompensationStartedData {
            from_step,
            at: Utc::now(),
        })
    }

    pub fn compensation_step_completed(compensation: Compensation) -> Self {
        SagaEvent::CompensationStepCompleted(CompensationData {
            compensation,
            at: Utc::now(),
        })
    }

    pub fn compensation_step_failed(compensation: Compensation, error: impl Into<String>) -> Self {
        SagaEvent::CompensationStepFailed(CompensationFailedData {
            compensation,
            error: error.into(),
            at: Utc::now(),
        })
    }

    pub fn saga_confirmed() -> Self {
        SagaEvent::SagaConfirmed(SagaEndedData {
            reason: None,
            at: Utc::now(),
        })
    }

    pub fn saga_cancelled(reason: impl Into<String>) -> Self {
        SagaEvent::SagaCancelled(SagaEndedData {
            reason: Some(reason.into()),
            at: Utc::now(),
        })
    }

    pub fn saga_failed(reason: impl Into<String>) -> Self {
        SagaEvent::SagaFailed(SagaEndedData {
            reason: Some(reason.into()),
            at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type() {
        assert_eq!(
            SagaEvent::saga_started(CorrelationId::new(), "OrderFulfillment").event_type(),
            "SagaStarted"
        );
        assert_eq!(
            SagaEvent::order_created(OrderId::new(1)).event_type(),
            "StepCompleted"
        );
        assert_eq!(
            SagaEvent::compensation_step_failed(Compensation::ReleaseStock, "timeout").event_type(),
            "CompensationStepFailed"
        );
        assert_eq!(SagaEvent::saga_confirmed().event_type(), "SagaConfirmed");
    }

    #[test]
    fn test_serialized_shape() {
        let event = SagaEvent::payment_charged(PaymentId::new(12));
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["type"], "StepCompleted");
        assert_eq!(json["data"]["step"], "charge_payment");
        assert_eq!(json["data"]["payment_id"], 12);
        assert!(json["data"].get("order_id").is_none());
    }
}
