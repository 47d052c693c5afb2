//! Saga state machine.

use serde::{Deserialize, Serialize};

/// The state of an order saga in its lifecycle.
///
/// State transitions:
/// ```text
/// Validating ──► Reserving ──► Charging ──► Confirmed
///     │              │             │
///     ▼              ├──► Failed   ▼
///   Failed           └──────► Compensating ──┬──► Cancelled
///                                            └──► Failed
/// ```
///
/// `Reserving ──► Compensating` covers a failure while persisting the order,
/// after stock was already reserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SagaState {
    /// Request fields are being checked and the product looked up.
    #[default]
    Validating,

    /// Stock is being reserved and the order persisted.
    Reserving,

    /// The payment is being charged.
    Charging,

    /// Completed forward steps are being undone.
    Compensating,

    /// Payment taken, order confirmed (terminal state).
    Confirmed,

    /// Aborted; nothing needed undoing, or compensation failed (terminal state).
    Failed,

    /// Aborted after successful compensation (terminal state).
    Cancelled,
}

impl SagaState {
    /// Returns true if the state machine permits moving to `next`.
    pub fn can_transition_to(&self, next: SagaState) -> bool {
        use SagaState::*;
        matches!(
            (self, next),
            (Validating, Reserving)
                | (Validating, Failed)
                | (Reserving, Charging)
                | (Reserving, Failed)
                | (Reserving, Compensating)
                | (Charging, Confirmed)
                | (Charging, Compensating)
                | (Compensating, Cancelled)
                | (Compensating, Failed)
        )
    }

    /// Returns true if the saga can begin compensation.
    pub fn can_compensate(&self) -> bool {
        self.can_transition_to(SagaState::Compensating)
    }

    /// Returns true if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SagaState::Confirmed | SagaState::Failed | SagaState::Cancelled
        )
    }

    /// Returns the state name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            SagaState::Validating => "VALIDATING",
            SagaState::Reserving => "RESERVING",
            SagaState::Charging => "CHARGING",
            SagaState::Compensating => "COMPENSATING",
            SagaState::Confirmed => "CONFIRMED",
            SagaState::Failed => "FAILED",
            SagaState::Cancelled => "CANCELLED",
        }
    }
}

impl std::fmt::Display for SagaState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
