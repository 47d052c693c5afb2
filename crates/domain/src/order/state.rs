//! Order status machine.

use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// The status of an order row.
///
/// Status transitions:
/// ```text
/// PENDING ──► CONFIRMED ──► SHIPPED ──► DELIVERED
///    │            │
///    └────────────┴──► CANCELLED
/// ```
///
/// Orders are never deleted; they only move along these edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// Stock reserved, payment not yet settled.
    #[default]
    Pending,

    /// Payment succeeded.
    Confirmed,

    /// Reservation released, payment failed or refunded (terminal state).
    Cancelled,

    /// Handed to the carrier.
    Shipped,

    /// Received by the customer (terminal state).
    Delivered,
}

impl OrderStatus {
    /// Every status accepted by the order service.
    pub const ALL: [OrderStatus; 5] = [
        OrderStatus::Pending,
        OrderStatus::Confirmed,
        OrderStatus::Cancelled,
        OrderStatus::Shipped,
        OrderStatus::Delivered,
    ];

    /// Returns true if the order can be confirmed in this status.
    pub fn can_confirm(&self) -> bool {
        matches!(self, OrderStatus::Pending)
    }

    /// Returns true if the order can be cancelled in this status.
    pub fn can_cancel(&self) -> bool {
        matches!(self, OrderStatus::Pending | OrderStatus::Confirmed)
    }

    /// Returns true if moving to `next` follows an edge of the status machine.
    ///
    /// Re-applying the current status is accepted so status updates can be retried.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        if *self == next {
            return true;
        }
        match next {
            OrderStatus::Pending => false,
            OrderStatus::Confirmed => self.can_confirm(),
            OrderStatus::Cancelled => self.can_cancel(),
            OrderStatus::Shipped => matches!(self, OrderStatus::Confirmed),
            OrderStatus::Delivered => matches!(self, OrderStatus::Shipped),
        }
    }

    /// Validates a transition, returning the target status.
    pub fn transition_to(&self, next: OrderStatus) -> Result<OrderStatus, DomainError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(DomainError::InvalidStatusTransition {
                from: self.to_string(),
                to: next.to_string(),
            })
        }
    }

    /// Returns true if this is a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Cancelled | OrderStatus::Delivered)
    }

    /// Returns the wire name of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Confirmed => "CONFIRMED",
            OrderStatus::Cancelled => "CANCELLED",
            OrderStatus::Shipped => "SHIPPED",
            OrderStatus::Delivered => "DELIVERED",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OrderStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| DomainError::UnknownStatus {
                kind: "order",
                value: s.to_string(),
            })
    }
}
