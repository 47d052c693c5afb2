//! Payment rows.

use chrono::{DateTime, Utc};
use common::{CustomerId, OrderId, PaymentId};
use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::money::Money;

/// Outcome of one payment attempt.
///
/// ```text
/// SUCCESS ──► REFUNDED
/// FAILED  (terminal)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Success,
    Failed,
    Refunded,
}

impl PaymentStatus {
    /// Only successful payments can be refunded.
    pub fn can_refund(&self) -> bool {
        matches!(self, PaymentStatus::Success)
    }

    /// Returns the wire name of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Success => "SUCCESS",
            PaymentStatus::Failed => "FAILED",
            PaymentStatus::Refunded => "REFUNDED",
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for PaymentStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SUCCESS" => Ok(PaymentStatus::Success),
            "FAILED" => Ok(PaymentStatus::Failed),
            "REFUNDED" => Ok(PaymentStatus::Refunded),
            other => Err(DomainError::UnknownStatus {
                kind: "payment",
                value: other.to_string(),
            }),
        }
    }
}

/// Free-form payment method name as chosen by the customer (e.g. "Credit Card", "UPI").
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PaymentMethod(String);

impl PaymentMethod {
    pub fn new(method: impl Into<String>) -> Self {
        Self(method.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for PaymentMethod {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A payment row. Every attempt is retained, failed ones included; an order
/// has at most one row in `SUCCESS` or `REFUNDED`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub order_id: OrderId,
    /// Unknown when the payment service omits it from a lookup.
    #[serde(default)]
    pub customer_id: Option<CustomerId>,
    pub amount: Money,
    pub method: PaymentMethod,
    pub gateway: String,
    pub transaction_id: String,
    pub status: PaymentStatus,
    pub created_at: DateTime<Utc>,
}

impl Payment {
    /// Marks a successful payment as refunded.
    pub fn refund(&mut self) -> Result<(), DomainError> {
        if !self.status.can_refund() {
            return Err(DomainError::InvalidStatusTransition {
                from: self.status.to_string(),
                to: PaymentStatus::Refunded.to_string(),
            });
        }
        self.status = PaymentStatus::Refunded;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payment(status: PaymentStatus) -> Payment {
        Payment {
            id: PaymentId::new(1),
            order_id: OrderId::new(1),
            customer_id: Some(CustomerId::new(1)),
            amount: Money::from_cents(5000),
            method: PaymentMethod::new("UPI"),
            gateway: "Stripe".to_string(),
            transaction_id: "TXN-123456".to_string(),
            status,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_refund_success_payment() {
        let mut p = payment(PaymentStatus::Success);
        p.refund().unwrap();
        assert_eq!(p.status, PaymentStatus::Refunded);
    }

    #[test]
    fn test_refund_rejected_unless_success() {
        let mut refunded = payment(PaymentStatus::Refunded);
        assert!(refunded.refund().is_err());
        assert_eq!(refunded.status, PaymentStatus::Refunded);

        let mut failed = payment(PaymentStatus::Failed);
        assert!(failed.refund().is_err());
        assert_eq!(failed.status, PaymentStatus::Failed);
    }

    #[test]
    fn test_status_wire_names() {
        assert_eq!(
            serde_json::to_string(&PaymentStatus::Refunded).unwrap(),
            "\"REFUNDED\""
        );
        assert_eq!("FAILED".parse::<PaymentStatus>(), Ok(PaymentStatus::Failed));
        assert!("PENDING".parse::<PaymentStatus>().is_err());
    }
}
