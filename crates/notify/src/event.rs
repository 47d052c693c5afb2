//! Notification events emitted by the order saga.

use chrono::{DateTime, Utc};
use common::CorrelationId;
use serde::{Deserialize, Serialize};

/// Kind of notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    /// Payment succeeded and the order is confirmed.
    OrderConfirmed,
    /// The order could not be fulfilled.
    OrderFailed,
    /// A successful payment was refunded and the order cancelled.
    PaymentRefunded,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::OrderConfirmed => "ORDER_CONFIRMED",
            EventType::OrderFailed => "ORDER_FAILED",
            EventType::PaymentRefunded => "PAYMENT_REFUNDED",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An immutable notification.
///
/// Fields are private; once built the event can only be read, serialized, or
/// handed over to the publisher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationEvent {
    event_type: EventType,
    correlation_id: CorrelationId,
    payload: serde_json::Value,
    timestamp: DateTime<Utc>,
}

impl NotificationEvent {
    /// Creates an event stamped with the current time.
    pub fn new(
        event_type: EventType,
        correlation_id: CorrelationId,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            event_type,
            correlation_id,
            payload,
            timestamp: Utc::now(),
        }
    }

    /// Creates an event from any serializable payload.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be represented as JSON.
    pub fn with_payload<T: Serialize>(
        event_type: EventType,
        correlation_id: CorrelationId,
        payload: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self::new(
            event_type,
            correlation_id,
            serde_json::to_value(payload)?,
        ))
    }

    pub fn event_type(&self) -> EventType {
        self.event_type
    }

    pub fn correlation_id(&self) -> CorrelationId {
        self.correlation_id
    }

    pub fn payload(&self) -> &serde_json::Value {
        &self.payload
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Wire representation sent to the broker.
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Parses the wire representation.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}
