//! Order notifications.
//!
//! [`NotificationPublisher`] accepts [`NotificationEvent`]s from request paths
//! without blocking and delivers them to a broker queue from a background task.
//! The broker connection is owned by a supervising loop that reconnects on its
//! own; see the [`publisher`] module for the lifecycle.

#[cfg(feature = "amqp")]
pub mod amqp;
pub mod broker;
pub mod error;
pub mod event;
pub mod publisher;

#[cfg(feature = "amqp")]
pub use amqp::AmqpConnector;
pub use broker::{BrokerConnection, BrokerConnector, InMemoryBroker};
pub use error::BrokerError;
pub use event::{EventType, NotificationEvent};
pub use publisher::{
    NotDelivered, NotificationPublisher, PublishOutcome, PublisherConfig, PublisherHandle,
};
