//! Broker connection abstraction and an in-memory broker for tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::error::BrokerError;
use crate::event::NotificationEvent;

/// Opens connections to a message broker.
#[async_trait]
pub trait BrokerConnector: Send + Sync + 'static {
    /// Establishes a new connection.
    async fn connect(&self) -> Result<Arc<dyn BrokerConnection>, BrokerError>;
}

/// A live connection that can deliver message bodies to named queues.
#[async_trait]
pub trait BrokerConnection: Send + Sync {
    /// Sends `body` to `destination`. Resolves once the broker accepted it.
    async fn send(&self, destination: &str, body: &[u8]) -> Result<(), BrokerError>;

    /// Whether the underlying transport is still usable.
    fn is_connected(&self) -> bool;
}

#[derive(Debug, Default)]
struct InMemoryBrokerState {
    available: bool,
    generation: u64,
    connect_attempts: u32,
    fail_sends: bool,
    queues: HashMap<String, Vec<Vec<u8>>>,
}

/// In-process broker for tests and local runs.
///
/// Connections are tied to a generation; [`InMemoryBroker::drop_connections`]
/// bumps it so every existing connection reports disconnected.
#[derive(Debug, Clone)]
pub struct InMemoryBroker {
    state: Arc<Mutex<InMemoryBrokerState>>,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBroker {
    /// Creates an available broker with no messages.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(InMemoryBrokerState {
                available: true,
                ..InMemoryBrokerState::default()
            })),
        }
    }

    /// Creates a broker that refuses connections until made available.
    pub fn unavailable() -> Self {
        let broker = Self::new();
        broker.set_available(false);
        broker
    }

    fn lock(&self) -> MutexGuard<'_, InMemoryBrokerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Toggles whether new connections succeed. Going unavailable also drops
    /// existing connections.
    pub fn set_available(&self, available: bool) {
        let mut state = self.lock();
        state.available = available;
        if !available {
            state.generation += 1;
        }
    }

    /// Makes sends fail while keeping connections alive.
    pub fn set_fail_sends(&self, fail: bool) {
        self.lock().fail_sends = fail;
    }

    /// Invalidates every open connection.
    pub fn drop_connections(&self) {
        self.lock().generation += 1;
    }

    /// Number of times `connect` was called.
    pub fn connect_attempts(&self) -> u32 {
        self.lock().connect_attempts
    }

    /// Raw message bodies delivered to `queue`, oldest first.
    pub fn messages(&self, queue: &str) -> Vec<Vec<u8>> {
        self.lock().queues.get(queue).cloned().unwrap_or_default()
    }

    /// Delivered messages parsed as notification events; unparseable bodies are skipped.
    pub fn events(&self, queue: &str) -> Vec<NotificationEvent> {
        self.messages(queue)
            .iter()
            .filter_map(|body| NotificationEvent::from_bytes(body).ok())
            .collect()
    }
}

#[async_trait]
impl BrokerConnector for InMemoryBroker {
    async fn connect(&self) -> Result<Arc<dyn BrokerConnection>, BrokerError> {
        let mut state = self.lock();
        state.connect_attempts += 1;
        if !state.available {
            return Err(BrokerError::Connection("broker unavailable".to_string()));
        }
        Ok(Arc::new(InMemoryConnection {
            broker: self.clone(),
            generation: state.generation,
        }))
    }
}

#[derive(Debug)]
struct InMemoryConnection {
    broker: InMemoryBroker,
    generation: u64,
}

#[async_trait]
impl BrokerConnection for InMemoryConnection {
    async fn send(&self, destination: &str, body: &[u8]) -> Result<(), BrokerError> {
        let mut state = self.broker.lock();
        if !state.available || state.generation != self.generation {
            return Err(BrokerError::Disconnected);
        }
        if state.fail_sends {
            return Err(BrokerError::Publish("send rejected".to_string()));
        }
        state
            .queues
            .entry(destination.to_string())
            .or_default()
            .push(body.to_vec());
        Ok(())
    }

    fn is_connected(&self) -> bool {
        let state = self.broker.lock();
        state.available && state.generation == self.generation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_send_delivers_to_queue() {
        let broker = InMemoryBroker::new();
        let conn = broker.connect().await.unwrap();

        conn.send("orders", b"hello").await.unwrap();

        assert_eq!(broker.messages("orders"), vec![b"hello".to_vec()]);
        assert!(broker.messages("other").is_empty());
    }

    #[tokio::test]
    async fn test_unavailable_broker_refuses_connections() {
        let broker = InMemoryBroker::unavailable();
        assert!(matches!(broker.connect().await, Err(BrokerError::Connection(_))));
        assert_eq!(broker.connect_attempts(), 1);
    }

    #[tokio::test]
    async fn test_drop_connections_invalidates_existing() {
        let broker = InMemoryBroker::new();
        let conn = broker.connect().await.unwrap();
        broker.drop_connections();

        assert!(!conn.is_connected());
        assert!(matches!(conn.send("q", b"x").await, Err(BrokerError::Disconnected)));

        let fresh = broker.connect().await.unwrap();
        assert!(fresh.is_connected());
    }
}
