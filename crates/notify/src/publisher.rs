//! Non-blocking notification publisher.
//!
//! Two background tasks back every publisher:
//!
//! - the **supervisor** owns the broker connection. It connects, retries every
//!   `retry_interval` while disconnected, and checks the connection every
//!   `health_check_interval` once it is up. It runs until shutdown.
//! - the **dispatcher** drains the outbound queue and sends each event over the
//!   current connection. An event whose send fails is held and resent once the
//!   supervisor reconnects, so accepted events are delivered at least once.
//!
//! A send failure makes the supervisor reconnect at once. If the send fails
//! again on the fresh connection, later reconnects wait `retry_interval` like
//! failed connection attempts do.
//!
//! Request paths only touch [`NotificationPublisher::publish`], which reads an
//! atomic connection flag and pushes onto a bounded channel without awaiting.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use common::ShutdownSignal;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::broker::{BrokerConnection, BrokerConnector};
use crate::event::NotificationEvent;

/// Publisher configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublisherConfig {
    /// Queue every notification is sent to.
    pub destination: String,
    /// Wait between failed connection attempts.
    pub retry_interval: Duration,
    /// Wait between health checks of a live connection.
    pub health_check_interval: Duration,
    /// Capacity of the outbound queue.
    pub queue_capacity: usize,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            destination: "order-notifications".to_string(),
            retry_interval: Duration::from_secs(5),
            health_check_interval: Duration::from_secs(10),
            queue_capacity: 1024,
        }
    }
}

/// Why an event was not handed to the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotDelivered {
    /// No live broker connection.
    Disconnected,
    /// The outbound queue is full.
    QueueFull,
    /// The publisher has shut down.
    Closed,
}

/// Result of [`NotificationPublisher::publish`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Accepted for delivery.
    Enqueued,
    /// Dropped; the caller decides whether that matters.
    NotDelivered(NotDelivered),
}

impl PublishOutcome {
    pub fn is_enqueued(&self) -> bool {
        matches!(self, PublishOutcome::Enqueued)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PublishOutcome::Enqueued => "enqueued",
            PublishOutcome::NotDelivered(NotDelivered::Disconnected) => "disconnected",
            PublishOutcome::NotDelivered(NotDelivered::QueueFull) => "queue_full",
            PublishOutcome::NotDelivered(NotDelivered::Closed) => "closed",
        }
    }
}

/// Connection state shared between the supervisor, the dispatcher and publishers.
struct Link {
    connected: AtomicBool,
    connection: RwLock<Option<Arc<dyn BrokerConnection>>>,
    status: watch::Sender<bool>,
    /// Sends that failed since the last successful one.
    send_failures: AtomicU32,
}

impl Link {
    fn new() -> Self {
        let (status, _) = watch::channel(false);
        Self {
            connected: AtomicBool::new(false),
            connection: RwLock::new(None),
            status,
            send_failures: AtomicU32::new(0),
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    fn current(&self) -> Option<Arc<dyn BrokerConnection>> {
        self.connection
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set(&self, connection: Arc<dyn BrokerConnection>) {
        *self.connection.write().unwrap_or_else(PoisonError::into_inner) = Some(connection);
        self.connected.store(true, Ordering::Release);
        self.status.send_replace(true);
        metrics::gauge!("broker_connected").set(1.0);
    }

    fn clear(&self) {
        self.connected.store(false, Ordering::Release);
        *self.connection.write().unwrap_or_else(PoisonError::into_inner) = None;
        self.status.send_replace(false);
        metrics::gauge!("broker_connected").set(0.0);
    }

    /// Drops the connection after a failed send.
    fn send_failed(&self) {
        self.send_failures.fetch_add(1, Ordering::AcqRel);
        self.clear();
    }

    fn send_succeeded(&self) {
        self.send_failures.store(0, Ordering::Release);
    }

    fn send_failures(&self) -> u32 {
        self.send_failures.load(Ordering::Acquire)
    }

    /// Resolves once the flag equals `connected`.
    async fn wait_for(&self, connected: bool) {
        let mut rx = self.status.subscribe();
        // The sender lives as long as the link, so this cannot fail.
        let _ = rx.wait_for(|c| *c == connected).await;
    }
}

/// Cheap, cloneable handle used by request paths to emit notifications.
#[derive(Clone)]
pub struct NotificationPublisher {
    tx: mpsc::Sender<NotificationEvent>,
    link: Arc<Link>,
    destination: Arc<str>,
}

impl std::fmt::Debug for NotificationPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationPublisher")
            .field("destination", &self.destination)
            .field("connected", &self.is_connected())
            .finish()
    }
}

/// Join handles of the background tasks.
#[derive(Debug)]
pub struct PublisherHandle {
    supervisor: JoinHandle<()>,
    dispatcher: JoinHandle<()>,
}

impl PublisherHandle {
    /// Waits for both tasks to finish after shutdown was triggered.
    pub async fn join(self) {
        if let Err(e) = self.supervisor.await {
            tracing::error!(error = %e, "broker supervisor task failed");
        }
        if let Err(e) = self.dispatcher.await {
            tracing::error!(error = %e, "notification dispatcher task failed");
        }
    }
}

impl NotificationPublisher {
    /// Spawns the supervisor and dispatcher and returns the publisher.
    ///
    /// Both tasks stop when `shutdown` fires. Must be called inside a Tokio runtime.
    pub fn start<C: BrokerConnector>(
        connector: C,
        config: PublisherConfig,
        shutdown: ShutdownSignal,
    ) -> (Self, PublisherHandle) {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let link = Arc::new(Link::new());
        let destination: Arc<str> = Arc::from(config.destination.as_str());

        let supervisor = tokio::spawn(supervise(
            connector,
            Arc::clone(&link),
            config.clone(),
            shutdown.clone(),
        ));
        let dispatcher = tokio::spawn(dispatch(
            rx,
            Arc::clone(&link),
            Arc::clone(&destination),
            shutdown,
        ));

        tracing::info!(destination = %destination, "notification publisher started");

        (
            Self {
                tx,
                link,
                destination,
            },
            PublisherHandle {
                supervisor,
                dispatcher,
            },
        )
    }

    /// Hands `event` to the dispatcher without waiting.
    ///
    /// Returns [`PublishOutcome::NotDelivered`] when there is no live
    /// connection or the queue cannot take the event; the event is dropped.
    pub fn publish(&self, event: NotificationEvent) -> PublishOutcome {
        let outcome = if !self.link.is_connected() {
            PublishOutcome::NotDelivered(NotDelivered::Disconnected)
        } else {
            match self.tx.try_send(event.clone()) {
                Ok(()) => PublishOutcome::Enqueued,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    PublishOutcome::NotDelivered(NotDelivered::QueueFull)
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    PublishOutcome::NotDelivered(NotDelivered::Closed)
                }
            }
        };

        metrics::counter!("notifications_published_total", "outcome" => outcome.as_str())
            .increment(1);
        match outcome {
            PublishOutcome::Enqueued => tracing::debug!(
                event_type = %event.event_type(),
                correlation_id = %event.correlation_id(),
                "notification enqueued"
            ),
            PublishOutcome::NotDelivered(reason) => tracing::warn!(
                event_type = %event.event_type(),
                correlation_id = %event.correlation_id(),
                ?reason,
                "notification not delivered"
            ),
        }
        outcome
    }

    /// Whether the supervisor currently holds a live connection.
    pub fn is_connected(&self) -> bool {
        self.link.is_connected()
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    /// Resolves once a broker connection is established.
    pub async fn wait_connected(&self) {
        self.link.wait_for(true).await;
    }
}

async fn supervise<C: BrokerConnector>(
    connector: C,
    link: Arc<Link>,
    config: PublisherConfig,
    mut shutdown: ShutdownSignal,
) {
    tracing::info!(
        retry_secs = config.retry_interval.as_secs(),
        health_check_secs = config.health_check_interval.as_secs(),
        "broker supervisor started"
    );

    loop {
        let healthy = link.current().is_some_and(|conn| conn.is_connected());

        if !healthy {
            if link.is_connected() {
                tracing::warn!("broker connection lost");
                link.clear();
            }

            let attempt = tokio::select! {
                _ = shutdown.cancelled() => break,
                result = connector.connect() => result,
            };
            match attempt {
                Ok(connection) => {
                    metrics::counter!("broker_connect_attempts_total", "outcome" => "success")
                        .increment(1);
                    tracing::info!("broker connection established");
                    link.set(connection);
                }
                Err(e) => {
                    metrics::counter!("broker_connect_attempts_total", "outcome" => "failure")
                        .increment(1);
                    tracing::warn!(
                        error = %e,
                        retry_secs = config.retry_interval.as_secs(),
                        "broker connection attempt failed"
                    );
                }
            }
        }

        if link.is_connected() {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(config.health_check_interval) => {}
                // The dispatcher saw a send fail; reconnect without waiting for the next check.
                _ = link.wait_for(false) => {}
            }

            let failures = link.send_failures();
            if failures > 1 && !link.is_connected() {
                tracing::warn!(
                    failures,
                    retry_secs = config.retry_interval.as_secs(),
                    "sends keep failing after reconnect, backing off"
                );
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(config.retry_interval) => {}
                }
            }
        } else {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(config.retry_interval) => {}
            }
        }
    }

    link.clear();
    tracing::info!("broker supervisor stopped");
}

async fn dispatch(
    mut rx: mpsc::Receiver<NotificationEvent>,
    link: Arc<Link>,
    destination: Arc<str>,
    mut shutdown: ShutdownSignal,
) {
    let mut held: Option<NotificationEvent> = None;

    loop {
        let event = match held.take() {
            Some(event) => event,
            None => tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                received = rx.recv() => match received {
                    Some(event) => event,
                    None => break,
                },
            },
        };

        let body = match event.to_bytes() {
            Ok(body) => body,
            Err(e) => {
                tracing::error!(
                    error = %e,
                    correlation_id = %event.correlation_id(),
                    "failed to serialize notification, dropping"
                );
                continue;
            }
        };

        let sent = match link.current() {
            Some(connection) => match connection.send(&destination, &body).await {
                Ok(()) => true,
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        correlation_id = %event.correlation_id(),
                        "notification send failed, holding for redelivery"
                    );
                    link.send_failed();
                    false
                }
            },
            None => false,
        };

        if sent {
            link.send_succeeded();
            metrics::counter!("notifications_delivered_total").increment(1);
            tracing::debug!(
                event_type = %event.event_type(),
                correlation_id = %event.correlation_id(),
                destination = %destination,
                "notification delivered"
            );
            continue;
        }

        held = Some(event);
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = link.wait_for(true) => {}
        }
    }

    let undelivered = usize::from(held.is_some()) + rx.len();
    if undelivered > 0 {
        tracing::warn!(undelivered, "notification dispatcher stopped with pending events");
    } else {
        tracing::info!("notification dispatcher stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::InMemoryBroker;
    use crate::event::EventType;
    use common::{CorrelationId, Shutdown};

    fn event() -> NotificationEvent {
        NotificationEvent::new(
            EventType::OrderConfirmed,
            CorrelationId::new(),
            serde_json::json!({"order_id": 1}),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_publish_while_disconnected_is_not_delivered() {
        let broker = InMemoryBroker::unavailable();
        let shutdown = Shutdown::new();
        let (publisher, handle) =
            NotificationPublisher::start(broker.clone(), PublisherConfig::default(), shutdown.signal());

        tokio::task::yield_now().await;
        let outcome = publisher.publish(event());

        assert_eq!(outcome, PublishOutcome::NotDelivered(NotDelivered::Disconnected));
        assert!(broker.messages("order-notifications").is_empty());

        shutdown.trigger();
        handle.join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_publish_when_connected_delivers() {
        let broker = InMemoryBroker::new();
        let shutdown = Shutdown::new();
        let (publisher, handle) =
            NotificationPublisher::start(broker.clone(), PublisherConfig::default(), shutdown.signal());

        publisher.wait_connected().await;
        let sent = event();
        assert!(publisher.publish(sent.clone()).is_enqueued());

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(broker.events("order-notifications"), vec![sent]);

        shutdown.trigger();
        handle.join().await;
    }

    #[test]
    fn test_default_config() {
        let config = PublisherConfig::default();
        assert_eq!(config.destination, "order-notifications");
        assert_eq!(config.retry_interval, Duration::from_secs(5));
        assert_eq!(config.health_check_interval, Duration::from_secs(10));
    }
}
