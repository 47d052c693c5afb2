//! AMQP (RabbitMQ) broker connector.
//!
//! Messages go to the default exchange with the queue name as routing key, so
//! `destination` names a durable queue that is declared on first use.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use lapin::options::{BasicPublishOptions, ConfirmSelectOptions, QueueDeclareOptions};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use tokio::sync::Mutex;

use crate::broker::{BrokerConnection, BrokerConnector};
use crate::error::BrokerError;

/// Connects to an AMQP broker at a fixed URL.
#[derive(Debug, Clone)]
pub struct AmqpConnector {
    url: String,
}

impl AmqpConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl BrokerConnector for AmqpConnector {
    async fn connect(&self) -> Result<Arc<dyn BrokerConnection>, BrokerError> {
        let connection = Connection::connect(&self.url, ConnectionProperties::default())
            .await
            .map_err(|e| BrokerError::Connection(format!("Failed to connect: {e}")))?;

        let channel = connection
            .create_channel()
            .await
            .map_err(|e| BrokerError::Connection(format!("Failed to create channel: {e}")))?;

        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(|e| BrokerError::Connection(format!("Failed to enable confirms: {e}")))?;

        tracing::info!(url = %redact(&self.url), "connected to AMQP broker");

        Ok(Arc::new(AmqpConnection {
            connection,
            channel,
            declared: Mutex::new(HashSet::new()),
        }))
    }
}

struct AmqpConnection {
    connection: Connection,
    channel: Channel,
    declared: Mutex<HashSet<String>>,
}

impl AmqpConnection {
    async fn ensure_queue(&self, queue: &str) -> Result<(), BrokerError> {
        let mut declared = self.declared.lock().await;
        if declared.contains(queue) {
            return Ok(());
        }
        self.channel
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;
        declared.insert(queue.to_string());
        Ok(())
    }
}

#[async_trait]
impl BrokerConnection for AmqpConnection {
    async fn send(&self, destination: &str, body: &[u8]) -> Result<(), BrokerError> {
        if !self.is_connected() {
            return Err(BrokerError::Disconnected);
        }
        self.ensure_queue(destination).await?;

        let properties = BasicProperties::default()
            .with_content_type("application/json".into())
            .with_delivery_mode(2);

        let confirmation = self
            .channel
            .basic_publish(
                "",
                destination,
                BasicPublishOptions::default(),
                body,
                properties,
            )
            .await?
            .await?;

        if confirmation.is_nack() {
            return Err(BrokerError::Publish(format!(
                "broker nacked message for {destination}"
            )));
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connection.status().connected() && self.channel.status().connected()
    }
}

/// Strips credentials from a broker URL before it is logged.
fn redact(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}://***{}", &url[..scheme_end], &url[at..])
        }
        _ => url.to_string(),
    }
}
