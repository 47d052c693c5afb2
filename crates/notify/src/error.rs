use thiserror::Error;

/// Errors raised by broker connectors and connections.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// Establishing a connection failed.
    #[error("Broker connection failed: {0}")]
    Connection(String),

    /// The connection was lost before or during a send.
    #[error("Broker connection lost")]
    Disconnected,

    /// The broker refused or failed to accept a message.
    #[error("Broker publish failed: {0}")]
    Publish(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[cfg(feature = "amqp")]
impl From<lapin::Error> for BrokerError {
    fn from(err: lapin::Error) -> Self {
        match err {
            lapin::Error::InvalidConnectionState(_) | lapin::Error::InvalidChannelState(_) => {
                BrokerError::Disconnected
            }
            other => BrokerError::Publish(other.to_string()),
        }
    }
}
