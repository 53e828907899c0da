//! Error types for the client.

use reqres_core::CoreError;
use reqres_protocol::ProtocolError;
use thiserror::Error;

/// Errors that can occur during client operations.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Protocol error: broker, handshake, ack or response failures.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Payload or frame encoding error.
    #[error("encoding error: {0}")]
    Core(#[from] CoreError),

    /// The client id cannot be used as a topic segment.
    #[error("invalid client id: {0:?}")]
    InvalidClientId(String),
}

impl ClientError {
    /// Whether the operation failed because a peer or the broker did not
    /// answer in time.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            ClientError::Protocol(
                ProtocolError::BrokerTimeout
                    | ProtocolError::HandshakeTimeout(_)
                    | ProtocolError::AckTimeout { .. }
                    | ProtocolError::ResponseTimeout(_)
                    | ProtocolError::IdleTimeout(_)
            )
        )
    }
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;
