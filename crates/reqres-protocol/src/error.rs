//! Error types for the protocol engine.

use reqres_core::{ClientId, CoreError, FrameKind, MessageId};
use thiserror::Error;

use crate::config::QoS;

/// Errors that can occur while connecting, handshaking or exchanging messages.
#[derive(Debug, Clone, Error)]
pub enum ProtocolError {
    /// The broker did not accept the connection in time.
    #[error("broker connect timed out")]
    BrokerTimeout,

    /// Transport-level failure (connect, publish, subscribe).
    #[error("transport error: {0}")]
    TransportError(String),

    /// The broker granted a different QoS than requested.
    #[error("subscribe to {topic} rejected: requested {requested:?}, granted {granted:?}")]
    SubscribeRejected {
        topic: String,
        requested: QoS,
        granted: QoS,
    },

    /// An operation needed the broker but the endpoint is not connected.
    #[error("not connected to broker")]
    NotConnectedToBroker,

    /// No matching connect ack arrived within the handshake window.
    #[error("handshake with {0} timed out")]
    HandshakeTimeout(ClientId),

    /// Neither the caller nor the resolver supplied a shared secret.
    #[error("no shared secret for {0}")]
    MissingSharedSecret(ClientId),

    /// The peer has no established connection.
    #[error("not connected to {0}")]
    NotConnected(ClientId),

    /// The peer did not acknowledge a frame in time.
    #[error("timed out waiting for {kind} of {id}")]
    AckTimeout { kind: FrameKind, id: String },

    /// No response arrived for the request.
    #[error("timed out waiting for response to {0}")]
    ResponseTimeout(MessageId),

    /// An inbound exchange or stream stalled.
    #[error("timed out waiting for the next frame of {0}")]
    IdleTimeout(String),

    /// A stream failed to decrypt or decode.
    #[error("stream error: {0}")]
    Stream(#[from] CoreError),

    /// The endpoint was closed or reset while waiting.
    #[error("endpoint closed")]
    Closed,
}

/// Result type for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;
