//! Protocol and broker configuration.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use reqres_core::MAX_CHUNK_SIZE;

/// Delivery guarantee requested from the broker.
///
/// The protocol supplies its own reliability, so everything runs at
/// [`QoS::AtMostOnce`] unless configured otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub enum QoS {
    #[default]
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

impl QoS {
    pub fn level(&self) -> u8 {
        match self {
            QoS::AtMostOnce => 0,
            QoS::AtLeastOnce => 1,
            QoS::ExactlyOnce => 2,
        }
    }
}

/// Wire protocol spoken to the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrokerProtocol {
    #[default]
    Mqtt,
    Ws,
}

impl fmt::Display for BrokerProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BrokerProtocol::Mqtt => f.write_str("mqtt"),
            BrokerProtocol::Ws => f.write_str("ws"),
        }
    }
}

/// Where the broker lives. Passed through to [`crate::Transport::connect`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerOptions {
    pub protocol: BrokerProtocol,
    pub hostname: String,
    pub port: u16,
}

impl BrokerOptions {
    /// `protocol://hostname:port`
    pub fn url(&self) -> String {
        format!("{}://{}:{}", self.protocol, self.hostname, self.port)
    }
}

impl Default for BrokerOptions {
    fn default() -> Self {
        Self {
            protocol: BrokerProtocol::Mqtt,
            hostname: "localhost".into(),
            port: 1883,
        }
    }
}

/// Timeouts and limits of the protocol engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Wait for any per-frame ack.
    pub ack_timeout: Duration,
    /// Wait for the connect ack after publishing a connect request.
    pub handshake_timeout: Duration,
    /// Broker connect and subscribe.
    pub broker_timeout: Duration,
    /// Wait for the response frame once the request is fully sent.
    pub response_timeout: Duration,
    /// Receiver-side wait for the next frame of an inbound exchange or stream.
    pub idle_timeout: Duration,
    /// Plaintext bytes per chunk.
    pub max_chunk_size: usize,
    pub qos: QoS,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            ack_timeout: Duration::from_secs(5),
            handshake_timeout: Duration::from_secs(10),
            broker_timeout: Duration::from_secs(3),
            response_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(30),
            max_chunk_size: MAX_CHUNK_SIZE,
            qos: QoS::AtMostOnce,
        }
    }
}
