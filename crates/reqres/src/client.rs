//! The Client: application-facing API of reqres.
//!
//! A client wraps one protocol [`Endpoint`] and exposes the operations an
//! application needs: connect, request, serve requests and disconnect.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::info;

use reqres_core::{ClientId, Payload};
use reqres_protocol::{
    BrokerOptions, Connection, Endpoint, Event, ProtocolConfig, RequestHandler, Response,
    SecretResolver, Transport,
};

use crate::error::{ClientError, Result};

/// Configuration for a [`Client`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Broker client id. A random id is generated when absent.
    pub client_id: Option<ClientId>,
    /// Broker location.
    pub broker: BrokerOptions,
    /// Protocol timeouts and limits.
    pub protocol: ProtocolConfig,
}

impl ClientConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client_id(mut self, client_id: impl Into<ClientId>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    pub fn with_broker(mut self, broker: BrokerOptions) -> Self {
        self.broker = broker;
        self
    }

    pub fn with_protocol(mut self, protocol: ProtocolConfig) -> Self {
        self.protocol = protocol;
        self
    }
}

/// Client ids become topic segments, so they may not contain separators
/// or wildcards.
fn validate_client_id(client_id: &ClientId) -> Result<()> {
    let id = client_id.as_str();
    if id.is_empty() || id.contains(['/', '+', '#']) {
        return Err(ClientError::InvalidClientId(id.to_owned()));
    }
    Ok(())
}

/// One participant of the request/response protocol.
///
/// Provides a unified API for:
/// - Connecting to the broker and to peers
/// - Sending requests and awaiting responses
/// - Serving inbound requests
/// - Inspecting and dropping connections
///
/// Cheap to clone; clones share the same endpoint.
#[derive(Clone, Debug)]
pub struct Client {
    endpoint: Endpoint,
    config: ClientConfig,
}

impl Client {
    /// Create a client on top of `transport`. Nothing is sent until the
    /// first connect or request.
    pub fn new(config: ClientConfig, transport: impl Transport) -> Result<Self> {
        let client_id = config.client_id.clone().unwrap_or_else(ClientId::generate);
        validate_client_id(&client_id)?;

        let endpoint = Endpoint::new(
            client_id.clone(),
            transport,
            config.broker.clone(),
            config.protocol.clone(),
        );
        info!(client = %client_id, broker = %config.broker.url(), "client created");

        Ok(Self {
            endpoint,
            config: ClientConfig {
                client_id: Some(client_id),
                ..config
            },
        })
    }

    pub fn client_id(&self) -> &ClientId {
        self.endpoint.client_id()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// The underlying protocol endpoint.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Connections
    // ─────────────────────────────────────────────────────────────────────────

    /// Connect to the broker, and with `peer` also establish a channel.
    ///
    /// `secret` is the shared secret for `peer`; without it the resolver
    /// registered through [`Client::shared_secret`] is asked.
    pub async fn connect(&self, peer: Option<&ClientId>, secret: Option<String>) -> Result<()> {
        match peer {
            Some(peer) => self.endpoint.connect(peer, secret).await?,
            None => self.endpoint.connect_broker().await?,
        }
        Ok(())
    }

    /// Disconnect from one peer, or with `None` from the broker, dropping
    /// every connection.
    pub async fn disconnect(&self, peer: Option<&ClientId>) -> Result<()> {
        Ok(self.endpoint.disconnect(peer).await?)
    }

    /// Disconnect and refuse to reconnect.
    pub async fn close(&self) -> Result<()> {
        Ok(self.endpoint.close().await?)
    }

    pub fn get_connection(&self, peer: &ClientId) -> Option<Connection> {
        self.endpoint.get_connection(peer)
    }

    /// Established connections, sorted by peer id.
    pub fn get_connected(&self) -> Vec<Connection> {
        self.endpoint.get_connected()
    }

    pub fn is_connected(&self, connection: &Connection) -> bool {
        self.endpoint.is_connected(connection)
    }

    pub fn events(&self) -> broadcast::Receiver<Event> {
        self.endpoint.events()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Exchanges
    // ─────────────────────────────────────────────────────────────────────────

    /// Send `payload` (and optional `meta`) to `peer` and wait for the
    /// response. Connects first when needed.
    ///
    /// Streams that failed in transit are reported in [`Response::errors`]
    /// rather than as an error.
    pub async fn request(
        &self,
        peer: &ClientId,
        payload: impl Into<Payload>,
        meta: Option<Payload>,
    ) -> Result<Response> {
        Ok(self.endpoint.request(peer, payload, meta).await?)
    }

    /// Register the handler for inbound requests.
    pub fn on_request(&self, handler: impl RequestHandler) {
        self.endpoint.on_request(handler);
    }

    /// Register the resolver for shared secrets.
    pub fn shared_secret(&self, resolver: impl SecretResolver) {
        self.endpoint.shared_secret(resolver);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqres_protocol::{MemoryBroker, ProtocolError, Request, Responder};
    use std::time::Duration;

    #[test]
    fn test_config_builder() {
        let config = ClientConfig::new()
            .with_client_id("alice")
            .with_broker(BrokerOptions {
                port: 8883,
                ..Default::default()
            });
        assert_eq!(config.client_id, Some(ClientId::new("alice")));
        assert_eq!(config.broker.url(), "mqtt://localhost:8883");
        assert_eq!(config.protocol, ProtocolConfig::default());
    }

    #[test]
    fn test_config_from_json() {
        let config: ClientConfig = serde_json::from_str(
            r#"{"client_id": "bob", "broker": {"hostname": "broker.local"}}"#,
        )
        .unwrap();
        assert_eq!(config.client_id, Some(ClientId::new("bob")));
        assert_eq!(config.broker.url(), "mqtt://broker.local:1883");
    }

    #[tokio::test]
    async fn test_generated_client_id() {
        let broker = MemoryBroker::new();
        let client = Client::new(ClientConfig::new(), broker.transport()).unwrap();
        assert_eq!(client.client_id().as_str().len(), 23);
        assert_eq!(client.config().client_id.as_ref(), Some(client.client_id()));
    }

    #[tokio::test]
    async fn test_invalid_client_id() {
        let broker = MemoryBroker::new();
        for id in ["", "a/b", "a+", "#"] {
            let result = Client::new(ClientConfig::new().with_client_id(id), broker.transport());
            assert!(matches!(result, Err(ClientError::InvalidClientId(_))), "{:?}", id);
        }
    }

    #[tokio::test]
    async fn test_request_and_reply() {
        let broker = MemoryBroker::new();
        let alice = Client::new(ClientConfig::new().with_client_id("alice"), broker.transport()).unwrap();
        let bob = Client::new(ClientConfig::new().with_client_id("bob"), broker.transport()).unwrap();
        for client in [&alice, &bob] {
            client.shared_secret(|_peer: ClientId| async { Some("secret".to_string()) });
        }
        bob.on_request(|request: Request, responder: Responder| async move {
            assert_eq!(request.payload.as_text(), Some("hello"));
            responder.send("foo", None).await
        });
        bob.connect(None, None).await.unwrap();

        let response = alice.request(bob.client_id(), "hello", None).await.unwrap();
        assert_eq!(response.payload.as_text(), Some("foo"));
        assert!(response.errors.is_empty());
        assert_eq!(alice.get_connected().len(), 1);
    }

    #[tokio::test]
    async fn test_timeout_classification() {
        let broker = MemoryBroker::new();
        broker.set_connect_delay(Duration::from_millis(200));
        let config = ClientConfig::new().with_protocol(ProtocolConfig {
            broker_timeout: Duration::from_millis(20),
            ..Default::default()
        });
        let client = Client::new(config, broker.transport()).unwrap();

        let err = client.connect(None, None).await.unwrap_err();
        assert!(err.is_timeout());
        assert!(matches!(err, ClientError::Protocol(ProtocolError::BrokerTimeout)));
    }
}
