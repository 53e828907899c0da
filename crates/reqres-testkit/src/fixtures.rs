//! Test fixtures and helpers.
//!
//! Common setup code for end-to-end tests: clients on a shared in-memory
//! broker that agree on one secret.

use std::sync::Arc;
use std::time::Duration;

use reqres::{Client, ClientConfig, ClientId, MemoryBroker, ProtocolConfig, Request, Responder};
use tracing_subscriber::EnvFilter;

/// Secret every fixture client resolves for every peer.
pub const TEST_SECRET: &str = "testkit-shared-secret";

/// Install a test-friendly tracing subscriber, honouring `RUST_LOG`.
///
/// Safe to call from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Default protocol settings with timeouts short enough for tests.
pub fn fast_config() -> ProtocolConfig {
    ProtocolConfig {
        ack_timeout: Duration::from_secs(2),
        handshake_timeout: Duration::from_secs(2),
        response_timeout: Duration::from_secs(5),
        idle_timeout: Duration::from_secs(5),
        ..Default::default()
    }
}

/// Create a client named `id` on `broker` that resolves [`TEST_SECRET`].
pub fn client(broker: &Arc<MemoryBroker>, id: &str, protocol: ProtocolConfig) -> Client {
    let config = ClientConfig::new()
        .with_client_id(id)
        .with_protocol(protocol);
    let client = match Client::new(config, broker.transport()) {
        Ok(client) => client,
        Err(e) => panic!("fixture client {:?}: {}", id, e),
    };
    client.shared_secret(|_peer: ClientId| async { Some(TEST_SECRET.to_string()) });
    client
}

/// Answer every request with its own payload and meta.
pub fn serve_echo(client: &Client) {
    client.on_request(|request: Request, responder: Responder| async move {
        responder.send(request.payload, request.meta).await
    });
}

/// Two clients, `alice` and `bob`, on one broker.
pub struct TestPair {
    pub broker: Arc<MemoryBroker>,
    pub alice: Client,
    pub bob: Client,
}

impl TestPair {
    pub fn new() -> Self {
        Self::with_config(fast_config())
    }

    pub fn with_config(protocol: ProtocolConfig) -> Self {
        init_tracing();
        let broker = MemoryBroker::new();
        let alice = client(&broker, "alice", protocol.clone());
        let bob = client(&broker, "bob", protocol);
        Self { broker, alice, bob }
    }

    /// Both clients on the broker, bob echoing, and alice connected to bob.
    pub async fn connected() -> Self {
        let pair = Self::new();
        serve_echo(&pair.bob);
        pair.connect().await;
        pair
    }

    /// Bring both clients onto the broker and run the handshake.
    pub async fn connect(&self) {
        for client in [&self.alice, &self.bob] {
            if let Err(e) = client.connect(None, None).await {
                panic!("broker connect for {}: {}", client.client_id(), e);
            }
        }
        if let Err(e) = self.alice.connect(Some(self.bob.client_id()), None).await {
            panic!("handshake: {}", e);
        }
    }
}

impl Default for TestPair {
    fn default() -> Self {
        Self::new()
    }
}

/// `count` clients named `client-0`, `client-1`, ... on one broker.
pub fn multi_party_clients(count: usize, protocol: ProtocolConfig) -> (Arc<MemoryBroker>, Vec<Client>) {
    init_tracing();
    let broker = MemoryBroker::new();
    let clients = (0..count)
        .map(|i| client(&broker, &format!("client-{}", i), protocol.clone()))
        .collect();
    (broker, clients)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pair_connects_both_ways() {
        let pair = TestPair::connected().await;

        let on_alice = pair.alice.get_connection(pair.bob.client_id()).unwrap();
        let on_bob = pair.bob.get_connection(pair.alice.client_id()).unwrap();
        assert!(pair.alice.is_connected(&on_alice));
        assert!(pair.bob.is_connected(&on_bob));
        assert_eq!(on_alice.shared_secret.as_deref(), Some(TEST_SECRET));
    }

    #[tokio::test]
    async fn test_multi_party_ids() {
        let (_broker, clients) = multi_party_clients(3, fast_config());
        let ids: Vec<_> = clients.iter().map(|c| c.client_id().to_string()).collect();
        assert_eq!(ids, vec!["client-0", "client-1", "client-2"]);
    }
}
