//! The protocol endpoint.
//!
//! An [`Endpoint`] owns one broker session, the connection registry and the
//! pending waiters. Inbound messages are read by a single dispatch task,
//! which hands handshake messages to one queue per peer; outbound operations
//! run on the caller's task and meet the dispatch task only through the
//! waiter router.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use reqres_core::{topic, ClientId, ConnectMessage, Payload};

use crate::config::{BrokerOptions, ProtocolConfig};
use crate::connection::{Connection, ConnectionRegistry};
use crate::dispatch;
use crate::error::{ProtocolError, Result};
use crate::exchange::Response;
use crate::handler::{RequestHandler, SecretResolver};
use crate::transport::Transport;
use crate::waiters::Router;

const EVENT_CAPACITY: usize = 64;

/// Lifecycle notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// The broker session is up and handshakes addressed to us are received.
    BrokerConnected,
    /// A handshake with the peer completed, from either side.
    PeerConnected(ClientId),
    /// The peer's record was removed.
    PeerDisconnected(ClientId),
}

/// Per-peer handshake serialisation.
#[derive(Clone, Default)]
pub(crate) struct PeerLocks {
    /// Held by an outbound connect for its whole handshake.
    pub connect: Arc<tokio::sync::Mutex<()>>,
    /// Held around every registry transition of the handshake.
    pub accept: Arc<tokio::sync::Mutex<()>>,
}

pub(crate) struct Inner {
    pub client_id: ClientId,
    pub transport: Box<dyn Transport>,
    pub options: BrokerOptions,
    pub config: ProtocolConfig,
    pub router: Arc<Router>,
    registry: Mutex<ConnectionRegistry>,
    handler: RwLock<Option<Arc<dyn RequestHandler>>>,
    resolver: RwLock<Option<Arc<dyn SecretResolver>>>,
    events: broadcast::Sender<Event>,
    /// Held across broker connect and reset; `true` once connected.
    broker: tokio::sync::Mutex<bool>,
    peer_locks: Mutex<HashMap<ClientId, PeerLocks>>,
    /// Inbound connect messages, one ordered queue per peer.
    pub handshakes: Mutex<HashMap<ClientId, mpsc::UnboundedSender<ConnectMessage>>>,
    dispatch: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(handle) = self.dispatch.get_mut().ok().and_then(Option::take) {
            handle.abort();
        }
    }
}

impl Inner {
    pub fn registry(&self) -> MutexGuard<'_, ConnectionRegistry> {
        self.registry.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn handler(&self) -> Option<Arc<dyn RequestHandler>> {
        self.handler.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn emit(&self, event: Event) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    pub fn peer_locks(&self, peer: &ClientId) -> PeerLocks {
        let mut locks = self.peer_locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.entry(peer.clone()).or_default().clone()
    }

    /// Drop the per-peer locks and handshake queue of `peer`, or of every
    /// peer. A queue drains what it holds before its task ends.
    fn forget_peers(&self, peer: Option<&ClientId>) {
        let mut locks = self.peer_locks.lock().unwrap_or_else(|e| e.into_inner());
        let mut queues = self.handshakes.lock().unwrap_or_else(|e| e.into_inner());
        match peer {
            Some(peer) => {
                locks.remove(peer);
                queues.remove(peer);
            }
            None => {
                locks.clear();
                queues.clear();
            }
        }
    }

    /// The shared secret for `peer`: stored on the record, otherwise asked
    /// of the resolver and stored.
    pub async fn resolve_secret(&self, peer: &ClientId) -> Result<String> {
        let known = self
            .registry()
            .get(peer)
            .and_then(|c| c.shared_secret.clone());
        if let Some(secret) = known {
            return Ok(secret);
        }

        let resolver = self.resolver.read().unwrap_or_else(|e| e.into_inner()).clone();
        let resolved = match resolver {
            Some(resolver) => resolver.resolve(peer).await,
            None => None,
        };
        let secret = resolved
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ProtocolError::MissingSharedSecret(peer.clone()))?;

        self.registry().get_or_create(peer).shared_secret = Some(secret.clone());
        Ok(secret)
    }

    /// Subscribe, insisting on the configured QoS.
    pub async fn subscribe(&self, filter: &str) -> Result<()> {
        let requested = self.config.qos;
        let granted = self.transport.subscribe(filter, requested).await?;
        if granted != requested {
            return Err(ProtocolError::SubscribeRejected {
                topic: filter.to_owned(),
                requested,
                granted,
            });
        }
        Ok(())
    }

    pub async fn connect_broker(self: &Arc<Self>) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ProtocolError::Closed);
        }

        let mut connected = self.broker.lock().await;
        if *connected && self.transport.is_connected() {
            return Ok(());
        }

        let timeout = self.config.broker_timeout;
        let rx = tokio::time::timeout(timeout, self.transport.connect(&self.client_id, &self.options))
            .await
            .map_err(|_| ProtocolError::BrokerTimeout)??;

        let filter = topic::connect_filter(&self.client_id);
        let subscribed = tokio::time::timeout(timeout, self.subscribe(&filter))
            .await
            .map_err(|_| ProtocolError::BrokerTimeout)
            .and_then(|r| r);
        if let Err(e) = subscribed {
            let _ = self.transport.disconnect().await;
            return Err(e);
        }

        let handle = tokio::spawn(dispatch::run(Arc::downgrade(self), rx));
        let previous = self
            .dispatch
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }

        *connected = true;
        info!(client = %self.client_id, broker = %self.options.url(), "connected to broker");
        self.emit(Event::BrokerConnected);
        Ok(())
    }

    /// Remove the peer's record and its subscription.
    pub async fn disconnect_peer(&self, peer: &ClientId) -> Result<()> {
        self.forget_peers(Some(peer));
        let Some(connection) = self.registry().remove(peer) else {
            return Ok(());
        };
        debug!(client = %self.client_id, peer = %peer, "disconnecting peer");

        if let Some(filter) = connection.topic_receive {
            if self.transport.is_connected() {
                self.transport.unsubscribe(&filter).await?;
            }
        }
        self.emit(Event::PeerDisconnected(peer.clone()));
        Ok(())
    }

    /// Leave the broker and forget every peer.
    pub async fn reset(&self) -> Result<()> {
        let mut connected = self.broker.lock().await;

        let handle = self.dispatch.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle {
            handle.abort();
        }
        let dropped = self.registry().drain();
        self.forget_peers(None);
        self.router.clear();
        *connected = false;

        let result = self.transport.disconnect().await;
        info!(client = %self.client_id, "disconnected from broker");

        for connection in dropped {
            self.emit(Event::PeerDisconnected(connection.peer_id));
        }
        result
    }
}

/// One protocol participant.
///
/// Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct Endpoint {
    inner: Arc<Inner>,
}

impl Endpoint {
    pub fn new(
        client_id: ClientId,
        transport: impl Transport,
        options: BrokerOptions,
        config: ProtocolConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                client_id,
                transport: Box::new(transport),
                options,
                config,
                router: Router::new(),
                registry: Mutex::new(ConnectionRegistry::new()),
                handler: RwLock::new(None),
                resolver: RwLock::new(None),
                events,
                broker: tokio::sync::Mutex::new(false),
                peer_locks: Mutex::new(HashMap::new()),
                handshakes: Mutex::new(HashMap::new()),
                dispatch: Mutex::new(None),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<Inner>) -> Self {
        Self { inner }
    }

    #[cfg(test)]
    pub(crate) fn inner_for_tests(&self) -> Arc<Inner> {
        Arc::clone(&self.inner)
    }

    pub fn client_id(&self) -> &ClientId {
        &self.inner.client_id
    }

    pub fn config(&self) -> &ProtocolConfig {
        &self.inner.config
    }

    /// Connect to the broker and start receiving handshakes.
    ///
    /// A no-op while connected.
    pub async fn connect_broker(&self) -> Result<()> {
        self.inner.connect_broker().await
    }

    pub async fn is_broker_connected(&self) -> bool {
        *self.inner.broker.lock().await && self.inner.transport.is_connected()
    }

    /// Establish a channel with `peer`.
    ///
    /// Resolves immediately, without network traffic, when already
    /// established. `secret` is stored on the connection before the
    /// handshake; without it the registered resolver is asked.
    pub async fn connect(&self, peer: &ClientId, secret: Option<String>) -> Result<()> {
        self.inner.connect_peer(peer, secret).await
    }

    /// Send a request and wait for its response.
    pub async fn request(
        &self,
        peer: &ClientId,
        payload: impl Into<Payload>,
        meta: Option<Payload>,
    ) -> Result<Response> {
        self.inner.request(peer, payload.into(), meta).await
    }

    /// Register the request handler. Without one, inbound requests are
    /// ignored and never acknowledged.
    pub fn on_request(&self, handler: impl RequestHandler) {
        *self.inner.handler.write().unwrap_or_else(|e| e.into_inner()) = Some(Arc::new(handler));
    }

    /// Register the shared secret resolver.
    pub fn shared_secret(&self, resolver: impl SecretResolver) {
        *self.inner.resolver.write().unwrap_or_else(|e| e.into_inner()) = Some(Arc::new(resolver));
    }

    /// Disconnect one peer, or with `None` leave the broker and reset.
    pub async fn disconnect(&self, peer: Option<&ClientId>) -> Result<()> {
        match peer {
            Some(peer) => self.inner.disconnect_peer(peer).await,
            None => self.inner.reset().await,
        }
    }

    /// Reset and refuse further broker connections.
    pub async fn close(&self) -> Result<()> {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.inner.reset().await
    }

    pub fn get_connection(&self, peer: &ClientId) -> Option<Connection> {
        self.inner.registry().get(peer).cloned()
    }

    /// Established connections, sorted by peer id.
    pub fn get_connected(&self) -> Vec<Connection> {
        self.inner.registry().established()
    }

    pub fn is_connected(&self, connection: &Connection) -> bool {
        connection.is_established()
    }

    pub fn events(&self) -> broadcast::Receiver<Event> {
        self.inner.events.subscribe()
    }

    /// Waiters and routes still registered.
    pub fn pending(&self) -> usize {
        self.inner.router.pending()
    }
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("client_id", &self.inner.client_id)
            .finish_non_exhaustive()
    }
}
