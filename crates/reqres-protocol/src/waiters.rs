//! Pending waiters and inbound frame routes.
//!
//! Every wait registers a one-shot entry keyed by correlation id before the
//! frame that triggers the reply is published. Dispatch fulfils at most one
//! entry per inbound frame; an entry is removed on match, on timeout, or when
//! its handle is dropped. Frames with no matching entry are dropped.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};

use reqres_core::{ClientId, Frame, FrameKind, MessageId, ResponseFrame, StreamId};

use crate::error::{ProtocolError, Result};

struct Table<K, V> {
    entries: Mutex<HashMap<K, V>>,
}

impl<K: Eq + Hash, V> Table<K, V> {
    fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<K, V>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn insert(&self, key: K, value: V) -> Option<V> {
        self.lock().insert(key, value)
    }

    /// Insert unless the key is taken.
    fn insert_new(&self, key: K, value: V) -> bool {
        let mut entries = self.lock();
        if entries.contains_key(&key) {
            return false;
        }
        entries.insert(key, value);
        true
    }

    fn remove(&self, key: &K) -> Option<V> {
        self.lock().remove(key)
    }

    fn clear(&self) {
        self.lock().clear();
    }

    fn len(&self) -> usize {
        self.lock().len()
    }
}

type HandshakeResult = Result<()>;

/// All pending waiters and routes of one endpoint.
pub(crate) struct Router {
    acks: Table<(FrameKind, String), oneshot::Sender<()>>,
    handshakes: Table<ClientId, oneshot::Sender<HandshakeResult>>,
    responses: Table<MessageId, oneshot::Sender<(ResponseFrame, Route)>>,
    messages: Table<MessageId, mpsc::UnboundedSender<Frame>>,
    streams: Table<StreamId, mpsc::UnboundedSender<Frame>>,
}

/// Removes its entry from the router when dropped.
struct Registration {
    cleanup: Option<Box<dyn FnOnce() + Send>>,
}

impl Registration {
    fn new(cleanup: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cleanup: Some(Box::new(cleanup)),
        }
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        if let Some(cleanup) = self.cleanup.take() {
            cleanup();
        }
    }
}

impl Router {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            acks: Table::new(),
            handshakes: Table::new(),
            responses: Table::new(),
            messages: Table::new(),
            streams: Table::new(),
        })
    }

    /// Expect an ack of `kind` for `id`.
    pub fn expect_ack(self: &Arc<Self>, kind: FrameKind, id: &str) -> AckWaiter {
        let (tx, rx) = oneshot::channel();
        let key = (kind, id.to_owned());
        self.acks.insert(key.clone(), tx);

        let router = Arc::clone(self);
        AckWaiter {
            kind,
            id: id.to_owned(),
            rx,
            _registration: Registration::new(move || {
                router.acks.remove(&key);
            }),
        }
    }

    /// Fulfil the ack waiter for `(kind, id)`. Returns whether one matched.
    pub fn resolve_ack(&self, kind: FrameKind, id: &str) -> bool {
        match self.acks.remove(&(kind, id.to_owned())) {
            Some(tx) => tx.send(()).is_ok(),
            None => false,
        }
    }

    /// Expect the handshake with `peer` to complete.
    pub fn expect_handshake(self: &Arc<Self>, peer: &ClientId) -> HandshakeWaiter {
        let (tx, rx) = oneshot::channel();
        self.handshakes.insert(peer.clone(), tx);

        let router = Arc::clone(self);
        let key = peer.clone();
        HandshakeWaiter {
            peer: peer.clone(),
            rx,
            _registration: Registration::new(move || {
                router.handshakes.remove(&key);
            }),
        }
    }

    pub fn resolve_handshake(&self, peer: &ClientId, result: HandshakeResult) -> bool {
        match self.handshakes.remove(peer) {
            Some(tx) => tx.send(result).is_ok(),
            None => false,
        }
    }

    /// Expect the response to request `request`.
    pub fn expect_response(self: &Arc<Self>, request: &MessageId) -> ResponseWaiter {
        let (tx, rx) = oneshot::channel();
        self.responses.insert(request.clone(), tx);

        let router = Arc::clone(self);
        let key = request.clone();
        ResponseWaiter {
            request: request.clone(),
            rx,
            _registration: Registration::new(move || {
                router.responses.remove(&key);
            }),
        }
    }

    /// Hand a response frame to the requester waiting on `responds_to`.
    ///
    /// Opens the route for the response's own frames before the requester
    /// gets to ack, so nothing the responder sends next can be missed.
    pub fn deliver_response(self: &Arc<Self>, frame: ResponseFrame) -> bool {
        let Some(tx) = self.responses.remove(&frame.responds_to) else {
            return false;
        };
        let Some(route) = self.open_message(&frame.message_id) else {
            return false;
        };
        tx.send((frame, route)).is_ok()
    }

    /// Open the route for frames of message `id`. `None` if already open.
    pub fn open_message(self: &Arc<Self>, id: &MessageId) -> Option<Route> {
        let (tx, rx) = mpsc::unbounded_channel();
        if !self.messages.insert_new(id.clone(), tx) {
            return None;
        }

        let router = Arc::clone(self);
        let key = id.clone();
        Some(Route {
            name: format!("message {}", id),
            rx,
            _registration: Registration::new(move || {
                router.messages.remove(&key);
            }),
        })
    }

    /// Open the route for frames of stream `id`. `None` if already open.
    pub fn open_stream(self: &Arc<Self>, id: &StreamId) -> Option<Route> {
        let (tx, rx) = mpsc::unbounded_channel();
        if !self.streams.insert_new(id.clone(), tx) {
            return None;
        }

        let router = Arc::clone(self);
        let key = id.clone();
        Some(Route {
            name: format!("stream {}", id),
            rx,
            _registration: Registration::new(move || {
                router.streams.remove(&key);
            }),
        })
    }

    pub fn route_message(&self, id: &MessageId, frame: Frame) -> bool {
        match self.messages.lock().get(id) {
            Some(tx) => tx.send(frame).is_ok(),
            None => false,
        }
    }

    pub fn route_stream(&self, id: &StreamId, frame: Frame) -> bool {
        match self.streams.lock().get(id) {
            Some(tx) => tx.send(frame).is_ok(),
            None => false,
        }
    }

    /// Drop every entry. Pending waits fail with [`ProtocolError::Closed`].
    pub fn clear(&self) {
        self.acks.clear();
        self.handshakes.clear();
        self.responses.clear();
        self.messages.clear();
        self.streams.clear();
    }

    /// Total number of live entries.
    pub fn pending(&self) -> usize {
        self.acks.len()
            + self.handshakes.len()
            + self.responses.len()
            + self.messages.len()
            + self.streams.len()
    }
}

pub(crate) struct AckWaiter {
    kind: FrameKind,
    id: String,
    rx: oneshot::Receiver<()>,
    _registration: Registration,
}

impl AckWaiter {
    pub async fn wait(self, timeout: Duration) -> Result<()> {
        match tokio::time::timeout(timeout, self.rx).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(ProtocolError::Closed),
            Err(_) => Err(ProtocolError::AckTimeout {
                kind: self.kind,
                id: self.id,
            }),
        }
    }
}

pub(crate) struct HandshakeWaiter {
    peer: ClientId,
    rx: oneshot::Receiver<HandshakeResult>,
    _registration: Registration,
}

impl HandshakeWaiter {
    pub async fn wait(self, timeout: Duration) -> Result<()> {
        match tokio::time::timeout(timeout, self.rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ProtocolError::Closed),
            Err(_) => Err(ProtocolError::HandshakeTimeout(self.peer)),
        }
    }
}

pub(crate) struct ResponseWaiter {
    request: MessageId,
    rx: oneshot::Receiver<(ResponseFrame, Route)>,
    _registration: Registration,
}

impl ResponseWaiter {
    pub async fn wait(self, timeout: Duration) -> Result<(ResponseFrame, Route)> {
        match tokio::time::timeout(timeout, self.rx).await {
            Ok(Ok(delivered)) => Ok(delivered),
            Ok(Err(_)) => Err(ProtocolError::Closed),
            Err(_) => Err(ProtocolError::ResponseTimeout(self.request)),
        }
    }
}

/// Inbound frames of one message or stream, in arrival order.
pub(crate) struct Route {
    name: String,
    rx: mpsc::UnboundedReceiver<Frame>,
    _registration: Registration,
}

impl Route {
    /// Next frame, failing after `idle` without traffic.
    pub async fn next(&mut self, idle: Duration) -> Result<Frame> {
        match tokio::time::timeout(idle, self.rx.recv()).await {
            Ok(Some(frame)) => Ok(frame),
            Ok(None) => Err(ProtocolError::Closed),
            Err(_) => Err(ProtocolError::IdleTimeout(self.name.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqres_core::{MessageFrame, StreamEndFrame};

    const SHORT: Duration = Duration::from_millis(20);

    #[tokio::test]
    async fn test_ack_resolves_only_matching_waiter() {
        let router = Router::new();
        let chunk = router.expect_ack(FrameKind::ChunkAck, "c1");
        let other = router.expect_ack(FrameKind::StreamAck, "c1");

        assert!(!router.resolve_ack(FrameKind::ChunkAck, "c2"));
        assert!(router.resolve_ack(FrameKind::ChunkAck, "c1"));
        chunk.wait(SHORT).await.unwrap();

        assert!(matches!(
            other.wait(SHORT).await,
            Err(ProtocolError::AckTimeout { kind: FrameKind::StreamAck, .. })
        ));
        assert_eq!(router.pending(), 0);
    }

    #[tokio::test]
    async fn test_late_ack_is_dropped() {
        let router = Router::new();
        let waiter = router.expect_ack(FrameKind::RequestAck, "m1");
        assert!(waiter.wait(SHORT).await.is_err());
        assert!(!router.resolve_ack(FrameKind::RequestAck, "m1"));
    }

    #[tokio::test]
    async fn test_response_opens_route() {
        let router = Router::new();
        let waiter = router.expect_response(&MessageId::new("req"));

        let frame = ResponseFrame {
            message_id: MessageId::new("res"),
            responds_to: MessageId::new("req"),
        };
        assert!(router.deliver_response(frame.clone()));

        let end = Frame::ResponseEnd(MessageFrame {
            message_id: MessageId::new("res"),
        });
        assert!(router.route_message(&MessageId::new("res"), end.clone()));

        let (delivered, mut route) = waiter.wait(SHORT).await.unwrap();
        assert_eq!(delivered, frame);
        assert_eq!(route.next(SHORT).await.unwrap(), end);

        drop(route);
        assert_eq!(router.pending(), 0);
    }

    #[tokio::test]
    async fn test_unmatched_response_is_dropped() {
        let router = Router::new();
        let frame = ResponseFrame {
            message_id: MessageId::new("res"),
            responds_to: MessageId::new("nobody"),
        };
        assert!(!router.deliver_response(frame));
        assert_eq!(router.pending(), 0);
    }

    #[tokio::test]
    async fn test_stream_route_idle_and_duplicate() {
        let router = Router::new();
        let mut route = router.open_stream(&StreamId::new("s1")).unwrap();
        assert!(router.open_stream(&StreamId::new("s1")).is_none());

        assert!(matches!(route.next(SHORT).await, Err(ProtocolError::IdleTimeout(_))));

        let end = Frame::StreamEnd(StreamEndFrame {
            message_id: MessageId::new("m1"),
            stream_id: StreamId::new("s1"),
        });
        assert!(router.route_stream(&StreamId::new("s1"), end));
        assert!(route.next(SHORT).await.is_ok());
        assert!(!router.route_stream(&StreamId::new("s2"), Frame::ack(FrameKind::ChunkAck, "x")));
    }

    #[tokio::test]
    async fn test_handshake_result_and_clear() {
        let router = Router::new();
        let peer = ClientId::new("b");

        let waiter = router.expect_handshake(&peer);
        assert!(router.resolve_handshake(&peer, Err(ProtocolError::Closed)));
        assert!(matches!(waiter.wait(SHORT).await, Err(ProtocolError::Closed)));

        let waiter = router.expect_handshake(&peer);
        let ack = router.expect_ack(FrameKind::ChunkAck, "c1");
        router.clear();
        assert!(matches!(waiter.wait(SHORT).await, Err(ProtocolError::Closed)));
        assert!(matches!(ack.wait(SHORT).await, Err(ProtocolError::Closed)));

        let waiter = router.expect_handshake(&peer);
        assert!(matches!(
            waiter.wait(SHORT).await,
            Err(ProtocolError::HandshakeTimeout(_))
        ));
    }
}
