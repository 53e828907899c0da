//! Pub/sub transport abstraction.
//!
//! The engine needs four things from a broker client: connect, publish,
//! subscribe with a granted QoS, and a stream of inbound `(topic, payload)`
//! messages. Publish is fire-and-forget; delivery may be lost.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use reqres_core::ClientId;

use crate::config::{BrokerOptions, QoS};
use crate::error::Result;

/// A message delivered by the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Bytes,
}

/// Broker client used by an endpoint.
///
/// Implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Open a session as `client_id`.
    ///
    /// Returns the receiving end of every message matching this session's
    /// subscriptions.
    async fn connect(
        &self,
        client_id: &ClientId,
        options: &BrokerOptions,
    ) -> Result<mpsc::UnboundedReceiver<InboundMessage>>;

    async fn publish(&self, topic: &str, payload: Bytes, qos: QoS) -> Result<()>;

    /// Subscribe to a topic filter. Returns the QoS granted by the broker.
    async fn subscribe(&self, filter: &str, qos: QoS) -> Result<QoS>;

    async fn unsubscribe(&self, filter: &str) -> Result<()>;

    async fn disconnect(&self) -> Result<()>;

    fn is_connected(&self) -> bool;
}

/// An in-memory broker for tests and single-process use.
///
/// Supports `+` and `#` filters, caps granted QoS, and lets tests drop
/// selected publishes.
pub mod memory {
    use super::*;
    use crate::error::ProtocolError;
    use reqres_core::topic;
    use std::collections::{HashMap, HashSet};
    use std::sync::{Arc, Mutex, RwLock as StdRwLock};
    use std::time::Duration;
    use tokio::sync::RwLock;

    /// Decides whether a publish is lost: `true` drops it.
    pub type Interceptor = Arc<dyn Fn(&str, &[u8]) -> bool + Send + Sync>;

    struct Session {
        sender: mpsc::UnboundedSender<InboundMessage>,
        filters: HashSet<String>,
    }

    /// Shared broker state.
    pub struct MemoryBroker {
        sessions: RwLock<HashMap<ClientId, Session>>,
        max_qos: QoS,
        online: StdRwLock<bool>,
        connect_delay: StdRwLock<Duration>,
        interceptor: StdRwLock<Option<Interceptor>>,
    }

    impl MemoryBroker {
        /// Create a broker granting every QoS level.
        pub fn new() -> Arc<Self> {
            Self::with_max_qos(QoS::ExactlyOnce)
        }

        /// Create a broker that downgrades subscriptions above `max_qos`.
        pub fn with_max_qos(max_qos: QoS) -> Arc<Self> {
            Arc::new(Self {
                sessions: RwLock::new(HashMap::new()),
                max_qos,
                online: StdRwLock::new(true),
                connect_delay: StdRwLock::new(Duration::ZERO),
                interceptor: StdRwLock::new(None),
            })
        }

        /// Create a client handle for this broker.
        pub fn transport(self: &Arc<Self>) -> MemoryTransport {
            MemoryTransport {
                broker: Arc::clone(self),
                client_id: Mutex::new(None),
            }
        }

        /// While offline, new connections are refused.
        pub fn set_online(&self, online: bool) {
            *self.online.write().unwrap_or_else(|e| e.into_inner()) = online;
        }

        /// Delay every connect by `delay`.
        pub fn set_connect_delay(&self, delay: Duration) {
            *self.connect_delay.write().unwrap_or_else(|e| e.into_inner()) = delay;
        }

        /// Install a filter deciding which publishes are dropped.
        pub fn set_interceptor<F>(&self, interceptor: F)
        where
            F: Fn(&str, &[u8]) -> bool + Send + Sync + 'static,
        {
            *self.interceptor.write().unwrap_or_else(|e| e.into_inner()) =
                Some(Arc::new(interceptor));
        }

        pub fn clear_interceptor(&self) {
            *self.interceptor.write().unwrap_or_else(|e| e.into_inner()) = None;
        }

        /// Filters currently held by `client_id`.
        pub async fn subscriptions(&self, client_id: &ClientId) -> Vec<String> {
            let sessions = self.sessions.read().await;
            let mut filters: Vec<String> = sessions
                .get(client_id)
                .map(|s| s.filters.iter().cloned().collect())
                .unwrap_or_default();
            filters.sort();
            filters
        }

        fn dropped(&self, topic: &str, payload: &[u8]) -> bool {
            let interceptor = self
                .interceptor
                .read()
                .unwrap_or_else(|e| e.into_inner())
                .clone();
            interceptor.map_or(false, |f| (*f)(topic, payload))
        }

        async fn route(&self, topic: &str, payload: Bytes) {
            let sessions = self.sessions.read().await;
            for session in sessions.values() {
                if session.filters.iter().any(|f| topic::matches(f, topic)) {
                    // Ignore closed receivers (session is going away)
                    let _ = session.sender.send(InboundMessage {
                        topic: topic.to_owned(),
                        payload: payload.clone(),
                    });
                }
            }
        }
    }

    /// In-memory transport implementation.
    pub struct MemoryTransport {
        broker: Arc<MemoryBroker>,
        client_id: Mutex<Option<ClientId>>,
    }

    impl MemoryTransport {
        fn session_id(&self) -> Result<ClientId> {
            self.client_id
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .clone()
                .ok_or(ProtocolError::NotConnectedToBroker)
        }
    }

    #[async_trait]
    impl Transport for MemoryTransport {
        async fn connect(
            &self,
            client_id: &ClientId,
            _options: &BrokerOptions,
        ) -> Result<mpsc::UnboundedReceiver<InboundMessage>> {
            let delay = *self
                .broker
                .connect_delay
                .read()
                .unwrap_or_else(|e| e.into_inner());
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            if !*self.broker.online.read().unwrap_or_else(|e| e.into_inner()) {
                return Err(ProtocolError::TransportError("broker unavailable".into()));
            }

            let (tx, rx) = mpsc::unbounded_channel();
            self.broker.sessions.write().await.insert(
                client_id.clone(),
                Session {
                    sender: tx,
                    filters: HashSet::new(),
                },
            );
            *self.client_id.lock().unwrap_or_else(|e| e.into_inner()) = Some(client_id.clone());

            Ok(rx)
        }

        async fn publish(&self, topic: &str, payload: Bytes, _qos: QoS) -> Result<()> {
            self.session_id()?;
            if self.broker.dropped(topic, &payload) {
                return Ok(());
            }
            self.broker.route(topic, payload).await;
            Ok(())
        }

        async fn subscribe(&self, filter: &str, qos: QoS) -> Result<QoS> {
            let id = self.session_id()?;
            let mut sessions = self.broker.sessions.write().await;
            let session = sessions
                .get_mut(&id)
                .ok_or(ProtocolError::NotConnectedToBroker)?;
            session.filters.insert(filter.to_owned());
            Ok(qos.min(self.broker.max_qos))
        }

        async fn unsubscribe(&self, filter: &str) -> Result<()> {
            let id = self.session_id()?;
            if let Some(session) = self.broker.sessions.write().await.get_mut(&id) {
                session.filters.remove(filter);
            }
            Ok(())
        }

        async fn disconnect(&self) -> Result<()> {
            let id = self.client_id.lock().unwrap_or_else(|e| e.into_inner()).take();
            if let Some(id) = id {
                self.broker.sessions.write().await.remove(&id);
            }
            Ok(())
        }

        fn is_connected(&self) -> bool {
            self.client_id
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .is_some()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::memory::MemoryBroker;
    use super::*;
    use crate::error::ProtocolError;
    use std::time::Duration;

    #[tokio::test]
    async fn test_publish_reaches_matching_subscribers() {
        let broker = MemoryBroker::new();
        let a = broker.transport();
        let b = broker.transport();
        let options = BrokerOptions::default();

        let _rx_a = a.connect(&ClientId::new("a"), &options).await.unwrap();
        let mut rx_b = b.connect(&ClientId::new("b"), &options).await.unwrap();
        b.subscribe("connect/b/+", QoS::AtMostOnce).await.unwrap();

        a.publish("connect/b/a", Bytes::from_static(b"hi"), QoS::AtMostOnce)
            .await
            .unwrap();
        a.publish("connect/c/a", Bytes::from_static(b"other"), QoS::AtMostOnce)
            .await
            .unwrap();

        let msg = rx_b.recv().await.unwrap();
        assert_eq!(msg.topic, "connect/b/a");
        assert_eq!(msg.payload, Bytes::from_static(b"hi"));
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_single_delivery_for_overlapping_filters() {
        let broker = MemoryBroker::new();
        let a = broker.transport();
        let mut rx = a.connect(&ClientId::new("a"), &BrokerOptions::default()).await.unwrap();
        a.subscribe("message/b/#", QoS::AtMostOnce).await.unwrap();
        a.subscribe("message/+/ch/request", QoS::AtMostOnce).await.unwrap();

        a.publish("message/b/ch/request", Bytes::new(), QoS::AtMostOnce)
            .await
            .unwrap();
        assert!(rx.recv().await.is_some());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_granted_qos_is_capped() {
        let broker = MemoryBroker::with_max_qos(QoS::AtMostOnce);
        let a = broker.transport();
        let _rx = a.connect(&ClientId::new("a"), &BrokerOptions::default()).await.unwrap();
        let granted = a.subscribe("x/#", QoS::AtLeastOnce).await.unwrap();
        assert_eq!(granted, QoS::AtMostOnce);
    }

    #[tokio::test]
    async fn test_interceptor_drops() {
        let broker = MemoryBroker::new();
        let a = broker.transport();
        let mut rx = a.connect(&ClientId::new("a"), &BrokerOptions::default()).await.unwrap();
        a.subscribe("t/#", QoS::AtMostOnce).await.unwrap();

        broker.set_interceptor(|topic, _| topic.ends_with("/drop"));
        a.publish("t/drop", Bytes::new(), QoS::AtMostOnce).await.unwrap();
        a.publish("t/keep", Bytes::new(), QoS::AtMostOnce).await.unwrap();
        assert_eq!(rx.recv().await.unwrap().topic, "t/keep");

        broker.clear_interceptor();
        a.publish("t/drop", Bytes::new(), QoS::AtMostOnce).await.unwrap();
        assert_eq!(rx.recv().await.unwrap().topic, "t/drop");
    }

    #[tokio::test]
    async fn test_offline_and_disconnected() {
        let broker = MemoryBroker::new();
        let a = broker.transport();

        assert!(matches!(
            a.publish("t", Bytes::new(), QoS::AtMostOnce).await,
            Err(ProtocolError::NotConnectedToBroker)
        ));

        broker.set_online(false);
        assert!(matches!(
            a.connect(&ClientId::new("a"), &BrokerOptions::default()).await,
            Err(ProtocolError::TransportError(_))
        ));

        broker.set_online(true);
        broker.set_connect_delay(Duration::from_millis(1));
        let _rx = a.connect(&ClientId::new("a"), &BrokerOptions::default()).await.unwrap();
        assert!(a.is_connected());
        a.subscribe("t/#", QoS::AtMostOnce).await.unwrap();
        assert_eq!(broker.subscriptions(&ClientId::new("a")).await, vec!["t/#"]);

        a.disconnect().await.unwrap();
        assert!(!a.is_connected());
        assert!(broker.subscriptions(&ClientId::new("a")).await.is_empty());
    }
}
