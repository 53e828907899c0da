//! Per-peer connection records.

use std::collections::HashMap;

use reqres_core::{crypto, hash, topic, ChannelId, ClientId, Nonce};

/// Handshake and channel state for one remote peer.
///
/// Created on first reference and only destroyed by an explicit
/// disconnect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection {
    pub peer_id: ClientId,
    pub shared_secret: Option<String>,
    /// Nonce of the handshake attempt in flight or completed.
    pub conn_req: Option<Nonce>,
    /// The nonce acknowledged as matching `conn_req`.
    pub conn_ack: Option<Nonce>,
    /// Our contribution to channel id derivation.
    pub channel_nonce: Option<Nonce>,
    pub channel_send_id: Option<ChannelId>,
    pub channel_receive_id: Option<ChannelId>,
    /// Prefix for frames we publish to the peer.
    pub topic_send: Option<String>,
    /// Filter we subscribe to for frames from the peer.
    pub topic_receive: Option<String>,
    /// The peer is known to have finished the current handshake.
    ///
    /// Set when we finalized as requester, or once the peer acknowledged or
    /// used a channel we adopted.
    pub confirmed: bool,
}

fn present(value: &Option<impl AsRef<str>>) -> bool {
    value.as_ref().map_or(false, |v| !v.as_ref().is_empty())
}

impl Connection {
    pub fn new(peer_id: ClientId) -> Self {
        Self {
            peer_id,
            shared_secret: None,
            conn_req: None,
            conn_ack: None,
            channel_nonce: None,
            channel_send_id: None,
            channel_receive_id: None,
            topic_send: None,
            topic_receive: None,
            confirmed: false,
        }
    }

    /// Every field is populated and `conn_req == conn_ack`.
    pub fn is_established(&self) -> bool {
        !self.peer_id.is_empty()
            && present(&self.shared_secret)
            && present(&self.conn_req)
            && present(&self.conn_ack)
            && present(&self.channel_nonce)
            && present(&self.channel_send_id)
            && present(&self.topic_send)
            && present(&self.channel_receive_id)
            && present(&self.topic_receive)
            && self.conn_req == self.conn_ack
    }

    /// A handshake is in flight from this side.
    pub fn is_requesting(&self) -> bool {
        self.conn_req.is_some() && self.conn_ack != self.conn_req
    }

    /// `hash(sharedSecret, connReq)`, once both are known.
    pub fn message_secret(&self) -> Option<String> {
        match (&self.shared_secret, &self.conn_req) {
            (Some(secret), Some(conn_req)) => Some(crypto::message_secret(secret, conn_req)),
            _ => None,
        }
    }

    /// Clear everything derived from a previous handshake.
    ///
    /// Keeps the peer id and shared secret.
    pub fn reset_handshake(&mut self) {
        self.conn_ack = None;
        self.channel_nonce = None;
        self.channel_send_id = None;
        self.channel_receive_id = None;
        self.topic_send = None;
        self.topic_receive = None;
        self.confirmed = false;
    }

    /// Start a new handshake as requester.
    ///
    /// Returns the previous receive filter, which is no longer valid.
    pub fn begin_request(&mut self) -> (Nonce, Nonce, Option<String>) {
        let stale = self.topic_receive.take();
        self.reset_handshake();

        let conn_req = Nonce::conn_req();
        let channel_nonce = Nonce::generate();
        self.conn_req = Some(conn_req.clone());
        self.channel_nonce = Some(channel_nonce.clone());
        (conn_req, channel_nonce, stale)
    }

    /// Finish a handshake around `conn`.
    ///
    /// Both sides call this with their own nonce first, so one side's send
    /// id is the other side's receive id. Returns the previous receive filter
    /// when it changed.
    pub fn establish(
        &mut self,
        me: &ClientId,
        conn: Nonce,
        own_nonce: Nonce,
        peer_nonce: &Nonce,
    ) -> Option<String> {
        let secret = self.shared_secret.clone().unwrap_or_default();

        let send = ChannelId::new(hash([
            conn.as_str(),
            own_nonce.as_str(),
            peer_nonce.as_str(),
            secret.as_str(),
        ]));
        let receive = ChannelId::new(hash([
            conn.as_str(),
            peer_nonce.as_str(),
            own_nonce.as_str(),
            secret.as_str(),
        ]));

        let topic_send = topic::send_topic_prefix(me, &send);
        let topic_receive = topic::receive_filter(&self.peer_id, &receive);
        let stale = self
            .topic_receive
            .replace(topic_receive)
            .filter(|old| Some(old) != self.topic_receive.as_ref());

        self.conn_req = Some(conn.clone());
        self.conn_ack = Some(conn);
        self.channel_nonce = Some(own_nonce);
        self.channel_send_id = Some(send);
        self.channel_receive_id = Some(receive);
        self.topic_send = Some(topic_send);
        self.confirmed = false;
        stale
    }

    /// Snapshot of what is needed to talk to the peer.
    pub(crate) fn channel(&self) -> Option<Channel> {
        if !self.is_established() {
            return None;
        }
        Some(Channel {
            peer: self.peer_id.clone(),
            send_prefix: self.topic_send.clone()?,
            receive_id: self.channel_receive_id.clone()?,
            secret: self.message_secret()?,
        })
    }
}

/// Established channel towards one peer.
#[derive(Debug, Clone)]
pub(crate) struct Channel {
    pub peer: ClientId,
    pub send_prefix: String,
    pub receive_id: ChannelId,
    /// Per-handshake chunk encryption secret.
    pub secret: String,
}

/// All connection records of one endpoint.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: HashMap<ClientId, Connection>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, peer: &ClientId) -> Option<&Connection> {
        self.connections.get(peer)
    }

    pub fn get_mut(&mut self, peer: &ClientId) -> Option<&mut Connection> {
        self.connections.get_mut(peer)
    }

    /// Look up, creating an empty record on first reference.
    pub fn get_or_create(&mut self, peer: &ClientId) -> &mut Connection {
        self.connections
            .entry(peer.clone())
            .or_insert_with(|| Connection::new(peer.clone()))
    }

    pub fn remove(&mut self, peer: &ClientId) -> Option<Connection> {
        self.connections.remove(peer)
    }

    /// Established connections, sorted by peer id.
    pub fn established(&self) -> Vec<Connection> {
        let mut connected: Vec<Connection> = self
            .connections
            .values()
            .filter(|c| c.is_established())
            .cloned()
            .collect();
        connected.sort_by(|a, b| a.peer_id.cmp(&b.peer_id));
        connected
    }

    /// Remove every record, returning them.
    pub fn drain(&mut self) -> Vec<Connection> {
        self.connections.drain().map(|(_, c)| c).collect()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn handshake(secret: &str) -> (Connection, Connection) {
        let a_id = ClientId::new("a");
        let b_id = ClientId::new("b");

        let mut a = Connection::new(b_id.clone());
        a.shared_secret = Some(secret.into());
        let mut b = Connection::new(a_id.clone());
        b.shared_secret = Some(secret.into());

        let (conn_req, a_nonce, _) = a.begin_request();
        assert!(a.is_requesting());
        assert!(!a.is_established());

        let b_nonce = Nonce::generate();
        b.establish(&b_id, conn_req.clone(), b_nonce.clone(), &a_nonce);
        a.establish(&a_id, conn_req, a_nonce, &b_nonce);
        (a, b)
    }

    #[test]
    fn test_channel_symmetry() {
        let (a, b) = handshake("secret");
        assert!(a.is_established());
        assert!(b.is_established());
        assert_eq!(a.channel_send_id, b.channel_receive_id);
        assert_eq!(a.channel_receive_id, b.channel_send_id);
        assert_ne!(a.channel_send_id, a.channel_receive_id);
        assert_eq!(a.message_secret(), b.message_secret());
    }

    #[test]
    fn test_topics() {
        let (a, b) = handshake("secret");
        let a_send = a.channel_send_id.as_ref().unwrap();
        assert_eq!(a.topic_send.as_deref(), Some(format!("message/a/{}/", a_send).as_str()));
        assert_eq!(
            b.topic_receive.as_deref(),
            Some(format!("message/a/{}/#", a_send).as_str())
        );
    }

    #[test]
    fn test_requires_secret_and_matching_ack() {
        let (mut a, _) = handshake("secret");
        a.shared_secret = None;
        assert!(!a.is_established());
        assert!(a.channel().is_none());

        let (mut a, _) = handshake("secret");
        a.conn_ack = Some(Nonce::new("other"));
        assert!(!a.is_established());
    }

    #[test]
    fn test_restart_clears_derived_state() {
        let (mut a, _) = handshake("secret");
        let old_req = a.conn_req.clone();
        let old_topic = a.topic_receive.clone();
        a.confirmed = true;

        let (conn_req, _, stale) = a.begin_request();
        assert_eq!(stale, old_topic);
        assert_ne!(Some(conn_req), old_req);
        assert_eq!(a.shared_secret.as_deref(), Some("secret"));
        assert_eq!(a.peer_id, ClientId::new("b"));
        assert!(a.conn_ack.is_none());
        assert!(a.channel_send_id.is_none());
        assert!(a.topic_receive.is_none());
        assert!(!a.confirmed);
    }

    #[test]
    fn test_reestablish_reports_stale_filter() {
        let (_, mut b) = handshake("secret");
        let old_topic = b.topic_receive.clone();
        b.confirmed = true;
        let stale = b.establish(
            &ClientId::new("b"),
            Nonce::conn_req(),
            Nonce::generate(),
            &Nonce::generate(),
        );
        assert_eq!(stale, old_topic);
        assert!(!b.confirmed);
    }

    #[test]
    fn test_registry() {
        let mut registry = ConnectionRegistry::new();
        let (a, _) = handshake("secret");
        *registry.get_or_create(&ClientId::new("b")) = a;
        registry.get_or_create(&ClientId::new("c"));

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.established().len(), 1);
        assert!(registry.remove(&ClientId::new("b")).is_some());
        assert!(registry.established().is_empty());
        assert_eq!(registry.drain().len(), 1);
        assert!(registry.is_empty());
    }

    proptest! {
        #[test]
        fn channels_mirror(secret in "[a-zA-Z0-9]{1,32}") {
            let (a, b) = handshake(&secret);
            prop_assert_eq!(a.channel_send_id, b.channel_receive_id);
            prop_assert_eq!(a.channel_receive_id, b.channel_send_id);
        }
    }
}
