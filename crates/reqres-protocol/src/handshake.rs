//! Channel handshake.
//!
//! ```text
//! A (requester)                                  B (responder)
//!   |-- connect/B/A {connreq, channelNonce} ------>|  adopt connreq, derive ids,
//!   |                                              |  subscribe receive filter
//!   |<----- connect/A/B {connack, channelNonce} ---|
//!   derive ids, subscribe receive filter
//! ```
//!
//! Both sides derive `send = hash(conn, own nonce, peer nonce, secret)` and
//! `receive = hash(conn, peer nonce, own nonce, secret)`. A repeated request
//! with an already adopted `connreq` is answered with the same ack.
//!
//! A responder only knows the requester finished once it sees the requester
//! use the channel. Before sending on an adopted channel it confirms by
//! repeating the adopted `connreq` and waiting for the repeated ack:
//!
//! ```text
//! A                                              B (adopted A's connreq)
//!   |<----- connect/A/B {connack, channelNonce} ---|
//!   |<----- connect/A/B {connreq, channelNonce} ---|  same connreq
//!   |-- connect/B/A {connack, channelNonce} ------>|  confirmed
//! ```
//!
//! When both sides initiate at once, the smaller `connreq` wins. The other
//! side adopts it and its pending connect continues with the confirmation.
//!
//! Connect messages from one peer are handled in arrival order on a task of
//! their own, so a slow secret lookup never holds up the dispatch loop.

use std::sync::{Arc, Weak};

use tokio::sync::mpsc;
use tracing::{debug, warn};

use reqres_core::{topic, ClientId, ConnectMessage, Nonce};

use crate::endpoint::{Event, Inner, PeerLocks};
use crate::error::Result;
use crate::waiters::HandshakeWaiter;

enum RequestOutcome {
    /// Re-send the existing ack.
    Duplicate(Option<Nonce>),
    /// The peer adopted our in-flight request and repeats it.
    Answered {
        channel_nonce: Nonce,
        filter: Option<String>,
        stale: Option<String>,
    },
    /// Our own in-flight request takes precedence.
    Outranked,
    Adopted {
        channel_nonce: Nonce,
        filter: Option<String>,
        stale: Option<String>,
    },
}

enum AckOutcome {
    /// The peer confirmed a channel we adopted.
    Confirmed,
    Finalized {
        filter: Option<String>,
        stale: Option<String>,
    },
    Stale,
}

/// What an outbound connect has to send next.
enum Outbound {
    Begin {
        conn_req: Nonce,
        channel_nonce: Nonce,
        stale: Option<String>,
    },
    Confirm {
        conn_req: Nonce,
        channel_nonce: Nonce,
    },
}

/// Handle the connect messages of one peer until its queue closes.
pub(crate) async fn serve_peer(
    inner: Weak<Inner>,
    peer: ClientId,
    mut inbound: mpsc::UnboundedReceiver<ConnectMessage>,
) {
    while let Some(message) = inbound.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        inner.handle_connect(&peer, message).await;
    }
}

impl Inner {
    /// Run a handshake with `peer` unless established and confirmed.
    pub(crate) async fn connect_peer(
        self: &Arc<Self>,
        peer: &ClientId,
        secret: Option<String>,
    ) -> Result<()> {
        self.connect_broker().await?;

        let locks = self.peer_locks(peer);
        let _serialized = locks.connect.lock().await;

        {
            let mut registry = self.registry();
            let connection = registry.get_or_create(peer);
            if connection.is_established() && connection.confirmed {
                debug!(client = %self.client_id, peer = %peer, "already connected");
                return Ok(());
            }
            if !connection.is_established() {
                if let Some(secret) = secret.filter(|s| !s.is_empty()) {
                    connection.shared_secret = Some(secret);
                }
            }
        }
        self.resolve_secret(peer).await?;

        // An adoption while we wait resolves the waiter early; the next round
        // then confirms the adopted channel.
        while let Some(waiter) = self.send_connect_request(peer, &locks).await? {
            waiter.wait(self.config.handshake_timeout).await?;
        }
        Ok(())
    }

    /// Publish the next connect request, or `None` once nothing is left to do.
    async fn send_connect_request(
        &self,
        peer: &ClientId,
        locks: &PeerLocks,
    ) -> Result<Option<HandshakeWaiter>> {
        let _accepting = locks.accept.lock().await;

        let outbound = {
            let mut registry = self.registry();
            let connection = registry.get_or_create(peer);
            if connection.is_established() {
                match (connection.confirmed, connection.conn_ack.clone(), connection.channel_nonce.clone()) {
                    (false, Some(conn_req), Some(channel_nonce)) => Outbound::Confirm {
                        conn_req,
                        channel_nonce,
                    },
                    _ => return Ok(None),
                }
            } else {
                let (conn_req, channel_nonce, stale) = connection.begin_request();
                Outbound::Begin {
                    conn_req,
                    channel_nonce,
                    stale,
                }
            }
        };

        let waiter = self.router.expect_handshake(peer);
        let (conn_req, channel_nonce) = match outbound {
            Outbound::Begin {
                conn_req,
                channel_nonce,
                stale,
            } => {
                if let Some(stale) = stale {
                    self.unsubscribe_stale(&stale).await;
                }
                debug!(client = %self.client_id, peer = %peer, conn_req = %conn_req, "sending connect request");
                (conn_req, channel_nonce)
            }
            Outbound::Confirm {
                conn_req,
                channel_nonce,
            } => {
                debug!(client = %self.client_id, peer = %peer, conn_req = %conn_req, "confirming adopted connection");
                (conn_req, channel_nonce)
            }
        };

        let body = ConnectMessage::Request {
            conn_req,
            channel_nonce: Some(channel_nonce),
        }
        .encode()?;
        self.transport
            .publish(
                &topic::connect_topic(peer, &self.client_id),
                body.into(),
                self.config.qos,
            )
            .await?;
        Ok(Some(waiter))
    }

    /// Queue a message received on `connect/<me>/<from>` for its peer task.
    pub(crate) fn enqueue_connect(self: &Arc<Self>, from: ClientId, message: ConnectMessage) {
        let mut queues = self.handshakes.lock().unwrap_or_else(|e| e.into_inner());
        let message = match queues.get(&from) {
            Some(queue) => match queue.send(message) {
                Ok(()) => return,
                Err(closed) => closed.0,
            },
            None => message,
        };

        let (queue, inbound) = mpsc::unbounded_channel();
        // The receiver is still in hand
        let _ = queue.send(message);
        queues.insert(from.clone(), queue);
        tokio::spawn(serve_peer(Arc::downgrade(self), from, inbound));
    }

    async fn handle_connect(self: &Arc<Self>, from: &ClientId, message: ConnectMessage) {
        match message {
            ConnectMessage::Request {
                conn_req,
                channel_nonce: Some(peer_nonce),
            } => {
                if let Err(e) = self.resolve_secret(from).await {
                    warn!(client = %self.client_id, peer = %from, error = %e, "ignoring connect request");
                    return;
                }
                let locks = self.peer_locks(from);
                let _accepting = locks.accept.lock().await;
                self.handle_connect_request(from, conn_req, peer_nonce).await
            }
            ConnectMessage::Ack {
                conn_ack,
                channel_nonce: Some(peer_nonce),
            } => {
                let locks = self.peer_locks(from);
                let _accepting = locks.accept.lock().await;
                self.handle_connect_ack(from, conn_ack, peer_nonce).await
            }
            _ => debug!(client = %self.client_id, peer = %from, "ignoring connect message without channel nonce"),
        }
    }

    async fn handle_connect_request(self: &Arc<Self>, from: &ClientId, conn_req: Nonce, peer_nonce: Nonce) {
        let outcome = {
            let mut registry = self.registry();
            let connection = registry.get_or_create(from);
            let own_request = connection.conn_req.clone().filter(|_| connection.is_requesting());

            match (own_request, connection.channel_nonce.clone()) {
                _ if connection.conn_ack.as_ref() == Some(&conn_req) => {
                    RequestOutcome::Duplicate(connection.channel_nonce.clone())
                }
                (Some(own), Some(channel_nonce)) if own == conn_req => {
                    let stale =
                        connection.establish(&self.client_id, conn_req.clone(), channel_nonce.clone(), &peer_nonce);
                    connection.confirmed = true;
                    RequestOutcome::Answered {
                        channel_nonce,
                        filter: connection.topic_receive.clone(),
                        stale,
                    }
                }
                (Some(own), _) if own < conn_req => RequestOutcome::Outranked,
                _ => {
                    let channel_nonce = Nonce::generate();
                    let stale =
                        connection.establish(&self.client_id, conn_req.clone(), channel_nonce.clone(), &peer_nonce);
                    RequestOutcome::Adopted {
                        channel_nonce,
                        filter: connection.topic_receive.clone(),
                        stale,
                    }
                }
            }
        };

        let (channel_nonce, adopted) = match outcome {
            RequestOutcome::Duplicate(channel_nonce) => {
                debug!(client = %self.client_id, peer = %from, "repeating connect ack");
                (channel_nonce, false)
            }
            RequestOutcome::Answered {
                channel_nonce,
                filter,
                stale,
            } => {
                if !self.finish_channel(from, filter, stale).await {
                    return;
                }
                debug!(client = %self.client_id, peer = %from, "connected");
                self.emit(Event::PeerConnected(from.clone()));
                self.router.resolve_handshake(from, Ok(()));
                (Some(channel_nonce), false)
            }
            RequestOutcome::Outranked => {
                debug!(client = %self.client_id, peer = %from, "own connect request takes precedence");
                return;
            }
            RequestOutcome::Adopted {
                channel_nonce,
                filter,
                stale,
            } => {
                if !self.finish_channel(from, filter, stale).await {
                    return;
                }
                (Some(channel_nonce), true)
            }
        };

        let ack = ConnectMessage::Ack {
            conn_ack: conn_req,
            channel_nonce,
        };
        let published = match ack.encode() {
            Ok(body) => {
                self.transport
                    .publish(
                        &topic::connect_topic(from, &self.client_id),
                        body.into(),
                        self.config.qos,
                    )
                    .await
            }
            Err(e) => Err(e.into()),
        };
        if let Err(e) = published {
            warn!(client = %self.client_id, peer = %from, error = %e, "connect ack not sent");
            return;
        }

        if adopted {
            debug!(client = %self.client_id, peer = %from, "accepted connection");
            self.emit(Event::PeerConnected(from.clone()));
            // A connect of our own in flight moves on to confirming
            self.router.resolve_handshake(from, Ok(()));
        }
    }

    async fn handle_connect_ack(self: &Arc<Self>, from: &ClientId, conn_ack: Nonce, peer_nonce: Nonce) {
        let outcome = {
            let mut registry = self.registry();
            let Some(connection) = registry.get_mut(from) else {
                return;
            };
            let matches = connection.conn_req.as_ref() == Some(&conn_ack)
                && connection.is_requesting()
                && connection.shared_secret.is_some();

            match connection.channel_nonce.clone() {
                _ if connection.is_established() && connection.conn_ack.as_ref() == Some(&conn_ack) => {
                    connection.confirmed = true;
                    AckOutcome::Confirmed
                }
                Some(own_nonce) if matches => {
                    let stale = connection.establish(&self.client_id, conn_ack, own_nonce, &peer_nonce);
                    connection.confirmed = true;
                    AckOutcome::Finalized {
                        filter: connection.topic_receive.clone(),
                        stale,
                    }
                }
                _ => AckOutcome::Stale,
            }
        };

        match outcome {
            AckOutcome::Confirmed => {
                debug!(client = %self.client_id, peer = %from, "connection confirmed");
                self.router.resolve_handshake(from, Ok(()));
            }
            AckOutcome::Finalized { filter, stale } => {
                if !self.finish_channel(from, filter, stale).await {
                    return;
                }
                debug!(client = %self.client_id, peer = %from, "connected");
                self.emit(Event::PeerConnected(from.clone()));
                self.router.resolve_handshake(from, Ok(()));
            }
            AckOutcome::Stale => debug!(client = %self.client_id, peer = %from, "ignoring stale connect ack"),
        }
    }

    /// Move the receive subscription to a freshly derived channel. A failure
    /// fails the pending connect, if any.
    async fn finish_channel(&self, peer: &ClientId, filter: Option<String>, stale: Option<String>) -> bool {
        if let Some(stale) = stale {
            self.unsubscribe_stale(&stale).await;
        }
        if let Some(filter) = filter {
            if let Err(e) = self.subscribe(&filter).await {
                warn!(client = %self.client_id, peer = %peer, error = %e, "receive subscription failed");
                self.router.resolve_handshake(peer, Err(e));
                return false;
            }
        }
        true
    }

    async fn unsubscribe_stale(&self, filter: &str) {
        if let Err(e) = self.transport.unsubscribe(filter).await {
            warn!(client = %self.client_id, filter = %filter, error = %e, "unsubscribe failed");
        }
    }
}
