//! Inbound message dispatch.
//!
//! One task per endpoint reads the broker session in order. Handshake
//! messages go to a queue per peer, so one peer's handshake never waits on
//! another's. Application frames only touch the router, except a new
//! request, which gets its own task.

use std::sync::{Arc, Weak};

use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use reqres_core::{ClientId, ConnectMessage, Frame, FrameKind, ParsedTopic};

use crate::endpoint::Inner;
use crate::transport::InboundMessage;

pub(crate) async fn run(inner: Weak<Inner>, mut inbound: mpsc::UnboundedReceiver<InboundMessage>) {
    while let Some(message) = inbound.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        inner.dispatch(message).await;
    }
}

impl Inner {
    pub(crate) async fn dispatch(self: &Arc<Self>, message: InboundMessage) {
        if message.payload.is_empty() {
            return;
        }

        match ParsedTopic::parse(&message.topic) {
            Some(ParsedTopic::Connect { to, from }) => {
                if to != self.client_id {
                    return;
                }
                match ConnectMessage::decode(&message.payload) {
                    Ok(connect) => self.enqueue_connect(from, connect),
                    Err(e) => debug!(client = %self.client_id, topic = %message.topic, error = %e, "dropping connect message"),
                }
            }
            Some(ParsedTopic::Message { from, channel, kind }) => {
                let kind = match kind.parse::<FrameKind>() {
                    Ok(kind) => kind,
                    Err(e) => {
                        warn!(client = %self.client_id, topic = %message.topic, error = %e, "dropping frame");
                        return;
                    }
                };
                let frame = match Frame::decode(kind, &message.payload) {
                    Ok(frame) => frame,
                    Err(e) => {
                        debug!(client = %self.client_id, topic = %message.topic, error = %e, "dropping malformed frame");
                        return;
                    }
                };

                let link = {
                    let mut registry = self.registry();
                    match registry.get_mut(&from) {
                        Some(connection) => match connection.channel() {
                            Some(link) if link.receive_id == channel => {
                                // Only a peer that finished the handshake sends here
                                connection.confirmed = true;
                                Some(link)
                            }
                            _ => None,
                        },
                        None => None,
                    }
                };
                match link {
                    Some(link) => self.route_frame(&from, message.topic, frame, link),
                    None => debug!(client = %self.client_id, topic = %message.topic, "dropping frame from unknown channel"),
                }
            }
            None => trace!(client = %self.client_id, topic = %message.topic, "ignoring foreign topic"),
        }
    }

    fn route_frame(
        self: &Arc<Self>,
        from: &ClientId,
        topic: String,
        frame: Frame,
        link: crate::connection::Channel,
    ) {
        trace!(client = %self.client_id, peer = %from, kind = %frame.kind(), "frame");

        let routed = match frame {
            Frame::Ack { kind, to_id } => self.router.resolve_ack(kind, &to_id),
            Frame::Request(open) => {
                if self.handler().is_none() {
                    debug!(client = %self.client_id, peer = %from, "no request handler, ignoring request");
                    return;
                }
                let Some(route) = self.router.open_message(&open.message_id) else {
                    return;
                };
                tokio::spawn(Arc::clone(self).serve_request(link, topic, open.message_id, route));
                true
            }
            Frame::Response(response) => self.router.deliver_response(response),
            Frame::Stream(ref open) => {
                let id = open.message_id.clone();
                self.router.route_message(&id, frame)
            }
            Frame::RequestEnd(ref end) | Frame::ResponseEnd(ref end) => {
                let id = end.message_id.clone();
                self.router.route_message(&id, frame)
            }
            Frame::Chunk(ref chunk) => {
                let id = chunk.stream_id.clone();
                self.router.route_stream(&id, frame)
            }
            Frame::StreamEnd(ref end) => {
                let id = end.stream_id.clone();
                self.router.route_stream(&id, frame)
            }
        };

        if !routed {
            trace!(client = %self.client_id, peer = %from, "no waiter for frame");
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::config::{BrokerOptions, ProtocolConfig, QoS};
    use crate::endpoint::Endpoint;
    use crate::transport::memory::MemoryBroker;
    use crate::transport::Transport;
    use bytes::Bytes;
    use reqres_core::ClientId;
    use std::time::Duration;

    #[tokio::test]
    async fn test_junk_is_dropped_without_side_effects() {
        let broker = MemoryBroker::new();
        let a = Endpoint::new(
            ClientId::new("a"),
            broker.transport(),
            BrokerOptions::default(),
            ProtocolConfig::default(),
        );
        a.connect_broker().await.unwrap();

        let rogue = broker.transport();
        let _rx = rogue
            .connect(&ClientId::new("rogue"), &BrokerOptions::default())
            .await
            .unwrap();
        for (topic, body) in [
            ("connect/a/rogue", &b"not json"[..]),
            ("connect/a/rogue", &br#"{"channelNonce":"n"}"#[..]),
            ("connect/a/rogue", &br#"{"connack":"unknown","channelNonce":"n"}"#[..]),
            ("message/rogue/chan/request", &br#"{"messageId":"m1"}"#[..]),
            ("message/rogue/chan/bogus-kind", &br#"{"toId":"x"}"#[..]),
            ("connect/a/rogue", &b""[..]),
        ] {
            rogue
                .publish(topic, Bytes::copy_from_slice(body), QoS::AtMostOnce)
                .await
                .unwrap();
        }

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(a.get_connected().is_empty());
        assert!(a.get_connection(&ClientId::new("rogue")).is_none());
        assert_eq!(a.pending(), 0);
    }
}
