//! Request/response exchanges.
//!
//! ```text
//! requester                                   responder
//!   |-- request {messageId} -------------------->|
//!   |<----------------------------- request-ack --|
//!   |== stream meta (optional), stream payload ==>|
//!   |-- request-end {messageId} ---------------->|
//!   |<------------------------- request-end-ack --|   handler runs
//!   |<---------- response {messageId, respondsTo} |
//!   |-- response-ack --------------------------->|
//!   |<== stream meta (optional), stream payload ==|
//!   |<------------------ response-end {messageId} |
//!   |-- response-end-ack ----------------------->|
//! ```
//!
//! Stream failures while receiving are collected in `errors`; only ack,
//! response and idle timeouts fail the exchange itself.

use std::sync::Arc;

use tracing::{debug, warn};

use reqres_core::{
    ClientId, Frame, FrameKind, MessageFrame, MessageId, Payload, PayloadType, ResponseFrame,
    TargetProperty,
};

use crate::connection::Channel;
use crate::endpoint::{Endpoint, Inner};
use crate::error::{ProtocolError, Result};
use crate::waiters::Route;

/// A fully received request, as given to the request handler.
#[derive(Debug, Clone)]
pub struct Request {
    /// Topic the request frame arrived on.
    pub topic: String,
    pub from: ClientId,
    pub message_id: MessageId,
    pub payload_type: PayloadType,
    pub payload: Payload,
    pub meta: Option<Payload>,
    /// Streams that failed to arrive intact.
    pub errors: Vec<ProtocolError>,
}

/// A fully received response.
#[derive(Debug, Clone)]
pub struct Response {
    pub from: ClientId,
    pub message_id: MessageId,
    pub responds_to: MessageId,
    pub payload_type: PayloadType,
    pub payload: Payload,
    pub meta: Option<Payload>,
    pub errors: Vec<ProtocolError>,
}

/// Sends the response to one request.
#[derive(Clone)]
pub struct Responder {
    inner: Arc<Inner>,
    peer: ClientId,
    responds_to: MessageId,
}

impl Responder {
    pub fn peer(&self) -> &ClientId {
        &self.peer
    }

    pub fn responds_to(&self) -> &MessageId {
        &self.responds_to
    }

    /// The endpoint that received the request.
    pub fn endpoint(&self) -> Endpoint {
        Endpoint::from_inner(Arc::clone(&self.inner))
    }

    /// Send the response and wait until the requester acknowledged all of it.
    pub async fn send(&self, payload: impl Into<Payload>, meta: Option<Payload>) -> Result<()> {
        self.inner
            .send_response(&self.peer, &self.responds_to, payload.into(), meta)
            .await
    }
}

impl std::fmt::Debug for Responder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Responder")
            .field("peer", &self.peer)
            .field("responds_to", &self.responds_to)
            .finish()
    }
}

/// The streamed parts of one message.
struct Body {
    payload_type: PayloadType,
    payload: Payload,
    meta: Option<Payload>,
    errors: Vec<ProtocolError>,
}

impl Inner {
    pub(crate) fn channel_for(&self, peer: &ClientId) -> Result<Channel> {
        self.registry()
            .get(peer)
            .and_then(|c| c.channel())
            .ok_or_else(|| ProtocolError::NotConnected(peer.clone()))
    }

    /// Stream meta (when present) then payload within `message_id`.
    async fn send_body(
        &self,
        channel: &Channel,
        message_id: &MessageId,
        payload: &Payload,
        meta: Option<&Payload>,
    ) -> Result<()> {
        if let Some(meta) = meta {
            self.send_stream(channel, message_id, TargetProperty::Meta, meta)
                .await?;
        }
        self.send_stream(channel, message_id, TargetProperty::Payload, payload)
            .await
    }

    /// Receive streams until the `end` frame of this message, then ack it.
    async fn receive_body(&self, channel: &Channel, route: &mut Route, end: FrameKind) -> Result<Body> {
        let mut body = Body {
            payload_type: PayloadType::Absent,
            payload: Payload::Absent,
            meta: None,
            errors: Vec::new(),
        };

        loop {
            let frame = route.next(self.config.idle_timeout).await?;
            let kind = frame.kind();
            match frame {
                Frame::Stream(open) => match self.receive_stream(channel, &open).await {
                    Ok(value) => match open.target_property {
                        TargetProperty::Payload => {
                            body.payload_type = open.payload_type;
                            body.payload = value;
                        }
                        TargetProperty::Meta => body.meta = Some(value),
                    },
                    Err(e) => {
                        warn!(
                            peer = %channel.peer,
                            stream_id = %open.stream_id,
                            target = %open.target_property,
                            error = %e,
                            "stream failed"
                        );
                        body.errors.push(e);
                    }
                },
                Frame::RequestEnd(closing) | Frame::ResponseEnd(closing) if kind == end => {
                    if let Some(ack) = end.ack() {
                        self.send_ack(channel, ack, closing.message_id.as_str()).await?;
                    }
                    return Ok(body);
                }
                _ => {}
            }
        }
    }

    pub(crate) async fn request(
        self: &Arc<Self>,
        peer: &ClientId,
        payload: Payload,
        meta: Option<Payload>,
    ) -> Result<Response> {
        self.connect_peer(peer, None).await?;
        let channel = self.channel_for(peer)?;
        let message_id = MessageId::generate();
        debug!(client = %self.client_id, peer = %peer, message_id = %message_id, "sending request");

        let response = self.router.expect_response(&message_id);

        let open = Frame::Request(MessageFrame {
            message_id: message_id.clone(),
        });
        self.send_and_wait(&channel, open, message_id.as_str()).await?;
        self.send_body(&channel, &message_id, &payload, meta.as_ref())
            .await?;
        let end = Frame::RequestEnd(MessageFrame {
            message_id: message_id.clone(),
        });
        self.send_and_wait(&channel, end, message_id.as_str()).await?;

        let (frame, mut route) = response.wait(self.config.response_timeout).await?;
        self.send_ack(&channel, FrameKind::ResponseAck, frame.message_id.as_str())
            .await?;
        let body = self
            .receive_body(&channel, &mut route, FrameKind::ResponseEnd)
            .await?;

        debug!(client = %self.client_id, peer = %peer, message_id = %message_id, "response received");
        Ok(Response {
            from: peer.clone(),
            message_id: frame.message_id,
            responds_to: frame.responds_to,
            payload_type: body.payload_type,
            payload: body.payload,
            meta: body.meta,
            errors: body.errors,
        })
    }

    pub(crate) async fn send_response(
        &self,
        peer: &ClientId,
        responds_to: &MessageId,
        payload: Payload,
        meta: Option<Payload>,
    ) -> Result<()> {
        let channel = self.channel_for(peer)?;
        let message_id = MessageId::generate();
        debug!(client = %self.client_id, peer = %peer, responds_to = %responds_to, "sending response");

        let open = Frame::Response(ResponseFrame {
            message_id: message_id.clone(),
            responds_to: responds_to.clone(),
        });
        self.send_and_wait(&channel, open, message_id.as_str()).await?;
        self.send_body(&channel, &message_id, &payload, meta.as_ref())
            .await?;
        let end = Frame::ResponseEnd(MessageFrame {
            message_id: message_id.clone(),
        });
        self.send_and_wait(&channel, end, message_id.as_str()).await
    }

    /// Responder side of one exchange, from request-ack to the handler.
    pub(crate) async fn serve_request(
        self: Arc<Self>,
        channel: Channel,
        topic: String,
        message_id: MessageId,
        mut route: Route,
    ) {
        let peer = channel.peer.clone();
        let Some(handler) = self.handler() else {
            return;
        };
        if let Err(e) = self.resolve_secret(&peer).await {
            warn!(client = %self.client_id, peer = %peer, error = %e, "dropping request");
            return;
        }

        let received = async {
            self.send_ack(&channel, FrameKind::RequestAck, message_id.as_str())
                .await?;
            self.receive_body(&channel, &mut route, FrameKind::RequestEnd)
                .await
        }
        .await;
        drop(route);

        let body = match received {
            Ok(body) => body,
            Err(e) => {
                warn!(client = %self.client_id, peer = %peer, message_id = %message_id, error = %e, "request aborted");
                return;
            }
        };

        let request = Request {
            topic,
            from: peer.clone(),
            message_id: message_id.clone(),
            payload_type: body.payload_type,
            payload: body.payload,
            meta: body.meta,
            errors: body.errors,
        };
        let responder = Responder {
            inner: Arc::clone(&self),
            peer: peer.clone(),
            responds_to: message_id.clone(),
        };

        if let Err(e) = handler.handle(request, responder).await {
            warn!(client = %self.client_id, peer = %peer, message_id = %message_id, error = %e, "request handler failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BrokerOptions, ProtocolConfig};
    use crate::transport::memory::MemoryBroker;

    #[tokio::test]
    async fn test_response_to_unknown_peer() {
        let broker = MemoryBroker::new();
        let endpoint = Endpoint::new(
            ClientId::new("b"),
            broker.transport(),
            BrokerOptions::default(),
            ProtocolConfig::default(),
        );
        let responder = Responder {
            inner: endpoint.inner_for_tests(),
            peer: ClientId::new("a"),
            responds_to: MessageId::new("m1"),
        };

        assert!(matches!(
            responder.send("late", None).await,
            Err(ProtocolError::NotConnected(peer)) if peer.as_str() == "a"
        ));
        assert_eq!(responder.endpoint().client_id().as_str(), "b");
        assert_eq!(endpoint.pending(), 0);
    }
}
