//! Wire frames.
//!
//! Every application frame is a JSON object published on
//! `message/<from>/<channel>/<kind>`. The kind lives in the topic, so
//! decoding needs both the kind and the body. Handshake bodies travel on
//! `connect/<to>/<from>` and are modelled by [`ConnectMessage`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{CoreError, Result};
use crate::payload::PayloadType;
use crate::types::{ChunkId, MessageId, Nonce, StreamId};

/// The fourteen frame kinds, named exactly as on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FrameKind {
    Request,
    RequestAck,
    RequestEnd,
    RequestEndAck,
    Response,
    ResponseAck,
    ResponseEnd,
    ResponseEndAck,
    Stream,
    StreamAck,
    StreamEnd,
    StreamEndAck,
    Chunk,
    ChunkAck,
}

impl FrameKind {
    pub const ALL: [FrameKind; 14] = [
        FrameKind::Request,
        FrameKind::RequestAck,
        FrameKind::RequestEnd,
        FrameKind::RequestEndAck,
        FrameKind::Response,
        FrameKind::ResponseAck,
        FrameKind::ResponseEnd,
        FrameKind::ResponseEndAck,
        FrameKind::Stream,
        FrameKind::StreamAck,
        FrameKind::StreamEnd,
        FrameKind::StreamEndAck,
        FrameKind::Chunk,
        FrameKind::ChunkAck,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FrameKind::Request => "request",
            FrameKind::RequestAck => "request-ack",
            FrameKind::RequestEnd => "request-end",
            FrameKind::RequestEndAck => "request-end-ack",
            FrameKind::Response => "response",
            FrameKind::ResponseAck => "response-ack",
            FrameKind::ResponseEnd => "response-end",
            FrameKind::ResponseEndAck => "response-end-ack",
            FrameKind::Stream => "stream",
            FrameKind::StreamAck => "stream-ack",
            FrameKind::StreamEnd => "stream-end",
            FrameKind::StreamEndAck => "stream-end-ack",
            FrameKind::Chunk => "chunk",
            FrameKind::ChunkAck => "chunk-ack",
        }
    }

    pub fn is_ack(&self) -> bool {
        matches!(
            self,
            FrameKind::RequestAck
                | FrameKind::RequestEndAck
                | FrameKind::ResponseAck
                | FrameKind::ResponseEndAck
                | FrameKind::StreamAck
                | FrameKind::StreamEndAck
                | FrameKind::ChunkAck
        )
    }

    /// The kind that acknowledges this one, `None` for ack kinds.
    pub fn ack(&self) -> Option<FrameKind> {
        match self {
            FrameKind::Request => Some(FrameKind::RequestAck),
            FrameKind::RequestEnd => Some(FrameKind::RequestEndAck),
            FrameKind::Response => Some(FrameKind::ResponseAck),
            FrameKind::ResponseEnd => Some(FrameKind::ResponseEndAck),
            FrameKind::Stream => Some(FrameKind::StreamAck),
            FrameKind::StreamEnd => Some(FrameKind::StreamEndAck),
            FrameKind::Chunk => Some(FrameKind::ChunkAck),
            _ => None,
        }
    }
}

impl fmt::Display for FrameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FrameKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        FrameKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| CoreError::UnknownFrameKind(s.to_owned()))
    }
}

/// Body of `request`, `request-end` and `response-end`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageFrame {
    pub message_id: MessageId,
}

/// Body of `response`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseFrame {
    pub message_id: MessageId,
    pub responds_to: MessageId,
}

/// Which property of the exchange a stream fills.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetProperty {
    Meta,
    Payload,
}

impl fmt::Display for TargetProperty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetProperty::Meta => f.write_str("meta"),
            TargetProperty::Payload => f.write_str("payload"),
        }
    }
}

/// Body of `stream`: opens one typed value within a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamFrame {
    pub message_id: MessageId,
    pub stream_id: StreamId,
    #[serde(rename = "type")]
    pub payload_type: PayloadType,
    pub target_property: TargetProperty,
}

/// Body of `stream-end`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamEndFrame {
    pub message_id: MessageId,
    pub stream_id: StreamId,
}

/// Body of `chunk`. `payload` is the sealed chunk string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkFrame {
    pub stream_id: StreamId,
    pub chunk_id: ChunkId,
    pub payload: String,
}

/// Body of every ack kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AckFrame {
    pub to_id: String,
}

/// A decoded application frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Request(MessageFrame),
    RequestEnd(MessageFrame),
    Response(ResponseFrame),
    ResponseEnd(MessageFrame),
    Stream(StreamFrame),
    StreamEnd(StreamEndFrame),
    Chunk(ChunkFrame),
    /// `kind` is always an ack kind.
    Ack { kind: FrameKind, to_id: String },
}

impl Frame {
    pub fn kind(&self) -> FrameKind {
        match self {
            Frame::Request(_) => FrameKind::Request,
            Frame::RequestEnd(_) => FrameKind::RequestEnd,
            Frame::Response(_) => FrameKind::Response,
            Frame::ResponseEnd(_) => FrameKind::ResponseEnd,
            Frame::Stream(_) => FrameKind::Stream,
            Frame::StreamEnd(_) => FrameKind::StreamEnd,
            Frame::Chunk(_) => FrameKind::Chunk,
            Frame::Ack { kind, .. } => *kind,
        }
    }

    /// Build an ack of `kind` for the frame identified by `to_id`.
    pub fn ack(kind: FrameKind, to_id: impl Into<String>) -> Self {
        debug_assert!(kind.is_ack());
        Frame::Ack {
            kind,
            to_id: to_id.into(),
        }
    }

    /// Decode a body received under `kind`.
    pub fn decode(kind: FrameKind, body: &[u8]) -> Result<Self> {
        let frame = match kind {
            FrameKind::Request => Frame::Request(serde_json::from_slice(body)?),
            FrameKind::RequestEnd => Frame::RequestEnd(serde_json::from_slice(body)?),
            FrameKind::Response => Frame::Response(serde_json::from_slice(body)?),
            FrameKind::ResponseEnd => Frame::ResponseEnd(serde_json::from_slice(body)?),
            FrameKind::Stream => Frame::Stream(serde_json::from_slice(body)?),
            FrameKind::StreamEnd => Frame::StreamEnd(serde_json::from_slice(body)?),
            FrameKind::Chunk => Frame::Chunk(serde_json::from_slice(body)?),
            ack => {
                let AckFrame { to_id } = serde_json::from_slice(body)?;
                Frame::Ack { kind: ack, to_id }
            }
        };
        Ok(frame)
    }

    /// Encode the JSON body.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let body = match self {
            Frame::Request(f) | Frame::RequestEnd(f) | Frame::ResponseEnd(f) => {
                serde_json::to_vec(f)?
            }
            Frame::Response(f) => serde_json::to_vec(f)?,
            Frame::Stream(f) => serde_json::to_vec(f)?,
            Frame::StreamEnd(f) => serde_json::to_vec(f)?,
            Frame::Chunk(f) => serde_json::to_vec(f)?,
            Frame::Ack { to_id, .. } => serde_json::to_vec(&AckFrame {
                to_id: to_id.clone(),
            })?,
        };
        Ok(body)
    }
}

#[derive(Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct ConnectBody {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    connreq: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    connack: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    channel_nonce: Option<String>,
}

/// Handshake body published on `connect/<to>/<from>`.
///
/// On decode, a body carrying `connreq` is a request, otherwise one
/// carrying `connack` is an ack. A missing or empty channel nonce decodes
/// as `None`; the handshake ignores such messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectMessage {
    Request {
        conn_req: Nonce,
        channel_nonce: Option<Nonce>,
    },
    Ack {
        conn_ack: Nonce,
        channel_nonce: Option<Nonce>,
    },
}

fn non_empty(value: Option<String>) -> Option<Nonce> {
    value.filter(|v| !v.is_empty()).map(Nonce::new)
}

impl ConnectMessage {
    pub fn decode(body: &[u8]) -> Result<Self> {
        let body: ConnectBody = serde_json::from_slice(body)?;
        let channel_nonce = non_empty(body.channel_nonce);

        if let Some(conn_req) = non_empty(body.connreq) {
            Ok(ConnectMessage::Request {
                conn_req,
                channel_nonce,
            })
        } else if let Some(conn_ack) = non_empty(body.connack) {
            Ok(ConnectMessage::Ack {
                conn_ack,
                channel_nonce,
            })
        } else {
            Err(CoreError::MalformedFrame(
                "connect message without connreq or connack".into(),
            ))
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let body = match self {
            ConnectMessage::Request {
                conn_req,
                channel_nonce,
            } => ConnectBody {
                connreq: Some(conn_req.to_string()),
                channel_nonce: channel_nonce.as_ref().map(|n| n.to_string()),
                ..Default::default()
            },
            ConnectMessage::Ack {
                conn_ack,
                channel_nonce,
            } => ConnectBody {
                connack: Some(conn_ack.to_string()),
                channel_nonce: channel_nonce.as_ref().map(|n| n.to_string()),
                ..Default::default()
            },
        };
        Ok(serde_json::to_vec(&body)?)
    }
}
