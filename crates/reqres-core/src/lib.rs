//! # reqres Core
//!
//! Pure primitives for the reqres protocol: identifiers, channel crypto,
//! payload typing and chunk framing, wire frames and topic naming.
//!
//! This crate contains no I/O and no networking. Everything here is
//! deterministic computation over strings and bytes, which keeps the
//! protocol engine in `reqres-protocol` free of encoding details.
//!
//! ## Key Types
//!
//! - [`ClientId`], [`MessageId`], [`StreamId`], [`ChunkId`], [`Nonce`], [`ChannelId`]
//! - [`Payload`] / [`PayloadType`] - the closed set of transferable values
//! - [`Frame`] / [`FrameKind`] - the fourteen application frames
//! - [`ConnectMessage`] - handshake request and ack bodies
//!
//! ## Crypto
//!
//! Channel ids are derived with [`hash`] (SHA-512, base64, alphanumeric
//! only, at most 81 characters). Chunk payloads are sealed with
//! ChaCha20-Poly1305 under a key derived from the per-handshake message
//! secret, see [`crypto`].

pub mod chunk;
pub mod crypto;
pub mod error;
pub mod frame;
pub mod payload;
pub mod topic;
pub mod types;

pub use chunk::{split_chunks, Reassembly, MAX_CHUNK_SIZE};
pub use crypto::{decrypt, encrypt, hash, message_secret, open, MAX_HASH_LENGTH};
pub use error::{CoreError, Result};
pub use frame::{
    AckFrame, ChunkFrame, ConnectMessage, Frame, FrameKind, MessageFrame, ResponseFrame,
    StreamEndFrame, StreamFrame, TargetProperty,
};
pub use payload::{EncodedPayload, Payload, PayloadType};
pub use topic::ParsedTopic;
pub use types::{lengths, random_string, ChannelId, ChunkId, ClientId, MessageId, Nonce, StreamId};
