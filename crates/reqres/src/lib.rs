//! # reqres
//!
//! Peer-to-peer request/response over a publish/subscribe broker.
//!
//! ## Overview
//!
//! Two clients, each identified by a stable client id, establish a private
//! channel over public broker topics and then exchange requests and
//! responses of any size:
//!
//! - **Handshake**: a nonce exchange that derives one channel id per
//!   direction from a shared secret
//! - **Streams**: payloads are split into 64 KiB chunks, encrypted and
//!   acknowledged one at a time
//! - **Payloads**: text, structured JSON, raw bytes or nothing, plus an
//!   optional `meta` value per message
//!
//! ## Usage
//!
//! ```rust,no_run
//! use reqres::{Client, ClientConfig, ClientId, MemoryBroker, Request, Responder};
//!
//! async fn example() -> reqres::Result<()> {
//!     let broker = MemoryBroker::new();
//!
//!     let alice = Client::new(ClientConfig::new().with_client_id("alice"), broker.transport())?;
//!     let bob = Client::new(ClientConfig::new().with_client_id("bob"), broker.transport())?;
//!
//!     // Both sides must know the same secret
//!     for client in [&alice, &bob] {
//!         client.shared_secret(|_peer: ClientId| async { Some("secret".to_string()) });
//!     }
//!
//!     bob.on_request(|request: Request, responder: Responder| async move {
//!         responder.send(request.payload, None).await
//!     });
//!     bob.connect(None, None).await?;
//!
//!     let response = alice.request(bob.client_id(), "hello", None).await?;
//!     assert_eq!(response.payload.as_text(), Some("hello"));
//!     Ok(())
//! }
//! ```
//!
//! ## Re-exports
//!
//! This crate re-exports the component crates for convenience:
//!
//! - `reqres::core` - Identifiers, payloads, frames and channel crypto
//! - `reqres::protocol` - The protocol endpoint and transports

pub mod client;
pub mod error;

// Re-export component crates
pub use reqres_core as core;
pub use reqres_protocol as protocol;

// Re-export main types for convenience
pub use client::{Client, ClientConfig};
pub use error::{ClientError, Result};

// Re-export commonly used types
pub use reqres_core::{ClientId, MessageId, Payload, PayloadType};
pub use reqres_protocol::{
    BrokerOptions, BrokerProtocol, Connection, Event, MemoryBroker, MemoryTransport,
    ProtocolConfig, ProtocolError, QoS, Request, RequestHandler, Responder, Response,
    SecretResolver, Transport,
};
