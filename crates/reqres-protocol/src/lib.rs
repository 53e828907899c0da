//! # reqres Protocol
//!
//! The request/response engine: broker session, channel handshake,
//! acknowledged chunk streams and request/response exchanges between two
//! peers over a publish/subscribe transport.
//!
//! ## Overview
//!
//! An [`Endpoint`] is one participant. It talks to the broker through a
//! [`Transport`] and keeps one [`Connection`] record per peer. Before any
//! application frame is exchanged, both sides run a handshake that derives
//! two channel ids, one per direction, from nonces and a shared secret.
//! Application frames then travel on `message/<sender>/<channel>/<kind>`.
//!
//! ## Message Flow
//!
//! ```text
//! Requester                                   Responder
//!   |-------- connect {connreq} --------------->|
//!   |<------- connect {connack} ----------------|
//!   |-------- request ------------------------->|
//!   |<------- request-ack ----------------------|
//!   |======== stream(s), chunk by chunk ======>|
//!   |-------- request-end --------------------->|
//!   |<------- request-end-ack ------------------|
//!   |<------- response -------------------------|
//!   |-------- response-ack -------------------->|
//!   |<======= stream(s), chunk by chunk =======|
//!   |<------- response-end ---------------------|
//!   |-------- response-end-ack ---------------->|
//! ```
//!
//! Every frame except the acks waits for its ack before the next one is
//! sent, so exactly one chunk of a stream is in flight at a time.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use reqres_core::ClientId;
//! use reqres_protocol::{BrokerOptions, Endpoint, MemoryBroker, ProtocolConfig, Request, Responder};
//!
//! async fn example() -> reqres_protocol::Result<()> {
//!     let broker = MemoryBroker::new();
//!     let options = BrokerOptions::default();
//!
//!     let alice = Endpoint::new(ClientId::new("alice"), broker.transport(), options.clone(), ProtocolConfig::default());
//!     let bob = Endpoint::new(ClientId::new("bob"), broker.transport(), options, ProtocolConfig::default());
//!
//!     for endpoint in [&alice, &bob] {
//!         endpoint.shared_secret(|_peer: ClientId| async { Some("secret".to_string()) });
//!     }
//!     bob.on_request(|request: Request, responder: Responder| async move {
//!         responder.send(request.payload, None).await
//!     });
//!     bob.connect_broker().await?;
//!
//!     let response = alice.request(bob.client_id(), "hello", None).await?;
//!     assert_eq!(response.payload.as_text(), Some("hello"));
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod connection;
mod dispatch;
pub mod endpoint;
pub mod error;
pub mod exchange;
pub mod handler;
mod handshake;
mod stream;
pub mod transport;
mod waiters;

pub use config::{BrokerOptions, BrokerProtocol, ProtocolConfig, QoS};
pub use connection::{Connection, ConnectionRegistry};
pub use endpoint::{Endpoint, Event};
pub use error::{ProtocolError, Result};
pub use exchange::{Request, Responder, Response};
pub use handler::{RequestHandler, SecretResolver};
pub use transport::{
    memory::{Interceptor, MemoryBroker, MemoryTransport},
    InboundMessage, Transport,
};
