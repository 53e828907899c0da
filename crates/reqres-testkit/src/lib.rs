//! # reqres Testkit
//!
//! Testing utilities for reqres.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Golden vectors**: Known hash inputs and digests that every
//!   implementation must reproduce
//! - **Generators**: Proptest strategies for payloads and identifiers
//! - **Fixtures**: Client pairs on an in-memory broker, ready to exchange
//!
//! The end-to-end protocol tests live in this crate's `tests/` directory.
//!
//! ## Golden Vectors
//!
//! ```rust
//! use reqres_testkit::vectors::verify_all_vectors;
//!
//! for (name, matches, computed) in verify_all_vectors() {
//!     assert!(matches, "{}: {}", name, computed);
//! }
//! ```
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use reqres_testkit::generators::payload;
//!
//! proptest! {
//!     #[test]
//!     fn payloads_always_encode(value in payload(64)) {
//!         prop_assert!(value.encode().is_ok());
//!     }
//! }
//! ```
//!
//! ## Test Fixtures
//!
//! ```rust,no_run
//! use reqres_testkit::fixtures::TestPair;
//!
//! async fn example() {
//!     let pair = TestPair::connected().await;
//!     let response = pair.alice.request(pair.bob.client_id(), "ping", None).await.unwrap();
//!     assert_eq!(response.payload.as_text(), Some("ping"));
//! }
//! ```

pub mod fixtures;
pub mod generators;
pub mod vectors;

pub use fixtures::{client, fast_config, init_tracing, multi_party_clients, serve_echo, TestPair, TEST_SECRET};
pub use generators::payload;
pub use vectors::{all_vectors, verify_all_vectors, GoldenVector};
