//! Strong type definitions for reqres.
//!
//! Every identifier on the wire is a fixed-width random string over
//! `[0-9a-zA-Z]`. The newtypes keep client ids, nonces and message ids from
//! being mixed up at compile time while serializing as plain strings.

use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

/// Default identifier lengths.
///
/// Ids are never collision-checked; the widths keep the collision
/// probability negligible (62^10 and up).
pub mod lengths {
    /// Broker client ids are limited to 23 characters.
    pub const CLIENT_ID: usize = 23;
    /// Handshake request nonce (`connreq`).
    pub const CONN_REQ: usize = 25;
    /// Nonce contributed to channel id derivation.
    pub const CHANNEL_NONCE: usize = 25;
    pub const MESSAGE_ID: usize = 20;
    pub const STREAM_ID: usize = 10;
    pub const CHUNK_ID: usize = 10;
}

/// Generate a random string of `length` characters sampled uniformly from `[0-9a-zA-Z]`.
pub fn random_string(length: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wrap an existing identifier.
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Get the identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Unwrap into the inner string.
            pub fn into_inner(self) -> String {
                self.0
            }

            /// Whether the identifier is the empty string.
            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_owned())
            }
        }
    };
    ($(#[$meta:meta])* $name:ident, $len:expr) => {
        string_id!($(#[$meta])* $name);

        impl $name {
            /// Generate a fresh random identifier of the default width.
            pub fn generate() -> Self {
                Self(random_string($len))
            }
        }
    };
}

string_id!(
    /// Stable identifier of an endpoint (the broker client id).
    ClientId,
    lengths::CLIENT_ID
);

string_id!(
    /// Handshake nonce: both `connreq`/`connack` and the channel nonce.
    Nonce,
    lengths::CHANNEL_NONCE
);

string_id!(
    /// Identifier of one request or response message.
    MessageId,
    lengths::MESSAGE_ID
);

string_id!(
    /// Identifier of one streamed value within a message.
    StreamId,
    lengths::STREAM_ID
);

string_id!(
    /// Identifier of one chunk within a stream.
    ChunkId,
    lengths::CHUNK_ID
);

string_id!(
    /// Channel id derived from the handshake; one per direction per peer pair.
    ChannelId
);

impl Nonce {
    /// Generate a fresh handshake request nonce.
    pub fn conn_req() -> Self {
        Self(random_string(lengths::CONN_REQ))
    }
}
