//! Proptest generators for property-based testing.

use bytes::Bytes;
use proptest::prelude::*;
use serde_json::{Map, Value};

use reqres_core::{ClientId, Nonce, Payload};

/// Generate a client id usable as a topic segment.
pub fn client_id() -> impl Strategy<Value = ClientId> {
    "[0-9a-zA-Z]{1,23}".prop_map(ClientId::new)
}

/// Generate a handshake nonce.
pub fn nonce() -> impl Strategy<Value = Nonce> {
    "[0-9a-zA-Z]{25}".prop_map(Nonce::new)
}

/// Generate text of up to `max_chars` characters, multi-byte ones included.
pub fn text(max_chars: usize) -> impl Strategy<Value = String> {
    prop::collection::vec(any::<char>(), 0..=max_chars).prop_map(|chars| chars.into_iter().collect())
}

/// Generate raw bytes of up to `max_len` bytes.
pub fn raw_bytes(max_len: usize) -> impl Strategy<Value = Bytes> {
    prop::collection::vec(any::<u8>(), 0..=max_len).prop_map(Bytes::from)
}

/// Generate a JSON value without nulls or floats.
pub fn json_value() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::from),
        "[a-z0-9 ]{0,12}".prop_map(Value::String),
    ];
    leaf.prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            prop::collection::btree_map("[a-z]{1,6}", inner, 0..4)
                .prop_map(|entries| Value::Object(entries.into_iter().collect::<Map<_, _>>())),
        ]
    })
}

/// Generate a JSON object, the usual shape of a structured payload.
pub fn json_object() -> impl Strategy<Value = Value> {
    prop::collection::btree_map("[a-z]{1,6}", json_value(), 0..6)
        .prop_map(|entries| Value::Object(entries.into_iter().collect()))
}

/// Generate any payload: text, structured, binary or absent.
pub fn payload(max_len: usize) -> impl Strategy<Value = Payload> {
    prop_oneof![
        text(max_len).prop_map(Payload::Text),
        json_object().prop_map(Payload::Structured),
        raw_bytes(max_len).prop_map(Payload::Binary),
        Just(Payload::Absent),
    ]
}
