//! Typed payload values.
//!
//! A payload is classified exactly once, at the send boundary, into one of
//! four tags. The tag travels on the wire in the stream-open frame's `type`
//! field and the receiver rebuilds the value from that tag alone.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::error::{CoreError, Result};

/// Wire tag of a streamed value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PayloadType {
    #[serde(rename = "string")]
    Text,
    #[serde(rename = "JSON")]
    Structured,
    #[serde(rename = "ArrayBuffer")]
    Binary,
    #[serde(rename = "null")]
    Absent,
}

impl PayloadType {
    /// The literal used in the `type` field.
    pub fn as_str(&self) -> &'static str {
        match self {
            PayloadType::Text => "string",
            PayloadType::Structured => "JSON",
            PayloadType::Binary => "ArrayBuffer",
            PayloadType::Absent => "null",
        }
    }
}

impl fmt::Display for PayloadType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A transferable value.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Payload {
    Text(String),
    Structured(Value),
    Binary(Bytes),
    #[default]
    Absent,
}

/// Serialized form of a payload, ready to be cut into chunks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodedPayload {
    Text(String),
    Binary(Bytes),
}

impl EncodedPayload {
    /// Length in bytes.
    pub fn len(&self) -> usize {
        match self {
            EncodedPayload::Text(s) => s.len(),
            EncodedPayload::Binary(b) => b.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Payload {
    /// Serialize any value into a structured payload.
    pub fn structured<T: Serialize>(value: &T) -> Result<Self> {
        serde_json::to_value(value)
            .map(Payload::Structured)
            .map_err(|e| CoreError::MalformedPayload(e.to_string()))
    }

    pub fn payload_type(&self) -> PayloadType {
        match self {
            Payload::Text(_) => PayloadType::Text,
            Payload::Structured(_) => PayloadType::Structured,
            Payload::Binary(_) => PayloadType::Binary,
            Payload::Absent => PayloadType::Absent,
        }
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, Payload::Absent)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Payload::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Payload::Structured(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Payload::Binary(b) => Some(b),
            _ => None,
        }
    }

    /// Deserialize a structured payload into `T`.
    pub fn parse<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        match self {
            Payload::Structured(v) => T::deserialize(v)
                .map_err(|e| CoreError::MalformedPayload(e.to_string())),
            other => Err(CoreError::MalformedPayload(format!(
                "expected structured payload, got {}",
                other.payload_type()
            ))),
        }
    }

    /// Classify and serialize for transfer.
    ///
    /// Absent values are sent as the literal text `null`.
    pub fn encode(&self) -> Result<(PayloadType, EncodedPayload)> {
        let encoded = match self {
            Payload::Text(s) => EncodedPayload::Text(s.clone()),
            Payload::Structured(v) => EncodedPayload::Text(
                serde_json::to_string(v).map_err(|e| CoreError::MalformedPayload(e.to_string()))?,
            ),
            Payload::Binary(b) => EncodedPayload::Binary(b.clone()),
            Payload::Absent => EncodedPayload::Text("null".to_owned()),
        };
        Ok((self.payload_type(), encoded))
    }
}

impl From<String> for Payload {
    fn from(value: String) -> Self {
        Payload::Text(value)
    }
}

impl From<&str> for Payload {
    fn from(value: &str) -> Self {
        Payload::Text(value.to_owned())
    }
}

/// `Value::Null` maps to [`Payload::Absent`].
impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Payload::Absent,
            v => Payload::Structured(v),
        }
    }
}

impl From<Bytes> for Payload {
    fn from(value: Bytes) -> Self {
        Payload::Binary(value)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(value: Vec<u8>) -> Self {
        Payload::Binary(Bytes::from(value))
    }
}

impl From<&[u8]> for Payload {
    fn from(value: &[u8]) -> Self {
        Payload::Binary(Bytes::copy_from_slice(value))
    }
}

impl<T: Into<Payload>> From<Option<T>> for Payload {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Payload::Absent)
    }
}
