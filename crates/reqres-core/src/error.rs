//! Error types for reqres core.

use thiserror::Error;

/// Errors raised by the pure encoding, crypto and framing layer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    #[error("encryption error: {0}")]
    EncryptionError(String),

    #[error("decryption error: {0}")]
    DecryptionError(String),

    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    #[error("unknown frame kind: {0}")]
    UnknownFrameKind(String),

    #[error("malformed payload: {0}")]
    MalformedPayload(String),
}

impl From<serde_json::Error> for CoreError {
    fn from(e: serde_json::Error) -> Self {
        CoreError::MalformedFrame(e.to_string())
    }
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
