//! Chunk splitting and reassembly.
//!
//! A serialized payload is cut into pieces of at most [`MAX_CHUNK_SIZE`]
//! bytes. Text pieces are literal substrings cut on character boundaries;
//! binary pieces are the decimal byte values joined by commas. At least one
//! chunk is always produced, so an empty value still travels as one empty
//! chunk.

use bytes::Bytes;

use crate::error::{CoreError, Result};
use crate::payload::{EncodedPayload, Payload, PayloadType};

/// Maximum plaintext size of one chunk (64 KiB).
pub const MAX_CHUNK_SIZE: usize = 64 * 1024;

/// Split an encoded payload into chunk strings.
///
/// A `max_size` of zero falls back to [`MAX_CHUNK_SIZE`].
pub fn split_chunks(encoded: &EncodedPayload, max_size: usize) -> Vec<String> {
    let max_size = if max_size == 0 { MAX_CHUNK_SIZE } else { max_size };

    let chunks: Vec<String> = match encoded {
        EncodedPayload::Text(text) => split_text(text, max_size),
        EncodedPayload::Binary(bytes) => bytes
            .chunks(max_size)
            .map(|piece| {
                piece
                    .iter()
                    .map(|b| b.to_string())
                    .collect::<Vec<_>>()
                    .join(",")
            })
            .collect(),
    };

    if chunks.is_empty() {
        vec![String::new()]
    } else {
        chunks
    }
}

fn split_text(text: &str, max_size: usize) -> Vec<String> {
    let mut chunks = Vec::with_capacity(text.len() / max_size + 1);
    let mut start = 0;

    while start < text.len() {
        let mut end = (start + max_size).min(text.len());
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        if end == start {
            // max_size is narrower than this character
            end = start + 1;
            while !text.is_char_boundary(end) {
                end += 1;
            }
        }
        chunks.push(text[start..end].to_owned());
        start = end;
    }

    chunks
}

/// Receiver-side accumulator for one stream.
#[derive(Debug)]
pub struct Reassembly {
    payload_type: PayloadType,
    text: String,
    bytes: Vec<u8>,
    chunks: usize,
}

impl Reassembly {
    pub fn new(payload_type: PayloadType) -> Self {
        Self {
            payload_type,
            text: String::new(),
            bytes: Vec::new(),
            chunks: 0,
        }
    }

    pub fn payload_type(&self) -> PayloadType {
        self.payload_type
    }

    /// Number of chunks pushed so far, including rejected ones.
    pub fn chunk_count(&self) -> usize {
        self.chunks
    }

    /// Append one decrypted chunk.
    pub fn push(&mut self, chunk: &str) -> Result<()> {
        self.chunks += 1;

        if self.payload_type != PayloadType::Binary {
            self.text.push_str(chunk);
            return Ok(());
        }

        if chunk.is_empty() {
            return Ok(());
        }
        for value in chunk.split(',') {
            let byte = value.trim().parse::<u8>().map_err(|_| {
                CoreError::MalformedPayload(format!("invalid byte value {:?}", value))
            })?;
            self.bytes.push(byte);
        }
        Ok(())
    }

    /// Rebuild the typed value from everything pushed.
    pub fn finish(self) -> Result<Payload> {
        match self.payload_type {
            PayloadType::Text => Ok(Payload::Text(self.text)),
            PayloadType::Structured => serde_json::from_str(&self.text)
                .map(Payload::Structured)
                .map_err(|e| CoreError::MalformedPayload(e.to_string())),
            PayloadType::Binary => Ok(Payload::Binary(Bytes::from(self.bytes))),
            PayloadType::Absent => Ok(Payload::Absent),
        }
    }
}
