//! Channel cryptography.
//!
//! - [`hash`]: SHA-512 over the ordered inputs, rendered as a topic-safe id.
//! - [`encrypt`] / [`open`]: ChaCha20-Poly1305 under a key derived from a
//!   secret string, serialized as a small JSON envelope `{"ct", "iv"}`.
//! - [`message_secret`]: the per-handshake key, `hash(sharedSecret, connReq)`.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce as AeadNonce,
};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512};

use crate::error::{CoreError, Result};
use crate::types::Nonce;

/// Channel ids are truncated to this many characters.
pub const MAX_HASH_LENGTH: usize = 81;

const KEY_CONTEXT: &str = "reqres v1 chunk encryption";

/// Deterministic one-way digest of the ordered `parts`.
///
/// The parts are fed in order into SHA-512, the digest is base64-rendered,
/// stripped of every non-alphanumeric character and truncated to
/// [`MAX_HASH_LENGTH`].
pub fn hash<I, S>(parts: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut hasher = Sha512::new();
    for part in parts {
        hasher.update(part.as_ref().as_bytes());
    }

    STANDARD
        .encode(hasher.finalize())
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .take(MAX_HASH_LENGTH)
        .collect()
}

/// Per-handshake symmetric secret: `hash(sharedSecret, connReq)`.
///
/// Rotates on every successful re-handshake since `connReq` changes.
pub fn message_secret(shared_secret: &str, conn_req: &Nonce) -> String {
    hash([shared_secret, conn_req.as_str()])
}

#[derive(Serialize, Deserialize)]
struct Sealed {
    ct: String,
    iv: String,
}

fn cipher(secret: &str) -> Result<ChaCha20Poly1305> {
    let key = blake3::derive_key(KEY_CONTEXT, secret.as_bytes());
    ChaCha20Poly1305::new_from_slice(&key).map_err(|e| CoreError::EncryptionError(e.to_string()))
}

/// Encrypt `plaintext` under `secret` into a transportable string.
pub fn encrypt(plaintext: &str, secret: &str) -> Result<String> {
    let mut iv = [0u8; 12];
    rand::thread_rng().fill_bytes(&mut iv);

    let ciphertext = cipher(secret)?
        .encrypt(AeadNonce::from_slice(&iv), plaintext.as_bytes())
        .map_err(|e| CoreError::EncryptionError(e.to_string()))?;

    let sealed = Sealed {
        ct: STANDARD.encode(ciphertext),
        iv: hex::encode(iv),
    };
    serde_json::to_string(&sealed).map_err(|e| CoreError::EncryptionError(e.to_string()))
}

/// Decrypt a string produced by [`encrypt`].
///
/// An empty input opens to the empty string. Chunk reception uses this
/// strict form so a bad chunk is recorded as a stream error; [`decrypt`] is
/// the lenient form for callers that want the empty string instead.
pub fn open(sealed: &str, secret: &str) -> Result<String> {
    if sealed.is_empty() {
        return Ok(String::new());
    }

    let sealed: Sealed =
        serde_json::from_str(sealed).map_err(|e| CoreError::DecryptionError(e.to_string()))?;

    let iv = hex::decode(&sealed.iv).map_err(|e| CoreError::DecryptionError(e.to_string()))?;
    if iv.len() != 12 {
        return Err(CoreError::DecryptionError(format!(
            "nonce must be 12 bytes, got {}",
            iv.len()
        )));
    }
    let ciphertext = STANDARD
        .decode(&sealed.ct)
        .map_err(|e| CoreError::DecryptionError(e.to_string()))?;

    let plaintext = cipher(secret)?
        .decrypt(AeadNonce::from_slice(&iv), ciphertext.as_slice())
        .map_err(|_| CoreError::DecryptionError("authentication failed".into()))?;

    String::from_utf8(plaintext).map_err(|e| CoreError::DecryptionError(e.to_string()))
}

/// Lenient decrypt: empty or invalid input yields the empty string, which
/// cannot be told apart from an empty plaintext. Prefer [`open`].
pub fn decrypt(sealed: &str, secret: &str) -> String {
    open(sealed, secret).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_hash_known_value() {
        assert_eq!(
            hash(["abc"]),
            "3a81oZNherrMQXNJriBBMRLmk6JqX6iCp7u5ktV05ohkpkqJ0BqDa6PCOjuu9RU1EI2Q86A4qmslPpUyk"
        );
    }

    #[test]
    fn test_hash_is_concatenation() {
        assert_eq!(hash(["ab", "c"]), hash(["abc"]));
    }

    #[test]
    fn test_hash_order_matters() {
        assert_ne!(
            hash(["conn", "nonceA", "nonceB", "secret"]),
            hash(["conn", "nonceB", "nonceA", "secret"])
        );
    }

    #[test]
    fn test_encrypt_decrypt() {
        let sealed = encrypt("hello, world!", "secret-a-b").unwrap();
        assert!(!sealed.contains("hello"));
        assert_eq!(open(&sealed, "secret-a-b").unwrap(), "hello, world!");
    }

    #[test]
    fn test_encrypt_empty() {
        let sealed = encrypt("", "secret").unwrap();
        assert!(!sealed.is_empty());
        assert_eq!(open(&sealed, "secret").unwrap(), "");
    }

    #[test]
    fn test_wrong_secret_fails() {
        let sealed = encrypt("secret data", "one").unwrap();
        assert!(open(&sealed, "two").is_err());
        assert_eq!(decrypt(&sealed, "two"), "");
    }

    #[test]
    fn test_empty_and_garbage_input() {
        assert_eq!(open("", "secret").unwrap(), "");
        assert!(open("not json", "secret").is_err());
        assert_eq!(decrypt("not json", "secret"), "");
    }

    #[test]
    fn test_message_secret_rotates_with_conn_req() {
        let a = message_secret("shared", &Nonce::new("req-1"));
        let b = message_secret("shared", &Nonce::new("req-2"));
        assert_ne!(a, b);
        assert_eq!(a, hash(["shared", "req-1"]));
    }

    proptest! {
        #[test]
        fn hash_is_topic_safe(parts in prop::collection::vec(".*", 0..5)) {
            let h = hash(&parts);
            prop_assert!(h.len() <= MAX_HASH_LENGTH);
            prop_assert!(!h.is_empty());
            prop_assert!(h.chars().all(|c| c.is_ascii_alphanumeric()));
        }

        #[test]
        fn seal_open_roundtrip(text in ".*", secret in "[a-z]{1,16}") {
            let sealed = encrypt(&text, &secret).unwrap();
            prop_assert_eq!(open(&sealed, &secret).unwrap(), text);
        }
    }
}
