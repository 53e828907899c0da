//! Golden test vectors for deterministic verification.
//!
//! Channel ids and message secrets are derived with `hash`, so every
//! implementation of the protocol must produce these exact strings to talk
//! to each other.

use reqres_core::hash;

/// A golden hash vector.
#[derive(Debug, Clone)]
pub struct GoldenVector {
    /// Human-readable name for the vector.
    pub name: &'static str,
    /// Ordered hash inputs.
    pub inputs: &'static [&'static str],
    /// Expected digest string.
    pub expected: &'static str,
}

/// Get all golden test vectors.
pub fn all_vectors() -> Vec<GoldenVector> {
    vec![
        GoldenVector {
            name: "empty input",
            inputs: &[""],
            expected: "z4PhNX7vuL3xVChQ1m2AB9Yg5AULVxXcgSpIdNs6c5H0NE8XYXysPDGNKHfuwvY7kxvUdBeoGlODJ6Sfa",
        },
        GoldenVector {
            name: "single value",
            inputs: &["abc"],
            expected: "3a81oZNherrMQXNJriBBMRLmk6JqX6iCp7u5ktV05ohkpkqJ0BqDa6PCOjuu9RU1EI2Q86A4qmslPpUyk",
        },
        GoldenVector {
            name: "split value hashes like its concatenation",
            inputs: &["ab", "c"],
            expected: "3a81oZNherrMQXNJriBBMRLmk6JqX6iCp7u5ktV05ohkpkqJ0BqDa6PCOjuu9RU1EI2Q86A4qmslPpUyk",
        },
        GoldenVector {
            name: "message secret",
            inputs: &["secret-a-b", "connreq0000000000000000001"],
            expected: "FobtJBKdYuGJjnrEpJiT40ZkqkGwAubUWG5EPP8UNcUDBZL9dsb3sxe287Q2peUBeNCT5aQxJeT3xvuzg",
        },
        GoldenVector {
            name: "channel id, requester nonce first",
            inputs: &["conn", "nonceA", "nonceB", "secret"],
            expected: "FFB0yEgbB1E4rAPTpdLsFREhWblcozoqowO8nVDuMxKI3SYK7ec0VSqyUxHj6jZcmFKrcmZAsyQLi77Z7",
        },
        GoldenVector {
            name: "channel id, responder nonce first",
            inputs: &["conn", "nonceB", "nonceA", "secret"],
            expected: "vXe6xMN3WkIv1eHLMObrLmbbZrMG2ZUyWsM1uv9IUClvZdVqzpszpl1kepjm8gFkb7a68vSz6D7QIX5g",
        },
    ]
}

/// Hash the inputs of one vector.
pub fn compute(vector: &GoldenVector) -> String {
    hash(vector.inputs.iter().copied())
}

/// Verify all golden vectors.
///
/// Returns `(name, matches, computed)` per vector.
pub fn verify_all_vectors() -> Vec<(String, bool, String)> {
    all_vectors()
        .iter()
        .map(|v| {
            let computed = compute(v);
            (v.name.to_string(), computed == v.expected, computed)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqres_core::{message_secret, ClientId, Nonce};
    use reqres_protocol::Connection;

    #[test]
    fn test_all_vectors_match() {
        for (name, matches, computed) in verify_all_vectors() {
            assert!(matches, "vector '{}' computed {}", name, computed);
        }
    }

    #[test]
    fn test_message_secret_vector() {
        let secret = message_secret("secret-a-b", &Nonce::new("connreq0000000000000000001"));
        assert_eq!(secret, all_vectors()[3].expected);
    }

    #[test]
    fn test_established_channels_use_vectors() {
        let vectors = all_vectors();
        let forward = vectors[4].expected;
        let backward = vectors[5].expected;

        let mut on_a = Connection::new(ClientId::new("b"));
        on_a.shared_secret = Some("secret".into());
        on_a.establish(&ClientId::new("a"), Nonce::new("conn"), Nonce::new("nonceA"), &Nonce::new("nonceB"));

        let mut on_b = Connection::new(ClientId::new("a"));
        on_b.shared_secret = Some("secret".into());
        on_b.establish(&ClientId::new("b"), Nonce::new("conn"), Nonce::new("nonceB"), &Nonce::new("nonceA"));

        assert_eq!(on_a.channel_send_id.as_ref().map(|c| c.as_str()), Some(forward));
        assert_eq!(on_a.channel_receive_id.as_ref().map(|c| c.as_str()), Some(backward));
        assert_eq!(on_b.channel_send_id, on_a.channel_receive_id);
        assert_eq!(on_b.channel_receive_id, on_a.channel_send_id);
        assert_eq!(
            on_a.topic_send.as_deref(),
            Some(format!("message/a/{}/", forward).as_str())
        );
        assert_eq!(
            on_b.topic_receive.as_deref(),
            Some(format!("message/a/{}/#", forward).as_str())
        );
    }
}
