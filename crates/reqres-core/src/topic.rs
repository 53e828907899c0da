//! Topic naming.
//!
//! ```text
//! connect/<to>/<from>                    handshake request or ack
//! message/<from>/<channel>/<frame kind>  application frame
//! ```
//!
//! `<channel>` is the sender's send channel id, which is the receiver's
//! receive channel id.

use crate::frame::FrameKind;
use crate::types::{ChannelId, ClientId};

pub const CONNECT: &str = "connect";
pub const MESSAGE: &str = "message";

/// Handshake topic addressed to `to`.
pub fn connect_topic(to: &ClientId, from: &ClientId) -> String {
    format!("{}/{}/{}", CONNECT, to, from)
}

/// Subscription for every handshake addressed to `me`.
pub fn connect_filter(me: &ClientId) -> String {
    format!("{}/{}/+", CONNECT, me)
}

/// Prefix for frames `me` sends on `send_channel`.
pub fn send_topic_prefix(me: &ClientId, send_channel: &ChannelId) -> String {
    format!("{}/{}/{}/", MESSAGE, me, send_channel)
}

/// Subscription for frames `peer` sends to us on `receive_channel`.
pub fn receive_filter(peer: &ClientId, receive_channel: &ChannelId) -> String {
    format!("{}/{}/{}/#", MESSAGE, peer, receive_channel)
}

/// Full topic of one frame given a send prefix.
pub fn frame_topic(send_prefix: &str, kind: FrameKind) -> String {
    format!("{}{}", send_prefix, kind)
}

/// A topic split by shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedTopic {
    Connect {
        to: ClientId,
        from: ClientId,
    },
    /// The frame kind is kept raw; an unknown kind is rejected at dispatch.
    Message {
        from: ClientId,
        channel: ChannelId,
        kind: String,
    },
}

impl ParsedTopic {
    /// Split `topic` into its segments. Returns `None` for foreign shapes.
    pub fn parse(topic: &str) -> Option<Self> {
        let segments: Vec<&str> = topic.split('/').collect();
        match segments.as_slice() {
            [CONNECT, to, from] if !to.is_empty() && !from.is_empty() => {
                Some(ParsedTopic::Connect {
                    to: ClientId::from(*to),
                    from: ClientId::from(*from),
                })
            }
            [MESSAGE, from, channel, kind] if !from.is_empty() && !channel.is_empty() => {
                Some(ParsedTopic::Message {
                    from: ClientId::from(*from),
                    channel: ChannelId::from(*channel),
                    kind: (*kind).to_owned(),
                })
            }
            _ => None,
        }
    }
}

/// MQTT filter matching: `+` matches one level, a trailing `#` matches
/// the parent level and everything below it.
pub fn matches(filter: &str, topic: &str) -> bool {
    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return filter_levels.next().is_none(),
            (Some("+"), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_shapes() {
        let a = ClientId::new("a");
        let b = ClientId::new("b");
        let ch = ChannelId::new("chan");

        assert_eq!(connect_topic(&b, &a), "connect/b/a");
        assert_eq!(connect_filter(&b), "connect/b/+");
        assert_eq!(send_topic_prefix(&a, &ch), "message/a/chan/");
        assert_eq!(receive_filter(&a, &ch), "message/a/chan/#");
        assert_eq!(
            frame_topic(&send_topic_prefix(&a, &ch), FrameKind::StreamEndAck),
            "message/a/chan/stream-end-ack"
        );
    }

    #[test]
    fn test_parse() {
        assert_eq!(
            ParsedTopic::parse("connect/b/a"),
            Some(ParsedTopic::Connect {
                to: ClientId::new("b"),
                from: ClientId::new("a"),
            })
        );
        assert_eq!(
            ParsedTopic::parse("message/a/chan/chunk"),
            Some(ParsedTopic::Message {
                from: ClientId::new("a"),
                channel: ChannelId::new("chan"),
                kind: "chunk".into(),
            })
        );
        assert_eq!(ParsedTopic::parse("message/a/chan"), None);
        assert_eq!(ParsedTopic::parse("connect/b"), None);
        assert_eq!(ParsedTopic::parse("other/a/b"), None);
    }

    #[test]
    fn test_wildcards() {
        assert!(matches("connect/b/+", "connect/b/a"));
        assert!(!matches("connect/b/+", "connect/b/a/x"));
        assert!(!matches("connect/b/+", "connect/c/a"));
        assert!(matches("message/a/chan/#", "message/a/chan/request"));
        assert!(matches("message/a/chan/#", "message/a/chan"));
        assert!(!matches("message/a/chan/#", "message/a/other/request"));
        assert!(matches("#", "anything/at/all"));
        assert!(matches("a/b", "a/b"));
        assert!(!matches("a/b", "a/b/c"));
        assert!(!matches("a/b/c", "a/b"));
    }
}
