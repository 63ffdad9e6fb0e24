//! The wire protocol: self-describing tagged records, encoded as
//! JSON-compatible UTF-8 text. The tag is the `type` field.
//!
//! Receivers must ignore unknown fields and silently drop unknown tags
//! (spec.md §6, §7). [`Message::decode`] folds both "malformed" and
//! "unrecognized tag" into the same `None`, since the spec treats them
//! identically — a transient, silently-ignored condition, never an error
//! surfaced to the caller.
use std::fmt;
use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

use crate::peer::{NatType, PeerId, SwarmId, Timestamp};

/// All wire messages exchanged between peers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Message {
    #[serde(rename = "ping")]
    Ping {
        id: PeerId,
        nat: NatType,
        restart: Timestamp,
    },
    #[serde(rename = "pong")]
    Pong {
        id: PeerId,
        address: Ipv4Addr,
        port: u16,
        nat: NatType,
        restart: Timestamp,
        timestamp: Timestamp,
    },
    #[serde(rename = "test")]
    Test {
        id: PeerId,
        address: Ipv4Addr,
        port: u16,
        nat: NatType,
    },
    #[serde(rename = "intro")]
    Intro {
        id: PeerId,
        target: PeerId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        swarm: Option<SwarmId>,
    },
    #[serde(rename = "introError")]
    IntroError {
        id: PeerId,
        target: PeerId,
        call: String,
    },
    #[serde(rename = "connect")]
    Connect {
        id: PeerId,
        target: PeerId,
        address: Ipv4Addr,
        port: u16,
        nat: NatType,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        swarm: Option<SwarmId>,
    },
    #[serde(rename = "local")]
    Local {
        id: PeerId,
        address: Ipv4Addr,
        port: u16,
    },
    #[serde(rename = "join")]
    Join {
        id: PeerId,
        swarm: SwarmId,
        nat: NatType,
        peers: u32,
    },
    #[serde(rename = "joinError")]
    JoinError {
        id: PeerId,
        swarm: SwarmId,
        peers: u32,
        call: String,
    },
    #[serde(rename = "relay")]
    Relay {
        target: PeerId,
        content: Box<Message>,
    },
}

impl Message {
    /// The wire tag for this message, as it would appear in the `type`
    /// field. Used for logging; never round-tripped through this method.
    pub fn tag(&self) -> &'static str {
        match self {
            Message::Ping { .. } => "ping",
            Message::Pong { .. } => "pong",
            Message::Test { .. } => "test",
            Message::Intro { .. } => "intro",
            Message::IntroError { .. } => "introError",
            Message::Connect { .. } => "connect",
            Message::Local { .. } => "local",
            Message::Join { .. } => "join",
            Message::JoinError { .. } => "joinError",
            Message::Relay { .. } => "relay",
        }
    }

    /// Encode this message as a JSON-compatible UTF-8 byte string.
    pub fn encode(&self) -> Vec<u8> {
        // A `Message` is always representable; this can only fail on a
        // writer error, and `Vec<u8>` never errors.
        serde_json::to_vec(self).expect("Message serialization is infallible")
    }

    /// Decode a message from the wire. Malformed payloads and unrecognized
    /// tags both silently decode to `None` (spec.md §7: "unknown fields
    /// must be ignored... unknown tags are silently dropped").
    pub fn decode(bytes: &[u8]) -> Option<Message> {
        serde_json::from_slice(bytes).ok()
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tag())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::PeerId;

    #[test]
    fn round_trips_ping() {
        let msg = Message::Ping {
            id: PeerId::from_bytes([7u8; 32]),
            nat: NatType::Unknown,
            restart: 0,
        };
        let bytes = msg.encode();
        assert_eq!(Message::decode(&bytes), Some(msg));
    }

    #[test]
    fn unknown_tag_decodes_to_none() {
        let bytes = br#"{"type":"smoke-signal","id":"zz"}"#;
        assert_eq!(Message::decode(bytes), None);
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let bytes = format!(
            r#"{{"type":"ping","id":"{}","nat":"unknown","restart":0,"extra":"ignored"}}"#,
            PeerId::from_bytes([1u8; 32])
        );
        assert!(Message::decode(bytes.as_bytes()).is_some());
    }

    #[test]
    fn malformed_json_decodes_to_none() {
        assert_eq!(Message::decode(b"not json"), None);
    }
}
