//! Live channel events.
//!
//! The live channel carries JSON text frames shaped as
//! `{"event": "<name>", "data": <payload>}`. Outbound events announce room
//! membership, typing and real-time sends; inbound events deliver messages and
//! peer typing signals.
//!
//! # Invariants
//!
//! Each variant maps to exactly one event name, and each event name has a
//! fixed direction (see [`LiveEvent::is_outbound`]).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    errors::{ProtocolError, Result},
    rest::WireMessage,
};

/// Room membership announcement. Sent on every (re)connect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinChat {
    /// Conversation to join.
    pub chat_id: String,
    /// Local user.
    pub user_id: String,
}

/// Local user is typing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingSignal {
    /// Conversation the user is typing in.
    pub chat_id: String,
    /// Local user.
    pub user_id: String,
}

/// Real-time fan-out of a message the local user just submitted.
///
/// Persistence goes through the REST send endpoint; this event only gets the
/// text to the peer faster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingMessage {
    /// Target conversation.
    pub chat_id: String,
    /// Author (the local user).
    pub sender: String,
    /// Message body.
    pub text: String,
    /// Client-side creation time.
    pub created_at: DateTime<Utc>,
}

/// Every event that travels over the live channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum LiveEvent {
    /// Outbound: announce presence in a conversation room.
    JoinChat(JoinChat),
    /// Outbound: local user is typing.
    Typing(TypingSignal),
    /// Outbound: real-time delivery of a local send.
    SendMessage(OutgoingMessage),
    /// Inbound: a message was posted to the room.
    ReceiveMessage(WireMessage),
    /// Inbound: a room member is typing. Carries the member's user ID.
    UserTyping(String),
}

impl LiveEvent {
    /// Event name as it appears in the `event` field.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::JoinChat(_) => "join_chat",
            Self::Typing(_) => "typing",
            Self::SendMessage(_) => "send_message",
            Self::ReceiveMessage(_) => "receive_message",
            Self::UserTyping(_) => "user_typing",
        }
    }

    /// True for events the client sends, false for events the server sends.
    #[must_use]
    pub const fn is_outbound(&self) -> bool {
        matches!(self, Self::JoinChat(_) | Self::Typing(_) | Self::SendMessage(_))
    }

    /// Encode as a JSON text frame.
    pub fn encode(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| ProtocolError::encode(&e))
    }

    /// Decode a JSON text frame.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::JsonDecode` for malformed JSON, unknown event names,
    ///   or payloads that do not match the event
    pub fn decode(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| ProtocolError::decode(&e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_chat_envelope_shape() {
        let event =
            LiveEvent::JoinChat(JoinChat { chat_id: "m1".to_string(), user_id: "u1".to_string() });

        let value: serde_json::Value = serde_json::from_str(&event.encode().unwrap()).unwrap();
        assert_eq!(value["event"], "join_chat");
        assert_eq!(value["data"]["chatId"], "m1");
        assert_eq!(value["data"]["userId"], "u1");
    }

    #[test]
    fn user_typing_carries_bare_user_id() {
        let event = LiveEvent::decode(r#"{"event":"user_typing","data":"u2"}"#).unwrap();
        assert_eq!(event, LiveEvent::UserTyping("u2".to_string()));
        assert!(!event.is_outbound());
    }

    #[test]
    fn unknown_event_is_rejected() {
        let result = LiveEvent::decode(r#"{"event":"self_destruct","data":{}}"#);
        assert!(matches!(result, Err(ProtocolError::JsonDecode(_))));
    }

    #[test]
    fn names_match_serialized_tags() {
        let events = [
            LiveEvent::Typing(TypingSignal { chat_id: "c".into(), user_id: "u".into() }),
            LiveEvent::UserTyping("u".into()),
        ];

        for event in events {
            let value: serde_json::Value = serde_json::from_str(&event.encode().unwrap()).unwrap();
            assert_eq!(value["event"], event.name());
        }
    }
}
