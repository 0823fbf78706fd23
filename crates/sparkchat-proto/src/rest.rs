//! REST request and response bodies.
//!
//! The history, send and push-registration endpoints all exchange these
//! types. [`WireMessage`] doubles as the `receive_message` live payload since
//! the server relays stored messages verbatim.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A chat message as it appears on the wire.
///
/// `id` is empty when the server relayed a message that was never persisted
/// (live echoes of a `send_message` event carry no `_id`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireMessage {
    /// Server-issued identifier. Empty if unassigned.
    #[serde(rename = "_id", default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    /// Conversation (match) the message belongs to.
    pub chat_id: String,
    /// User ID of the author.
    pub sender: String,
    /// Message body.
    pub text: String,
    /// Creation time as reported by the author or server.
    pub created_at: DateTime<Utc>,
}

/// Body of `POST /api/messages`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    /// Target conversation.
    pub chat_id: String,
    /// Author (the local user).
    pub sender: String,
    /// Message body.
    pub text: String,
    /// Client-side creation time.
    pub created_at: DateTime<Utc>,
}

/// Public profile of the peer in a match.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartnerProfile {
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Photo URLs, first is the avatar.
    #[serde(default)]
    pub photos: Vec<String>,
    /// Whether the peer is currently online.
    #[serde(default)]
    pub online: bool,
}

impl PartnerProfile {
    /// Avatar URL. `None` if the peer has no photos.
    pub fn avatar(&self) -> Option<&str> {
        self.photos.first().map(String::as_str)
    }
}

/// Response of `GET /api/matches/{id}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchInfo {
    /// Match identifier, which is also the conversation identifier.
    #[serde(rename = "_id")]
    pub id: String,
    /// Peer display name as denormalized by the server.
    #[serde(default)]
    pub partner_name: String,
    /// Peer profile.
    #[serde(default)]
    pub partner: PartnerProfile,
}

/// Body of `POST /api/notifications/subscribe`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushSubscriptionRequest {
    /// Push endpoint URL issued by the platform push service.
    pub endpoint: String,
    /// Local user the endpoint belongs to.
    pub user_id: String,
}

/// Acknowledgement of a push registration.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PushAck {
    /// Optional server message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_message_uses_backend_field_names() {
        let json = r#"{
            "_id": "65f0",
            "chatId": "m1",
            "sender": "u1",
            "text": "hey",
            "createdAt": "2024-03-01T10:00:00.000Z"
        }"#;

        let msg: WireMessage = serde_json::from_str(json).unwrap();
        assert_eq!(msg.id, "65f0");
        assert_eq!(msg.chat_id, "m1");
        assert_eq!(msg.sender, "u1");
        assert_eq!(msg.created_at.timestamp(), 1_709_287_200);
    }

    #[test]
    fn wire_message_without_id_decodes_empty() {
        let json = r#"{"chatId":"m1","sender":"u1","text":"yo","createdAt":"2024-03-01T10:00:00Z"}"#;

        let msg: WireMessage = serde_json::from_str(json).unwrap();
        assert!(msg.id.is_empty());

        let back = serde_json::to_value(&msg).unwrap();
        assert!(back.get("_id").is_none());
    }

    #[test]
    fn match_info_tolerates_missing_partner() {
        let info: MatchInfo = serde_json::from_str(r#"{"_id":"m1"}"#).unwrap();
        assert_eq!(info.partner.avatar(), None);
        assert!(!info.partner.online);
    }
}
