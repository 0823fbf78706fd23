//! Push message and notification display payloads.
//!
//! [`PushPayload`] is what the push service delivers. [`NotificationPayload`]
//! is what the client hands to the platform notification facility; the core
//! builds it, display itself happens elsewhere.

use serde::{Deserialize, Serialize};

use crate::{
    errors::{ProtocolError, Result},
    rest::WireMessage,
};

/// Routing data attached to a push message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushData {
    /// Conversation the push refers to.
    pub chat_id: String,
    /// In-app URL of the conversation.
    #[serde(default)]
    pub url: String,
    /// The message that triggered the push, if the server included it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<WireMessage>,
}

/// Inbound push message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushPayload {
    /// Notification title.
    pub title: String,
    /// Notification body.
    #[serde(default)]
    pub body: String,
    /// Routing data.
    pub data: PushData,
}

impl PushPayload {
    /// Decode a raw push message body.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::EmptyPush` if the push carried no bytes
    /// - `ProtocolError::JsonDecode` if the body is not a valid payload
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.is_empty() {
            return Err(ProtocolError::EmptyPush);
        }
        serde_json::from_slice(bytes).map_err(|e| ProtocolError::decode(&e))
    }
}

/// Action button on a notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationAction {
    /// Action identifier reported back on click.
    pub action: String,
    /// Button label.
    pub title: String,
    /// Button icon URL.
    pub icon: String,
}

/// Everything the notification facility needs to show an alert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationPayload {
    /// Alert title.
    pub title: String,
    /// Alert body.
    pub body: String,
    /// Large icon URL.
    pub icon: String,
    /// Monochrome badge URL.
    pub badge: String,
    /// Vibration pattern in milliseconds (on, off, on, ...).
    pub vibrate: Vec<u32>,
    /// Routing data echoed back on click.
    pub data: PushData,
    /// Action buttons.
    pub actions: Vec<NotificationAction>,
    /// Replacement tag. A new alert with the same tag replaces the old one.
    pub tag: String,
    /// Re-alert even when replacing an alert with the same tag.
    pub renotify: bool,
}
