//! Message model and equivalence.
//!
//! A message can be observed from up to four sources: the history fetch, the
//! live channel, the local optimistic insert and the push payload. The same
//! logical message often arrives through several of them, sometimes without a
//! server identifier. [`Message::is_duplicate`] is the single rule that decides
//! whether two observations are the same message.

use std::{fmt, time::Duration};

use chrono::{DateTime, Utc};
use sparkchat_proto::WireMessage;

/// Opaque user identifier.
pub type UserId = String;

/// Opaque conversation (match) identifier.
pub type ConversationId = String;

/// Identity of a message.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MessageId {
    /// Identifier assigned by the server on persistence.
    Server(String),
    /// Client-generated placeholder for an optimistic insert.
    Temporary(u64),
    /// Relayed without an identifier. Never equal to any other id for
    /// duplicate detection.
    Unassigned,
}

impl MessageId {
    /// Map a wire identifier. Empty strings become [`MessageId::Unassigned`].
    pub fn from_wire(id: &str) -> Self {
        if id.is_empty() { Self::Unassigned } else { Self::Server(id.to_string()) }
    }

    /// True for client-generated placeholders.
    pub fn is_temporary(&self) -> bool {
        matches!(self, Self::Temporary(_))
    }

    /// Identifiers match only when both are assigned and equal.
    fn same_as(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Server(a), Self::Server(b)) => a == b,
            (Self::Temporary(a), Self::Temporary(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Server(id) => f.write_str(id),
            Self::Temporary(token) => write!(f, "temp-{token:016x}"),
            Self::Unassigned => Ok(()),
        }
    }
}

/// Local delivery status of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeliveryState {
    /// Shown optimistically, send in flight.
    Pending,
    /// Persisted by the server, or received from elsewhere.
    Confirmed,
    /// Send failed.
    ///
    /// Never stored by [`Reconciler`](crate::Reconciler): a failed send is
    /// removed from the list. Embedders that keep their own copy of a failed
    /// message (for a retry affordance) mark it with this state.
    Failed,
}

/// A chat message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Identity.
    pub id: MessageId,
    /// Conversation the message belongs to.
    pub conversation_id: ConversationId,
    /// Author.
    pub sender_id: UserId,
    /// Body.
    pub text: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Local delivery status.
    pub delivery: DeliveryState,
}

impl Message {
    /// Build a confirmed message from its wire form.
    pub fn from_wire(wire: WireMessage) -> Self {
        Self {
            id: MessageId::from_wire(&wire.id),
            conversation_id: wire.chat_id,
            sender_id: wire.sender,
            text: wire.text,
            created_at: wire.created_at,
            delivery: DeliveryState::Confirmed,
        }
    }

    /// Wire form. Temporary and unassigned ids are not sent.
    pub fn to_wire(&self) -> WireMessage {
        let id = match &self.id {
            MessageId::Server(id) => id.clone(),
            MessageId::Temporary(_) | MessageId::Unassigned => String::new(),
        };
        WireMessage {
            id,
            chat_id: self.conversation_id.clone(),
            sender: self.sender_id.clone(),
            text: self.text.clone(),
            created_at: self.created_at,
        }
    }

    /// True if `self` and `other` are observations of the same message.
    ///
    /// Either the ids match (both assigned), or the sender and text match
    /// exactly and the timestamps are at most `tolerance` apart. Timestamp
    /// order does not matter.
    pub fn is_duplicate(&self, other: &Self, tolerance: Duration) -> bool {
        if self.id.same_as(&other.id) {
            return true;
        }

        self.sender_id == other.sender_id
            && self.text == other.text
            && within(self.created_at, other.created_at, tolerance)
    }
}

/// `|a - b| <= tolerance`
pub(crate) fn within(a: DateTime<Utc>, b: DateTime<Utc>, tolerance: Duration) -> bool {
    (a - b).abs().to_std().is_ok_and(|delta| delta <= tolerance)
}

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;

    use super::*;

    const TOLERANCE: Duration = Duration::from_secs(1);

    fn at(ms: i64) -> DateTime<Utc> {
        DateTime::<Utc>::UNIX_EPOCH + TimeDelta::milliseconds(1_700_000_000_000 + ms)
    }

    fn msg(id: MessageId, sender: &str, text: &str, ms: i64) -> Message {
        Message {
            id,
            conversation_id: "m1".to_string(),
            sender_id: sender.to_string(),
            text: text.to_string(),
            created_at: at(ms),
            delivery: DeliveryState::Confirmed,
        }
    }

    #[test]
    fn same_server_id_is_duplicate_regardless_of_content() {
        let a = msg(MessageId::Server("x".into()), "u1", "hi", 0);
        let b = msg(MessageId::Server("x".into()), "u2", "bye", 60_000);
        assert!(a.is_duplicate(&b, TOLERANCE));
    }

    #[test]
    fn content_match_within_tolerance_is_duplicate() {
        let a = msg(MessageId::Unassigned, "u1", "hi", 0);
        let b = msg(MessageId::Server("x".into()), "u1", "hi", 1_000);
        assert!(a.is_duplicate(&b, TOLERANCE));
        assert!(b.is_duplicate(&a, TOLERANCE));
    }

    #[test]
    fn content_match_outside_tolerance_is_distinct() {
        let a = msg(MessageId::Unassigned, "u1", "hi", 0);
        let b = msg(MessageId::Unassigned, "u1", "hi", 1_001);
        assert!(!a.is_duplicate(&b, TOLERANCE));
    }

    #[test]
    fn unassigned_ids_do_not_match_each_other() {
        let a = msg(MessageId::Unassigned, "u1", "hi", 0);
        let b = msg(MessageId::Unassigned, "u1", "hello", 0);
        assert!(!a.is_duplicate(&b, TOLERANCE));
    }

    #[test]
    fn different_sender_is_distinct() {
        let a = msg(MessageId::Unassigned, "u1", "hi", 0);
        let b = msg(MessageId::Unassigned, "u2", "hi", 0);
        assert!(!a.is_duplicate(&b, TOLERANCE));
    }

    #[test]
    fn temporary_id_displays_with_prefix_and_is_not_sent() {
        let m = msg(MessageId::Temporary(0xab), "u1", "hi", 0);
        assert_eq!(m.id.to_string(), "temp-00000000000000ab");
        assert!(m.to_wire().id.is_empty());
    }

    #[test]
    fn wire_round_trip_keeps_server_id() {
        let m = msg(MessageId::Server("65f0".into()), "u1", "hi", 0);
        assert_eq!(Message::from_wire(m.to_wire()), m);
    }
}
