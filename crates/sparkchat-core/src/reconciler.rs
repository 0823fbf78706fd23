//! Message reconciler.
//!
//! Owns the visible message list of one conversation and merges the three
//! sources that feed it: the history fetch ([`Reconciler::seed`]), the live
//! channel ([`Reconciler::ingest_live`]) and the local send lifecycle
//! ([`Reconciler::ingest_local_send`], [`Reconciler::confirm_send`],
//! [`Reconciler::fail_send`]).
//!
//! # Invariants
//!
//! - No two entries are duplicates of each other under
//!   [`Message::is_duplicate`] with the configured tolerance.
//! - `created_at` is non-decreasing by list position. New entries are inserted
//!   after every entry with an equal or earlier timestamp.
//! - Pending entries carry a [`MessageId::Temporary`] id unique within this
//!   reconciler.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, trace};

use crate::{
    error::ChatError,
    message::{ConversationId, DeliveryState, Message, MessageId, UserId},
};

/// Result of feeding a live message to the reconciler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Message was new and now sits at `index`.
    Inserted {
        /// Position in the list.
        index: usize,
    },
    /// Message was already present. The list is unchanged.
    DuplicateIgnored,
    /// Message belongs to another conversation. The list is unchanged.
    OtherConversation,
}

/// Result of resolving a pending send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Pending entry was replaced by the confirmed message at `index`.
    Confirmed {
        /// Position in the list.
        index: usize,
    },
    /// Pending entry was removed from `index`.
    Removed {
        /// Former position in the list.
        index: usize,
    },
    /// No pending entry for this handle (already resolved, or absorbed by a
    /// history entry on re-seed). The list is unchanged.
    Unknown,
}

/// Handle to an optimistic message, used to confirm or roll it back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingSend {
    message: Message,
}

impl PendingSend {
    /// The optimistic message as inserted.
    pub fn message(&self) -> &Message {
        &self.message
    }

    /// Temporary id of the optimistic entry.
    pub fn id(&self) -> &MessageId {
        &self.message.id
    }
}

/// Duplicate-free, time-ordered message list for one conversation.
#[derive(Debug, Clone)]
pub struct Reconciler {
    conversation_id: ConversationId,
    self_id: UserId,
    tolerance: Duration,
    messages: Vec<Message>,
    next_token: u64,
}

impl Reconciler {
    /// Create an empty reconciler.
    ///
    /// `token_seed` is the first temporary id handed out; callers pass a
    /// random value so temporary ids differ across sessions.
    pub fn new(
        conversation_id: impl Into<ConversationId>,
        self_id: impl Into<UserId>,
        tolerance: Duration,
        token_seed: u64,
    ) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            self_id: self_id.into(),
            tolerance,
            messages: Vec::new(),
            next_token: token_seed,
        }
    }

    /// Conversation this reconciler owns.
    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    /// Local user.
    pub fn self_id(&self) -> &str {
        &self.self_id
    }

    /// Current list, ordered by `created_at`.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// True if the list is empty.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Number of sends still awaiting a response.
    pub fn pending_count(&self) -> usize {
        self.messages.iter().filter(|m| m.delivery == DeliveryState::Pending).count()
    }

    /// True if an equivalent message is already in the list.
    pub fn contains_equivalent(&self, candidate: &Message) -> bool {
        self.find_duplicate(candidate).is_some()
    }

    /// Replace the list with `history`.
    ///
    /// History is sorted and de-duplicated. Pending entries survive the
    /// replacement unless history already holds an equivalent message, in
    /// which case the pending entry is absorbed and its handle becomes stale.
    pub fn seed(&mut self, history: Vec<Message>) {
        let pending: Vec<Message> = self
            .messages
            .drain(..)
            .filter(|m| m.delivery == DeliveryState::Pending)
            .collect();

        let mut history = history;
        history.sort_by_key(|m| m.created_at);

        let mut dropped = 0usize;
        for mut message in history {
            if message.conversation_id != self.conversation_id || self.contains_equivalent(&message) {
                dropped += 1;
                continue;
            }
            message.delivery = DeliveryState::Confirmed;
            self.messages.push(message);
        }

        let mut absorbed = 0usize;
        for message in pending {
            if self.contains_equivalent(&message) {
                absorbed += 1;
            } else {
                self.insert_ordered(message);
            }
        }

        debug!(
            conversation_id = %self.conversation_id,
            len = self.messages.len(),
            dropped,
            absorbed,
            "seeded message list"
        );
    }

    /// Merge a message that arrived over the live channel.
    pub fn ingest_live(&mut self, message: Message) -> IngestOutcome {
        if message.conversation_id != self.conversation_id {
            trace!(
                conversation_id = %self.conversation_id,
                other = %message.conversation_id,
                "live message for another conversation"
            );
            return IngestOutcome::OtherConversation;
        }

        if let Some(existing) = self.find_duplicate(&message) {
            debug!(
                conversation_id = %self.conversation_id,
                message_id = %message.id,
                existing_id = %self.messages[existing].id,
                "duplicate ignored"
            );
            return IngestOutcome::DuplicateIgnored;
        }

        let mut message = message;
        message.delivery = DeliveryState::Confirmed;
        let index = self.insert_ordered(message);
        IngestOutcome::Inserted { index }
    }

    /// Insert an optimistic message authored by the local user.
    ///
    /// # Errors
    ///
    /// - `ChatError::EmptyMessage` if `text` is blank
    /// - `ChatError::DuplicateSend` if an equivalent message is already listed
    pub fn ingest_local_send(
        &mut self,
        text: &str,
        now: DateTime<Utc>,
    ) -> Result<PendingSend, ChatError> {
        if text.trim().is_empty() {
            return Err(ChatError::EmptyMessage);
        }

        let message = Message {
            id: MessageId::Temporary(self.next_token),
            conversation_id: self.conversation_id.clone(),
            sender_id: self.self_id.clone(),
            text: text.to_string(),
            created_at: now,
            delivery: DeliveryState::Pending,
        };

        if self.contains_equivalent(&message) {
            return Err(ChatError::DuplicateSend { window: self.tolerance });
        }

        self.next_token = self.next_token.wrapping_add(1);
        let index = self.insert_ordered(message.clone());
        debug!(
            conversation_id = %self.conversation_id,
            message_id = %message.id,
            index,
            "optimistic insert"
        );
        Ok(PendingSend { message })
    }

    /// Replace the pending entry for `handle` with the server's copy.
    ///
    /// The entry keeps its position unless the server's timestamp would break
    /// ordering. Any other entry equivalent to `confirmed` (for example a live
    /// echo that arrived just outside the tolerance window) is removed.
    pub fn confirm_send(&mut self, handle: &PendingSend, confirmed: Message) -> SendOutcome {
        if self.position_of(handle.id()).is_none() {
            debug!(
                conversation_id = %self.conversation_id,
                message_id = %handle.id(),
                "confirmation for unknown pending send"
            );
            return SendOutcome::Unknown;
        }

        let mut confirmed = confirmed;
        confirmed.delivery = DeliveryState::Confirmed;

        let tolerance = self.tolerance;
        let temp_id = handle.id().clone();
        let before = self.messages.len();
        self.messages.retain(|m| m.id == temp_id || !m.is_duplicate(&confirmed, tolerance));
        let merged = before - self.messages.len();

        let Some(mut index) = self.position_of(&temp_id) else {
            return SendOutcome::Unknown;
        };

        let in_order = index.checked_sub(1).is_none_or(|prev| {
            self.messages[prev].created_at <= confirmed.created_at
        }) && self
            .messages
            .get(index + 1)
            .is_none_or(|next| confirmed.created_at <= next.created_at);

        let message_id = confirmed.id.clone();
        if in_order {
            self.messages[index] = confirmed;
        } else {
            self.messages.remove(index);
            index = self.insert_ordered(confirmed);
        }

        debug!(
            conversation_id = %self.conversation_id,
            temp_id = %temp_id,
            message_id = %message_id,
            index,
            merged,
            "send confirmed"
        );
        SendOutcome::Confirmed { index }
    }

    /// Remove the pending entry for `handle`.
    pub fn fail_send(&mut self, handle: &PendingSend) -> SendOutcome {
        match self.position_of(handle.id()) {
            Some(index) => {
                self.messages.remove(index);
                debug!(
                    conversation_id = %self.conversation_id,
                    message_id = %handle.id(),
                    "send rolled back"
                );
                SendOutcome::Removed { index }
            },
            None => SendOutcome::Unknown,
        }
    }

    fn find_duplicate(&self, candidate: &Message) -> Option<usize> {
        self.messages.iter().position(|m| m.is_duplicate(candidate, self.tolerance))
    }

    fn position_of(&self, id: &MessageId) -> Option<usize> {
        self.messages.iter().position(|m| &m.id == id)
    }

    fn insert_ordered(&mut self, message: Message) -> usize {
        let index = self.messages.partition_point(|m| m.created_at <= message.created_at);
        self.messages.insert(index, message);
        index
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;

    use super::*;

    const SELF: &str = "me";
    const PEER: &str = "A";

    fn at(ms: i64) -> DateTime<Utc> {
        DateTime::<Utc>::UNIX_EPOCH + TimeDelta::milliseconds(1_700_000_000_000 + ms)
    }

    fn server(id: &str, sender: &str, text: &str, ms: i64) -> Message {
        Message {
            id: MessageId::Server(id.to_string()),
            conversation_id: "m1".to_string(),
            sender_id: sender.to_string(),
            text: text.to_string(),
            created_at: at(ms),
            delivery: DeliveryState::Confirmed,
        }
    }

    fn reconciler() -> Reconciler {
        Reconciler::new("m1", SELF, Duration::from_secs(1), 100)
    }

    #[test]
    fn seed_then_same_live_message_keeps_one_entry() {
        let mut r = reconciler();
        r.seed(vec![server("1", PEER, "hey", 0)]);

        assert_eq!(r.ingest_live(server("1", PEER, "hey", 0)), IngestOutcome::DuplicateIgnored);
        assert_eq!(r.len(), 1);
    }

    #[test]
    fn seed_sorts_and_dedups_history() {
        let mut r = reconciler();
        r.seed(vec![
            server("2", PEER, "second", 5_000),
            server("1", PEER, "first", 0),
            server("1", PEER, "first", 0),
        ]);

        let texts: Vec<&str> = r.messages().iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, ["first", "second"]);
    }

    #[test]
    fn ingest_live_twice_equals_once() {
        let mut r = reconciler();
        let m = server("7", PEER, "hello", 1_000);

        assert_eq!(r.ingest_live(m.clone()), IngestOutcome::Inserted { index: 0 });
        let once = r.messages().to_vec();
        assert_eq!(r.ingest_live(m), IngestOutcome::DuplicateIgnored);
        assert_eq!(r.messages(), once.as_slice());
    }

    #[test]
    fn live_message_is_inserted_in_order() {
        let mut r = reconciler();
        r.seed(vec![server("1", PEER, "a", 0), server("3", PEER, "c", 10_000)]);

        assert_eq!(r.ingest_live(server("2", PEER, "b", 5_000)), IngestOutcome::Inserted { index: 1 });
    }

    #[test]
    fn live_message_for_other_conversation_is_ignored() {
        let mut r = reconciler();
        let mut m = server("1", PEER, "a", 0);
        m.conversation_id = "other".to_string();

        assert_eq!(r.ingest_live(m), IngestOutcome::OtherConversation);
        assert!(r.is_empty());
    }

    #[test]
    fn failed_send_is_rolled_back() {
        let mut r = reconciler();
        let handle = r.ingest_local_send("hi", at(0)).unwrap();

        assert_eq!(r.fail_send(&handle), SendOutcome::Removed { index: 0 });
        assert!(r.messages().iter().all(|m| m.text != "hi"));
        assert_eq!(r.fail_send(&handle), SendOutcome::Unknown);
    }

    #[test]
    fn failed_state_is_never_stored() {
        let mut r = reconciler();
        r.seed(vec![server("1", PEER, "hey", -1_000)]);
        let failed = r.ingest_local_send("hi", at(0)).unwrap();
        let kept = r.ingest_local_send("yo", at(2_000)).unwrap();

        r.fail_send(&failed);
        r.confirm_send(&kept, server("7", SELF, "yo", 2_000));

        assert_eq!(r.len(), 2);
        assert!(r.messages().iter().all(|m| m.delivery != DeliveryState::Failed));
    }

    #[test]
    fn confirmed_send_replaces_pending_in_place() {
        let mut r = reconciler();
        r.seed(vec![server("1", PEER, "before", -5_000)]);
        let handle = r.ingest_local_send("hi", at(0)).unwrap();
        assert_eq!(handle.message().delivery, DeliveryState::Pending);
        assert!(handle.id().is_temporary());

        let outcome = r.confirm_send(&handle, server("42", SELF, "hi", 0));

        assert_eq!(outcome, SendOutcome::Confirmed { index: 1 });
        let his: Vec<&Message> = r.messages().iter().filter(|m| m.text == "hi").collect();
        assert_eq!(his.len(), 1);
        assert_eq!(his[0].id, MessageId::Server("42".to_string()));
        assert_eq!(his[0].delivery, DeliveryState::Confirmed);
    }

    #[test]
    fn live_echo_before_rest_response_is_absorbed() {
        let mut r = reconciler();
        let handle = r.ingest_local_send("yo", at(0)).unwrap();

        let echo = server("9", SELF, "yo", 200);
        assert_eq!(r.ingest_live(echo.clone()), IngestOutcome::DuplicateIgnored);
        assert_eq!(r.len(), 1);
        assert_eq!(r.messages()[0].delivery, DeliveryState::Pending);

        assert_eq!(r.confirm_send(&handle, echo), SendOutcome::Confirmed { index: 0 });
        assert_eq!(r.len(), 1);
        assert_eq!(r.messages()[0].id, MessageId::Server("9".to_string()));
    }

    #[test]
    fn confirmation_merges_late_echo_outside_tolerance() {
        let mut r = reconciler();
        let handle = r.ingest_local_send("yo", at(0)).unwrap();

        // server stamped the message 1.5s after the local clock
        let echo = server("9", SELF, "yo", 1_500);
        assert_eq!(r.ingest_live(echo.clone()), IngestOutcome::Inserted { index: 1 });

        r.confirm_send(&handle, echo);
        assert_eq!(r.len(), 1);
        assert_eq!(r.messages()[0].id, MessageId::Server("9".to_string()));
    }

    #[test]
    fn confirmation_with_later_timestamp_keeps_order() {
        let mut r = reconciler();
        let handle = r.ingest_local_send("first", at(0)).unwrap();
        r.ingest_live(server("2", PEER, "reply", 3_000));

        let outcome = r.confirm_send(&handle, server("1", SELF, "first", 4_000));

        assert_eq!(outcome, SendOutcome::Confirmed { index: 1 });
        assert!(r.messages().windows(2).all(|w| w[0].created_at <= w[1].created_at));
    }

    #[test]
    fn blank_send_is_rejected() {
        let mut r = reconciler();
        assert_eq!(r.ingest_local_send("   \n", at(0)), Err(ChatError::EmptyMessage));
        assert!(r.is_empty());
    }

    #[test]
    fn rapid_identical_send_is_rejected() {
        let mut r = reconciler();
        r.ingest_local_send("hi", at(0)).unwrap();

        let second = r.ingest_local_send("hi", at(400));
        assert!(matches!(second, Err(ChatError::DuplicateSend { .. })));

        assert!(r.ingest_local_send("hi", at(2_000)).is_ok());
        assert_eq!(r.pending_count(), 2);
    }

    #[test]
    fn temporary_ids_are_unique() {
        let mut r = reconciler();
        let a = r.ingest_local_send("a", at(0)).unwrap();
        let b = r.ingest_local_send("b", at(0)).unwrap();
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn reseed_keeps_pending_unless_history_has_it() {
        let mut r = reconciler();
        let kept = r.ingest_local_send("still sending", at(0)).unwrap();
        let absorbed = r.ingest_local_send("already stored", at(100)).unwrap();

        r.seed(vec![server("5", SELF, "already stored", 300)]);

        assert_eq!(r.len(), 2);
        assert_eq!(r.pending_count(), 1);
        assert_eq!(r.confirm_send(&absorbed, server("5", SELF, "already stored", 300)), SendOutcome::Unknown);
        assert!(matches!(
            r.confirm_send(&kept, server("6", SELF, "still sending", 0)),
            SendOutcome::Confirmed { .. }
        ));
    }
}
