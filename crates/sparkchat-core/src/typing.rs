//! Typing signal debouncer.
//!
//! Outbound: keystrokes are coalesced so at most one `typing` event leaves per
//! throttle window. Inbound: a peer signal raises the indicator until
//! `expiry` after the most recent signal; there is no explicit "stopped
//! typing" event. A new signal moves the single deadline, it never stacks.

use std::time::Duration;

use tracing::trace;

use crate::{
    env::MonotonicInstant,
    message::{ConversationId, UserId},
};

/// Snapshot of the peer typing indicator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypingState<I> {
    /// Conversation the indicator belongs to.
    pub conversation_id: ConversationId,
    /// Whether the indicator is shown.
    pub peer_is_typing: bool,
    /// When the indicator clears. `None` if it is not shown.
    pub expires_at: Option<I>,
}

/// Throttle for local typing and self-clearing peer indicator.
#[derive(Debug, Clone)]
pub struct TypingDebouncer<I> {
    conversation_id: ConversationId,
    self_id: UserId,
    throttle: Duration,
    expiry: Duration,
    last_sent: Option<I>,
    peer: Option<(UserId, I)>,
}

impl<I: MonotonicInstant> TypingDebouncer<I> {
    /// Create a debouncer with no signal sent and no peer typing.
    pub fn new(
        conversation_id: impl Into<ConversationId>,
        self_id: impl Into<UserId>,
        throttle: Duration,
        expiry: Duration,
    ) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            self_id: self_id.into(),
            throttle,
            expiry,
            last_sent: None,
            peer: None,
        }
    }

    /// Record a local input change.
    ///
    /// Returns true if an outbound typing event should be emitted now.
    pub fn notify_local_typing(&mut self, now: I) -> bool {
        let due = self.last_sent.is_none_or(|last| now - last >= self.throttle);
        if due {
            self.last_sent = Some(now);
        }
        due
    }

    /// Record a typing signal from `peer_id`.
    ///
    /// Signals carrying the local user's id are echoes and are ignored.
    pub fn on_peer_typing(&mut self, peer_id: &str, now: I) {
        if peer_id == self.self_id {
            return;
        }
        let expires_at = now + self.expiry;
        trace!(conversation_id = %self.conversation_id, peer_id, "peer typing");
        self.peer = Some((peer_id.to_string(), expires_at));
    }

    /// True while the peer indicator is shown.
    pub fn is_peer_typing(&self, now: I) -> bool {
        self.peer.as_ref().is_some_and(|(_, expires_at)| now < *expires_at)
    }

    /// Peer currently shown as typing.
    pub fn typing_peer(&self, now: I) -> Option<&str> {
        self.peer
            .as_ref()
            .filter(|(_, expires_at)| now < *expires_at)
            .map(|(peer, _)| peer.as_str())
    }

    /// Next instant at which [`Self::tick`] has work to do.
    pub fn next_deadline(&self) -> Option<I> {
        self.peer.as_ref().map(|(_, expires_at)| *expires_at)
    }

    /// Clear an expired indicator.
    ///
    /// Returns true if the indicator was shown and has just cleared.
    pub fn tick(&mut self, now: I) -> bool {
        match &self.peer {
            Some((_, expires_at)) if now >= *expires_at => {
                self.peer = None;
                trace!(conversation_id = %self.conversation_id, "peer typing expired");
                true
            },
            _ => false,
        }
    }

    /// Snapshot of the indicator.
    pub fn state(&self, now: I) -> TypingState<I> {
        let expires_at = self.peer.as_ref().map(|(_, at)| *at).filter(|at| now < *at);
        TypingState {
            conversation_id: self.conversation_id.clone(),
            peer_is_typing: expires_at.is_some(),
            expires_at,
        }
    }
}
