//! Live connection state machine.
//!
//! Owns the lifecycle of the single live channel of a chat session. Uses the
//! action pattern: methods take time as input and return actions for the
//! driver to execute, so the state machine performs no I/O.
//!
//! # State Machine
//!
//! ```text
//! ┌──────┐ open  ┌────────────┐ transport open ┌───────────┐
//! │ Idle │──────>│ Connecting │───────────────>│ Connected │<─┐
//! └──────┘       └────────────┘                └───────────┘  │
//!                      │ drop                        │ drop   │ transport open
//!                      ↓                             ↓        │
//!                ┌──────────────┐  attempts left  ┌──────────────┐
//!                │ Reconnecting │<────────────────│ Reconnecting │
//!                └──────────────┘                 └──────────────┘
//!                      │ policy exhausted
//!                      ↓
//!                 ┌────────┐       close (any state)   ┌────────┐
//!                 │ Failed │                           │ Closed │
//!                 └────────┘                           └────────┘
//! ```
//!
//! Every successful transport open announces room membership again; the
//! server keeps no membership across drops.
//!
//! Inbound events are delivered to subscribers in arrival order through
//! unbounded channels. [`LiveConnection::close`] drops every subscriber
//! synchronously, so no event is delivered after teardown.

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use sparkchat_proto::{JoinChat, LiveEvent};

use crate::{
    config::RetryPolicy,
    env::MonotonicInstant,
    error::ChatError,
    message::{ConversationId, Message, UserId},
};

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Never opened.
    Idle,
    /// First connection attempt in progress.
    Connecting,
    /// Transport is up and the room was joined.
    Connected,
    /// Transport dropped. Waiting for, or performing, retry `attempt`.
    Reconnecting {
        /// 1-based retry attempt.
        attempt: u32,
    },
    /// Retry policy exhausted. Sends still fail only at the send call.
    Failed,
    /// Closed by the client.
    Closed,
}

/// Identifies one `open` of a [`LiveConnection`].
///
/// A handle from an earlier `open` does not close a later one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionHandle(u64);

/// Actions for the driver to execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionAction {
    /// Establish the transport, attaching the auth token.
    Connect {
        /// Room to join once connected.
        conversation_id: ConversationId,
        /// Bearer token.
        auth_token: String,
        /// 0 for the first attempt, then the retry attempt number.
        attempt: u32,
    },
    /// Send this event over the transport.
    Emit(LiveEvent),
    /// Tear the transport down.
    Disconnect,
}

/// Inbound event after decoding, as delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    /// A message was posted to the room.
    Message(Message),
    /// A room member is typing.
    Typing(UserId),
}

/// Receiving end of an `on_message` or `on_typing` subscription.
///
/// Dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscription<T> {
    rx: mpsc::UnboundedReceiver<T>,
}

impl<T> Subscription<T> {
    /// Wait for the next event. `None` once the connection is closed and all
    /// buffered events were taken.
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// Take the next buffered event without waiting.
    pub fn try_recv(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    /// Stop receiving events.
    pub fn unsubscribe(self) {}
}

/// Live channel lifecycle.
///
/// Pure state machine: time is passed in, actions come out.
#[derive(Debug)]
pub struct LiveConnection<I> {
    state: ConnectionState,
    policy: RetryPolicy,
    self_id: UserId,
    conversation_id: Option<ConversationId>,
    auth_token: Option<String>,
    generation: u64,
    retry_at: Option<I>,
    last_error: Option<ChatError>,
    message_subscribers: Vec<mpsc::UnboundedSender<Message>>,
    typing_subscribers: Vec<mpsc::UnboundedSender<UserId>>,
}

impl<I: MonotonicInstant> LiveConnection<I> {
    /// Create an idle connection for `self_id`.
    pub fn new(self_id: impl Into<UserId>, policy: RetryPolicy) -> Self {
        Self {
            state: ConnectionState::Idle,
            policy,
            self_id: self_id.into(),
            conversation_id: None,
            auth_token: None,
            generation: 0,
            retry_at: None,
            last_error: None,
            message_subscribers: Vec::new(),
            typing_subscribers: Vec::new(),
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// True while the transport is up.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Most recent transport error, cleared on successful connect.
    pub fn last_error(&self) -> Option<&ChatError> {
        self.last_error.as_ref()
    }

    /// Conversation of the current `open`.
    pub fn conversation_id(&self) -> Option<&str> {
        self.conversation_id.as_deref()
    }

    /// Start connecting to `conversation_id`.
    ///
    /// # Errors
    ///
    /// - `ChatError::InvalidState` if the connection is already open
    pub fn open(
        &mut self,
        conversation_id: impl Into<ConversationId>,
        auth_token: impl Into<String>,
    ) -> Result<(ConnectionHandle, Vec<ConnectionAction>), ChatError> {
        match self.state {
            ConnectionState::Idle | ConnectionState::Failed | ConnectionState::Closed => {},
            state @ (ConnectionState::Connecting
            | ConnectionState::Connected
            | ConnectionState::Reconnecting { .. }) => {
                return Err(ChatError::InvalidState { state, operation: "open" });
            },
        }

        let conversation_id = conversation_id.into();
        let auth_token = auth_token.into();

        self.generation += 1;
        self.state = ConnectionState::Connecting;
        self.retry_at = None;
        self.last_error = None;
        self.conversation_id = Some(conversation_id.clone());
        self.auth_token = Some(auth_token.clone());

        info!(conversation_id = %conversation_id, "opening live connection");
        Ok((
            ConnectionHandle(self.generation),
            vec![ConnectionAction::Connect { conversation_id, auth_token, attempt: 0 }],
        ))
    }

    /// Transport came up. Announces room membership.
    pub fn on_transport_open(&mut self) -> Vec<ConnectionAction> {
        match self.state {
            ConnectionState::Connecting | ConnectionState::Reconnecting { .. } => {},
            ConnectionState::Closed => return vec![ConnectionAction::Disconnect],
            ConnectionState::Idle | ConnectionState::Connected | ConnectionState::Failed => {
                return Vec::new();
            },
        }

        let Some(conversation_id) = self.conversation_id.clone() else {
            return Vec::new();
        };

        self.state = ConnectionState::Connected;
        self.retry_at = None;
        self.last_error = None;
        info!(conversation_id = %conversation_id, "live connection established");

        vec![ConnectionAction::Emit(LiveEvent::JoinChat(JoinChat {
            chat_id: conversation_id,
            user_id: self.self_id.clone(),
        }))]
    }

    /// Transport dropped or a connect attempt failed, without the client
    /// asking for it.
    ///
    /// Schedules the next attempt per the retry policy, or moves to
    /// [`ConnectionState::Failed`] once it is exhausted.
    pub fn on_transport_closed(&mut self, reason: impl Into<String>, now: I) {
        let attempt = match self.state {
            ConnectionState::Connecting | ConnectionState::Connected => 1,
            ConnectionState::Reconnecting { attempt } => attempt + 1,
            ConnectionState::Idle | ConnectionState::Failed | ConnectionState::Closed => return,
        };

        let reason = reason.into();
        self.last_error = Some(ChatError::Transport { reason: reason.clone() });

        if let Some(delay) = self.policy.delay_for(attempt) {
            warn!(attempt, ?delay, %reason, "live connection dropped, retrying");
            self.state = ConnectionState::Reconnecting { attempt };
            self.retry_at = Some(now + delay);
        } else {
            warn!(%reason, max_attempts = self.policy.max_attempts, "live connection failed");
            self.state = ConnectionState::Failed;
            self.retry_at = None;
        }
    }

    /// Next instant at which [`Self::tick`] has work to do.
    pub fn next_deadline(&self) -> Option<I> {
        self.retry_at
    }

    /// Fire a scheduled reconnect.
    pub fn tick(&mut self, now: I) -> Vec<ConnectionAction> {
        let ConnectionState::Reconnecting { attempt } = self.state else {
            return Vec::new();
        };
        if self.retry_at.is_none_or(|at| now < at) {
            return Vec::new();
        }
        self.retry_at = None;

        match (self.conversation_id.clone(), self.auth_token.clone()) {
            (Some(conversation_id), Some(auth_token)) => {
                debug!(attempt, "reconnecting");
                vec![ConnectionAction::Connect { conversation_id, auth_token, attempt }]
            },
            _ => Vec::new(),
        }
    }

    /// Queue an outbound event.
    ///
    /// Emits regardless of whether the transport is up; delivery fails only
    /// at the transport.
    ///
    /// # Errors
    ///
    /// - `ChatError::InvalidState` if the connection was never opened or is
    ///   closed
    pub fn emit(&self, event: LiveEvent) -> Result<Vec<ConnectionAction>, ChatError> {
        match self.state {
            ConnectionState::Idle | ConnectionState::Closed => {
                Err(ChatError::InvalidState { state: self.state, operation: "emit" })
            },
            ConnectionState::Connecting
            | ConnectionState::Connected
            | ConnectionState::Reconnecting { .. }
            | ConnectionState::Failed => Ok(vec![ConnectionAction::Emit(event)]),
        }
    }

    /// Decode an inbound event and fan it out to subscribers.
    ///
    /// Returns the decoded event for the owner to act on. Nothing is
    /// delivered once the connection is closed.
    pub fn dispatch(&mut self, event: LiveEvent) -> Option<InboundEvent> {
        if self.state == ConnectionState::Closed {
            return None;
        }

        match event {
            LiveEvent::ReceiveMessage(wire) => {
                let message = Message::from_wire(wire);
                self.message_subscribers.retain(|tx| tx.send(message.clone()).is_ok());
                Some(InboundEvent::Message(message))
            },
            LiveEvent::UserTyping(user_id) => {
                self.typing_subscribers.retain(|tx| tx.send(user_id.clone()).is_ok());
                Some(InboundEvent::Typing(user_id))
            },
            outbound @ (LiveEvent::JoinChat(_) | LiveEvent::Typing(_) | LiveEvent::SendMessage(_)) => {
                warn!(event = outbound.name(), "outbound event received from server");
                None
            },
        }
    }

    /// Subscribe to inbound messages.
    pub fn on_message(&mut self) -> Subscription<Message> {
        let (tx, rx) = mpsc::unbounded_channel();
        if self.state != ConnectionState::Closed {
            self.message_subscribers.push(tx);
        }
        Subscription { rx }
    }

    /// Subscribe to inbound typing signals.
    pub fn on_typing(&mut self) -> Subscription<UserId> {
        let (tx, rx) = mpsc::unbounded_channel();
        if self.state != ConnectionState::Closed {
            self.typing_subscribers.push(tx);
        }
        Subscription { rx }
    }

    /// Close the connection opened with `handle` and drop all subscribers.
    ///
    /// Stale handles and repeated closes are no-ops.
    pub fn close(&mut self, handle: ConnectionHandle) -> Vec<ConnectionAction> {
        if handle.0 != self.generation || self.state == ConnectionState::Closed {
            return Vec::new();
        }

        self.state = ConnectionState::Closed;
        self.retry_at = None;
        self.message_subscribers.clear();
        self.typing_subscribers.clear();
        info!(conversation_id = ?self.conversation_id, "live connection closed");
        vec![ConnectionAction::Disconnect]
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use chrono::{DateTime, Utc};
    use sparkchat_proto::{TypingSignal, WireMessage};

    use super::*;

    fn opened() -> (LiveConnection<Instant>, ConnectionHandle, Instant) {
        let mut conn = LiveConnection::new("me", RetryPolicy::default());
        let (handle, actions) = conn.open("m1", "token").unwrap();
        assert_eq!(actions, vec![ConnectionAction::Connect {
            conversation_id: "m1".to_string(),
            auth_token: "token".to_string(),
            attempt: 0,
        }]);
        (conn, handle, Instant::now())
    }

    fn wire(text: &str) -> WireMessage {
        WireMessage {
            id: "1".to_string(),
            chat_id: "m1".to_string(),
            sender: "u2".to_string(),
            text: text.to_string(),
            created_at: DateTime::<Utc>::UNIX_EPOCH,
        }
    }

    fn join() -> ConnectionAction {
        ConnectionAction::Emit(LiveEvent::JoinChat(JoinChat {
            chat_id: "m1".to_string(),
            user_id: "me".to_string(),
        }))
    }

    #[test]
    fn open_announces_room_membership_once_connected() {
        let (mut conn, _, _) = opened();
        assert_eq!(conn.state(), ConnectionState::Connecting);

        assert_eq!(conn.on_transport_open(), vec![join()]);
        assert!(conn.is_connected());
    }

    #[test]
    fn open_twice_is_rejected() {
        let (mut conn, _, _) = opened();
        let result = conn.open("m1", "token");
        assert!(matches!(result, Err(ChatError::InvalidState { operation: "open", .. })));
    }

    #[test]
    fn drop_schedules_reconnect_and_rejoins() {
        let (mut conn, _, t0) = opened();
        conn.on_transport_open();

        conn.on_transport_closed("reset by peer", t0);
        assert_eq!(conn.state(), ConnectionState::Reconnecting { attempt: 1 });
        assert!(conn.last_error().is_some_and(ChatError::is_transient));
        assert_eq!(conn.next_deadline(), Some(t0 + Duration::from_secs(1)));

        assert!(conn.tick(t0 + Duration::from_millis(500)).is_empty());
        let actions = conn.tick(t0 + Duration::from_secs(1));
        assert!(matches!(actions.as_slice(), [ConnectionAction::Connect { attempt: 1, .. }]));
        assert!(conn.tick(t0 + Duration::from_secs(2)).is_empty());

        assert_eq!(conn.on_transport_open(), vec![join()]);
        assert!(conn.last_error().is_none());
    }

    #[test]
    fn retries_stop_after_five_attempts() {
        let (mut conn, _, mut now) = opened();
        conn.on_transport_open();

        for attempt in 1..=5 {
            conn.on_transport_closed("refused", now);
            assert_eq!(conn.state(), ConnectionState::Reconnecting { attempt });
            now += Duration::from_secs(10);
            assert_eq!(conn.tick(now).len(), 1);
        }

        conn.on_transport_closed("refused", now);
        assert_eq!(conn.state(), ConnectionState::Failed);
        assert_eq!(conn.next_deadline(), None);

        // sends are still attempted
        let typing = LiveEvent::Typing(TypingSignal { chat_id: "m1".into(), user_id: "me".into() });
        assert!(conn.emit(typing).is_ok());
    }

    #[test]
    fn subscribers_receive_inbound_events_in_order() {
        let (mut conn, _, _) = opened();
        let mut messages = conn.on_message();
        let mut typing = conn.on_typing();

        conn.dispatch(LiveEvent::ReceiveMessage(wire("a")));
        conn.dispatch(LiveEvent::UserTyping("u2".to_string()));
        conn.dispatch(LiveEvent::ReceiveMessage(wire("b")));

        assert_eq!(messages.try_recv().map(|m| m.text), Some("a".to_string()));
        assert_eq!(messages.try_recv().map(|m| m.text), Some("b".to_string()));
        assert_eq!(typing.try_recv(), Some("u2".to_string()));
        assert_eq!(typing.try_recv(), None);
    }

    #[test]
    fn dropped_subscription_is_pruned() {
        let (mut conn, _, _) = opened();
        conn.on_message().unsubscribe();
        let mut kept = conn.on_message();

        conn.dispatch(LiveEvent::ReceiveMessage(wire("a")));

        assert_eq!(conn.message_subscribers.len(), 1);
        assert!(kept.try_recv().is_some());
    }

    #[test]
    fn close_tears_down_listeners_synchronously() {
        let (mut conn, handle, _) = opened();
        let mut messages = conn.on_message();

        assert_eq!(conn.close(handle), vec![ConnectionAction::Disconnect]);
        assert_eq!(conn.dispatch(LiveEvent::ReceiveMessage(wire("late"))), None);
        assert_eq!(messages.try_recv(), None);
        assert!(conn.close(handle).is_empty());

        let typing = LiveEvent::UserTyping("u2".into());
        assert!(matches!(conn.emit(typing), Err(ChatError::InvalidState { operation: "emit", .. })));
    }

    #[test]
    fn stale_handle_does_not_close_reopened_connection() {
        let (mut conn, first, _) = opened();
        conn.close(first);
        let (second, _) = conn.open("m1", "token").unwrap();

        assert!(conn.close(first).is_empty());
        assert_eq!(conn.state(), ConnectionState::Connecting);
        assert_eq!(conn.close(second), vec![ConnectionAction::Disconnect]);
    }

    #[test]
    fn transport_open_after_close_disconnects() {
        let (mut conn, handle, _) = opened();
        conn.close(handle);
        assert_eq!(conn.on_transport_open(), vec![ConnectionAction::Disconnect]);
    }
}
