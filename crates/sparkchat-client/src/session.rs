//! Chat session state machine.
//!
//! One session per open conversation. It owns the reconciler, the typing
//! debouncer and the live connection, and is the only writer into the
//! reconciler.
//!
//! # Phases
//!
//! ```text
//! ┌─────────┐ Start ┌───────────────┐ BootstrapLoaded ┌───────┐
//! │ Created │──────>│ Bootstrapping │────────────────>│ Ready │
//! └─────────┘       └───────────────┘                 └───────┘
//!                          │ Close                        │ Close
//!                          ↓                              ↓
//!                     ┌────────┐                     ┌────────┐
//!                     │ Closed │                     │ Closed │
//!                     └────────┘                     └────────┘
//! ```
//!
//! Live events that arrive while bootstrapping are buffered and replayed in
//! arrival order right after the history seed. After `Close` every late
//! result (send responses, live events, fetches) is discarded.

use std::mem;

use sparkchat_core::{
    ChatConfig, ChatError, ConnectionAction, ConnectionHandle, ConnectionState, ConversationView,
    InboundEvent, IngestOutcome, LiveConnection, Message, PendingSend, Reconciler, SendOutcome,
    TypingDebouncer, env::Environment,
};
use sparkchat_proto::{
    LiveEvent, MatchInfo, OutgoingMessage, SendMessageRequest, TypingSignal, WireMessage,
};
use tracing::{debug, info, warn};

use crate::{
    backend::BackendError,
    error::SessionError,
    event::{SessionAction, SessionEvent},
};

/// Session lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Not started.
    Created,
    /// Waiting for metadata and history.
    Bootstrapping,
    /// History seeded, live events flow into the reconciler.
    Ready,
    /// Torn down.
    Closed,
}

/// Who is chatting where.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionIdentity {
    /// Conversation (match) to open.
    pub conversation_id: String,
    /// Local user.
    pub user_id: String,
    /// Bearer token, if the user is signed in.
    pub auth_token: Option<String>,
}

/// State machine for one open conversation.
pub struct ChatSession<E: Environment> {
    env: E,
    identity: SessionIdentity,
    phase: Phase,
    reconciler: Reconciler,
    typing: TypingDebouncer<E::Instant>,
    connection: LiveConnection<E::Instant>,
    handle: Option<ConnectionHandle>,
    metadata: Option<MatchInfo>,
    buffered: Vec<LiveEvent>,
}

impl<E: Environment> ChatSession<E> {
    /// Create a session. Nothing happens until [`SessionEvent::Start`].
    pub fn new(env: E, config: &ChatConfig, identity: SessionIdentity) -> Self {
        let reconciler = Reconciler::new(
            identity.conversation_id.clone(),
            identity.user_id.clone(),
            config.dedup_tolerance,
            env.random_u64(),
        );
        let typing = TypingDebouncer::new(
            identity.conversation_id.clone(),
            identity.user_id.clone(),
            config.typing_throttle,
            config.typing_expiry,
        );
        let connection = LiveConnection::new(identity.user_id.clone(), config.retry);

        Self {
            env,
            identity,
            phase: Phase::Created,
            reconciler,
            typing,
            connection,
            handle: None,
            metadata: None,
            buffered: Vec::new(),
        }
    }

    /// Current phase.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Conversation this session belongs to.
    pub fn conversation_id(&self) -> &str {
        &self.identity.conversation_id
    }

    /// Reconciled message list.
    pub fn messages(&self) -> &[Message] {
        self.reconciler.messages()
    }

    /// Match metadata, once loaded.
    pub fn metadata(&self) -> Option<&MatchInfo> {
        self.metadata.as_ref()
    }

    /// Live connection state.
    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Most recent live connection error.
    pub fn connection_error(&self) -> Option<&ChatError> {
        self.connection.last_error()
    }

    /// Peer shown as typing, if any.
    pub fn typing_peer(&self) -> Option<&str> {
        self.typing.typing_peer(self.env.now())
    }

    /// The conversation as seen by push handling.
    pub fn view(&self, visible: bool) -> ConversationView<'_> {
        ConversationView { visible, reconciler: &self.reconciler }
    }

    /// Earliest instant at which a tick has work to do.
    pub fn next_deadline(&self) -> Option<E::Instant> {
        match (self.typing.next_deadline(), self.connection.next_deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Process an event and return resulting actions.
    pub fn handle(&mut self, event: SessionEvent) -> Result<Vec<SessionAction>, SessionError> {
        match event {
            SessionEvent::Start => self.handle_start(),
            SessionEvent::BootstrapLoaded { metadata, history } => {
                Ok(self.handle_bootstrap_loaded(metadata, history))
            },
            SessionEvent::TransportOpened => Ok(self.handle_transport_opened()),
            SessionEvent::TransportClosed { reason } => Ok(self.handle_transport_closed(reason)),
            SessionEvent::LiveReceived(event) => Ok(self.handle_live(event)),
            SessionEvent::LocalTyping => Ok(self.handle_local_typing()),
            SessionEvent::SendText { text } => self.handle_send_text(&text),
            SessionEvent::SendCompleted { handle, result } => {
                Ok(self.handle_send_completed(&handle, result))
            },
            SessionEvent::Tick => Ok(self.handle_tick()),
            SessionEvent::Close => Ok(self.handle_close()),
        }
    }

    fn handle_start(&mut self) -> Result<Vec<SessionAction>, SessionError> {
        if self.phase != Phase::Created {
            return Err(SessionError::InvalidPhase { phase: self.phase, operation: "start" });
        }
        let auth_token = self.auth_token()?;

        self.phase = Phase::Bootstrapping;
        info!(conversation_id = %self.identity.conversation_id, "bootstrapping conversation");
        Ok(vec![SessionAction::FetchBootstrap {
            conversation_id: self.identity.conversation_id.clone(),
            auth_token,
        }])
    }

    fn handle_bootstrap_loaded(
        &mut self,
        metadata: Result<MatchInfo, BackendError>,
        history: Result<Vec<WireMessage>, BackendError>,
    ) -> Vec<SessionAction> {
        if self.phase != Phase::Bootstrapping {
            debug!(phase = ?self.phase, "bootstrap result discarded");
            return Vec::new();
        }

        match metadata {
            Ok(info) => self.metadata = Some(info),
            Err(error) => warn!(%error, "failed to fetch match metadata"),
        }
        let history = history.unwrap_or_else(|error| {
            warn!(%error, "failed to fetch message history");
            Vec::new()
        });

        self.reconciler.seed(history.into_iter().map(Message::from_wire).collect());
        self.phase = Phase::Ready;

        let mut actions = vec![SessionAction::MessagesChanged];

        let buffered = mem::take(&mut self.buffered);
        if !buffered.is_empty() {
            debug!(count = buffered.len(), "replaying buffered live events");
        }
        for event in buffered {
            actions.extend(self.dispatch_live(event));
        }

        let Some(auth_token) = self.identity.auth_token.clone() else {
            return actions;
        };
        match self.connection.open(self.identity.conversation_id.clone(), auth_token) {
            Ok((handle, connection_actions)) => {
                self.handle = Some(handle);
                actions.push(SessionAction::ConnectionChanged(self.connection.state()));
                actions.extend(connection_actions.into_iter().map(SessionAction::from));
            },
            Err(error) => warn!(%error, "live connection not opened"),
        }
        actions
    }

    fn handle_transport_opened(&mut self) -> Vec<SessionAction> {
        let mut actions: Vec<SessionAction> =
            self.connection.on_transport_open().into_iter().map(SessionAction::from).collect();
        if self.connection.is_connected() {
            actions.insert(0, SessionAction::ConnectionChanged(ConnectionState::Connected));
        }
        actions
    }

    fn handle_transport_closed(&mut self, reason: String) -> Vec<SessionAction> {
        let before = self.connection.state();
        self.connection.on_transport_closed(reason, self.env.now());
        let after = self.connection.state();
        if before == after {
            Vec::new()
        } else {
            vec![SessionAction::ConnectionChanged(after)]
        }
    }

    fn handle_live(&mut self, event: LiveEvent) -> Vec<SessionAction> {
        match self.phase {
            Phase::Created | Phase::Bootstrapping => {
                self.buffered.push(event);
                Vec::new()
            },
            Phase::Ready => self.dispatch_live(event),
            Phase::Closed => Vec::new(),
        }
    }

    fn dispatch_live(&mut self, event: LiveEvent) -> Vec<SessionAction> {
        match self.connection.dispatch(event) {
            Some(InboundEvent::Message(message)) => match self.reconciler.ingest_live(message) {
                IngestOutcome::Inserted { .. } => vec![SessionAction::MessagesChanged],
                IngestOutcome::DuplicateIgnored | IngestOutcome::OtherConversation => Vec::new(),
            },
            Some(InboundEvent::Typing(peer_id)) => {
                let now = self.env.now();
                let was = self.typing.typing_peer(now).map(str::to_string);
                self.typing.on_peer_typing(&peer_id, now);
                let peer = self.typing.typing_peer(now).map(str::to_string);
                if peer == was { Vec::new() } else { vec![SessionAction::TypingChanged { peer }] }
            },
            None => Vec::new(),
        }
    }

    fn handle_local_typing(&mut self) -> Vec<SessionAction> {
        if self.phase != Phase::Ready || !self.typing.notify_local_typing(self.env.now()) {
            return Vec::new();
        }

        let signal = LiveEvent::Typing(TypingSignal {
            chat_id: self.identity.conversation_id.clone(),
            user_id: self.identity.user_id.clone(),
        });
        self.emit(signal)
    }

    fn handle_send_text(&mut self, text: &str) -> Result<Vec<SessionAction>, SessionError> {
        match self.phase {
            Phase::Bootstrapping | Phase::Ready => {},
            Phase::Created | Phase::Closed => {
                return Err(SessionError::InvalidPhase { phase: self.phase, operation: "send" });
            },
        }
        let auth_token = self.auth_token()?;

        let handle = self.reconciler.ingest_local_send(text, self.env.wall_clock())?;
        let pending = handle.message();
        let request = SendMessageRequest {
            chat_id: pending.conversation_id.clone(),
            sender: pending.sender_id.clone(),
            text: pending.text.clone(),
            created_at: pending.created_at,
        };
        let live = LiveEvent::SendMessage(OutgoingMessage {
            chat_id: request.chat_id.clone(),
            sender: request.sender.clone(),
            text: request.text.clone(),
            created_at: request.created_at,
        });

        let mut actions = vec![SessionAction::MessagesChanged];
        actions.extend(self.emit(live));
        actions.push(SessionAction::PostMessage { handle, request, auth_token });
        Ok(actions)
    }

    fn handle_send_completed(
        &mut self,
        handle: &PendingSend,
        result: Result<WireMessage, BackendError>,
    ) -> Vec<SessionAction> {
        if self.phase == Phase::Closed {
            debug!(message_id = %handle.id(), "send result after close discarded");
            return Vec::new();
        }

        match result {
            Ok(wire) => match self.reconciler.confirm_send(handle, Message::from_wire(wire)) {
                SendOutcome::Confirmed { .. } => vec![SessionAction::MessagesChanged],
                SendOutcome::Removed { .. } | SendOutcome::Unknown => Vec::new(),
            },
            Err(error) => {
                let failure = ChatError::SendFailure { reason: error.to_string() };
                warn!(message_id = %handle.id(), %failure, "send failed");

                let mut actions = Vec::new();
                if let SendOutcome::Removed { .. } = self.reconciler.fail_send(handle) {
                    actions.push(SessionAction::MessagesChanged);
                }
                if let Some(message) = failure.user_message() {
                    actions.push(SessionAction::Alert { message: message.to_string() });
                }
                actions
            },
        }
    }

    fn handle_tick(&mut self) -> Vec<SessionAction> {
        if self.phase == Phase::Closed {
            return Vec::new();
        }

        let now = self.env.now();
        let mut actions = Vec::new();
        if self.typing.tick(now) {
            actions.push(SessionAction::TypingChanged { peer: None });
        }
        actions.extend(self.connection.tick(now).into_iter().map(SessionAction::from));
        actions
    }

    fn handle_close(&mut self) -> Vec<SessionAction> {
        if self.phase == Phase::Closed {
            return Vec::new();
        }

        self.phase = Phase::Closed;
        self.buffered.clear();
        info!(conversation_id = %self.identity.conversation_id, "conversation closed");

        let mut actions = Vec::new();
        if let Some(handle) = self.handle.take() {
            actions.extend(self.connection.close(handle).into_iter().map(SessionAction::from));
            actions.push(SessionAction::ConnectionChanged(ConnectionState::Closed));
        }
        actions
    }

    fn emit(&self, event: LiveEvent) -> Vec<SessionAction> {
        match self.connection.emit(event) {
            Ok(actions) => actions.into_iter().map(SessionAction::from).collect(),
            Err(error) => {
                debug!(%error, "live event not emitted");
                Vec::new()
            },
        }
    }

    fn auth_token(&self) -> Result<String, SessionError> {
        self.identity.auth_token.clone().ok_or(SessionError::MissingAuthToken)
    }
}

impl From<ConnectionAction> for SessionAction {
    fn from(action: ConnectionAction) -> Self {
        match action {
            ConnectionAction::Connect { conversation_id, auth_token, attempt } => {
                Self::Connect { conversation_id, auth_token, attempt }
            },
            ConnectionAction::Emit(event) => Self::Emit(event),
            ConnectionAction::Disconnect => Self::Disconnect,
        }
    }
}
