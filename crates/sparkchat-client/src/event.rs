//! Session events and actions.

use sparkchat_core::{ConnectionState, Message, PendingSend, UserId};
use sparkchat_proto::{LiveEvent, MatchInfo, SendMessageRequest, WireMessage};

use crate::backend::BackendError;

/// Events the driver feeds into the session.
///
/// The driver is responsible for:
/// - Executing REST calls and reporting their results
/// - Receiving live events and transport state changes
/// - Driving time forward via ticks
/// - Forwarding user intents (send, typing, close)
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Enter the conversation.
    Start,

    /// Metadata and history fetches finished.
    BootstrapLoaded {
        /// Match metadata.
        metadata: Result<MatchInfo, BackendError>,
        /// Message history, oldest first.
        history: Result<Vec<WireMessage>, BackendError>,
    },

    /// Live transport is up.
    TransportOpened,

    /// Live transport dropped or failed to connect.
    TransportClosed {
        /// Transport-level description.
        reason: String,
    },

    /// Inbound live event.
    LiveReceived(LiveEvent),

    /// Local input changed.
    LocalTyping,

    /// User submitted a message.
    SendText {
        /// Message body.
        text: String,
    },

    /// A send request finished.
    SendCompleted {
        /// Handle returned when the send was queued.
        handle: PendingSend,
        /// Server's copy of the message, or the failure.
        result: Result<WireMessage, BackendError>,
    },

    /// Periodic tick for timers.
    Tick,

    /// Leave the conversation.
    Close,
}

/// Actions produced by the session for the driver to execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionAction {
    /// Fetch metadata and history concurrently, then report
    /// [`SessionEvent::BootstrapLoaded`].
    FetchBootstrap {
        /// Conversation to load.
        conversation_id: String,
        /// Bearer token.
        auth_token: String,
    },

    /// Establish the live transport.
    Connect {
        /// Conversation room.
        conversation_id: String,
        /// Bearer token.
        auth_token: String,
        /// 0 for the first attempt, then the retry attempt number.
        attempt: u32,
    },

    /// Send an event over the live transport.
    Emit(LiveEvent),

    /// Tear the live transport down.
    Disconnect,

    /// Persist a message, then report [`SessionEvent::SendCompleted`].
    PostMessage {
        /// Handle to report back.
        handle: PendingSend,
        /// Request body.
        request: SendMessageRequest,
        /// Bearer token.
        auth_token: String,
    },

    /// The message list changed.
    MessagesChanged,

    /// The peer typing indicator changed.
    TypingChanged {
        /// Peer shown as typing, if any.
        peer: Option<UserId>,
    },

    /// The live connection state changed.
    ConnectionChanged(ConnectionState),

    /// Show an alert to the user.
    Alert {
        /// Alert text.
        message: String,
    },
}

/// Snapshot pushed to the UI by the runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionUpdate {
    /// Full message list after a change.
    Messages(Vec<Message>),
    /// Peer typing indicator.
    Typing(Option<UserId>),
    /// Live connection state.
    Connection(ConnectionState),
    /// Alert text.
    Alert(String),
}
