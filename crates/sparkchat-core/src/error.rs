//! Error taxonomy for the chat core.
//!
//! Every error is recovered at the component that detects it. None of them is
//! fatal to a conversation view: the worst user-visible outcome is a failed
//! send alert.
//!
//! A duplicate message is NOT an error. The reconciler reports it as
//! [`crate::IngestOutcome::DuplicateIgnored`].

use std::time::Duration;

use thiserror::Error;

use crate::connection::ConnectionState;

/// Errors produced by the chat state machines.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChatError {
    /// Live channel dropped, timed out or refused the connection
    #[error("transport error: {reason}")]
    Transport {
        /// Transport-level description
        reason: String,
    },

    /// Send request was rejected or errored
    #[error("send failed: {reason}")]
    SendFailure {
        /// Backend-level description
        reason: String,
    },

    /// Notification permission was refused
    #[error("notification permission denied")]
    PermissionDenied,

    /// Message text was empty or whitespace only
    #[error("message is empty")]
    EmptyMessage,

    /// Identical message submitted again inside the duplicate window
    #[error("duplicate send: identical message already submitted within {window:?}")]
    DuplicateSend {
        /// Duplicate-detection window in effect
        window: Duration,
    },

    /// Operation not valid in the current connection state
    #[error("invalid connection state: cannot {operation} from {state:?}")]
    InvalidState {
        /// State when the operation was attempted
        state: ConnectionState,
        /// Operation that was attempted
        operation: &'static str,
    },
}

impl ChatError {
    /// Returns true if this error may succeed on retry without user action.
    ///
    /// Only transport errors qualify; they feed the reconnect policy. Send
    /// failures are retried manually by the user, and permission denial is
    /// terminal.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }

    /// Message suitable for showing to the user. `None` for errors that are
    /// only logged.
    pub fn user_message(&self) -> Option<&'static str> {
        match self {
            Self::SendFailure { .. } => Some("Failed to send message. Please try again."),
            Self::Transport { .. }
            | Self::PermissionDenied
            | Self::EmptyMessage
            | Self::DuplicateSend { .. }
            | Self::InvalidState { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_errors_are_transient() {
        assert!(ChatError::Transport { reason: "reset".to_string() }.is_transient());
    }

    #[test]
    fn everything_else_is_not_transient() {
        assert!(!ChatError::SendFailure { reason: "500".to_string() }.is_transient());
        assert!(!ChatError::PermissionDenied.is_transient());
        assert!(!ChatError::EmptyMessage.is_transient());
        assert!(
            !ChatError::DuplicateSend { window: Duration::from_secs(1) }.is_transient()
        );
        assert!(
            !ChatError::InvalidState { state: ConnectionState::Closed, operation: "emit" }
                .is_transient()
        );
    }

    #[test]
    fn only_send_failures_reach_the_user() {
        assert!(ChatError::SendFailure { reason: "500".to_string() }.user_message().is_some());
        assert!(ChatError::Transport { reason: "reset".to_string() }.user_message().is_none());
        assert!(ChatError::PermissionDenied.user_message().is_none());
    }
}
