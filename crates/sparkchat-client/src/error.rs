//! Session error types.

use sparkchat_core::ChatError;
use thiserror::Error;

use crate::session::Phase;

/// Errors returned by [`crate::ChatSession::handle`].
///
/// None of these is fatal to the session; the driver logs them and keeps
/// running.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// No bearer token available. Bootstrap cannot start.
    #[error("no auth token available")]
    MissingAuthToken,

    /// Event not valid in the current phase
    #[error("cannot {operation} while {phase:?}")]
    InvalidPhase {
        /// Phase when the event arrived
        phase: Phase,
        /// Operation that was attempted
        operation: &'static str,
    },

    /// Core state machine rejected the operation
    #[error(transparent)]
    Chat(#[from] ChatError),
}
