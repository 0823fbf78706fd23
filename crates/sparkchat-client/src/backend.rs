//! Collaborator seams.
//!
//! The session never talks to the network itself. REST calls go through
//! [`ChatBackend`], the live channel through [`LiveTransport`]. Production
//! implementations live in [`crate::transport`] behind the `transport`
//! feature; tests use in-memory fakes.

use std::future::Future;

use async_trait::async_trait;
use sparkchat_proto::{
    LiveEvent, MatchInfo, PushAck, PushSubscriptionRequest, SendMessageRequest, WireMessage,
};
use thiserror::Error;

/// Errors from REST collaborators.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// Bearer token rejected
    #[error("unauthorized")]
    Unauthorized,

    /// Server answered with a non-success status
    #[error("http {status}: {reason}")]
    Http {
        /// HTTP status code
        status: u16,
        /// Response body or status text
        reason: String,
    },

    /// Request never got an answer
    #[error("network error: {reason}")]
    Network {
        /// Transport-level description
        reason: String,
    },

    /// Response body did not match the expected shape
    #[error("invalid response: {reason}")]
    Decode {
        /// Decoder description
        reason: String,
    },
}

/// REST API used by a chat session.
#[async_trait]
pub trait ChatBackend: Send + Sync + 'static {
    /// `GET` match metadata (peer profile and online flag).
    async fn fetch_metadata(
        &self,
        conversation_id: &str,
        auth_token: &str,
    ) -> Result<MatchInfo, BackendError>;

    /// `GET` message history, oldest first.
    async fn fetch_history(
        &self,
        conversation_id: &str,
        auth_token: &str,
    ) -> Result<Vec<WireMessage>, BackendError>;

    /// `POST` a message. The server assigns the canonical id.
    async fn post_message(
        &self,
        request: &SendMessageRequest,
        auth_token: &str,
    ) -> Result<WireMessage, BackendError>;

    /// `POST` a push endpoint registration.
    async fn register_push(
        &self,
        request: &PushSubscriptionRequest,
        auth_token: &str,
    ) -> Result<PushAck, BackendError>;
}

/// Bidirectional live channel.
///
/// The runtime moves the transport into a dedicated task. `recv` must be
/// cancel-safe: that task polls it inside `select!`. A `connect` that is
/// still pending when the connection is abandoned is dropped.
pub trait LiveTransport: Send {
    /// Transport-specific error type.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Establish the channel, attaching the bearer token.
    fn connect(
        &mut self,
        conversation_id: &str,
        auth_token: &str,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Send one event.
    fn send(&mut self, event: LiveEvent) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Next inbound event. `None` once the channel is closed.
    fn recv(&mut self) -> impl Future<Output = Option<LiveEvent>> + Send;

    /// Tear the channel down. Idempotent.
    fn disconnect(&mut self) -> impl Future<Output = ()> + Send;
}
