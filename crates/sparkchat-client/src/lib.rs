//! Sparkchat client
//!
//! Session orchestration for one open conversation: bootstrap, live channel,
//! optimistic sends and teardown, plus the process-wide push driver and the
//! timeline view model.
//!
//! # Architecture
//!
//! [`ChatSession`] follows the same sans-IO, action-based pattern as
//! [`sparkchat_core`]. It receives events ([`SessionEvent`]), runs them
//! through the core state machines, and returns actions ([`SessionAction`])
//! for the caller to execute. [`Runtime`] is the async driver that executes
//! those actions against a [`ChatBackend`] and a [`LiveTransport`]; the
//! transport runs in its own task so the loop never waits on the live
//! channel.
//!
//! # Components
//!
//! - [`ChatSession`]: per-conversation state machine
//! - [`Runtime`]: tokio event loop around a session
//! - [`PushClient`]: permission, registration and notification driver
//! - [`timeline`]: day grouping, sender runs, auto-scroll
//! - [`SystemEnv`]: production environment
//!
//! # Transport (optional)
//!
//! With the `transport` feature enabled, this crate also provides:
//! - [`transport::HttpBackend`]: REST API over reqwest
//! - [`transport::WsTransport`]: live channel over a WebSocket

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod backend;
mod error;
mod event;
mod live;
mod push;
mod runtime;
mod session;
mod system_env;
pub mod timeline;

#[cfg(feature = "transport")]
pub mod transport;

pub use backend::{BackendError, ChatBackend, LiveTransport};
pub use error::SessionError;
pub use event::{SessionAction, SessionEvent, SessionUpdate};
pub use push::{NotificationSink, PermissionPrompt, PushClient, PushEndpoint};
pub use runtime::{Command, Runtime, TICK_INTERVAL};
pub use session::{ChatSession, Phase, SessionIdentity};
pub use sparkchat_core::{ChatConfig, env::Environment};
pub use system_env::SystemEnv;
