//! Sparkchat core
//!
//! Sans-IO state machines for a single chat conversation: the message
//! reconciler, the typing debouncer, the live connection lifecycle, and the
//! process-wide push subscription manager.
//!
//! # Architecture
//!
//! Nothing in this crate performs I/O or reads a clock. Methods take the
//! current time as a parameter and return actions (or outcomes) for the caller
//! to execute. The [`env::Environment`] trait is the only seam to the outside
//! world, which keeps every component deterministic under test.
//!
//! # Components
//!
//! - [`Reconciler`]: duplicate-free, time-ordered message list for one
//!   conversation
//! - [`TypingDebouncer`]: outbound throttling and self-expiring peer indicator
//! - [`LiveConnection`]: connect/join/reconnect/teardown of the live channel
//! - [`PushSubscriptionManager`]: permission and registration lifecycle,
//!   inbound push filtering

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod config;
pub mod connection;
pub mod env;
pub mod error;
pub mod message;
pub mod push;
pub mod reconciler;
pub mod typing;

pub use config::{Backoff, ChatConfig, RetryPolicy};
pub use connection::{
    ConnectionAction, ConnectionHandle, ConnectionState, InboundEvent, LiveConnection,
    Subscription,
};
pub use error::ChatError;
pub use message::{ConversationId, DeliveryState, Message, MessageId, UserId};
pub use push::{
    ClickRoute, ConversationView, Permission, PushStep, PushSubscription,
    PushSubscriptionManager, build_notification, route_click,
};
pub use reconciler::{IngestOutcome, PendingSend, Reconciler, SendOutcome};
pub use typing::{TypingDebouncer, TypingState};
