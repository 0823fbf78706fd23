//! Wire protocol for Sparkchat.
//!
//! Everything that crosses a process boundary lives here: live channel events
//! ([`LiveEvent`]), REST request/response bodies ([`rest`]) and push payloads
//! ([`push`]). All types are plain serde structs encoded as JSON; nothing in
//! this crate holds state or performs I/O.
//!
//! # Field naming
//!
//! The backend speaks camelCase JSON with Mongo-style `_id` identifiers. The
//! serde attributes on each type pin those names so the Rust side can use
//! ordinary snake_case fields.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod errors;
pub mod live;
pub mod push;
pub mod rest;

pub use errors::{ProtocolError, Result};
pub use live::{JoinChat, LiveEvent, OutgoingMessage, TypingSignal};
pub use push::{NotificationAction, NotificationPayload, PushData, PushPayload};
pub use rest::{
    MatchInfo, PartnerProfile, PushAck, PushSubscriptionRequest, SendMessageRequest, WireMessage,
};
