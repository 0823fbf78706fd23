//! Protocol error types.

use thiserror::Error;

/// Result alias for wire encoding and decoding.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors produced while encoding or decoding wire data.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// JSON serialization failed
    #[error("json encode error: {0}")]
    JsonEncode(String),

    /// JSON deserialization failed (malformed input or unknown event)
    #[error("json decode error: {0}")]
    JsonDecode(String),

    /// Push message arrived without a data section
    #[error("push payload has no data")]
    EmptyPush,
}

impl ProtocolError {
    pub(crate) fn decode(err: &serde_json::Error) -> Self {
        Self::JsonDecode(err.to_string())
    }

    pub(crate) fn encode(err: &serde_json::Error) -> Self {
        Self::JsonEncode(err.to_string())
    }
}
