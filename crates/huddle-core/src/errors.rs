//! Decoding errors for payloads received from clients or the distributed bus.

use thiserror::Error;

/// Reasons a payload could not be turned into a routable message.
///
/// Every variant is local to a single payload: callers drop the payload and
/// keep consuming.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The payload was not valid JSON, or did not match the expected shape.
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),

    /// The `type` discriminator was missing or empty.
    #[error("missing message type")]
    MissingType,

    /// A field required by the message type was absent.
    #[error("missing field: {0}")]
    MissingField(&'static str),

    /// A required field was present but empty.
    #[error("empty field: {0}")]
    EmptyField(&'static str),

    /// Both `channelId` and `conversationId` were set.
    #[error("message targets both a channel and a conversation")]
    AmbiguousTarget,

    /// The presence status was neither `online` nor `offline`.
    #[error("unknown presence status: {0}")]
    InvalidStatus(String),
}
