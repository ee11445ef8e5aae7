//! # huddle-core
//!
//! Shared vocabulary for the huddle real-time fan-out tier.
//!
//! - **Branded IDs**: `UserId`, `ChannelId`, `ConversationId`, `ConnectionId`
//! - **Messages**: [`OutboundMessage`] with an exclusive [`RouteTarget`], and the
//!   [`WireMessage`] JSON shape shared by clients and the distributed bus
//! - **Presence**: user-level [`PresenceStatus`] transitions
//! - **Topics**: the two logical channels on the distributed bus

#![deny(unsafe_code)]

pub mod errors;
pub mod ids;
pub mod message;
pub mod presence;
pub mod topic;

pub use errors::DecodeError;
pub use ids::{ChannelId, ConnectionId, ConversationId, UserId};
pub use message::{
    Attachment, ChatMessage, MessageReaction, OutboundMessage, Payload, ReactionAction,
    ReactionEvent, ReactionSummary, ReactionUser, RouteTarget, TypingEvent, WireMessage,
};
pub use presence::{PresenceStatus, PresenceUpdate};
pub use topic::Topic;
