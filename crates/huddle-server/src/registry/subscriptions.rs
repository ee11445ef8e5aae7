//! Per-connection subscription index.

use std::collections::HashSet;

use huddle_core::{ChannelId, ConversationId, RouteTarget};
use huddle_store::Memberships;

/// Channels and conversations a connection receives events for.
///
/// Subscriptions only grow during a connection's lifetime; a reconnect
/// re-derives them from the directory.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Subscriptions {
    channels: HashSet<ChannelId>,
    conversations: HashSet<ConversationId>,
}

impl Subscriptions {
    /// Empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a channel. Returns `false` if it was already present.
    pub fn subscribe_channel(&mut self, channel: ChannelId) -> bool {
        self.channels.insert(channel)
    }

    /// Add a conversation. Returns `false` if it was already present.
    pub fn subscribe_conversation(&mut self, conversation: ConversationId) -> bool {
        self.conversations.insert(conversation)
    }

    /// Whether the channel is subscribed.
    pub fn has_channel(&self, channel: &ChannelId) -> bool {
        self.channels.contains(channel)
    }

    /// Whether the conversation is subscribed.
    pub fn has_conversation(&self, conversation: &ConversationId) -> bool {
        self.conversations.contains(conversation)
    }

    /// Whether a message with this target should reach the connection.
    /// [`RouteTarget::Everyone`] always matches.
    pub fn accepts(&self, target: &RouteTarget) -> bool {
        match target {
            RouteTarget::Everyone => true,
            RouteTarget::Channel(channel) => self.has_channel(channel),
            RouteTarget::Conversation(conversation) => self.has_conversation(conversation),
        }
    }

    /// Number of subscribed channels.
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Number of subscribed conversations.
    pub fn conversation_count(&self) -> usize {
        self.conversations.len()
    }
}

impl From<Memberships> for Subscriptions {
    fn from(memberships: Memberships) -> Self {
        Self {
            channels: memberships.channels.into_iter().collect(),
            conversations: memberships.conversations.into_iter().collect(),
        }
    }
}
