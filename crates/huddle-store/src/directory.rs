//! The directory contract consumed by the server.

use huddle_core::{ChannelId, ConversationId, UserId};

use crate::errors::Result;

/// Channels and conversations a user may receive events for.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Memberships {
    /// Channels of every team the user belongs to.
    pub channels: Vec<ChannelId>,
    /// Direct conversations the user participates in.
    pub conversations: Vec<ConversationId>,
}

impl Memberships {
    /// Whether the user belongs to nothing.
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty() && self.conversations.is_empty()
    }
}

/// Display metadata for a user.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UserProfile {
    /// User id.
    pub id: UserId,
    /// Name shown next to typing indicators.
    pub display_name: String,
    /// Avatar URL, empty when unset.
    pub avatar: String,
}

/// Synchronous membership and profile queries.
pub trait Directory: Send + Sync {
    /// Whether an active user with this id exists.
    fn user_exists(&self, user: &UserId) -> Result<bool>;

    /// Channel and conversation memberships, fetched once per connection.
    fn memberships(&self, user: &UserId) -> Result<Memberships>;

    /// Display metadata, `None` for unknown users.
    fn profile(&self, user: &UserId) -> Result<Option<UserProfile>>;
}
