//! In-process directory.

use std::collections::{BTreeSet, HashMap};

use huddle_core::{ChannelId, ConversationId, UserId};
use parking_lot::RwLock;

use crate::directory::{Directory, Memberships, UserProfile};
use crate::errors::Result;

#[derive(Debug, Default)]
struct State {
    profiles: HashMap<UserId, UserProfile>,
    channels: HashMap<UserId, BTreeSet<ChannelId>>,
    conversations: HashMap<UserId, BTreeSet<ConversationId>>,
}

/// Directory held in memory. Lookups never fail.
#[derive(Debug, Default)]
pub struct MemoryDirectory {
    state: RwLock<State>,
}

impl MemoryDirectory {
    /// Empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a user.
    pub fn add_user(&self, id: impl Into<UserId>, display_name: &str, avatar: &str) {
        let id = id.into();
        let profile = UserProfile {
            id: id.clone(),
            display_name: display_name.to_owned(),
            avatar: avatar.to_owned(),
        };
        let _ = self.state.write().profiles.insert(id, profile);
    }

    /// Make `user` a member of `channel`.
    pub fn join_channel(&self, user: impl Into<UserId>, channel: impl Into<ChannelId>) {
        let _ = self
            .state
            .write()
            .channels
            .entry(user.into())
            .or_default()
            .insert(channel.into());
    }

    /// Record a direct conversation between two users.
    pub fn add_conversation(
        &self,
        conversation: impl Into<ConversationId>,
        first: impl Into<UserId>,
        second: impl Into<UserId>,
    ) {
        let conversation = conversation.into();
        let mut state = self.state.write();
        for user in [first.into(), second.into()] {
            let _ = state
                .conversations
                .entry(user)
                .or_default()
                .insert(conversation.clone());
        }
    }
}

impl Directory for MemoryDirectory {
    fn user_exists(&self, user: &UserId) -> Result<bool> {
        Ok(self.state.read().profiles.contains_key(user))
    }

    fn memberships(&self, user: &UserId) -> Result<Memberships> {
        let state = self.state.read();
        Ok(Memberships {
            channels: state
                .channels
                .get(user)
                .map(|set| set.iter().cloned().collect())
                .unwrap_or_default(),
            conversations: state
                .conversations
                .get(user)
                .map(|set| set.iter().cloned().collect())
                .unwrap_or_default(),
        })
    }

    fn profile(&self, user: &UserId) -> Result<Option<UserProfile>> {
        Ok(self.state.read().profiles.get(user).cloned())
    }
}
