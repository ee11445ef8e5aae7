//! Connection Registry.
//!
//! Every live connection on this process, indexed by connection id and by
//! owning user. A user key exists in the user index exactly while the user
//! has at least one connection, which makes online/offline transitions a
//! key-presence test at insert and remove time.
//!
//! One `RwLock` guards both indices. Mutation is exclusive and is driven by
//! the registry task (see [`task`]); routing takes the shared side. Nothing
//! that can block is done while the lock is held: removal hands the
//! connection back so that it is closed after the lock is released.

pub mod connection;
pub mod subscriptions;
pub mod task;

use std::collections::HashMap;
use std::sync::Arc;

use huddle_core::{
    ChannelId, ConnectionId, ConversationId, PresenceStatus, PresenceUpdate, UserId,
};
use parking_lot::{RwLock, RwLockReadGuard};

pub use connection::{Connection, DeliveryFailure, Frame, TeardownReason};
pub use subscriptions::Subscriptions;
pub use task::{RegistryClosed, RegistryCommand, RegistryHandle, spawn_registry};

/// A registered connection and its subscription index.
#[derive(Debug)]
pub(crate) struct Entry {
    pub(crate) connection: Arc<Connection>,
    pub(crate) subscriptions: Subscriptions,
}

#[derive(Debug, Default)]
pub(crate) struct RegistryState {
    pub(crate) connections: HashMap<ConnectionId, Entry>,
    by_user: HashMap<UserId, Vec<ConnectionId>>,
}

/// Result of removing a connection.
#[derive(Debug)]
pub struct Removed {
    /// The removed connection, still open. The caller closes it.
    pub connection: Arc<Connection>,
    /// `Some(offline)` when this was the user's last connection.
    pub presence: Option<PresenceUpdate>,
}

/// Process-local set of live connections.
#[derive(Debug, Default)]
pub struct Registry {
    state: RwLock<RegistryState>,
}

impl Registry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a connection with its initial subscriptions.
    ///
    /// Returns `Some(online)` when this is the user's first connection.
    /// Inserting an id that is already present is ignored.
    pub fn insert(
        &self,
        connection: Arc<Connection>,
        subscriptions: Subscriptions,
    ) -> Option<PresenceUpdate> {
        let mut state = self.state.write();
        if state.connections.contains_key(&connection.id) {
            return None;
        }
        let user = connection.user_id.clone();
        let list = state.by_user.entry(user.clone()).or_default();
        let first = list.is_empty();
        list.push(connection.id.clone());
        let _ = state.connections.insert(
            connection.id.clone(),
            Entry {
                connection,
                subscriptions,
            },
        );
        first.then(|| PresenceUpdate::new(user, PresenceStatus::Online))
    }

    /// Remove a connection from both indices. Idempotent: `None` when the id
    /// is not registered.
    pub fn remove(&self, id: &ConnectionId) -> Option<Removed> {
        let mut state = self.state.write();
        let entry = state.connections.remove(id)?;
        let user = &entry.connection.user_id;

        let emptied = state.by_user.get_mut(user).is_some_and(|list| {
            list.retain(|c| c != id);
            list.is_empty()
        });
        let presence = if emptied {
            let _ = state.by_user.remove(user);
            Some(PresenceUpdate::new(user.clone(), PresenceStatus::Offline))
        } else {
            None
        };

        Some(Removed {
            connection: entry.connection,
            presence,
        })
    }

    /// Remove every connection. Returns the connections and one offline
    /// update per user that had any.
    pub fn drain(&self) -> (Vec<Arc<Connection>>, Vec<PresenceUpdate>) {
        let mut state = self.state.write();
        let connections = state
            .connections
            .drain()
            .map(|(_, entry)| entry.connection)
            .collect();
        let offline = state
            .by_user
            .drain()
            .map(|(user, _)| PresenceUpdate::new(user, PresenceStatus::Offline))
            .collect();
        (connections, offline)
    }

    /// Subscribe a registered connection to a channel. Returns `false` if the
    /// connection is unknown or already subscribed.
    pub fn subscribe_channel(&self, id: &ConnectionId, channel: ChannelId) -> bool {
        self.state
            .write()
            .connections
            .get_mut(id)
            .is_some_and(|entry| entry.subscriptions.subscribe_channel(channel))
    }

    /// Subscribe a registered connection to a conversation. Returns `false`
    /// if the connection is unknown or already subscribed.
    pub fn subscribe_conversation(&self, id: &ConnectionId, conversation: ConversationId) -> bool {
        self.state
            .write()
            .connections
            .get_mut(id)
            .is_some_and(|entry| entry.subscriptions.subscribe_conversation(conversation))
    }

    /// A registered connection.
    pub fn get(&self, id: &ConnectionId) -> Option<Arc<Connection>> {
        self.state
            .read()
            .connections
            .get(id)
            .map(|entry| Arc::clone(&entry.connection))
    }

    /// Snapshot of a connection's subscriptions.
    pub fn subscriptions(&self, id: &ConnectionId) -> Option<Subscriptions> {
        self.state
            .read()
            .connections
            .get(id)
            .map(|entry| entry.subscriptions.clone())
    }

    /// Whether the id is registered.
    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.state.read().connections.contains_key(id)
    }

    /// Registered connections.
    pub fn connection_count(&self) -> usize {
        self.state.read().connections.len()
    }

    /// Distinct users with at least one connection.
    pub fn user_count(&self) -> usize {
        self.state.read().by_user.len()
    }

    /// Connections owned by `user`.
    pub fn connections_of(&self, user: &UserId) -> usize {
        self.state.read().by_user.get(user).map_or(0, Vec::len)
    }

    /// Whether `user` has any connection here.
    pub fn is_online(&self, user: &UserId) -> bool {
        self.state.read().by_user.contains_key(user)
    }

    /// Shared access for routing. The guard must not be held across an await.
    pub(crate) fn read(&self) -> RwLockReadGuard<'_, RegistryState> {
        self.state.read()
    }
}
