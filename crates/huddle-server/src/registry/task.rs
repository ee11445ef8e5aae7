//! The registry task: the single writer of the registry.
//!
//! Sessions, the router and liveness monitors never mutate the registry
//! directly. They send [`RegistryCommand`]s through a [`RegistryHandle`]; the
//! task applies them one at a time, closes removed connections outside the
//! lock and queues presence transitions, in the order they happened, for the
//! presence publisher. The task only ever waits on its command stream.

use std::sync::Arc;
use std::time::Duration;

use huddle_core::ConnectionId;
use metrics::{counter, gauge, histogram};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{Connection, Registry, Subscriptions, TeardownReason};
use crate::metrics::{
    USERS_ONLINE, WS_CONNECTION_DURATION_SECONDS, WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL,
    WS_DISCONNECTIONS_TOTAL,
};
use crate::presence::{PresenceAggregator, PresenceQueue};

/// How long shutdown waits for queued presence transitions to be published.
const PRESENCE_FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// The registry task is no longer running.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
#[error("registry is shut down")]
pub struct RegistryClosed;

/// A mutation request for the registry task.
#[derive(Debug)]
pub enum RegistryCommand {
    /// Add a connection; `ack` fires once it is routable.
    Register {
        /// The new connection.
        connection: Arc<Connection>,
        /// Its initial subscriptions.
        subscriptions: Subscriptions,
        /// Completion signal.
        ack: oneshot::Sender<()>,
    },
    /// Remove and close a connection. Duplicate requests are no-ops.
    Unregister {
        /// Connection to remove.
        id: ConnectionId,
        /// What triggered the teardown.
        reason: TeardownReason,
    },
}

/// Cloneable entry point to the registry task, plus read access to the
/// registry itself.
#[derive(Clone, Debug)]
pub struct RegistryHandle {
    registry: Arc<Registry>,
    commands: mpsc::UnboundedSender<RegistryCommand>,
}

impl RegistryHandle {
    /// The registry this handle mutates.
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Register a connection and wait until it is visible to routing.
    pub async fn register(
        &self,
        connection: Arc<Connection>,
        subscriptions: Subscriptions,
    ) -> Result<(), RegistryClosed> {
        let (ack, done) = oneshot::channel();
        self.commands
            .send(RegistryCommand::Register {
                connection,
                subscriptions,
                ack,
            })
            .map_err(|_| RegistryClosed)?;
        done.await.map_err(|_| RegistryClosed)
    }

    /// Request teardown without waiting. Safe to call from any context,
    /// including while holding the registry's read lock.
    pub fn unregister(&self, id: &ConnectionId, reason: TeardownReason) {
        let sent = self.commands.send(RegistryCommand::Unregister {
            id: id.clone(),
            reason,
        });
        if sent.is_err() {
            debug!(conn_id = %id, %reason, "registry task gone, teardown dropped");
        }
    }
}

/// Spawn the registry task and its presence publisher. The registry task runs
/// until `shutdown` is cancelled, then closes every remaining connection and
/// flushes their users' offline transitions.
pub fn spawn_registry(
    registry: Arc<Registry>,
    presence: PresenceAggregator,
    shutdown: CancellationToken,
) -> (RegistryHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = RegistryHandle {
        registry: Arc::clone(&registry),
        commands: tx,
    };
    let task = tokio::spawn(run(registry, rx, presence, shutdown));
    (handle, task)
}

async fn run(
    registry: Arc<Registry>,
    mut commands: mpsc::UnboundedReceiver<RegistryCommand>,
    presence: PresenceAggregator,
    shutdown: CancellationToken,
) {
    let (queue, mut publisher) = presence.spawn();
    loop {
        tokio::select! {
            biased;
            () = shutdown.cancelled() => break,
            command = commands.recv() => match command {
                Some(command) => apply(&registry, &queue, command),
                None => break,
            },
        }
    }

    let (connections, offline) = registry.drain();
    info!(
        connections = connections.len(),
        users = offline.len(),
        "registry shutting down"
    );
    for connection in &connections {
        connection.close();
        counter!(WS_DISCONNECTIONS_TOTAL, "reason" => TeardownReason::Shutdown.as_str()).increment(1);
    }
    offline.into_iter().for_each(|update| queue.push(update));
    record_gauges(&registry);

    drop(queue);
    if tokio::time::timeout(PRESENCE_FLUSH_TIMEOUT, &mut publisher)
        .await
        .is_err()
    {
        warn!("presence publisher stalled, dropping pending transitions");
        publisher.abort();
    }
}

fn apply(registry: &Registry, presence: &PresenceQueue, command: RegistryCommand) {
    match command {
        RegistryCommand::Register {
            connection,
            subscriptions,
            ack,
        } => {
            let (conn_id, user_id) = (connection.id.clone(), connection.user_id.clone());
            let channels = subscriptions.channel_count();
            let conversations = subscriptions.conversation_count();
            let transition = registry.insert(connection, subscriptions);
            let _ = ack.send(());

            info!(%conn_id, %user_id, channels, conversations, "connection registered");
            counter!(WS_CONNECTIONS_TOTAL).increment(1);
            record_gauges(registry);
            if let Some(update) = transition {
                presence.push(update);
            }
        }
        RegistryCommand::Unregister { id, reason } => {
            let Some(removed) = registry.remove(&id) else {
                debug!(conn_id = %id, %reason, "connection already removed");
                return;
            };
            let connection = removed.connection;
            connection.close();

            info!(
                conn_id = %connection.id,
                user_id = %connection.user_id,
                %reason,
                dropped_frames = connection.dropped_frames(),
                "connection unregistered"
            );
            counter!(WS_DISCONNECTIONS_TOTAL, "reason" => reason.as_str()).increment(1);
            histogram!(WS_CONNECTION_DURATION_SECONDS).record(connection.age().as_secs_f64());
            record_gauges(registry);
            if let Some(update) = removed.presence {
                presence.push(update);
            }
        }
    }
}

#[allow(clippy::cast_precision_loss)]
fn record_gauges(registry: &Registry) {
    gauge!(WS_CONNECTIONS_ACTIVE).set(registry.connection_count() as f64);
    gauge!(USERS_ONLINE).set(registry.user_count() as f64);
}
