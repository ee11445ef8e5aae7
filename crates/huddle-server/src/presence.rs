//! Presence Aggregator.
//!
//! The registry decides *when* a user crosses between zero and one live
//! connections; this module turns each crossing into exactly one event on the
//! presence topic. Every instance, this one included, learns about the
//! change from the bridge.
//!
//! Publishing runs on its own task fed by a [`PresenceQueue`], so a slow bus
//! never holds up registry mutation. The queue is FIFO, which keeps
//! transitions in the order the registry produced them.

use huddle_bus::SharedBus;
use huddle_core::{PresenceUpdate, Topic};
use metrics::counter;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::metrics::PRESENCE_TRANSITIONS_TOTAL;

/// Publishes user-level presence transitions to the distributed bus.
#[derive(Clone)]
pub struct PresenceAggregator {
    bus: SharedBus,
}

impl PresenceAggregator {
    /// Publish through `bus`.
    pub fn new(bus: SharedBus) -> Self {
        Self { bus }
    }

    /// Start the publisher task. It publishes queued updates one at a time
    /// and exits once every [`PresenceQueue`] is dropped and the backlog is
    /// flushed.
    pub fn spawn(self) -> (PresenceQueue, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<PresenceUpdate>();
        let task = tokio::spawn(async move {
            while let Some(update) = rx.recv().await {
                let _ = self.publish(&update).await;
            }
            debug!("presence publisher stopped");
        });
        (PresenceQueue { tx }, task)
    }

    /// Publish one transition. A bus failure is logged and the transition is
    /// lost; presence is best-effort like every other event.
    pub async fn publish(&self, update: &PresenceUpdate) -> bool {
        let payload = match update.encode() {
            Ok(payload) => payload,
            Err(error) => {
                warn!(user_id = %update.user_id, %error, "failed to encode presence update");
                return false;
            }
        };
        match self.bus.publish(Topic::Presence, payload).await {
            Ok(()) => {
                debug!(user_id = %update.user_id, status = update.status.as_str(), "presence published");
                counter!(PRESENCE_TRANSITIONS_TOTAL, "status" => update.status.as_str()).increment(1);
                true
            }
            Err(error) => {
                warn!(user_id = %update.user_id, status = update.status.as_str(), %error, "failed to publish presence");
                false
            }
        }
    }
}

/// Non-blocking handoff from the registry task to the presence publisher.
#[derive(Clone, Debug)]
pub struct PresenceQueue {
    tx: mpsc::UnboundedSender<PresenceUpdate>,
}

impl PresenceQueue {
    /// Queue a transition for publishing. Never waits.
    pub fn push(&self, update: PresenceUpdate) {
        if let Err(mpsc::error::SendError(update)) = self.tx.send(update) {
            debug!(user_id = %update.user_id, "presence publisher gone, transition dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use futures::StreamExt;
    use huddle_bus::{Bus, MemoryBus};
    use huddle_core::{PresenceStatus, UserId};

    use super::*;

    #[tokio::test]
    async fn publishes_on_presence_topic() {
        let bus = Arc::new(MemoryBus::default());
        let mut presence = bus.subscribe(Topic::Presence).await.unwrap();
        let mut broadcast = bus.subscribe(Topic::Broadcast).await.unwrap();
        let aggregator = PresenceAggregator::new(bus);

        let update = PresenceUpdate::new(UserId::from_raw("A"), PresenceStatus::Online);
        assert!(aggregator.publish(&update).await);

        let payload = presence.next().await.unwrap();
        assert_eq!(PresenceUpdate::decode(&payload).unwrap(), update);
        assert!(
            tokio::time::timeout(std::time::Duration::from_millis(20), broadcast.next())
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn publisher_keeps_queue_order() {
        let bus = Arc::new(MemoryBus::default());
        let mut presence = bus.subscribe(Topic::Presence).await.unwrap();
        let (queue, task) = PresenceAggregator::new(bus).spawn();

        let a = UserId::from_raw("A");
        queue.push(PresenceUpdate::new(a.clone(), PresenceStatus::Online));
        queue.push(PresenceUpdate::new(a.clone(), PresenceStatus::Offline));
        queue.push(PresenceUpdate::new(a.clone(), PresenceStatus::Online));
        drop(queue);
        task.await.unwrap();

        let mut statuses = Vec::new();
        for _ in 0..3 {
            let payload = presence.next().await.unwrap();
            statuses.push(PresenceUpdate::decode(&payload).unwrap().status);
        }
        assert_eq!(
            statuses,
            [
                PresenceStatus::Online,
                PresenceStatus::Offline,
                PresenceStatus::Online
            ]
        );
    }
}
