//! In-process bus for single-instance deployments.

use async_trait::async_trait;
use futures::StreamExt;
use huddle_core::Topic;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tracing::{trace, warn};

use crate::{Bus, BusSubscription, Result};

/// Default per-topic buffer.
pub const DEFAULT_BUFFER: usize = 1024;

/// One broadcast channel per topic, created up front.
///
/// Publishing with no subscribers is not an error. A subscriber that falls
/// more than the buffer behind skips the lost payloads with a warning.
#[derive(Debug)]
pub struct MemoryBus {
    presence: broadcast::Sender<String>,
    broadcast: broadcast::Sender<String>,
}

impl MemoryBus {
    /// Create a bus with `buffer` slots per topic.
    pub fn new(buffer: usize) -> Self {
        let buffer = buffer.max(1);
        Self {
            presence: broadcast::channel(buffer).0,
            broadcast: broadcast::channel(buffer).0,
        }
    }

    /// Number of live subscriptions on a topic.
    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.sender(topic).receiver_count()
    }

    fn sender(&self, topic: Topic) -> &broadcast::Sender<String> {
        match topic {
            Topic::Presence => &self.presence,
            Topic::Broadcast => &self.broadcast,
        }
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER)
    }
}

#[async_trait]
impl Bus for MemoryBus {
    async fn publish(&self, topic: Topic, payload: String) -> Result<()> {
        match self.sender(topic).send(payload) {
            Ok(receivers) => trace!(%topic, receivers, "published"),
            Err(_) => trace!(%topic, "published with no subscribers"),
        }
        Ok(())
    }

    async fn subscribe(&self, topic: Topic) -> Result<BusSubscription> {
        let rx = self.sender(topic).subscribe();
        let stream = BroadcastStream::new(rx).filter_map(move |item| async move {
            match item {
                Ok(payload) => Some(payload),
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    warn!(%topic, skipped, "bus subscriber lagged, payloads dropped");
                    None
                }
            }
        });
        Ok(stream.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_reaches_every_subscriber_in_order() {
        let bus = MemoryBus::default();
        let mut a = bus.subscribe(Topic::Broadcast).await.unwrap();
        let mut b = bus.subscribe(Topic::Broadcast).await.unwrap();

        bus.publish(Topic::Broadcast, "one".into()).await.unwrap();
        bus.publish(Topic::Broadcast, "two".into()).await.unwrap();

        assert_eq!(a.next().await.as_deref(), Some("one"));
        assert_eq!(a.next().await.as_deref(), Some("two"));
        assert_eq!(b.next().await.as_deref(), Some("one"));
        assert_eq!(b.next().await.as_deref(), Some("two"));
    }

    #[tokio::test]
    async fn topics_are_isolated() {
        let bus = MemoryBus::default();
        let mut presence = bus.subscribe(Topic::Presence).await.unwrap();

        bus.publish(Topic::Broadcast, "chat".into()).await.unwrap();
        bus.publish(Topic::Presence, "status".into()).await.unwrap();

        assert_eq!(presence.next().await.as_deref(), Some("status"));
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_ok() {
        let bus = MemoryBus::default();
        assert!(bus.publish(Topic::Presence, "x".into()).await.is_ok());
        assert_eq!(bus.subscriber_count(Topic::Presence), 0);
    }

    #[tokio::test]
    async fn lagged_subscriber_skips_and_continues() {
        let bus = MemoryBus::new(2);
        let mut sub = bus.subscribe(Topic::Broadcast).await.unwrap();
        for i in 0..5 {
            bus.publish(Topic::Broadcast, i.to_string()).await.unwrap();
        }
        // Oldest payloads were overwritten; the newest two survive.
        assert_eq!(sub.next().await.as_deref(), Some("3"));
        assert_eq!(sub.next().await.as_deref(), Some("4"));
    }

    #[tokio::test]
    async fn dropped_subscription_releases_receiver() {
        let bus = MemoryBus::default();
        let sub = bus.subscribe(Topic::Broadcast).await.unwrap();
        assert_eq!(bus.subscriber_count(Topic::Broadcast), 1);
        drop(sub);
        assert_eq!(bus.subscriber_count(Topic::Broadcast), 0);
    }
}
