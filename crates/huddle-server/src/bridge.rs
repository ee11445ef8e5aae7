//! Cross-Instance Bridge.
//!
//! One long-lived subscription per bus topic, each consumed by its own task in
//! arrival order. Every event is decoded and handed to the router; an event
//! that does not decode is dropped on its own and consumption carries on.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use huddle_bus::{BusError, BusSubscription, SharedBus};
use huddle_core::{DecodeError, OutboundMessage, PresenceUpdate, Topic};
use metrics::counter;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::metrics::{BUS_DECODE_FAILURES_TOTAL, BUS_EVENTS_TOTAL, BUS_RESUBSCRIBES_TOTAL};
use crate::router::{BroadcastRouter, RouteReport};

const RESUBSCRIBE_INITIAL: Duration = Duration::from_secs(1);
const RESUBSCRIBE_MAX: Duration = Duration::from_secs(30);

/// Feeds bus events into the local router.
pub struct Bridge {
    bus: SharedBus,
    router: BroadcastRouter,
    shutdown: CancellationToken,
    initial_backoff: Duration,
    max_backoff: Duration,
}

impl Bridge {
    /// Bridge `bus` into `router` until `shutdown` is cancelled.
    pub fn new(bus: SharedBus, router: BroadcastRouter, shutdown: CancellationToken) -> Self {
        Self {
            bus,
            router,
            shutdown,
            initial_backoff: RESUBSCRIBE_INITIAL,
            max_backoff: RESUBSCRIBE_MAX,
        }
    }

    /// Override the delay between attempts to replace a lost subscription.
    #[must_use]
    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max.max(initial);
        self
    }

    /// Subscribe to every topic, then spawn one consumer task per topic.
    ///
    /// A failure to subscribe here is returned: without the bus there is
    /// nothing to route.
    pub async fn start(self) -> Result<Vec<JoinHandle<()>>, BusError> {
        let mut subscriptions = Vec::with_capacity(Topic::ALL.len());
        for topic in Topic::ALL {
            subscriptions.push((topic, self.bus.subscribe(topic).await?));
        }
        info!(topics = subscriptions.len(), "bridge subscribed");

        let bridge = Arc::new(self);
        let handles = subscriptions
            .into_iter()
            .map(|(topic, stream)| {
                let bridge = Arc::clone(&bridge);
                let span = info_span!("bridge", topic = topic.name());
                tokio::spawn(async move { bridge.consume(topic, stream).await }.instrument(span))
            })
            .collect();
        Ok(handles)
    }

    /// Decode one payload from `topic` and route it.
    pub fn dispatch(&self, topic: Topic, payload: &str) -> Result<RouteReport, DecodeError> {
        counter!(BUS_EVENTS_TOTAL, "topic" => topic.name()).increment(1);
        let decoded = match topic {
            Topic::Presence => PresenceUpdate::decode(payload).map(OutboundMessage::user_status),
            Topic::Broadcast => OutboundMessage::decode(payload),
        };
        match decoded {
            Ok(message) => Ok(self.router.route(&message)),
            Err(error) => {
                warn!(topic = topic.name(), %error, len = payload.len(), "dropping undecodable bus event");
                counter!(BUS_DECODE_FAILURES_TOTAL, "topic" => topic.name()).increment(1);
                Err(error)
            }
        }
    }

    async fn consume(&self, topic: Topic, mut stream: BusSubscription) {
        loop {
            tokio::select! {
                biased;
                () = self.shutdown.cancelled() => break,
                payload = stream.next() => match payload {
                    Some(payload) => {
                        let _ = self.dispatch(topic, &payload);
                    }
                    None => {
                        warn!("bus subscription lost");
                        match self.resubscribe(topic).await {
                            Some(fresh) => stream = fresh,
                            None => break,
                        }
                    }
                },
            }
        }
        debug!("bridge consumer stopped");
    }

    /// Retry with capped exponential backoff. `None` once shut down.
    async fn resubscribe(&self, topic: Topic) -> Option<BusSubscription> {
        let mut delay = self.initial_backoff;
        loop {
            tokio::select! {
                () = self.shutdown.cancelled() => return None,
                () = tokio::time::sleep(delay) => {}
            }
            match self.bus.subscribe(topic).await {
                Ok(stream) => {
                    info!("bus subscription restored");
                    counter!(BUS_RESUBSCRIBES_TOTAL, "topic" => topic.name()).increment(1);
                    return Some(stream);
                }
                Err(error) => {
                    delay = (delay * 2).min(self.max_backoff);
                    warn!(%error, retry_in_ms = delay.as_millis(), "resubscribe failed");
                }
            }
        }
    }
}
