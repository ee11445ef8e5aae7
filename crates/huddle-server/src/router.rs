//! Broadcast Router.
//!
//! Filters the registry down to the connections a message is meant for and
//! enqueues one shared serialized frame on each. Routing holds only the
//! registry's read lock and never waits: a connection that cannot take the
//! frame is handed to the registry task for teardown through a non-blocking
//! send, so a route never depends on the writer side of the lock it holds.

use std::sync::Arc;

use huddle_core::OutboundMessage;
use metrics::counter;
use tracing::{debug, warn};

use crate::metrics::{DELIVERIES_TOTAL, DELIVERY_FAILURES_TOTAL, ROUTED_MESSAGES_TOTAL};
use crate::registry::{Frame, RegistryHandle, TeardownReason};

/// Outcome of one route.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RouteReport {
    /// Connections whose subscriptions matched, sender's excluded.
    pub matched: usize,
    /// Frames enqueued.
    pub delivered: usize,
    /// Connections scheduled for teardown.
    pub failed: usize,
    /// Connections skipped because their user sent the message.
    pub echo_suppressed: usize,
}

/// Delivers outbound messages to local connections.
#[derive(Clone, Debug)]
pub struct BroadcastRouter {
    registry: RegistryHandle,
}

impl BroadcastRouter {
    /// Route through the registry behind `registry`.
    pub fn new(registry: RegistryHandle) -> Self {
        Self { registry }
    }

    /// Deliver `message` to every registered connection whose subscriptions
    /// accept its target, except connections owned by its sender.
    pub fn route(&self, message: &OutboundMessage) -> RouteReport {
        let text: Arc<str> = match message.encode() {
            Ok(text) => text.into(),
            Err(error) => {
                warn!(kind = message.kind(), %error, "failed to encode outbound message");
                return RouteReport::default();
            }
        };

        let mut report = RouteReport::default();
        {
            let state = self.registry.registry().read();
            for entry in state.connections.values() {
                let connection = &entry.connection;
                if message.is_echo_to(&connection.user_id) {
                    report.echo_suppressed += 1;
                    continue;
                }
                if !entry.subscriptions.accepts(message.target()) {
                    continue;
                }
                report.matched += 1;
                match connection.send(Frame::Text(Arc::clone(&text))) {
                    Ok(()) => report.delivered += 1,
                    Err(failure) => {
                        report.failed += 1;
                        warn!(
                            conn_id = %connection.id,
                            user_id = %connection.user_id,
                            failure = failure.as_str(),
                            "delivery failed, scheduling teardown"
                        );
                        self.registry
                            .unregister(&connection.id, TeardownReason::DeliveryFailed);
                    }
                }
            }
        }

        debug!(
            kind = message.kind(),
            matched = report.matched,
            delivered = report.delivered,
            failed = report.failed,
            "message routed"
        );
        counter!(ROUTED_MESSAGES_TOTAL, "kind" => message.kind().to_owned()).increment(1);
        counter!(DELIVERIES_TOTAL).increment(report.delivered as u64);
        counter!(DELIVERY_FAILURES_TOTAL).increment(report.failed as u64);
        report
    }
}
