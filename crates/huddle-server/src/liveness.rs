//! Liveness Monitor.
//!
//! One task per connection. Every interval it checks the last pong and
//! enqueues a ping for the writer, which owns the probe's write deadline.
//! The task ends as soon as the connection is closed by any path.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::registry::{Connection, Frame, RegistryHandle, TeardownReason};

/// Why a monitor stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LivenessOutcome {
    /// The connection was closed elsewhere.
    Closed,
    /// No pong for longer than the pong timeout.
    PongTimeout,
    /// The probe could not be enqueued.
    ProbeFailed,
}

/// Probe `connection` every `interval` until it closes, requesting teardown
/// when the client stops answering or the probe cannot be queued.
pub async fn run_liveness(
    connection: Arc<Connection>,
    registry: RegistryHandle,
    interval: Duration,
    pong_timeout: Duration,
) -> LivenessOutcome {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // Skip the immediate first tick
    let _ = ticker.tick().await;

    loop {
        tokio::select! {
            biased;
            () = connection.closed() => {
                debug!(conn_id = %connection.id, "liveness monitor stopped");
                return LivenessOutcome::Closed;
            }
            _ = ticker.tick() => {
                let silent = connection.since_last_pong();
                if silent > pong_timeout {
                    warn!(conn_id = %connection.id, silent_secs = silent.as_secs(), "client unresponsive, disconnecting");
                    registry.unregister(&connection.id, TeardownReason::PongTimeout);
                    return LivenessOutcome::PongTimeout;
                }
                if let Err(failure) = connection.send(Frame::Ping) {
                    warn!(conn_id = %connection.id, failure = failure.as_str(), "liveness probe failed");
                    registry.unregister(&connection.id, TeardownReason::ProbeFailed);
                    return LivenessOutcome::ProbeFailed;
                }
            }
        }
    }
}
