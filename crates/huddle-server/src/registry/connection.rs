//! A live client connection as seen by the registry and the router.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use huddle_core::{ConnectionId, UserId};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// An item on a connection's outbound queue. The writer task is the only
/// consumer and the only owner of the socket sink.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    /// A serialized outbound message, shared across every recipient.
    Text(Arc<str>),
    /// A liveness probe.
    Ping,
}

/// Why a frame could not be enqueued.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeliveryFailure {
    /// The outbound queue is at capacity: the client is not keeping up.
    QueueFull,
    /// The writer task has gone away.
    Closed,
}

impl DeliveryFailure {
    /// Short label for logs and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::QueueFull => "queue_full",
            Self::Closed => "closed",
        }
    }
}

/// Why a connection was torn down.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TeardownReason {
    /// The client closed the socket or the read side ended.
    ClientClosed,
    /// The router could not enqueue a frame.
    DeliveryFailed,
    /// The writer failed to write a frame.
    WriteFailed,
    /// A liveness probe could not be written in time.
    ProbeFailed,
    /// No pong within the pong timeout.
    PongTimeout,
    /// The server is shutting down.
    Shutdown,
}

impl TeardownReason {
    /// Short label for logs and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ClientClosed => "client_closed",
            Self::DeliveryFailed => "delivery_failed",
            Self::WriteFailed => "write_failed",
            Self::ProbeFailed => "probe_failed",
            Self::PongTimeout => "pong_timeout",
            Self::Shutdown => "shutdown",
        }
    }
}

impl fmt::Display for TeardownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Represents a connected client.
///
/// The socket itself is owned by the session's writer task; this record holds
/// the queue into it and the token that closes it.
pub struct Connection {
    /// Unique connection ID.
    pub id: ConnectionId,
    /// Authenticated owner.
    pub user_id: UserId,
    /// When this connection was created.
    pub connected_at: Instant,
    tx: mpsc::Sender<Frame>,
    closed: CancellationToken,
    last_pong: Mutex<Instant>,
    dropped_frames: AtomicU64,
}

impl Connection {
    /// Create a connection for `user_id` feeding `tx`.
    pub fn new(user_id: UserId, tx: mpsc::Sender<Frame>) -> Self {
        let now = Instant::now();
        Self {
            id: ConnectionId::new(),
            user_id,
            connected_at: now,
            tx,
            closed: CancellationToken::new(),
            last_pong: Mutex::new(now),
            dropped_frames: AtomicU64::new(0),
        }
    }

    /// Enqueue a frame without waiting.
    pub fn send(&self, frame: Frame) -> Result<(), DeliveryFailure> {
        self.tx.try_send(frame).map_err(|e| {
            let _ = self.dropped_frames.fetch_add(1, Ordering::Relaxed);
            match e {
                TrySendError::Full(_) => DeliveryFailure::QueueFull,
                TrySendError::Closed(_) => DeliveryFailure::Closed,
            }
        })
    }

    /// Frames that could not be enqueued.
    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames.load(Ordering::Relaxed)
    }

    /// Record a pong from the client.
    pub fn record_pong(&self) {
        *self.last_pong.lock() = Instant::now();
    }

    /// Time since the last pong, or since creation if none arrived yet.
    pub fn since_last_pong(&self) -> Duration {
        self.last_pong.lock().elapsed()
    }

    /// Signal every task serving this connection to stop. Idempotent.
    pub fn close(&self) {
        self.closed.cancel();
    }

    /// Whether [`Self::close`] has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Resolves once the connection is closed.
    pub async fn closed(&self) {
        self.closed.cancelled().await;
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
