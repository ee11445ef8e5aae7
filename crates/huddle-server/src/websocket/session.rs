//! WebSocket session lifecycle: one connected client from upgrade through
//! teardown.
//!
//! 1. Fetches memberships and registers the connection with its initial
//!    subscriptions (reads start only after registration completes)
//! 2. Spawns the writer, the sole owner of the socket sink
//! 3. Spawns the liveness monitor
//! 4. Runs the read loop until the client goes away or the connection is
//!    closed, then requests teardown

use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket};
use futures::{Sink, SinkExt, Stream, StreamExt};
use huddle_core::UserId;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use super::inbound::InboundHandler;
use crate::liveness::run_liveness;
use crate::registry::{Connection, Frame, RegistryHandle, Subscriptions, TeardownReason};
use crate::server::AppState;

/// Run a session for an authenticated client.
#[instrument(skip_all, fields(user_id = %user))]
pub async fn run_session(socket: WebSocket, user: UserId, state: AppState) {
    let subscriptions = initial_subscriptions(&state, &user).await;
    let (tx, rx) = mpsc::channel(state.config.send_queue_size);
    let connection = Arc::new(Connection::new(user, tx));

    if state
        .registry
        .register(Arc::clone(&connection), subscriptions)
        .await
        .is_err()
    {
        warn!("registry shut down, refusing connection");
        return;
    }
    info!(conn_id = %connection.id, "client connected");

    let (sink, mut stream) = socket.split();
    let writer = tokio::spawn(run_writer(
        sink,
        rx,
        Arc::clone(&connection),
        state.registry.clone(),
        state.config.probe_timeout,
    ));
    let liveness = tokio::spawn(run_liveness(
        Arc::clone(&connection),
        state.registry.clone(),
        state.config.ping_interval,
        state.config.pong_timeout,
    ));

    read_loop(&mut stream, &connection, &state.inbound).await;

    state
        .registry
        .unregister(&connection.id, TeardownReason::ClientClosed);
    if tokio::time::timeout(state.config.shutdown_timeout, connection.closed())
        .await
        .is_err()
    {
        connection.close();
    }
    let _ = writer.await;
    let _ = liveness.await;
    info!(conn_id = %connection.id, "client disconnected");
}

/// Memberships from the directory. A failed lookup admits the connection with
/// no subscriptions.
async fn initial_subscriptions(state: &AppState, user: &UserId) -> Subscriptions {
    let directory = Arc::clone(&state.directory);
    let lookup = user.clone();
    match tokio::task::spawn_blocking(move || directory.memberships(&lookup)).await {
        Ok(Ok(memberships)) => Subscriptions::from(memberships),
        Ok(Err(error)) => {
            warn!(%error, "membership lookup failed, starting unsubscribed");
            Subscriptions::new()
        }
        Err(error) => {
            warn!(%error, "membership lookup aborted, starting unsubscribed");
            Subscriptions::new()
        }
    }
}

/// Dispatch inbound frames until the client leaves or the connection is
/// closed.
pub async fn read_loop<S, E>(stream: &mut S, connection: &Connection, inbound: &InboundHandler)
where
    S: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    loop {
        let message = tokio::select! {
            biased;
            () = connection.closed() => break,
            message = stream.next() => message,
        };
        match message {
            Some(Ok(Message::Text(text))) => {
                let _ = inbound.handle(connection, text.as_str()).await;
            }
            // Some clients send JSON in binary frames
            Some(Ok(Message::Binary(data))) => match std::str::from_utf8(&data) {
                Ok(text) => {
                    let _ = inbound.handle(connection, text).await;
                }
                Err(_) => debug!(len = data.len(), "ignoring non-UTF8 binary frame"),
            },
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => connection.record_pong(),
            Some(Ok(Message::Close(_))) => {
                debug!("client sent close frame");
                break;
            }
            Some(Err(error)) => {
                debug!(%error, "websocket read failed");
                break;
            }
            None => break,
        }
    }
}

/// Drain `queue` into `sink` until the connection closes.
///
/// Probes are bounded by `probe_timeout`. Any failed write requests teardown.
/// On a clean exit a Close frame is sent.
pub async fn run_writer<S>(
    mut sink: S,
    mut queue: mpsc::Receiver<Frame>,
    connection: Arc<Connection>,
    registry: RegistryHandle,
    probe_timeout: Duration,
) where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    loop {
        let frame = tokio::select! {
            biased;
            () = connection.closed() => break,
            frame = queue.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };
        let (message, deadline, reason) = match frame {
            Frame::Text(text) => (
                Message::Text(String::from(&*text).into()),
                None,
                TeardownReason::WriteFailed,
            ),
            Frame::Ping => (
                Message::Ping(Bytes::new()),
                Some(probe_timeout),
                TeardownReason::ProbeFailed,
            ),
        };

        let send = async {
            match deadline {
                Some(deadline) => match tokio::time::timeout(deadline, sink.send(message)).await {
                    Ok(result) => result.map_err(|e| e.to_string()),
                    Err(_) => Err(format!("no progress within {deadline:?}")),
                },
                None => sink.send(message).await.map_err(|e| e.to_string()),
            }
        };
        let result = tokio::select! {
            biased;
            result = send => result,
            () = connection.closed() => return,
        };
        if let Err(error) = result {
            warn!(conn_id = %connection.id, %reason, %error, "websocket write failed");
            registry.unregister(&connection.id, reason);
            return;
        }
    }

    let _ = tokio::time::timeout(probe_timeout, sink.send(Message::Close(None))).await;
}
