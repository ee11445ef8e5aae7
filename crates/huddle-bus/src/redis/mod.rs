//! Redis-backed bus.
//!
//! One shared publisher connection issues `PUBLISH`; every subscription gets
//! its own connection in subscribe mode, drained by a reader task that
//! forwards `message` push frames in arrival order.

mod connection;
pub mod resp;

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use huddle_core::Topic;
use tokio::sync::{Mutex, mpsc};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, trace, warn};

use self::connection::RedisConnection;
use self::resp::{Command, RespValue};
use crate::errors::{BusError, Result};
use crate::{Bus, BusSubscription};

const DEFAULT_PORT: u16 = 6379;

/// Connection parameters parsed from a `redis://` URL.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RedisConfig {
    /// Server host name or address.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// ACL user, when the URL names one.
    pub username: Option<String>,
    /// Password for `AUTH`.
    pub password: Option<String>,
    /// Prefix applied to topic channel names.
    pub namespace: Option<String>,
    /// Buffered payloads per subscription.
    pub buffer: usize,
    /// Deadline for connecting and for each `PUBLISH` round trip.
    pub connect_timeout: Duration,
}

impl RedisConfig {
    /// Parse `redis://[[user]:password@]host[:port][/db]`.
    ///
    /// The database index is accepted and ignored; pub/sub channels are
    /// global to the server.
    pub fn from_url(url: &str) -> Result<Self> {
        let invalid = |reason| BusError::InvalidUrl {
            url: redact(url),
            reason,
        };
        let rest = url
            .strip_prefix("redis://")
            .ok_or_else(|| invalid("expected redis:// scheme"))?;
        let authority = rest.split('/').next().unwrap_or_default();

        let (userinfo, hostport) = match authority.rsplit_once('@') {
            Some((userinfo, hostport)) => (Some(userinfo), hostport),
            None => (None, authority),
        };
        let (username, password) = match userinfo {
            Some(info) => match info.split_once(':') {
                Some((user, pass)) => (
                    (!user.is_empty()).then(|| user.to_owned()),
                    (!pass.is_empty()).then(|| pass.to_owned()),
                ),
                None => (None, (!info.is_empty()).then(|| info.to_owned())),
            },
            None => (None, None),
        };

        let (host, port) = split_host_port(hostport).ok_or_else(|| invalid("invalid port"))?;
        if host.is_empty() {
            return Err(invalid("missing host"));
        }

        Ok(Self {
            host: host.to_owned(),
            port,
            username,
            password,
            namespace: None,
            buffer: 1024,
            connect_timeout: Duration::from_secs(5),
        })
    }

    /// Set the channel name prefix.
    #[must_use]
    pub fn with_namespace(mut self, namespace: Option<String>) -> Self {
        self.namespace = namespace.filter(|ns| !ns.is_empty());
        self
    }

    /// Set the per-subscription buffer.
    #[must_use]
    pub fn with_buffer(mut self, buffer: usize) -> Self {
        self.buffer = buffer.max(1);
        self
    }

    /// `host:port` for connecting.
    pub fn addr(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    fn channel(&self, topic: Topic) -> String {
        topic.channel_name(self.namespace.as_deref())
    }
}

fn split_host_port(hostport: &str) -> Option<(&str, u16)> {
    // [v6]:port
    if let Some(rest) = hostport.strip_prefix('[') {
        let (host, after) = rest.split_once(']')?;
        return match after.strip_prefix(':') {
            Some(port) => Some((host, port.parse().ok()?)),
            None if after.is_empty() => Some((host, DEFAULT_PORT)),
            None => None,
        };
    }
    match hostport.rsplit_once(':') {
        Some((host, port)) => Some((host, port.parse().ok()?)),
        None => Some((hostport, DEFAULT_PORT)),
    }
}

fn redact(url: &str) -> String {
    match (url.split_once("://"), url.rsplit_once('@')) {
        (Some((scheme, _)), Some((_, host))) => format!("{scheme}://***@{host}"),
        _ => url.to_owned(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Bus
// ─────────────────────────────────────────────────────────────────────────────

/// Bus over Redis pub/sub.
#[derive(Debug)]
pub struct RedisBus {
    config: RedisConfig,
    publisher: Mutex<Option<RedisConnection>>,
}

impl RedisBus {
    /// Connect the publisher. Fails when the server is unreachable or
    /// rejects authentication.
    pub async fn connect(config: RedisConfig) -> Result<Self> {
        let publisher = RedisConnection::open(&config).await?;
        info!(addr = %config.addr(), namespace = ?config.namespace, "connected to redis");
        Ok(Self {
            config,
            publisher: Mutex::new(Some(publisher)),
        })
    }

    /// Connection parameters.
    pub fn config(&self) -> &RedisConfig {
        &self.config
    }
}

#[async_trait]
impl Bus for RedisBus {
    async fn publish(&self, topic: Topic, payload: String) -> Result<()> {
        let cmd = Command::new("PUBLISH")
            .arg(self.config.channel(topic))
            .arg(payload);

        let mut guard = self.publisher.lock().await;
        if guard.is_none() {
            debug!("reconnecting redis publisher");
            *guard = Some(RedisConnection::open(&self.config).await?);
        }
        let Some(conn) = guard.as_mut() else {
            return Err(BusError::Closed);
        };

        // A stalled server must not pin the publisher lock forever
        let reply = match tokio::time::timeout(self.config.connect_timeout, conn.request(cmd)).await {
            Ok(reply) => reply,
            Err(_) => Err(BusError::Io(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "PUBLISH timed out",
            ))),
        };
        match reply {
            Ok(RespValue::Integer(receivers)) => {
                trace!(%topic, receivers, "published");
                Ok(())
            }
            Ok(other) => Err(BusError::Protocol(format!(
                "unexpected PUBLISH reply: {other:?}"
            ))),
            Err(e @ (BusError::Io(_) | BusError::Closed)) => {
                *guard = None;
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    async fn subscribe(&self, topic: Topic) -> Result<BusSubscription> {
        let channel = self.config.channel(topic);
        let mut conn = RedisConnection::open(&self.config).await?;
        conn.send(Command::new("SUBSCRIBE").arg(channel.clone()))
            .await?;

        let ack = conn.read().await?;
        if !is_subscribe_ack(&ack, &channel) {
            return Err(BusError::Protocol(format!(
                "unexpected SUBSCRIBE reply: {ack:?}"
            )));
        }
        debug!(%channel, "subscribed");

        let (tx, rx) = mpsc::channel(self.config.buffer);
        let _ = tokio::spawn(forward_messages(conn, channel, tx));
        Ok(ReceiverStream::new(rx).boxed())
    }
}

/// Drain a subscribe-mode connection into `tx` until either side goes away.
async fn forward_messages(mut conn: RedisConnection, channel: String, tx: mpsc::Sender<String>) {
    loop {
        let frame = tokio::select! {
            () = tx.closed() => {
                debug!(%channel, "subscription dropped");
                return;
            }
            frame = conn.read() => frame,
        };
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                warn!(%channel, error = %e, "redis subscription lost");
                return;
            }
        };
        let Some(payload) = message_payload(frame) else {
            trace!(%channel, "ignoring non-message frame");
            continue;
        };
        match String::from_utf8(payload) {
            Ok(payload) => {
                if tx.send(payload).await.is_err() {
                    return;
                }
            }
            Err(_) => warn!(%channel, "dropping non-UTF-8 payload"),
        }
    }
}

/// `["subscribe", channel, count]`
fn is_subscribe_ack(value: &RespValue, channel: &str) -> bool {
    match value {
        RespValue::Array(Some(items)) => matches!(
            items.as_slice(),
            [kind, name, RespValue::Integer(_)]
                if kind.as_bulk() == Some(b"subscribe".as_slice())
                    && name.as_bulk() == Some(channel.as_bytes())
        ),
        _ => false,
    }
}

/// Payload of a `["message", channel, payload]` push frame.
fn message_payload(value: RespValue) -> Option<Vec<u8>> {
    let RespValue::Array(Some(items)) = value else {
        return None;
    };
    match <[RespValue; 3]>::try_from(items) {
        Ok([kind, _channel, RespValue::Bulk(Some(payload))])
            if kind.as_bulk() == Some(b"message".as_slice()) =>
        {
            Some(payload.to_vec())
        }
        _ => None,
    }
}
