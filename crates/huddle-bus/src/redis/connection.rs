//! A single Redis TCP connection.

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tracing::debug;

use super::RedisConfig;
use super::resp::{Command, RespCodec, RespValue};
use crate::errors::{BusError, Result};

/// An authenticated, validated connection.
#[derive(Debug)]
pub(crate) struct RedisConnection {
    framed: Framed<TcpStream, RespCodec>,
}

impl RedisConnection {
    /// Connect, authenticate when a password is configured, and check the
    /// server answers `PING`.
    pub(crate) async fn open(config: &RedisConfig) -> Result<Self> {
        let addr = config.addr();
        let stream = tokio::time::timeout(config.connect_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| {
                BusError::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!("connecting to {addr} timed out"),
                ))
            })??;
        stream.set_nodelay(true)?;

        let mut conn = Self {
            framed: Framed::new(stream, RespCodec),
        };
        if let Some(password) = &config.password {
            conn.auth(config.username.as_deref(), password).await?;
        }
        conn.validate().await?;
        debug!(%addr, "redis connection ready");
        Ok(conn)
    }

    /// Write a command without waiting for its reply.
    pub(crate) async fn send(&mut self, cmd: Command) -> Result<()> {
        self.framed.send(cmd).await
    }

    /// Read the next reply or push frame. Cancel safe.
    pub(crate) async fn read(&mut self) -> Result<RespValue> {
        self.framed.next().await.ok_or(BusError::Closed)?
    }

    /// Send a command and read its reply, mapping error replies to
    /// [`BusError::Protocol`].
    pub(crate) async fn request(&mut self, cmd: Command) -> Result<RespValue> {
        self.send(cmd).await?;
        match self.read().await? {
            RespValue::Error(msg) => Err(BusError::Protocol(msg)),
            reply => Ok(reply),
        }
    }

    async fn auth(&mut self, username: Option<&str>, password: &str) -> Result<()> {
        let mut cmd = Command::new("AUTH");
        if let Some(user) = username {
            cmd = cmd.arg(user.to_owned());
        }
        cmd = cmd.arg(password.to_owned());
        match self.request(cmd).await {
            Ok(RespValue::Simple(ok)) if ok == "OK" => Ok(()),
            Ok(other) => Err(BusError::Auth(format!("unexpected AUTH reply: {other:?}"))),
            Err(BusError::Protocol(msg)) => Err(BusError::Auth(msg)),
            Err(e) => Err(e),
        }
    }

    async fn validate(&mut self) -> Result<()> {
        self.send(Command::new("PING")).await?;
        match self.read().await? {
            RespValue::Simple(pong) if pong == "PONG" => Ok(()),
            RespValue::Error(msg) if msg.starts_with("NOAUTH") => {
                Err(BusError::Auth("password required".into()))
            }
            RespValue::Error(msg) => Err(BusError::Protocol(msg)),
            other => Err(BusError::Protocol(format!(
                "unexpected PING reply: {other:?}"
            ))),
        }
    }
}
