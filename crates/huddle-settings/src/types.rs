//! Settings types with compiled defaults.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings object.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HuddleSettings {
    /// HTTP/WebSocket server and connection tuning.
    pub server: ServerSettings,
    /// Distributed bus connection.
    pub bus: BusSettings,
    /// Token validation.
    pub auth: AuthSettings,
    /// Persistence collaborator.
    pub store: StoreSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

impl HuddleSettings {
    /// Reject settings the server cannot start with.
    pub fn validate(&self) -> Result<()> {
        if self.auth.jwt_secret.is_empty() {
            return Err(SettingsError::InvalidValue(
                "auth.jwtSecret is empty (set JWT_SECRET)".into(),
            ));
        }
        if self.server.send_queue_size == 0 {
            return Err(SettingsError::InvalidValue(
                "server.sendQueueSize must be at least 1".into(),
            ));
        }
        if self.server.ping_interval_secs == 0 {
            return Err(SettingsError::InvalidValue(
                "server.pingIntervalSecs must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Server network and connection settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Listen port.
    pub port: u16,
    /// Interval between liveness probes, in seconds.
    pub ping_interval_secs: u64,
    /// Write deadline for a liveness probe, in milliseconds.
    pub probe_timeout_ms: u64,
    /// Tear a connection down when no pong arrived for this long, in seconds.
    pub pong_timeout_secs: u64,
    /// Capacity of each connection's outbound queue.
    pub send_queue_size: usize,
    /// How long shutdown waits for background tasks, in seconds.
    pub shutdown_timeout_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            ping_interval_secs: 30,
            probe_timeout_ms: 1000,
            pong_timeout_secs: 90,
            send_queue_size: 256,
            shutdown_timeout_secs: 10,
        }
    }
}

impl ServerSettings {
    /// Liveness probe interval.
    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }

    /// Liveness probe write deadline.
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    /// Maximum silence before a connection is considered dead.
    pub fn pong_timeout(&self) -> Duration {
        Duration::from_secs(self.pong_timeout_secs)
    }

    /// Graceful shutdown timeout.
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

/// Which bus implementation to use.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusKind {
    /// Redis pub/sub, for multi-instance deployments.
    #[default]
    Redis,
    /// In-process broadcast, for a single instance.
    Memory,
}

impl BusKind {
    /// Parse `redis` / `memory` (case-insensitive).
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "redis" => Some(Self::Redis),
            "memory" => Some(Self::Memory),
            _ => None,
        }
    }
}

/// Distributed bus settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BusSettings {
    /// Implementation.
    pub kind: BusKind,
    /// `redis://[:password@]host:port` URL.
    pub url: String,
    /// Optional prefix for topic channel names.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Per-topic buffer of the in-process bus and of each subscription.
    pub buffer_size: usize,
}

impl Default for BusSettings {
    fn default() -> Self {
        Self {
            kind: BusKind::Redis,
            url: "redis://127.0.0.1:6379".to_string(),
            namespace: None,
            buffer_size: 1024,
        }
    }
}

/// Token validation settings.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuthSettings {
    /// HMAC secret used to validate HS256 tokens.
    pub jwt_secret: String,
}

/// Persistence settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StoreSettings {
    /// Path of the SQLite directory database.
    pub db_path: String,
    /// Connection pool size.
    pub pool_size: u32,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            db_path: huddle_dir().join("huddle.db").to_string_lossy().into_owned(),
            pool_size: 8,
        }
    }
}

/// Log output format.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Pretty,
    /// One JSON object per event.
    Json,
}

impl LogFormat {
    /// Parse `pretty` / `json` (case-insensitive).
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pretty" | "text" => Some(Self::Pretty),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

/// Logging settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Output format.
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

/// `~/.huddle`, falling back to `/tmp/.huddle` without a home directory.
pub fn huddle_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".huddle")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> HuddleSettings {
        let mut settings = HuddleSettings::default();
        settings.auth.jwt_secret = "secret".into();
        settings
    }

    #[test]
    fn validate_accepts_configured_secret() {
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn validate_rejects_empty_secret() {
        let err = HuddleSettings::default().validate().unwrap_err();
        assert!(err.to_string().contains("JWT_SECRET"));
    }

    #[test]
    fn validate_rejects_zero_queue() {
        let mut settings = valid();
        settings.server.send_queue_size = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn durations() {
        let server = ServerSettings::default();
        assert_eq!(server.ping_interval(), Duration::from_secs(30));
        assert_eq!(server.probe_timeout(), Duration::from_secs(1));
        assert_eq!(server.pong_timeout(), Duration::from_secs(90));
    }

    #[test]
    fn partial_json_fills_defaults() {
        let settings: HuddleSettings =
            serde_json::from_str(r#"{"server":{"port":9000},"bus":{"kind":"memory"}}"#).unwrap();
        assert_eq!(settings.server.port, 9000);
        assert_eq!(settings.server.host, "0.0.0.0");
        assert_eq!(settings.bus.kind, BusKind::Memory);
        assert_eq!(settings.bus.buffer_size, 1024);
    }

    #[test]
    fn parse_enums() {
        assert_eq!(BusKind::parse("MEMORY"), Some(BusKind::Memory));
        assert_eq!(BusKind::parse("kafka"), None);
        assert_eq!(LogFormat::parse("json"), Some(LogFormat::Json));
        assert_eq!(LogFormat::parse("xml"), None);
    }
}
