//! Runtime configuration of the server crate.

use std::time::Duration;

use huddle_settings::HuddleSettings;

/// Everything the server needs from settings, in ready-to-use units.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Interval between liveness probes.
    pub ping_interval: Duration,
    /// Write deadline for a single probe.
    pub probe_timeout: Duration,
    /// Tear down a connection whose last pong is older than this.
    pub pong_timeout: Duration,
    /// Capacity of each connection's outbound queue.
    pub send_queue_size: usize,
    /// Upper bound on draining tasks at shutdown.
    pub shutdown_timeout: Duration,
    /// HS256 secret for connection tokens.
    pub jwt_secret: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            ping_interval: Duration::from_secs(30),
            probe_timeout: Duration::from_secs(1),
            pong_timeout: Duration::from_secs(90),
            send_queue_size: 256,
            shutdown_timeout: Duration::from_secs(10),
            jwt_secret: String::new(),
        }
    }
}

impl From<&HuddleSettings> for ServerConfig {
    fn from(settings: &HuddleSettings) -> Self {
        let server = &settings.server;
        Self {
            host: server.host.clone(),
            port: server.port,
            ping_interval: server.ping_interval(),
            probe_timeout: server.probe_timeout(),
            pong_timeout: server.pong_timeout(),
            send_queue_size: server.send_queue_size.max(1),
            shutdown_timeout: server.shutdown_timeout(),
            jwt_secret: settings.auth.jwt_secret.clone(),
        }
    }
}
