//! # huddle
//!
//! Realtime server binary. Loads settings, opens the directory database,
//! connects the bus and serves WebSocket clients until Ctrl-C.

#![deny(unsafe_code)]

mod logging;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use huddle_bus::{MemoryBus, RedisBus, RedisConfig, SharedBus};
use huddle_server::config::ServerConfig;
use huddle_server::server::HuddleServer;
use huddle_settings::{BusKind, HuddleSettings};
use huddle_store::SqliteDirectory;
use huddle_store::sqlite::connection::ConnectionConfig;

/// Huddle realtime server.
#[derive(Parser, Debug)]
#[command(name = "huddle", about = "Huddle realtime presence and messaging server")]
struct Cli {
    /// Settings file (defaults to `~/.huddle/settings.json`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind (overrides settings, 0 for auto-assign).
    #[arg(long)]
    port: Option<u16>,

    /// Bus implementation: `redis` or `memory` (overrides settings).
    #[arg(long, value_parser = parse_bus_kind)]
    bus: Option<BusKind>,

    /// Path to the `SQLite` directory database (overrides settings).
    #[arg(long)]
    db_path: Option<PathBuf>,
}

impl Cli {
    fn apply(&self, settings: &mut HuddleSettings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(kind) = self.bus {
            settings.bus.kind = kind;
        }
        if let Some(path) = &self.db_path {
            settings.store.db_path = path.to_string_lossy().into_owned();
        }
    }
}

fn parse_bus_kind(s: &str) -> std::result::Result<BusKind, String> {
    BusKind::parse(s).ok_or_else(|| format!("unknown bus `{s}` (expected redis or memory)"))
}

fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    Ok(())
}

async fn connect_bus(settings: &HuddleSettings) -> Result<SharedBus> {
    let bus = &settings.bus;
    match bus.kind {
        BusKind::Memory => {
            tracing::info!(buffer = bus.buffer_size, "using in-process bus");
            Ok(Arc::new(MemoryBus::new(bus.buffer_size)))
        }
        BusKind::Redis => {
            let config = RedisConfig::from_url(&bus.url)
                .context("Invalid REDIS_URL")?
                .with_namespace(bus.namespace.clone())
                .with_buffer(bus.buffer_size);
            let redis = RedisBus::connect(config)
                .await
                .context("Failed to connect to redis")?;
            Ok(Arc::new(redis))
        }
    }
}

fn open_directory(settings: &HuddleSettings) -> Result<SqliteDirectory> {
    let path = Path::new(&settings.store.db_path);
    ensure_parent_dir(path)?;
    let config = ConnectionConfig {
        pool_size: settings.store.pool_size,
        ..ConnectionConfig::default()
    };
    SqliteDirectory::open(&settings.store.db_path, &config).context("Failed to open database")
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    let mut settings = match &args.config {
        Some(path) => huddle_settings::load_settings_from_path(path),
        None => huddle_settings::load_settings(),
    }
    .context("Failed to load settings")?;
    args.apply(&mut settings);

    logging::init(&settings.logging);
    settings.validate().context("Invalid settings")?;

    let metrics = match huddle_server::metrics::install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            tracing::warn!(error = %e, "metrics recorder unavailable, /metrics disabled");
            None
        }
    };

    let directory = Arc::new(open_directory(&settings)?);
    let bus = connect_bus(&settings).await?;

    let mut server = HuddleServer::start(ServerConfig::from(&settings), bus, directory)
        .await
        .context("Failed to start server")?;
    if let Some(handle) = metrics {
        server = server.with_metrics(handle);
    }
    let addr = server.listen().await.context("Failed to bind")?;
    tracing::info!(%addr, bus = ?settings.bus.kind, "huddle ready");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    tracing::info!("shutting down");
    server.shutdown_gracefully().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_defaults_leave_settings_alone() {
        let cli = Cli::parse_from(["huddle"]);
        let mut settings = HuddleSettings::default();
        let before = settings.server.port;
        cli.apply(&mut settings);
        assert_eq!(settings.server.port, before);
        assert_eq!(settings.bus.kind, BusKind::Redis);
    }

    #[test]
    fn cli_overrides() {
        let cli = Cli::parse_from([
            "huddle",
            "--host",
            "127.0.0.1",
            "--port",
            "8080",
            "--bus",
            "memory",
            "--db-path",
            "/tmp/h.db",
        ]);
        let mut settings = HuddleSettings::default();
        cli.apply(&mut settings);
        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.server.port, 8080);
        assert_eq!(settings.bus.kind, BusKind::Memory);
        assert_eq!(settings.store.db_path, "/tmp/h.db");
    }

    #[test]
    fn cli_rejects_unknown_bus() {
        assert!(Cli::try_parse_from(["huddle", "--bus", "kafka"]).is_err());
    }

    #[test]
    fn cli_config_path() {
        let cli = Cli::parse_from(["huddle", "--config", "/etc/huddle.json"]);
        assert_eq!(cli.config, Some(PathBuf::from("/etc/huddle.json")));
    }

    #[test]
    fn ensure_parent_dir_creates_nested() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a").join("b").join("huddle.db");
        ensure_parent_dir(&path).unwrap();
        assert!(path.parent().unwrap().exists());
    }

    #[test]
    fn directory_opens_under_new_dir() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = HuddleSettings::default();
        settings.store.db_path = dir
            .path()
            .join("nested")
            .join("huddle.db")
            .to_string_lossy()
            .into_owned();
        assert!(open_directory(&settings).is_ok());
    }

    #[tokio::test]
    async fn memory_bus_needs_no_network() {
        let mut settings = HuddleSettings::default();
        settings.bus.kind = BusKind::Memory;
        assert!(connect_bus(&settings).await.is_ok());
    }

    #[tokio::test]
    async fn bad_redis_url_is_reported() {
        let mut settings = HuddleSettings::default();
        settings.bus.url = "redis://host:notaport".into();
        let err = connect_bus(&settings).await.err().expect("expected an error");
        assert!(format!("{err:#}").contains("REDIS_URL"));
    }
}
