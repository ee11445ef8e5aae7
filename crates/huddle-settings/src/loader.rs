//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`HuddleSettings::default()`]
//! 2. If the settings file exists, deep-merge its values over defaults
//! 3. Apply environment variable overrides (highest priority)
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::{Result, SettingsError};
use crate::types::{BusKind, HuddleSettings, LogFormat, huddle_dir};

/// Resolve the default settings file path (`~/.huddle/settings.json`).
pub fn settings_path() -> PathBuf {
    huddle_dir().join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<HuddleSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; a file with invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<HuddleSettings> {
    let defaults = serde_json::to_value(HuddleSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let user: Value = serde_json::from_str(&content).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: HuddleSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply overrides from the process environment.
pub fn apply_env_overrides(settings: &mut HuddleSettings) {
    apply_overrides(settings, |name| std::env::var(name).ok());
}

/// Apply overrides from an arbitrary variable lookup.
///
/// Empty and unparsable values are ignored with a warning, leaving the file
/// or default value in place.
pub fn apply_overrides<F>(settings: &mut HuddleSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let read = |name: &str| lookup(name).filter(|v| !v.is_empty());
    let read_parsed = |name: &str, parse: &dyn Fn(&str) -> Option<u64>| {
        let raw = read(name)?;
        let parsed = parse(&raw);
        if parsed.is_none() {
            warn!(key = name, value = %raw, "invalid env var, ignoring");
        }
        parsed
    };

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = read("HUDDLE_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = read_parsed("PORT", &|s| parse_u64_range(s, 1, 65_535)) {
        settings.server.port = u16::try_from(v).unwrap_or(settings.server.port);
    }
    if let Some(v) = read_parsed("HUDDLE_PING_INTERVAL_SECS", &|s| parse_u64_range(s, 1, 3600)) {
        settings.server.ping_interval_secs = v;
    }
    if let Some(v) = read_parsed("HUDDLE_PONG_TIMEOUT_SECS", &|s| parse_u64_range(s, 1, 86_400)) {
        settings.server.pong_timeout_secs = v;
    }
    if let Some(v) = read_parsed("HUDDLE_SEND_QUEUE", &|s| parse_u64_range(s, 1, 1_000_000)) {
        settings.server.send_queue_size = usize::try_from(v).unwrap_or(settings.server.send_queue_size);
    }

    // ── Bus ─────────────────────────────────────────────────────────
    if let Some(v) = read("REDIS_URL") {
        settings.bus.url = normalize_redis_url(&v);
    }
    if let Some(v) = read("HUDDLE_BUS") {
        match BusKind::parse(&v) {
            Some(kind) => settings.bus.kind = kind,
            None => warn!(key = "HUDDLE_BUS", value = %v, "invalid env var, ignoring"),
        }
    }
    if let Some(v) = read("HUDDLE_TOPIC_PREFIX") {
        settings.bus.namespace = Some(v);
    }

    // ── Auth / store / logging ──────────────────────────────────────
    if let Some(v) = read("JWT_SECRET") {
        settings.auth.jwt_secret = v;
    }
    if let Some(v) = read("HUDDLE_DB_PATH") {
        settings.store.db_path = v;
    }
    if let Some(v) = read("HUDDLE_LOG_FORMAT") {
        match LogFormat::parse(&v) {
            Some(format) => settings.logging.format = format,
            None => warn!(key = "HUDDLE_LOG_FORMAT", value = %v, "invalid env var, ignoring"),
        }
    }
}

/// Accept both bare `host:port` and full `redis://` URLs.
fn normalize_redis_url(raw: &str) -> String {
    if raw.contains("://") {
        raw.to_string()
    } else {
        format!("redis://{raw}")
    }
}

/// Parse a string as a `u64` within an inclusive range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}
