//! # huddle-settings
//!
//! Configuration with layered sources.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`HuddleSettings::default()`]
//! 2. **Settings file**: `~/.huddle/settings.json` or an explicit path,
//!    deep-merged over defaults
//! 3. **Environment variables**: `PORT`, `REDIS_URL`, `JWT_SECRET`,
//!    `HUDDLE_*` (highest priority)

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, apply_overrides, deep_merge, load_settings, load_settings_from_path,
    settings_path,
};
pub use types::*;
