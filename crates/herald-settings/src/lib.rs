//! # herald-settings
//!
//! Layered configuration for herald. Sources, lowest priority first:
//!
//! 1. **Compiled defaults**: [`HeraldSettings::default()`]
//! 2. **Settings file**: `~/.herald/settings.json` or an explicit path,
//!    deep-merged over the defaults
//! 3. **Environment**: `HERALD_*` variables

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{apply_env_overrides, deep_merge, load_settings_from_path, settings_path};
pub use types::{BrokerSettings, HeartbeatSettings, HeraldSettings, LoggingSettings, ServerSettings};

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
