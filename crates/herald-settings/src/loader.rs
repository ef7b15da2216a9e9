//! Settings loading: compiled defaults, then the JSON file, then `HERALD_*`
//! environment variables.
//!
//! Merge rules for the file layer:
//! - Objects merge recursively, per key
//! - Arrays and primitives replace the default
//! - `null` keeps the default

use std::path::{Path, PathBuf};

use herald_logging::LogFormat;
use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::{Result, SettingsError};
use crate::types::HeraldSettings;

/// Default settings file (`~/.herald/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".herald").join("settings.json")
}

/// Load from `path` with environment overrides.
///
/// A missing file yields the defaults; an unreadable or malformed one is an
/// error.
pub fn load_settings_from_path(path: &Path) -> Result<HeraldSettings> {
    let mut settings = load_file_layer(path)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

fn load_file_layer(path: &Path) -> Result<HeraldSettings> {
    let defaults = serde_json::to_value(HeraldSettings::default())?;
    if !path.exists() {
        debug!(?path, "settings file not found, using defaults");
        return Ok(serde_json::from_value(defaults)?);
    }

    debug!(?path, "loading settings file");
    let content = std::fs::read_to_string(path).map_err(|source| SettingsError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let user: Value = serde_json::from_str(&content)?;
    Ok(serde_json::from_value(deep_merge(defaults, user))?)
}

/// Recursively merge `source` over `target`.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut merged), Value::Object(overrides)) => {
            for (key, value) in overrides {
                if value.is_null() {
                    continue;
                }
                let value = match merged.remove(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => value,
                };
                let _ = merged.insert(key, value);
            }
            Value::Object(merged)
        }
        (_, source) => source,
    }
}

/// Apply `HERALD_*` process environment variables.
pub fn apply_env_overrides(settings: &mut HeraldSettings) {
    apply_overrides(settings, &|name| std::env::var(name).ok());
}

/// Apply overrides read through `lookup`.
///
/// Values that fail to parse or fall outside their range are logged and
/// ignored.
pub fn apply_overrides(settings: &mut HeraldSettings, lookup: &dyn Fn(&str) -> Option<String>) {
    let env = EnvReader { lookup };

    if let Some(v) = env.string("HERALD_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = env.u16("HERALD_PORT", 0, 65535) {
        settings.server.port = v;
    }
    if let Some(v) = env.string("HERALD_ENDPOINT") {
        settings.server.endpoint = v;
    }

    if let Some(v) = env.usize("HERALD_BUFFER_COUNT", 1, 100_000) {
        settings.broker.buffer_count = v;
    }
    if let Some(v) = env.u64("HERALD_BUFFER_TIME_SPAN_MS", 1, 3_600_000) {
        settings.broker.buffer_time_span_ms = v;
    }
    if let Some(v) = env.bool("HERALD_HEARTBEAT_ENABLED") {
        settings.broker.heartbeat.enabled = v;
    }
    if let Some(v) = env.u64("HERALD_HEARTBEAT_SERVER_MS", 0, 3_600_000) {
        settings.broker.heartbeat.server_ms = v;
    }
    if let Some(v) = env.u64("HERALD_HEARTBEAT_CLIENT_MS", 0, 3_600_000) {
        settings.broker.heartbeat.client_ms = v;
    }
    if let Some(v) = env.u64("HERALD_STATS_LOGGING_PERIOD_MS", 0, 86_400_000) {
        settings.broker.stats_logging_period_ms = v;
    }

    if let Some(v) = env.string("HERALD_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.string("HERALD_LOG_FORMAT") {
        match LogFormat::parse(&v) {
            Some(format) => settings.logging.format = format,
            None => warn!(key = "HERALD_LOG_FORMAT", value = %v, "invalid log format, ignoring"),
        }
    }
}

// ── Pure parsing functions ──────────────────────────────────────────────────

/// Parse a boolean: `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a `u16` within `min..=max`.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.trim().parse().ok()?;
    (min..=max).contains(&n).then_some(n)
}

/// Parse a `u64` within `min..=max`.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.trim().parse().ok()?;
    (min..=max).contains(&n).then_some(n)
}

/// Parse a `usize` within `min..=max`.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.trim().parse().ok()?;
    (min..=max).contains(&n).then_some(n)
}

struct EnvReader<'a> {
    lookup: &'a dyn Fn(&str) -> Option<String>,
}

impl EnvReader<'_> {
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn parsed<T>(&self, name: &str, kind: &str, parse: impl FnOnce(&str) -> Option<T>) -> Option<T> {
        let val = (self.lookup)(name)?;
        let result = parse(&val);
        if result.is_none() {
            warn!(key = name, value = %val, kind, "invalid env var, ignoring");
        }
        result
    }

    fn bool(&self, name: &str) -> Option<bool> {
        self.parsed(name, "bool", parse_bool)
    }

    fn u16(&self, name: &str, min: u16, max: u16) -> Option<u16> {
        self.parsed(name, "u16", |v| parse_u16_range(v, min, max))
    }

    fn u64(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        self.parsed(name, "u64", |v| parse_u64_range(v, min, max))
    }

    fn usize(&self, name: &str, min: usize, max: usize) -> Option<usize> {
        self.parsed(name, "usize", |v| parse_usize_range(v, min, max))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
