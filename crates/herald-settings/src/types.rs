//! Settings types with compiled defaults.
//!
//! All structs use `#[serde(default)]` so a partial JSON file only needs the
//! keys it changes.

use std::collections::BTreeMap;

use herald_logging::LogFormat;
use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings document.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HeraldSettings {
    /// HTTP and WebSocket listener.
    pub server: ServerSettings,
    /// Subscription broker behavior.
    pub broker: BrokerSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

impl HeraldSettings {
    /// Reject combinations the server cannot run with.
    pub fn validate(&self) -> Result<()> {
        if !self.server.endpoint.starts_with('/') {
            return Err(SettingsError::InvalidValue(format!(
                "server.endpoint must start with '/', got {:?}",
                self.server.endpoint
            )));
        }
        if self.broker.buffer_count == 0 {
            return Err(SettingsError::InvalidValue(
                "broker.bufferCount must be at least 1".into(),
            ));
        }
        if self.server.send_queue_capacity == 0 {
            return Err(SettingsError::InvalidValue(
                "server.sendQueueCapacity must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Network listener settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port. `0` picks a free port.
    pub port: u16,
    /// Path of the WebSocket endpoint.
    pub endpoint: String,
    /// Origins allowed to open the WebSocket. Empty or `"*"` allows any.
    pub allowed_origins: Vec<String>,
    /// Largest accepted inbound WebSocket message, in bytes.
    pub max_message_size: usize,
    /// Frames buffered per connection before sends start failing.
    pub send_queue_capacity: usize,
    /// Time allowed for connections to drain on shutdown.
    pub shutdown_timeout_ms: u64,
    /// Bearer tokens accepted in `connection_init`, mapped to user names.
    pub auth_tokens: BTreeMap<String, String>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            endpoint: "/ws/graphql".to_string(),
            allowed_origins: Vec::new(),
            max_message_size: 64 * 1024,
            send_queue_capacity: 1024,
            shutdown_timeout_ms: 30_000,
            auth_tokens: BTreeMap::new(),
        }
    }
}

/// Subscription broker settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BrokerSettings {
    /// Results per DATA frame before an early flush.
    pub buffer_count: usize,
    /// Longest time a result waits in a batch.
    pub buffer_time_span_ms: u64,
    /// Session heartbeat.
    pub heartbeat: HeartbeatSettings,
    /// Destination prefixes the broker accepts. Empty accepts all.
    pub destination_prefixes: Vec<String>,
    /// Period of the protocol stats log line. `0` disables it.
    pub stats_logging_period_ms: u64,
    /// Events buffered per topic before slow subscribers lag.
    pub topic_capacity: usize,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            buffer_count: 50,
            buffer_time_span_ms: 1000,
            heartbeat: HeartbeatSettings::default(),
            destination_prefixes: Vec::new(),
            stats_logging_period_ms: 5 * 60 * 1000,
            topic_capacity: 256,
        }
    }
}

/// Heartbeat negotiation values.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HeartbeatSettings {
    /// Run the heartbeat task at all.
    pub enabled: bool,
    /// How often the server writes to an idle session, in ms.
    pub server_ms: u64,
    /// How often clients are expected to write, in ms.
    pub client_ms: u64,
}

impl Default for HeartbeatSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            server_ms: 5000,
            client_ms: 5000,
        }
    }
}

/// Log output settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter when `RUST_LOG` is unset.
    pub level: String,
    /// Output format.
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn defaults_match_broker_conventions() {
        let settings = HeraldSettings::default();
        assert_eq!(settings.broker.buffer_count, 50);
        assert_eq!(settings.broker.buffer_time_span_ms, 1000);
        assert_eq!(settings.broker.heartbeat.server_ms, 5000);
        assert_eq!(settings.broker.heartbeat.client_ms, 5000);
        assert_eq!(settings.server.endpoint, "/ws/graphql");
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn serializes_camel_case() {
        let value = serde_json::to_value(HeraldSettings::default()).unwrap();
        assert!(value["broker"].get("bufferTimeSpanMs").is_some());
        assert!(value["server"].get("sendQueueCapacity").is_some());
        assert_eq!(value["logging"]["format"], "compact");
    }

    #[test]
    fn partial_document_uses_defaults() {
        let settings: HeraldSettings =
            serde_json::from_str(r#"{"broker": {"bufferCount": 5}}"#).unwrap();
        assert_eq!(settings.broker.buffer_count, 5);
        assert_eq!(settings.broker.buffer_time_span_ms, 1000);
        assert_eq!(settings.server.port, 8080);
    }

    #[test]
    fn auth_tokens_read_from_camel_case_key() {
        let settings: HeraldSettings =
            serde_json::from_str(r#"{"server": {"authTokens": {"t-alice": "alice"}}}"#).unwrap();
        assert_eq!(settings.server.auth_tokens.get("t-alice").map(String::as_str), Some("alice"));
        assert!(HeraldSettings::default().server.auth_tokens.is_empty());
    }

    #[test]
    fn validate_rejects_zero_buffer_count() {
        let mut settings = HeraldSettings::default();
        settings.broker.buffer_count = 0;
        assert_matches!(settings.validate(), Err(SettingsError::InvalidValue(_)));
    }

    #[test]
    fn validate_rejects_relative_endpoint() {
        let mut settings = HeraldSettings::default();
        settings.server.endpoint = "ws".into();
        assert!(settings.validate().is_err());
    }
}
