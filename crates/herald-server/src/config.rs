//! Server configuration.

use std::collections::BTreeMap;
use std::time::Duration;

use herald_broker::{BrokerConfig, BufferPolicy, HeartbeatValue};
use herald_settings::{BrokerSettings, HeraldSettings};

use crate::websocket::protocol::MINIMUM_WEBSOCKET_MESSAGE_SIZE;

/// Configuration for the herald server.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Path of the WebSocket endpoint.
    pub endpoint: String,
    /// Origins allowed to open a WebSocket. Empty allows any origin.
    pub allowed_origins: Vec<String>,
    /// Max WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Outbound frames queued per connection. A frame that does not fit
    /// aborts the connection.
    pub send_queue_capacity: usize,
    /// Period of the protocol statistics log line. Zero disables it.
    pub stats_logging_period: Duration,
    /// How long shutdown waits for the server task.
    pub shutdown_timeout: Duration,
    /// Events retained per topic for slow subscribers.
    pub topic_capacity: usize,
    /// Bearer tokens accepted in `connection_init`, mapped to user names.
    /// Empty disables connection-param authentication.
    pub auth_tokens: BTreeMap<String, String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            endpoint: "/ws/graphql".into(),
            allowed_origins: Vec::new(),
            max_message_size: 64 * 1024,
            send_queue_capacity: 1024,
            stats_logging_period: Duration::from_secs(300),
            shutdown_timeout: Duration::from_secs(30),
            topic_capacity: 256,
            auth_tokens: BTreeMap::new(),
        }
    }
}

impl ServerConfig {
    /// Build from loaded settings.
    pub fn from_settings(settings: &HeraldSettings) -> Self {
        let server = &settings.server;
        Self {
            host: server.host.clone(),
            port: server.port,
            endpoint: server.endpoint.clone(),
            allowed_origins: server.allowed_origins.clone(),
            max_message_size: server.max_message_size,
            send_queue_capacity: server.send_queue_capacity,
            stats_logging_period: Duration::from_millis(settings.broker.stats_logging_period_ms),
            shutdown_timeout: Duration::from_millis(server.shutdown_timeout_ms),
            topic_capacity: settings.broker.topic_capacity,
            auth_tokens: server.auth_tokens.clone(),
        }
    }

    /// Message size limit handed to the WebSocket upgrade.
    ///
    /// Never below [`MINIMUM_WEBSOCKET_MESSAGE_SIZE`].
    pub fn effective_max_message_size(&self) -> usize {
        self.max_message_size.max(MINIMUM_WEBSOCKET_MESSAGE_SIZE)
    }

    /// Whether a request with this `Origin` header may upgrade.
    ///
    /// Requests without an `Origin` (non-browser clients) are always allowed.
    pub fn origin_allowed(&self, origin: Option<&str>) -> bool {
        if self.allowed_origins.is_empty() {
            return true;
        }
        match origin {
            None => true,
            Some(origin) => self
                .allowed_origins
                .iter()
                .any(|allowed| allowed == "*" || allowed.eq_ignore_ascii_case(origin)),
        }
    }
}

/// Broker configuration from the `broker` settings section.
pub fn broker_config(settings: &BrokerSettings) -> BrokerConfig {
    let heartbeat = settings.heartbeat.enabled.then(|| {
        HeartbeatValue::from_millis(settings.heartbeat.server_ms, settings.heartbeat.client_ms)
    });
    BrokerConfig {
        heartbeat,
        buffer: BufferPolicy {
            time_span: Duration::from_millis(settings.buffer_time_span_ms),
            max_count: settings.buffer_count,
        },
        destination_prefixes: settings.destination_prefixes.clone(),
    }
}
