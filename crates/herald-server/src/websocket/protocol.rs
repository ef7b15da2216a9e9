//! The `graphql-ws` sub-protocol: text frames in, broker messages out.

use std::sync::Arc;

use dashmap::DashMap;
use herald_broker::{BrokerMessageHandler, HeartbeatValue, InboundMessage};
use herald_core::{MessageType, OperationMessage, Principal};
use metrics::counter;
use serde_json::{Map, Value};
use tracing::{debug, instrument, warn};

use super::auth::ConnectionAuthenticator;
use super::connection::ClientConnection;
use super::outbound::ConnectionRegistry;
use super::stats::ProtocolStats;

/// Sub-protocol name negotiated through `Sec-WebSocket-Protocol`.
pub const GRAPHQL_WS: &str = "graphql-ws";

/// Smallest text frame limit the server will run with.
pub const MINIMUM_WEBSOCKET_MESSAGE_SIZE: usize = 16 * 1024 + 256;

/// Keep-alive interval assumed when `connection_init` does not name one.
pub const DEFAULT_KA_INTERVAL_MS: u64 = 5000;

/// Connection parameter carrying the client's keep-alive interval.
const KA_INTERVAL_PARAM: &str = "kaInterval";

/// Adapter between WebSocket sessions and the broker handler.
pub struct GraphQlWsProtocol {
    handler: Arc<BrokerMessageHandler>,
    connections: Arc<ConnectionRegistry>,
    stats: Arc<ProtocolStats>,
    destination: String,
    authenticator: Option<Arc<dyn ConnectionAuthenticator>>,
    /// Users established by `connection_init`, overriding the upgrade user.
    principals: DashMap<String, Principal>,
}

impl GraphQlWsProtocol {
    /// Adapter feeding `handler`. Inbound messages are tagged with
    /// `destination`, the endpoint path.
    pub fn new(
        handler: Arc<BrokerMessageHandler>,
        connections: Arc<ConnectionRegistry>,
        stats: Arc<ProtocolStats>,
        destination: impl Into<String>,
    ) -> Self {
        Self {
            handler,
            connections,
            stats,
            destination: destination.into(),
            authenticator: None,
            principals: DashMap::new(),
        }
    }

    /// Resolve session users from `connection_init` parameters.
    #[must_use]
    pub fn with_authenticator(mut self, authenticator: Arc<dyn ConnectionAuthenticator>) -> Self {
        self.authenticator = Some(authenticator);
        self
    }

    /// The user a session acts as: the one from `connection_init` if any,
    /// else the upgrade user.
    pub fn session_user(&self, connection: &ClientConnection) -> Option<Principal> {
        self.principals
            .get(&connection.id)
            .map(|entry| entry.value().clone())
            .or_else(|| connection.user().cloned())
    }

    /// Sub-protocols this adapter speaks.
    pub fn supported_protocols(&self) -> &'static [&'static str] {
        &[GRAPHQL_WS]
    }

    /// Counters shared with the outbound registry.
    pub fn stats(&self) -> &Arc<ProtocolStats> {
        &self.stats
    }

    /// Make `connection` reachable for outbound frames.
    pub fn after_session_started(&self, connection: Arc<ClientConnection>) {
        self.connections.add(connection);
    }

    /// Decode one text frame and forward it to the broker.
    #[instrument(skip_all, fields(session_id = %connection.id))]
    pub async fn handle_from_client(&self, connection: &ClientConnection, text: &str) {
        let payload = match OperationMessage::from_json(text) {
            Ok(payload) => payload,
            Err(e) => {
                self.stats.record_error();
                counter!("graphql_decode_errors_total").increment(1);
                warn!(error = %e, "failed to decode client frame");
                self.reply_decode_error(connection, &e.to_string());
                return;
            }
        };

        let mut inbound = InboundMessage::new(connection.id.clone(), payload)
            .with_user(self.session_user(connection))
            .with_destination(self.destination.clone());

        match inbound.payload.message_type {
            MessageType::ConnectionInit => {
                self.stats.record_connect();
                if let Some(params) = inbound.payload.payload_object() {
                    inbound.headers = params.clone();
                }
                if let Some(user) = self.authenticate(&inbound.headers) {
                    debug!(user = %user, "session authenticated from connection params");
                    let _ = self.principals.insert(connection.id.clone(), user.clone());
                    inbound.user = Some(user);
                }
                let ka = ka_interval(&inbound.headers);
                inbound = inbound.with_client_heartbeat(HeartbeatValue::from_millis(0, ka));
            }
            MessageType::Start => self.stats.record_start(),
            MessageType::Stop => self.stats.record_stop(),
            MessageType::ConnectionTerminate => self.stats.record_disconnect(),
            _ => {}
        }

        self.handler.handle_message(inbound).await;
    }

    /// Release everything owned by a closed session.
    ///
    /// A synthetic `connection_terminate` reaches the broker even when the
    /// client vanished without sending one.
    #[instrument(skip_all, fields(session_id = %session_id))]
    pub async fn after_session_ended(&self, session_id: &str, user: Option<Principal>) {
        self.stats.record_disconnect();
        let user = self
            .principals
            .remove(session_id)
            .map(|(_, principal)| principal)
            .or(user);
        let terminate = InboundMessage::new(
            session_id,
            OperationMessage::new(None, MessageType::ConnectionTerminate),
        )
        .with_user(user)
        .with_destination(self.destination.clone());
        self.handler.handle_message(terminate).await;

        if self.connections.remove(session_id).is_none() {
            debug!("session was not registered");
        }
    }

    fn authenticate(&self, params: &Map<String, Value>) -> Option<Principal> {
        let authenticator = self.authenticator.as_ref()?;
        let user = authenticator.authenticate(params);
        if user.is_none() {
            counter!("graphql_auth_rejected_total").increment(1);
            debug!("connection params did not authenticate");
        }
        user
    }

    fn reply_decode_error(&self, connection: &ClientConnection, message: &str) {
        let frame = OperationMessage::error_text(None, MessageType::ConnectionError, message);
        match frame.to_json() {
            Ok(text) => {
                if !connection.send_text(text) {
                    debug!("decode error frame dropped");
                }
            }
            Err(e) => warn!(error = %e, "failed to encode decode error frame"),
        }
    }
}

/// `kaInterval` from the connection parameters, as a number or numeric
/// string.
fn ka_interval(params: &Map<String, Value>) -> u64 {
    match params.get(KA_INTERVAL_PARAM) {
        Some(Value::Number(n)) => n.as_u64().unwrap_or(DEFAULT_KA_INTERVAL_MS),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(DEFAULT_KA_INTERVAL_MS),
        _ => DEFAULT_KA_INTERVAL_MS,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
