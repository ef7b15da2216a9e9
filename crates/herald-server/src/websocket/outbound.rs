//! Live connections, addressed by session id, as the broker's outbound
//! channel.

use std::sync::Arc;

use dashmap::DashMap;
use herald_broker::{FrameKind, OutboundChannel, OutboundMessage};
use herald_core::MessageType;
use metrics::counter;
use tracing::{debug, warn};

use super::connection::ClientConnection;
use super::stats::ProtocolStats;

/// All open connections.
pub struct ConnectionRegistry {
    connections: DashMap<String, Arc<ClientConnection>>,
    stats: Arc<ProtocolStats>,
}

impl ConnectionRegistry {
    /// Empty registry reporting into `stats`.
    pub fn new(stats: Arc<ProtocolStats>) -> Self {
        Self {
            connections: DashMap::new(),
            stats,
        }
    }

    /// Register a connection under its id.
    pub fn add(&self, connection: Arc<ClientConnection>) {
        let _ = self.connections.insert(connection.id.clone(), connection);
    }

    /// Unregister a connection.
    pub fn remove(&self, id: &str) -> Option<Arc<ClientConnection>> {
        self.connections.remove(id).map(|(_, connection)| connection)
    }

    /// Look up a connection.
    pub fn get(&self, id: &str) -> Option<Arc<ClientConnection>> {
        self.connections.get(id).map(|entry| Arc::clone(entry.value()))
    }

    /// Number of open connections.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Whether no connection is open.
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

impl OutboundChannel for ConnectionRegistry {
    fn send(&self, message: OutboundMessage) -> bool {
        let frame_type = message.payload.message_type;
        let Some(connection) = self.get(&message.session_id) else {
            debug!(session_id = %message.session_id, frame = frame_type.as_str(), "no connection for frame");
            counter!("graphql_frames_dropped_total").increment(1);
            return false;
        };
        let text = match message.payload.to_json() {
            Ok(text) => text,
            Err(e) => {
                warn!(session_id = %message.session_id, error = %e, "failed to encode frame");
                return false;
            }
        };

        let sent = connection.send_text(text);
        if sent {
            counter!("graphql_frames_sent_total", "type" => frame_type.as_str()).increment(1);
            if frame_type == MessageType::ConnectionAck {
                self.stats.record_connected();
            }
        } else {
            counter!("graphql_frames_dropped_total").increment(1);
        }
        if message.kind == FrameKind::Disconnect {
            let _ = connection.close();
        }
        sent
    }
}

#[cfg(test)]
mod tests {
    use herald_core::OperationMessage;
    use tokio::sync::mpsc;

    use super::*;
    use crate::websocket::connection::Outgoing;

    fn registry_with(id: &str, capacity: usize) -> (ConnectionRegistry, Arc<ProtocolStats>, mpsc::Receiver<Outgoing>) {
        let stats = Arc::new(ProtocolStats::new());
        let registry = ConnectionRegistry::new(Arc::clone(&stats));
        let (tx, rx) = mpsc::channel(capacity);
        registry.add(Arc::new(ClientConnection::new(id.into(), None, tx)));
        (registry, stats, rx)
    }

    #[test]
    fn frames_are_serialized_to_the_connection() {
        let (registry, _stats, mut rx) = registry_with("s1", 4);

        assert!(registry.send(OutboundMessage::new("s1", None, OperationMessage::complete(Some("7".into())))));

        let Ok(Outgoing::Text(text)) = rx.try_recv() else {
            panic!("expected a text frame");
        };
        let frame: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(frame["type"], "complete");
        assert_eq!(frame["id"], "7");
    }

    #[test]
    fn ack_counts_connected() {
        let (registry, stats, _rx) = registry_with("s1", 4);
        assert!(registry.send(OutboundMessage::new(
            "s1",
            None,
            OperationMessage::new(None, MessageType::ConnectionAck)
        )));
        assert_eq!(stats.snapshot().connected, 1);
    }

    #[test]
    fn unknown_session_is_dropped() {
        let (registry, _stats, _rx) = registry_with("s1", 4);
        assert!(!registry.send(OutboundMessage::new("nope", None, OperationMessage::keep_alive())));
    }

    #[test]
    fn full_queue_returns_false() {
        let (registry, _stats, _rx) = registry_with("s1", 1);
        assert!(registry.send(OutboundMessage::new("s1", None, OperationMessage::keep_alive())));
        assert!(!registry.send(OutboundMessage::new("s1", None, OperationMessage::keep_alive())));
        assert_eq!(registry.get("s1").unwrap().drop_count(), 1);
    }

    #[test]
    fn overflow_ends_delivery_instead_of_skipping_a_frame() {
        let (registry, _stats, mut rx) = registry_with("s1", 1);
        let data = |n: i64| OutboundMessage::new("s1", None, OperationMessage::data(Some("1".into()), serde_json::json!([n])));

        assert!(registry.send(data(1)));
        assert!(!registry.send(data(2)));
        let Ok(Outgoing::Text(first)) = rx.try_recv() else {
            panic!("expected the first frame");
        };
        assert!(!registry.send(data(3)));

        let first: serde_json::Value = serde_json::from_str(&first).unwrap();
        assert_eq!(first["payload"]["data"], serde_json::json!([1]));
        assert!(rx.try_recv().is_err());
        assert!(registry.get("s1").unwrap().is_aborted());
    }

    #[test]
    fn disconnect_frame_is_followed_by_close() {
        let (registry, _stats, mut rx) = registry_with("s1", 4);
        let frame = OperationMessage::error_text(None, MessageType::ConnectionError, "gone");

        assert!(registry.send(OutboundMessage::new("s1", None, frame).with_kind(FrameKind::Disconnect)));

        assert!(matches!(rx.try_recv(), Ok(Outgoing::Text(_))));
        assert_eq!(rx.try_recv(), Ok(Outgoing::Close));
    }

    #[test]
    fn remove_unregisters() {
        let (registry, _stats, _rx) = registry_with("s1", 4);
        assert_eq!(registry.len(), 1);
        assert!(registry.remove("s1").is_some());
        assert!(registry.is_empty());
    }
}
