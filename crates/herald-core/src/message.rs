//! `graphql-ws` operation messages.
//!
//! Every WebSocket text frame carries exactly one JSON object of the form
//! `{"id": "...", "type": "...", "payload": {...}}`. `id` and `payload` are
//! optional; `type` selects the operation.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Value, json};

use crate::errors::Result;

/// The `type` of an operation message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// Client opens the protocol session.
    ConnectionInit,
    /// Server accepts the protocol session.
    ConnectionAck,
    /// Server rejects or drops the protocol session.
    ConnectionError,
    /// Client starts an operation.
    Start,
    /// Server delivers operation results.
    Data,
    /// Server reports an operation error.
    Error,
    /// Server signals that an operation finished.
    Complete,
    /// Client stops an operation.
    Stop,
    /// Client closes the protocol session.
    ConnectionTerminate,
    /// Server keep-alive.
    KeepAlive,
    /// Any type string this server does not know. Ignored by the broker.
    Unknown,
}

impl MessageType {
    /// Wire representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ConnectionInit => "connection_init",
            Self::ConnectionAck => "connection_ack",
            Self::ConnectionError => "connection_error",
            Self::Start => "start",
            Self::Data => "data",
            Self::Error => "error",
            Self::Complete => "complete",
            Self::Stop => "stop",
            Self::ConnectionTerminate => "connection_terminate",
            Self::KeepAlive => "ka",
            Self::Unknown => "unknown",
        }
    }

    /// Parse a wire type string. Unrecognized strings map to [`Self::Unknown`].
    pub fn from_wire(s: &str) -> Self {
        match s {
            "connection_init" => Self::ConnectionInit,
            "connection_ack" => Self::ConnectionAck,
            "connection_error" => Self::ConnectionError,
            "start" => Self::Start,
            "data" => Self::Data,
            "error" => Self::Error,
            "complete" => Self::Complete,
            "stop" => Self::Stop,
            "connection_terminate" => Self::ConnectionTerminate,
            "ka" => Self::KeepAlive,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for MessageType {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for MessageType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::from_wire(&raw))
    }
}

/// One `graphql-ws` frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OperationMessage {
    /// Operation id chosen by the client. Absent on session-level frames.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Operation type.
    #[serde(rename = "type")]
    pub message_type: MessageType,
    /// Type-specific payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl OperationMessage {
    /// A frame without payload.
    pub fn new(id: Option<String>, message_type: MessageType) -> Self {
        Self {
            id,
            message_type,
            payload: None,
        }
    }

    /// A frame carrying `payload`.
    pub fn with_payload(id: Option<String>, message_type: MessageType, payload: Value) -> Self {
        Self {
            id,
            message_type,
            payload: Some(payload),
        }
    }

    /// A frame whose payload is `{"errors": [...]}`.
    pub fn errors(id: Option<String>, message_type: MessageType, errors: Vec<Value>) -> Self {
        Self::with_payload(id, message_type, json!({ "errors": errors }))
    }

    /// A frame whose payload is `{"errors": [message]}`.
    pub fn error_text(id: Option<String>, message_type: MessageType, message: &str) -> Self {
        Self::errors(id, message_type, vec![Value::String(message.to_owned())])
    }

    /// A DATA frame whose payload is `{"data": data}`.
    pub fn data(id: Option<String>, data: Value) -> Self {
        Self::with_payload(id, MessageType::Data, json!({ "data": data }))
    }

    /// A COMPLETE frame.
    pub fn complete(id: Option<String>) -> Self {
        Self::new(id, MessageType::Complete)
    }

    /// A keep-alive frame. Never carries an id.
    pub fn keep_alive() -> Self {
        Self::new(None, MessageType::KeepAlive)
    }

    /// Decode a frame from its JSON text.
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Encode the frame as JSON text.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// The payload as a JSON object, if it is one.
    pub fn payload_object(&self) -> Option<&serde_json::Map<String, Value>> {
        self.payload.as_ref().and_then(Value::as_object)
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
    fn decodes_start_frame() {
        let msg = OperationMessage::from_json(
            r#"{"id":"1","type":"start","payload":{"query":"subscription { tick }"}}"#,
        )
        .unwrap();
        assert_eq!(msg.id.as_deref(), Some("1"));
        assert_eq!(msg.message_type, MessageType::Start);
        assert_eq!(msg.payload.unwrap()["query"], "subscription { tick }");
    }

    #[test]
    fn decodes_frame_without_id_or_payload() {
        let msg = OperationMessage::from_json(r#"{"type":"connection_terminate"}"#).unwrap();
        assert!(msg.id.is_none());
        assert!(msg.payload.is_none());
        assert_eq!(msg.message_type, MessageType::ConnectionTerminate);
    }

    #[test]
    fn unknown_type_decodes_as_unknown() {
        let msg = OperationMessage::from_json(r#"{"id":"7","type":"subscribe"}"#).unwrap();
        assert_eq!(msg.message_type, MessageType::Unknown);
    }

    #[test]
    fn missing_type_is_decode_error() {
        let err = OperationMessage::from_json(r#"{"id":"1"}"#).unwrap_err();
        assert_matches!(err, crate::HeraldError::Decode(_));
    }

    #[test]
    fn not_json_is_decode_error() {
        assert!(OperationMessage::from_json("hello").is_err());
    }

    #[test]
    fn keep_alive_serializes_without_id() {
        let json = OperationMessage::keep_alive().to_json().unwrap();
        assert_eq!(json, r#"{"type":"ka"}"#);
    }

    #[test]
    fn error_text_payload_shape() {
        let msg = OperationMessage::error_text(
            Some("3".into()),
            MessageType::ConnectionError,
            "Broker Not Available.",
        );
        let value: Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({"id": "3", "type": "connection_error", "payload": {"errors": ["Broker Not Available."]}})
        );
    }

    #[test]
    fn data_payload_wraps_value() {
        let msg = OperationMessage::data(Some("9".into()), json!([1, 2]));
        assert_eq!(msg.payload, Some(json!({"data": [1, 2]})));
    }

    #[test]
    fn wire_names_match_protocol() {
        for (ty, wire) in [
            (MessageType::ConnectionInit, "connection_init"),
            (MessageType::ConnectionAck, "connection_ack"),
            (MessageType::ConnectionError, "connection_error"),
            (MessageType::Start, "start"),
            (MessageType::Data, "data"),
            (MessageType::Error, "error"),
            (MessageType::Complete, "complete"),
            (MessageType::Stop, "stop"),
            (MessageType::ConnectionTerminate, "connection_terminate"),
            (MessageType::KeepAlive, "ka"),
        ] {
            assert_eq!(ty.as_str(), wire);
            assert_eq!(MessageType::from_wire(wire), ty);
        }
    }
}
