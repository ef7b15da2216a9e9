//! Results produced by a query executor.

use std::fmt;

use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// A stream of execution results, one per subscription event.
///
/// Items are pulled one at a time; an `Err` item terminates the stream.
pub type ResultStream = BoxStream<'static, Result<ExecutionResult, StreamError>>;

/// Failure raised by a result stream while it is running.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct StreamError {
    /// Human-readable description, forwarded to the client.
    pub message: String,
}

impl StreamError {
    /// Create a stream error.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// A GraphQL error entry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GraphQLError {
    /// Error message.
    pub message: String,
    /// Response path the error relates to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<Vec<Value>>,
    /// Implementation-specific details.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Map<String, Value>>,
}

impl GraphQLError {
    /// An error with just a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            path: None,
            extensions: None,
        }
    }
}

/// The `data` part of an execution result.
pub enum ExecutionData {
    /// The executor produced no data.
    None,
    /// A single value (query or mutation result, or one subscription event).
    Value(Value),
    /// A subscription: further results arrive on the stream.
    Stream(ResultStream),
}

impl ExecutionData {
    /// The plain value, or `null` for anything else.
    pub fn into_value(self) -> Value {
        match self {
            Self::Value(value) => value,
            Self::None | Self::Stream(_) => Value::Null,
        }
    }
}

impl fmt::Debug for ExecutionData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Self::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// Outcome of executing a query.
#[derive(Debug)]
pub struct ExecutionResult {
    /// Produced data.
    pub data: ExecutionData,
    /// Errors raised during execution. Non-empty means the operation failed.
    pub errors: Vec<GraphQLError>,
}

impl ExecutionResult {
    /// A successful result holding a single value.
    pub fn value(data: Value) -> Self {
        Self {
            data: ExecutionData::Value(data),
            errors: Vec::new(),
        }
    }

    /// A successful subscription result.
    pub fn stream(stream: ResultStream) -> Self {
        Self {
            data: ExecutionData::Stream(stream),
            errors: Vec::new(),
        }
    }

    /// A failed result.
    pub fn from_errors(errors: Vec<GraphQLError>) -> Self {
        Self {
            data: ExecutionData::None,
            errors,
        }
    }

    /// A result with neither data nor errors.
    pub fn empty() -> Self {
        Self {
            data: ExecutionData::None,
            errors: Vec::new(),
        }
    }

    /// The errors as JSON values, ready for an `{"errors": [...]}` payload.
    pub fn error_values(&self) -> Vec<Value> {
        self.errors
            .iter()
            .map(|e| serde_json::to_value(e).unwrap_or_else(|_| Value::String(e.message.clone())))
            .collect()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use serde_json::json;

    #[test]
    fn error_values_serialize_message_only() {
        let result = ExecutionResult::from_errors(vec![GraphQLError::new("boom")]);
        assert_eq!(result.error_values(), vec![json!({"message": "boom"})]);
    }

    #[test]
    fn into_value_maps_non_values_to_null() {
        assert_eq!(ExecutionData::Value(json!(1)).into_value(), json!(1));
        assert_eq!(ExecutionData::None.into_value(), Value::Null);
        let stream = futures::stream::empty().boxed();
        assert_eq!(ExecutionData::Stream(stream).into_value(), Value::Null);
    }

    #[test]
    fn debug_hides_stream() {
        let result = ExecutionResult::stream(futures::stream::empty().boxed());
        assert!(format!("{result:?}").contains("Stream(..)"));
    }

    #[test]
    fn stream_error_displays_message() {
        assert_eq!(StreamError::new("feed lagged").to_string(), "feed lagged");
    }
}
