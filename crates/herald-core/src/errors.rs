//! Error types shared by the herald crates.

use thiserror::Error;

/// Errors produced while decoding operation messages or query parameters.
#[derive(Debug, Error)]
pub enum HeraldError {
    /// The frame was not a valid operation message.
    #[error("failed to decode operation message: {0}")]
    Decode(#[from] serde_json::Error),
    /// The `start` payload did not carry usable query parameters.
    #[error("invalid query parameters: {0}")]
    InvalidQuery(String),
    /// The query document could not be understood by an executor.
    #[error("invalid query document: {0}")]
    InvalidDocument(String),
}

/// Result type for herald core operations.
pub type Result<T> = std::result::Result<T, HeraldError>;

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_error_from_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("{bad}").unwrap_err();
        let err: HeraldError = json_err.into();
        assert!(matches!(err, HeraldError::Decode(_)));
        assert!(err.to_string().starts_with("failed to decode operation message"));
    }

    #[test]
    fn invalid_query_display() {
        let err = HeraldError::InvalidQuery("missing query".into());
        assert_eq!(err.to_string(), "invalid query parameters: missing query");
    }
}
