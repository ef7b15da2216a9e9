//! Broker error types.

use thiserror::Error;

/// Errors raised by the broker.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BrokerError {
    /// A subscription with this key is already active.
    #[error("subscriber for operation {operation_id} already exists in session {session_id}")]
    DuplicateSubscription {
        /// Session that owns the subscription.
        session_id: String,
        /// Operation id the client reused.
        operation_id: String,
    },
    /// The broker is not accepting work.
    #[error("Broker Not Available.")]
    Unavailable,
}

/// Result type for broker operations.
pub type Result<T> = std::result::Result<T, BrokerError>;
