//! # herald-core
//!
//! Shared vocabulary for the herald GraphQL subscription broker:
//!
//! - **Operation messages**: [`OperationMessage`] and [`MessageType`], the JSON
//!   frames of the `graphql-ws` sub-protocol
//! - **Query parameters**: [`QueryParameters`] parsed from a `start` payload
//! - **Execution results**: [`ExecutionResult`] with either no data, a plain
//!   value, or a [`ResultStream`] of further results
//! - **Principals**: [`Principal`], the optional authenticated user of a session
//! - **Errors**: [`HeraldError`] via `thiserror`

#![deny(unsafe_code)]

pub mod errors;
pub mod execution;
pub mod message;
pub mod principal;
pub mod query;

pub use errors::{HeraldError, Result};
pub use execution::{ExecutionData, ExecutionResult, GraphQLError, ResultStream, StreamError};
pub use message::{MessageType, OperationMessage};
pub use principal::Principal;
pub use query::QueryParameters;
