//! The query execution seam.

use async_trait::async_trait;
use herald_core::{ExecutionResult, QueryParameters};

/// Runs GraphQL operations on behalf of the broker.
///
/// A subscription answers with [`ExecutionData::Stream`]; the broker pulls
/// the stream one item at a time and drops it to cancel.
///
/// [`ExecutionData::Stream`]: herald_core::ExecutionData::Stream
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    /// Execute `params`.
    async fn execute(&self, params: QueryParameters) -> ExecutionResult;
}
