//! Document Sources
//!
//! Abstractions over the document database the query tools read from.

mod aggregate;
mod memory;

pub use aggregate::{Accumulator, Aggregation, GroupKey, Metric, SortOrder, GROUP_KEY};
pub use memory::MemoryDocumentSource;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::Result;

/// Read-only document database (Strategy pattern)
///
/// Implemented in-memory here and for MongoDB in `agent-store`.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    /// Collection names, sorted
    async fn list_collections(&self) -> Result<Vec<String>>;

    /// Documents in `collection` matching `filter`, at most `limit` of them
    async fn find(&self, collection: &str, filter: &Map<String, Value>, limit: usize) -> Result<Vec<Value>>;

    /// Group matching documents and reduce each group to one row
    ///
    /// Every row carries the group value under [`GROUP_KEY`] plus one field
    /// per metric.
    async fn aggregate(&self, collection: &str, aggregation: &Aggregation) -> Result<Vec<Value>>;

    /// Distinct values found at `path` among documents matching `filter`
    async fn distinct(&self, collection: &str, path: &str, filter: &Map<String, Value>) -> Result<Vec<Value>>;

    /// Check if the source is reachable
    async fn health_check(&self) -> bool {
        true
    }

    /// Source name for logs
    fn name(&self) -> &str;
}
