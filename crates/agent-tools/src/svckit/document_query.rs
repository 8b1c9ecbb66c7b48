//! Document Query Tools
//!
//! Read-only access to the document database for the model.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use agent_core::{tool::ParameterSchema, Result as CoreResult, Tool, ToolCallRequest, ToolSchema};

use crate::source::DocumentSource;

/// Documents returned when the model gives no limit
pub const DEFAULT_FIND_LIMIT: u64 = 5;
/// Hard cap on documents per call; a requested limit of 0 means "up to the cap"
pub const MAX_FIND_LIMIT: u64 = 100;

/// Tool listing the collections of the document database
pub struct ListCollectionsTool {
    source: Arc<dyn DocumentSource>,
}

impl ListCollectionsTool {
    pub fn new(source: Arc<dyn DocumentSource>) -> Self {
        Self { source }
    }
}

#[async_trait]
impl Tool for ListCollectionsTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "list_collections".into(),
            description: "List the collections in the database. Use this first when you do not know where the data lives.".into(),
            parameters: Vec::new(),
            category: Some("database".into()),
            has_side_effects: false,
            timeout_secs: None,
        }
    }

    async fn execute(&self, _call: &ToolCallRequest) -> CoreResult<Value> {
        let collections = self.source.list_collections().await?;
        Ok(json!({ "collections": collections }))
    }
}

/// Tool querying documents with a filter
pub struct FindDocumentsTool {
    source: Arc<dyn DocumentSource>,
}

impl FindDocumentsTool {
    pub fn new(source: Arc<dyn DocumentSource>) -> Self {
        Self { source }
    }
}

/// Resolve the requested limit against the default and the cap
pub fn effective_limit(requested: Option<u64>) -> usize {
    let limit = match requested.unwrap_or(DEFAULT_FIND_LIMIT) {
        0 => MAX_FIND_LIMIT,
        n => n.min(MAX_FIND_LIMIT),
    };
    usize::try_from(limit).unwrap_or(usize::MAX)
}

#[async_trait]
impl Tool for FindDocumentsTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "find_documents".into(),
            description: concat!(
                "Find documents in a collection. The filter uses MongoDB syntax with dotted paths for nested fields, ",
                "e.g. {\"metadata.lane_id\": \":13445139_0\"} or {\"speed\": {\"$gt\": 50}}."
            )
            .into(),
            parameters: vec![
                ParameterSchema::required("collection", "string", "Collection name, e.g. 'lane_data'"),
                ParameterSchema::optional("filter", "object", "Query filter; {} matches everything")
                    .with_default(json!({})),
                ParameterSchema::optional(
                    "limit",
                    "integer",
                    "Maximum documents to return (0 = as many as allowed, max 100)",
                )
                .with_default(json!(DEFAULT_FIND_LIMIT)),
            ],
            category: Some("database".into()),
            has_side_effects: false,
            timeout_secs: None,
        }
    }

    async fn execute(&self, call: &ToolCallRequest) -> CoreResult<Value> {
        let collection = call.arg_str("collection").unwrap_or_default();
        let filter = call
            .arg("filter")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_else(Map::new);
        let limit = effective_limit(call.arg_u64("limit"));

        tracing::debug!(source = self.source.name(), collection, limit, "Finding documents");
        let documents = self.source.find(collection, &filter, limit).await?;

        Ok(json!({
            "collection": collection,
            "count": documents.len(),
            "documents": documents,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemoryDocumentSource;
    use agent_core::AgentError;

    fn source() -> Arc<dyn DocumentSource> {
        Arc::new(MemoryDocumentSource::with_collections([(
            "items".to_string(),
            (0..150).map(|i| json!({ "n": i, "even": i % 2 == 0 })).collect(),
        )]))
    }

    #[test]
    fn test_effective_limit() {
        assert_eq!(effective_limit(None), 5);
        assert_eq!(effective_limit(Some(0)), 100);
        assert_eq!(effective_limit(Some(7)), 7);
        assert_eq!(effective_limit(Some(5000)), 100);
    }

    #[tokio::test]
    async fn test_find_defaults_and_filter() {
        let tool = FindDocumentsTool::new(source());

        let out = tool
            .execute(&ToolCallRequest::new("c1", "find_documents", json!({"collection": "items"})))
            .await
            .unwrap();
        assert_eq!(out["count"], 5);

        let out = tool
            .execute(&ToolCallRequest::new(
                "c2",
                "find_documents",
                json!({"collection": "items", "filter": {"even": true}, "limit": 0}),
            ))
            .await
            .unwrap();
        assert_eq!(out["count"], 75);
        assert_eq!(out["documents"][1]["n"], 2);
    }

    #[tokio::test]
    async fn test_unknown_collection_is_argument_error() {
        let tool = FindDocumentsTool::new(source());
        let err = tool
            .execute(&ToolCallRequest::new("c1", "find_documents", json!({"collection": "ghosts"})))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::ToolArgument(_)));

        let listed = ListCollectionsTool::new(source())
            .execute(&ToolCallRequest::new("c2", "list_collections", json!({})))
            .await
            .unwrap();
        assert_eq!(listed["collections"], json!(["items"]));
    }
}
