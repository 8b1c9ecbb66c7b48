//! Tool Catalog
//!
//! Meta-tool that lets the model ask what it can do.

use async_trait::async_trait;
use serde_json::{json, Value};

use agent_core::{Result as CoreResult, Tool, ToolCallRequest, ToolSchema};

pub const CATALOG_TOOL_NAME: &str = "list_available_tools";

/// Lists every registered tool with its description and parameters
pub struct ToolCatalogTool {
    entries: Vec<Value>,
}

impl ToolCatalogTool {
    /// Snapshot the catalog; the catalog tool itself is added to the listing
    pub fn new(schemas: &[ToolSchema]) -> Self {
        let own = Self::own_schema();
        let mut all: Vec<&ToolSchema> = schemas.iter().filter(|s| s.name != CATALOG_TOOL_NAME).collect();
        all.push(&own);
        all.sort_by(|a, b| a.name.cmp(&b.name));

        let entries = all
            .into_iter()
            .map(|schema| {
                json!({
                    "name": schema.name,
                    "description": schema.description,
                    "category": schema.category,
                    "parameters": schema.to_json_schema(),
                })
            })
            .collect();
        Self { entries }
    }

    fn own_schema() -> ToolSchema {
        ToolSchema {
            name: CATALOG_TOOL_NAME.into(),
            description: "List every tool available to you with its description and parameters.".into(),
            parameters: Vec::new(),
            category: Some("meta".into()),
            has_side_effects: false,
            timeout_secs: None,
        }
    }
}

#[async_trait]
impl Tool for ToolCatalogTool {
    fn schema(&self) -> ToolSchema {
        Self::own_schema()
    }

    async fn execute(&self, _call: &ToolCallRequest) -> CoreResult<Value> {
        Ok(json!({ "count": self.entries.len(), "tools": self.entries }))
    }
}
