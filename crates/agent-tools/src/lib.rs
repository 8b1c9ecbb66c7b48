//! # agent-tools
//!
//! Built-in tools for the agent orchestrator.
//!
//! ## Tools
//!
//! ```text
//! ┌───────────────────────┬──────────────────────────────────────────────┐
//! │ datetime              │ current date/time, any UTC offset            │
//! │ calculate             │ exact decimal arithmetic                     │
//! │ list_collections      │ collections of the document database         │
//! │ find_documents        │ filtered document query (default 5, max 100) │
//! │ get_database_schema   │ collections with their field paths           │
//! │ get_lane_summary, ... │ traffic aggregates over lanes and sensors    │
//! │ list_available_tools  │ catalog of everything registered             │
//! │ <remote>              │ tools proxied from a peer agent server       │
//! └───────────────────────┴──────────────────────────────────────────────┘
//! ```

pub mod error;
pub mod source;
pub mod svckit;

use std::sync::Arc;

use agent_core::{AgentError, ToolRegistry};

pub use error::{Result, SourceError};
pub use source::{DocumentSource, MemoryDocumentSource};

/// Re-export tools for easy registration
pub mod tools {
    pub use crate::svckit::{
        CalculatorTool, CountLanesTool, CountSensorsTool, DatabaseSchemaTool, DateTimeTool, FindDocumentsTool,
        FlowByHourTool, LaneActivityTool, LaneSummaryTool, LanesByMetricTool, ListCollectionsTool,
        PeakFlowTimestampTool, PeakTrafficTimesTool, RemoteTool, RemoteToolClient, SensorRangeTool, SensorSpeedTool,
        ToolCatalogTool, TopFlowSensorsTool,
    };
}

use svckit::{
    traffic_tools, CalculatorTool, DateTimeTool, FindDocumentsTool, ListCollectionsTool, RemoteTool,
    ToolCatalogTool, CATALOG_TOOL_NAME,
};

/// Build the process-wide registry.
///
/// Local tools win name collisions; a clashing remote tool is skipped with a
/// warning. The catalog tool is registered last so it lists everything.
pub fn build_registry(
    source: Option<Arc<dyn DocumentSource>>,
    remote: Vec<RemoteTool>,
) -> agent_core::Result<ToolRegistry> {
    let mut registry = ToolRegistry::new();
    registry.register(DateTimeTool::new())?;
    registry.register(CalculatorTool)?;

    if let Some(source) = source {
        registry.register(ListCollectionsTool::new(source.clone()))?;
        registry.register(FindDocumentsTool::new(source.clone()))?;
        for tool in traffic_tools(&source) {
            registry.register_arc(tool)?;
        }
    }

    for tool in remote {
        let name = agent_core::Tool::schema(&tool).name;
        if name == CATALOG_TOOL_NAME {
            tracing::warn!(tool = %name, "Skipping remote tool with reserved name");
            continue;
        }
        match registry.register(tool) {
            Ok(()) => {}
            Err(AgentError::DuplicateTool(_)) => {
                tracing::warn!(tool = %name, "Skipping remote tool that shadows a local tool");
            }
            Err(other) => return Err(other),
        }
    }

    let catalog = ToolCatalogTool::new(&registry.schemas());
    registry.register(catalog)?;

    tracing::info!(tools = ?registry.names(), "Tool registry ready");
    Ok(registry)
}

/// System prompt for the data-analyst agent
pub const DATA_ANALYST_PROMPT: &str = r#"You are a data analyst assistant with read access to a traffic database.

## How to work

1. If you do not know how the data is laid out, call `get_database_schema`.
2. Prefer the traffic tools (`get_lane_summary`, `get_lanes_by_metric`,
   `get_sensors_with_highest_flow`, `get_peak_traffic_times`, `count_all_lanes`, ...)
   for rankings, totals and averages: they aggregate over the whole dataset.
3. Use `find_documents` with a precise filter to look at individual records.
   Nested fields use dotted paths, e.g. `metadata.lane_id`. Lane ids may start with ':'.
4. Use `calculate` for any arithmetic on the values you retrieve.
5. Use `datetime` when the question depends on the current date or time.
6. Call `list_available_tools` if you are unsure what else you can do.

If you cannot call tools natively, respond with a JSON block in this exact format:
```tool
{"tool": "tool_name", "arguments": {"arg1": "value1"}}
```

Base every figure on tool results. If a tool reports an error, fix the call or explain what went wrong.
Answer concisely."#;
