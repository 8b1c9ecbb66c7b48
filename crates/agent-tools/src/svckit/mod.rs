//! Service Kit - Agent Tools
//!
//! Tools that implement `agent_core::Tool` for the orchestrator.

mod calculator;
mod catalog;
mod clock;
mod document_query;
mod remote;
mod traffic;

pub use calculator::{evaluate, CalculatorTool};
pub use catalog::{ToolCatalogTool, CATALOG_TOOL_NAME};
pub use clock::{Clock, DateTimeTool, SystemClock};
pub use document_query::{effective_limit, FindDocumentsTool, ListCollectionsTool, DEFAULT_FIND_LIMIT, MAX_FIND_LIMIT};
pub use remote::{RemoteTool, RemoteToolClient};
pub use traffic::{
    traffic_tools, CountLanesTool, CountSensorsTool, DatabaseSchemaTool, FlowByHourTool, LaneActivityTool,
    LaneSummaryTool, LanesByMetricTool, PeakFlowTimestampTool, PeakTrafficTimesTool, SensorRangeTool,
    SensorSpeedTool, TopFlowSensorsTool, LANE_COLLECTION, SENSOR_COLLECTION,
};
