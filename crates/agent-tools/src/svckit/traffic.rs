//! Traffic Analytics Tools
//!
//! Aggregate questions over the traffic dataset ("busiest lanes", "peak flow
//! time") that cannot be answered from a capped `find_documents` page.
//!
//! Lane records live in `lane_data` with the id at `metadata.lane_id` and the
//! readings under `measurement.*`. Sensor readings live flat in `measurements`.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde_json::{json, Map, Value};

use agent_core::{tool::ParameterSchema, AgentError, Result as CoreResult, Tool, ToolCallRequest, ToolSchema};

use crate::source::{Aggregation, DocumentSource, GroupKey, Metric, SortOrder, GROUP_KEY};

pub const LANE_COLLECTION: &str = "lane_data";
pub const LANE_ID_PATH: &str = "metadata.lane_id";
pub const SENSOR_COLLECTION: &str = "measurements";

const SENSOR_ID: &str = "sensor_id";
const TIMESTAMP: &str = "timestamp";
const FLOW: &str = "flow";
const SPEED: &str = "speed";

/// Metrics a lane can be ranked by
pub const LANE_METRICS: [&str; 5] = ["occupancy", "density", "speed", "entered", "waiting_time"];

pub const DEFAULT_TOP_N: u64 = 5;
pub const MAX_TOP_N: u64 = 50;
/// Records returned by a time-range query at most
pub const MAX_RANGE_RECORDS: usize = 500;
/// Sample ids returned by the count tools
const SAMPLE_IDS: usize = 10;

const CATEGORY: &str = "traffic";

fn lane_field(metric: &str) -> String {
    format!("measurement.{metric}")
}

fn schema(name: &str, description: &str, parameters: Vec<ParameterSchema>) -> ToolSchema {
    ToolSchema {
        name: name.into(),
        description: description.into(),
        parameters,
        category: Some(CATEGORY.into()),
        has_side_effects: false,
        timeout_secs: None,
    }
}

fn top_n_param(what: &str) -> ParameterSchema {
    ParameterSchema::optional("top_n", "integer", format!("How many {what} to return (max {MAX_TOP_N})"))
        .with_default(json!(DEFAULT_TOP_N))
}

fn top_n(call: &ToolCallRequest) -> usize {
    let n = call.arg_u64("top_n").unwrap_or(DEFAULT_TOP_N).clamp(1, MAX_TOP_N);
    usize::try_from(n).unwrap_or(1)
}

fn required_str<'a>(call: &'a ToolCallRequest, name: &str) -> CoreResult<&'a str> {
    call.arg_str(name)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| AgentError::ToolArgument(format!("Missing required parameter: {name}")))
}

fn filter(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

/// Filter matching a lane id stored with or without its leading ':'
fn lane_filter(lane_id: &str) -> Map<String, Value> {
    let bare = lane_id.trim_start_matches(':');
    filter(json!({ LANE_ID_PATH: { "$in": [format!(":{bare}"), bare] } }))
}

/// Rename the group key of each row
fn keyed(rows: Vec<Value>, name: &str) -> Vec<Value> {
    rows.into_iter()
        .map(|mut row| {
            if let Value::Object(fields) = &mut row {
                if let Some(key) = fields.remove(GROUP_KEY) {
                    fields.insert(name.to_string(), key);
                }
            }
            row
        })
        .collect()
}

fn no_data(message: String) -> Value {
    json!({ "message": message })
}

/// Normalise an ISO-8601 timestamp to the stored `YYYY-MM-DDTHH:MM:SSZ` form
fn normalize_timestamp(name: &str, raw: &str) -> CoreResult<String> {
    let parsed = DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f").map(|dt| dt.and_utc()))
        .map_err(|e| AgentError::ToolArgument(format!("{name} is not an ISO-8601 timestamp: {e}")))?;
    Ok(parsed.to_rfc3339_opts(SecondsFormat::Secs, true))
}

// ============================================================================
// Schema
// ============================================================================

/// Collections with the field paths found in a sample document of each
pub struct DatabaseSchemaTool {
    source: Arc<dyn DocumentSource>,
}

impl DatabaseSchemaTool {
    pub fn new(source: Arc<dyn DocumentSource>) -> Self {
        Self { source }
    }
}

fn field_paths(prefix: &str, value: &Value, paths: &mut Vec<String>) {
    let Value::Object(fields) = value else {
        return;
    };
    for (key, nested) in fields {
        let path = if prefix.is_empty() { key.clone() } else { format!("{prefix}.{key}") };
        match nested {
            // extended-JSON wrappers such as {"$oid": ..} are leaf values
            Value::Object(inner) if !inner.keys().any(|k| k.starts_with('$')) => field_paths(&path, nested, paths),
            _ => paths.push(path),
        }
    }
}

#[async_trait]
impl Tool for DatabaseSchemaTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            category: Some("database".into()),
            ..schema(
                "get_database_schema",
                "Describe the database: every collection with the (dotted) field paths of a sample document.",
                Vec::new(),
            )
        }
    }

    async fn execute(&self, _call: &ToolCallRequest) -> CoreResult<Value> {
        let mut collections = Map::new();
        for name in self.source.list_collections().await? {
            let sample = self.source.find(&name, &Map::new(), 1).await?;
            let mut fields = Vec::new();
            if let Some(document) = sample.first() {
                field_paths("", document, &mut fields);
            }
            collections.insert(name, json!({ "fields": fields }));
        }
        Ok(json!({ "collections": collections }))
    }
}

// ============================================================================
// Lanes
// ============================================================================

/// Averages for one lane
pub struct LaneSummaryTool {
    source: Arc<dyn DocumentSource>,
}

impl LaneSummaryTool {
    pub fn new(source: Arc<dyn DocumentSource>) -> Self {
        Self { source }
    }
}

#[async_trait]
impl Tool for LaneSummaryTool {
    fn schema(&self) -> ToolSchema {
        schema(
            "get_lane_summary",
            "Average speed, density and time loss for one lane, with the number of records.",
            vec![ParameterSchema::required("lane_id", "string", "Lane id, e.g. ':13445139_0' (leading ':' optional)")],
        )
    }

    async fn execute(&self, call: &ToolCallRequest) -> CoreResult<Value> {
        let lane_id = required_str(call, "lane_id")?;
        let aggregation = Aggregation::new(GroupKey::Field(LANE_ID_PATH.into()))
            .filter(lane_filter(lane_id))
            .metric(Metric::avg("avg_speed", lane_field("speed")))
            .metric(Metric::avg("avg_density", lane_field("density")))
            .metric(Metric::avg("avg_time_loss", lane_field("time_loss")))
            .metric(Metric::count("record_count"));

        let rows = keyed(self.source.aggregate(LANE_COLLECTION, &aggregation).await?, "lane_id");
        if rows.is_empty() {
            return Ok(no_data(format!("No data for lane '{lane_id}'.")));
        }
        Ok(json!({ "data": rows }))
    }
}

/// Totals and averages describing how busy one lane was
pub struct LaneActivityTool {
    source: Arc<dyn DocumentSource>,
}

impl LaneActivityTool {
    pub fn new(source: Arc<dyn DocumentSource>) -> Self {
        Self { source }
    }
}

#[async_trait]
impl Tool for LaneActivityTool {
    fn schema(&self) -> ToolSchema {
        schema(
            "summarize_lane_activity",
            "Activity of one lane: total vehicles entered, average speed, average occupancy, total waiting time and data points.",
            vec![ParameterSchema::required("lane_id", "string", "Lane id (leading ':' optional)")],
        )
    }

    async fn execute(&self, call: &ToolCallRequest) -> CoreResult<Value> {
        let lane_id = required_str(call, "lane_id")?;
        let aggregation = Aggregation::new(GroupKey::All)
            .filter(lane_filter(lane_id))
            .metric(Metric::sum("total_entered", lane_field("entered")))
            .metric(Metric::avg("avg_speed", lane_field("speed")))
            .metric(Metric::avg("avg_occupancy", lane_field("occupancy")))
            .metric(Metric::sum("total_waiting_time", lane_field("waiting_time")))
            .metric(Metric::count("data_points"));

        let mut rows = self.source.aggregate(LANE_COLLECTION, &aggregation).await?;
        let Some(mut row) = rows.pop() else {
            return Ok(no_data(format!("No data for lane '{lane_id}'.")));
        };
        if let Value::Object(fields) = &mut row {
            fields.remove(GROUP_KEY);
            fields.insert("lane_id".into(), json!(lane_id));
        }
        Ok(json!({ "data": row }))
    }
}

/// Lanes ranked by the average of one metric
pub struct LanesByMetricTool {
    source: Arc<dyn DocumentSource>,
}

impl LanesByMetricTool {
    pub fn new(source: Arc<dyn DocumentSource>) -> Self {
        Self { source }
    }
}

#[async_trait]
impl Tool for LanesByMetricTool {
    fn schema(&self) -> ToolSchema {
        schema(
            "get_lanes_by_metric",
            "Rank lanes by the average of a metric (occupancy, density, speed, entered, waiting_time).",
            vec![
                ParameterSchema::required("metric", "string", "Metric to rank by")
                    .with_enum(LANE_METRICS.iter().map(|m| json!(m)).collect()),
                ParameterSchema::optional("order", "string", "'highest' or 'lowest' first")
                    .with_default(json!("highest"))
                    .with_enum(vec![json!("highest"), json!("lowest")]),
                top_n_param("lanes"),
            ],
        )
    }

    async fn execute(&self, call: &ToolCallRequest) -> CoreResult<Value> {
        let metric = required_str(call, "metric")?;
        if !LANE_METRICS.contains(&metric) {
            return Err(AgentError::ToolArgument(format!(
                "Invalid metric '{metric}'. Must be one of {LANE_METRICS:?}."
            )));
        }
        let (order, label) = match call.arg_str("order").unwrap_or("highest") {
            "highest" => (SortOrder::Descending, "highest"),
            "lowest" => (SortOrder::Ascending, "lowest"),
            other => return Err(AgentError::ToolArgument(format!("Invalid order '{other}'"))),
        };

        let output = format!("avg_{metric}");
        let aggregation = Aggregation::new(GroupKey::Field(LANE_ID_PATH.into()))
            .metric(Metric::avg(output.as_str(), lane_field(metric)))
            .sort_by(output.as_str(), order)
            .limit(top_n(call));

        let rows = keyed(self.source.aggregate(LANE_COLLECTION, &aggregation).await?, "lane_id");
        if rows.is_empty() {
            return Ok(no_data(format!("No data for metric '{metric}'.")));
        }
        Ok(json!({ "metric": metric, "order": label, "data": rows }))
    }
}

/// Distinct lane count with a few sample ids
pub struct CountLanesTool {
    source: Arc<dyn DocumentSource>,
}

impl CountLanesTool {
    pub fn new(source: Arc<dyn DocumentSource>) -> Self {
        Self { source }
    }
}

#[async_trait]
impl Tool for CountLanesTool {
    fn schema(&self) -> ToolSchema {
        schema("count_all_lanes", "Number of distinct lanes, with up to 10 sample lane ids.", Vec::new())
    }

    async fn execute(&self, _call: &ToolCallRequest) -> CoreResult<Value> {
        let ids = self.source.distinct(LANE_COLLECTION, LANE_ID_PATH, &Map::new()).await?;
        Ok(json!({
            "total_lanes": ids.len(),
            "lane_ids": ids.into_iter().take(SAMPLE_IDS).collect::<Vec<_>>(),
        }))
    }
}

// ============================================================================
// Sensors
// ============================================================================

/// Sensors ranked by average flow
pub struct TopFlowSensorsTool {
    source: Arc<dyn DocumentSource>,
}

impl TopFlowSensorsTool {
    pub fn new(source: Arc<dyn DocumentSource>) -> Self {
        Self { source }
    }
}

#[async_trait]
impl Tool for TopFlowSensorsTool {
    fn schema(&self) -> ToolSchema {
        schema(
            "get_sensors_with_highest_flow",
            "Sensors with the highest average traffic flow.",
            vec![top_n_param("sensors")],
        )
    }

    async fn execute(&self, call: &ToolCallRequest) -> CoreResult<Value> {
        let aggregation = Aggregation::new(GroupKey::Field(SENSOR_ID.into()))
            .metric(Metric::avg("average_flow", FLOW))
            .sort_by("average_flow", SortOrder::Descending)
            .limit(top_n(call));

        let rows = keyed(self.source.aggregate(SENSOR_COLLECTION, &aggregation).await?, SENSOR_ID);
        if rows.is_empty() {
            return Ok(no_data("No sensor flow data found.".into()));
        }
        Ok(json!({ "data": rows }))
    }
}

/// Timestamps with the highest total flow across all sensors
pub struct PeakTrafficTimesTool {
    source: Arc<dyn DocumentSource>,
}

impl PeakTrafficTimesTool {
    pub fn new(source: Arc<dyn DocumentSource>) -> Self {
        Self { source }
    }
}

#[async_trait]
impl Tool for PeakTrafficTimesTool {
    fn schema(&self) -> ToolSchema {
        schema(
            "get_peak_traffic_times",
            "Timestamps with the highest total flow summed over all sensors.",
            vec![top_n_param("timestamps")],
        )
    }

    async fn execute(&self, call: &ToolCallRequest) -> CoreResult<Value> {
        let aggregation = Aggregation::new(GroupKey::Field(TIMESTAMP.into()))
            .metric(Metric::sum("total_flow", FLOW))
            .sort_by("total_flow", SortOrder::Descending)
            .limit(top_n(call));

        let rows = keyed(self.source.aggregate(SENSOR_COLLECTION, &aggregation).await?, TIMESTAMP);
        if rows.is_empty() {
            return Ok(no_data("No traffic flow data found.".into()));
        }
        Ok(json!({ "data": rows }))
    }
}

/// The single timestamp with the highest average flow
pub struct PeakFlowTimestampTool {
    source: Arc<dyn DocumentSource>,
}

impl PeakFlowTimestampTool {
    pub fn new(source: Arc<dyn DocumentSource>) -> Self {
        Self { source }
    }
}

#[async_trait]
impl Tool for PeakFlowTimestampTool {
    fn schema(&self) -> ToolSchema {
        schema(
            "get_peak_flow_timestamp",
            "The timestamp with the single highest average flow.",
            Vec::new(),
        )
    }

    async fn execute(&self, _call: &ToolCallRequest) -> CoreResult<Value> {
        let aggregation = Aggregation::new(GroupKey::Field(TIMESTAMP.into()))
            .metric(Metric::avg("avg_flow", FLOW))
            .sort_by("avg_flow", SortOrder::Descending)
            .limit(1);

        let mut rows = keyed(self.source.aggregate(SENSOR_COLLECTION, &aggregation).await?, TIMESTAMP);
        match rows.pop() {
            Some(row) => Ok(json!({ "data": row })),
            None => Ok(no_data("No flow data available.".into())),
        }
    }
}

/// Average flow during one hour of the day
pub struct FlowByHourTool {
    source: Arc<dyn DocumentSource>,
}

impl FlowByHourTool {
    pub fn new(source: Arc<dyn DocumentSource>) -> Self {
        Self { source }
    }
}

#[async_trait]
impl Tool for FlowByHourTool {
    fn schema(&self) -> ToolSchema {
        schema(
            "get_average_flow_by_hour",
            "Average flow over all readings taken during the given hour of the day (UTC).",
            vec![ParameterSchema::required("hour", "integer", "Hour of the day, 0-23")],
        )
    }

    async fn execute(&self, call: &ToolCallRequest) -> CoreResult<Value> {
        let hour = call
            .arg_u64("hour")
            .filter(|h| *h <= 23)
            .ok_or_else(|| AgentError::ToolArgument("Hour must be between 0 and 23.".into()))?;

        let aggregation = Aggregation::new(GroupKey::HourOf(TIMESTAMP.into()))
            .metric(Metric::avg("avg_flow", FLOW))
            .metric(Metric::count("readings"));
        let rows = keyed(self.source.aggregate(SENSOR_COLLECTION, &aggregation).await?, "hour");

        match rows.into_iter().find(|row| row["hour"].as_u64() == Some(hour)) {
            Some(row) => Ok(json!({ "data": row })),
            None => Ok(no_data(format!("No flow data for hour {hour}."))),
        }
    }
}

/// Average speed reported by one sensor
pub struct SensorSpeedTool {
    source: Arc<dyn DocumentSource>,
}

impl SensorSpeedTool {
    pub fn new(source: Arc<dyn DocumentSource>) -> Self {
        Self { source }
    }
}

#[async_trait]
impl Tool for SensorSpeedTool {
    fn schema(&self) -> ToolSchema {
        schema(
            "get_average_speed_for_sensor",
            "Average speed measured by one sensor.",
            vec![ParameterSchema::required("sensor_id", "string", "Sensor id, e.g. 'S-101'")],
        )
    }

    async fn execute(&self, call: &ToolCallRequest) -> CoreResult<Value> {
        let sensor_id = required_str(call, SENSOR_ID)?;
        let aggregation = Aggregation::new(GroupKey::Field(SENSOR_ID.into()))
            .filter(filter(json!({ SENSOR_ID: sensor_id })))
            .metric(Metric::avg("avg_speed", SPEED))
            .metric(Metric::count("readings"));

        let mut rows = keyed(self.source.aggregate(SENSOR_COLLECTION, &aggregation).await?, SENSOR_ID);
        match rows.pop() {
            Some(row) => Ok(json!({ "data": row })),
            None => Ok(no_data(format!("No data for sensor '{sensor_id}'."))),
        }
    }
}

/// Raw readings of one sensor between two timestamps
pub struct SensorRangeTool {
    source: Arc<dyn DocumentSource>,
}

impl SensorRangeTool {
    pub fn new(source: Arc<dyn DocumentSource>) -> Self {
        Self { source }
    }
}

#[async_trait]
impl Tool for SensorRangeTool {
    fn schema(&self) -> ToolSchema {
        schema(
            "get_sensor_data_in_time_range",
            "All readings of one sensor between two ISO-8601 timestamps (inclusive).",
            vec![
                ParameterSchema::required("sensor_id", "string", "Sensor id"),
                ParameterSchema::required("start_ts", "string", "Start, e.g. '2024-05-01T08:00:00Z'"),
                ParameterSchema::required("end_ts", "string", "End, e.g. '2024-05-01T09:00:00Z'"),
            ],
        )
    }

    async fn execute(&self, call: &ToolCallRequest) -> CoreResult<Value> {
        let sensor_id = required_str(call, SENSOR_ID)?;
        let start = normalize_timestamp("start_ts", required_str(call, "start_ts")?)?;
        let end = normalize_timestamp("end_ts", required_str(call, "end_ts")?)?;
        if start > end {
            return Err(AgentError::ToolArgument("start_ts must not be after end_ts".into()));
        }

        let query = filter(json!({ SENSOR_ID: sensor_id, TIMESTAMP: { "$gte": start, "$lte": end } }));
        let documents = self.source.find(SENSOR_COLLECTION, &query, MAX_RANGE_RECORDS).await?;
        if documents.is_empty() {
            return Ok(no_data(format!("No data for sensor '{sensor_id}' in that range.")));
        }
        Ok(json!({
            "count": documents.len(),
            "truncated": documents.len() == MAX_RANGE_RECORDS,
            "data": documents,
        }))
    }
}

/// Distinct sensor count with a few sample ids
pub struct CountSensorsTool {
    source: Arc<dyn DocumentSource>,
}

impl CountSensorsTool {
    pub fn new(source: Arc<dyn DocumentSource>) -> Self {
        Self { source }
    }
}

#[async_trait]
impl Tool for CountSensorsTool {
    fn schema(&self) -> ToolSchema {
        schema("count_all_sensors", "Number of distinct sensors, with up to 10 sample sensor ids.", Vec::new())
    }

    async fn execute(&self, _call: &ToolCallRequest) -> CoreResult<Value> {
        let ids = self.source.distinct(SENSOR_COLLECTION, SENSOR_ID, &Map::new()).await?;
        Ok(json!({
            "total_sensors": ids.len(),
            "sensor_ids": ids.into_iter().take(SAMPLE_IDS).collect::<Vec<_>>(),
        }))
    }
}

/// Every traffic tool over one source, in registration order
pub fn traffic_tools(source: &Arc<dyn DocumentSource>) -> Vec<Arc<dyn Tool>> {
    vec![
        Arc::new(DatabaseSchemaTool::new(source.clone())),
        Arc::new(LaneSummaryTool::new(source.clone())),
        Arc::new(LaneActivityTool::new(source.clone())),
        Arc::new(LanesByMetricTool::new(source.clone())),
        Arc::new(CountLanesTool::new(source.clone())),
        Arc::new(TopFlowSensorsTool::new(source.clone())),
        Arc::new(PeakTrafficTimesTool::new(source.clone())),
        Arc::new(PeakFlowTimestampTool::new(source.clone())),
        Arc::new(FlowByHourTool::new(source.clone())),
        Arc::new(SensorSpeedTool::new(source.clone())),
        Arc::new(SensorRangeTool::new(source.clone())),
        Arc::new(CountSensorsTool::new(source.clone())),
    ]
}
