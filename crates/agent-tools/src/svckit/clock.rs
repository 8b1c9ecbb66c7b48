//! Date/Time Tool
//!
//! Gives the model the current time, which it cannot know on its own.

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};
use serde_json::{json, Value};

use agent_core::{tool::ParameterSchema, AgentError, Result as CoreResult, Tool, ToolCallRequest, ToolSchema};

/// Source of "now", swappable in tests
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Tool returning the current date and time
pub struct DateTimeTool {
    clock: Box<dyn Clock>,
}

impl Default for DateTimeTool {
    fn default() -> Self {
        Self::new()
    }
}

impl DateTimeTool {
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }

    pub fn with_clock(clock: impl Clock + 'static) -> Self {
        Self { clock: Box::new(clock) }
    }
}

#[async_trait]
impl Tool for DateTimeTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "datetime".into(),
            description: "Get the current date and time. Use this whenever the answer depends on today's date or the current time.".into(),
            parameters: vec![
                ParameterSchema::optional("format", "string", "Output format")
                    .with_enum(vec![json!("iso"), json!("rfc2822"), json!("unix")])
                    .with_default(json!("iso")),
                ParameterSchema::optional(
                    "utc_offset_minutes",
                    "integer",
                    "Offset from UTC in minutes for the local time, e.g. 120 for UTC+2",
                )
                .with_default(json!(0)),
            ],
            category: Some("utility".into()),
            has_side_effects: false,
            timeout_secs: None,
        }
    }

    async fn execute(&self, call: &ToolCallRequest) -> CoreResult<Value> {
        let minutes = call.arg("utc_offset_minutes").and_then(Value::as_i64).unwrap_or(0);
        let offset = i32::try_from(minutes)
            .ok()
            .and_then(|m| m.checked_mul(60))
            .and_then(FixedOffset::east_opt)
            .ok_or_else(|| AgentError::ToolArgument(format!("utc_offset_minutes out of range: {minutes}")))?;

        let now = self.clock.now().with_timezone(&offset);
        let formatted = match call.arg_str("format").unwrap_or("iso") {
            "rfc2822" => json!(now.to_rfc2822()),
            "unix" => json!(now.timestamp()),
            _ => json!(now.to_rfc3339()),
        };

        Ok(json!({
            "now": formatted,
            "weekday": now.format("%A").to_string(),
            "utc_offset_minutes": minutes,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    struct FixedClock;

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            Utc.with_ymd_and_hms(2024, 5, 1, 8, 30, 0).unwrap()
        }
    }

    #[tokio::test]
    async fn test_iso_with_offset() {
        let tool = DateTimeTool::with_clock(FixedClock);
        let call = ToolCallRequest::new("c1", "datetime", json!({"utc_offset_minutes": 120}));

        let out = tool.execute(&call).await.unwrap();
        assert_eq!(out["now"], "2024-05-01T10:30:00+02:00");
        assert_eq!(out["weekday"], "Wednesday");
    }

    #[tokio::test]
    async fn test_unix_and_bad_offset() {
        let tool = DateTimeTool::with_clock(FixedClock);

        let unix = tool
            .execute(&ToolCallRequest::new("c1", "datetime", json!({"format": "unix"})))
            .await
            .unwrap();
        assert_eq!(unix["now"], 1_714_552_200);

        let err = tool
            .execute(&ToolCallRequest::new("c2", "datetime", json!({"utc_offset_minutes": 100_000})))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::ToolArgument(_)));
    }
}
