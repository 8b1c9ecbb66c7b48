//! Tool Invoker
//!
//! Runs model-requested tool calls against the registry. Every failure mode
//! (unknown tool, bad arguments, handler error, panic, timeout) comes back as
//! a failed [`ToolCallResult`], never as an `Err`.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::error::{AgentError, Result};
use crate::tool::{ToolCallRequest, ToolCallResult, ToolRegistry};

/// Executes tool calls with validation and a bounded timeout
#[derive(Clone)]
pub struct ToolInvoker {
    registry: Arc<ToolRegistry>,
    default_timeout: Duration,
}

impl ToolInvoker {
    pub fn new(registry: Arc<ToolRegistry>, default_timeout: Duration) -> Self {
        Self {
            registry,
            default_timeout,
        }
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Invoke one tool call
    pub async fn invoke(&self, call: &ToolCallRequest) -> ToolCallResult {
        match self.try_invoke(call).await {
            Ok(output) => {
                tracing::debug!(tool = %call.name, call_id = %call.id, "Tool succeeded");
                ToolCallResult::success(call, output)
            }
            Err(err) => {
                tracing::warn!(
                    tool = %call.name,
                    call_id = %call.id,
                    kind = %err.kind(),
                    error = %err,
                    "Tool call failed"
                );
                ToolCallResult::failure(call, &err)
            }
        }
    }

    /// Invoke a batch concurrently; results come back in request order
    pub async fn invoke_all(&self, calls: &[ToolCallRequest]) -> Vec<ToolCallResult> {
        futures::future::join_all(calls.iter().map(|call| self.invoke(call))).await
    }

    async fn try_invoke(&self, call: &ToolCallRequest) -> Result<Value> {
        let descriptor = self.registry.lookup(&call.name)?;
        descriptor.schema().validate(&call.arguments)?;

        let timeout = descriptor
            .schema()
            .timeout_secs
            .map_or(self.default_timeout, Duration::from_secs);

        let handler = descriptor.handler();
        let owned = call.clone();
        // own task so a panicking handler cannot take the loop down with it
        let task = tokio::spawn(async move { handler.execute(&owned).await });
        let abort = task.abort_handle();

        match tokio::time::timeout(timeout, task).await {
            Err(_) => {
                abort.abort();
                Err(AgentError::ToolTimeout {
                    name: call.name.clone(),
                    timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                })
            }
            Ok(Err(join_err)) => Err(AgentError::ToolExecution(if join_err.is_panic() {
                format!("handler for '{}' panicked", call.name)
            } else {
                format!("handler for '{}' was cancelled", call.name)
            })),
            Ok(Ok(Err(err))) if err.kind().is_tool_layer() => Err(err),
            Ok(Ok(Err(err))) => Err(AgentError::ToolExecution(err.to_string())),
            Ok(Ok(Ok(output))) => Ok(output),
        }
    }
}
