//! Error Types

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for agent operations
pub type Result<T> = std::result::Result<T, AgentError>;

/// Agent error types
#[derive(Error, Debug)]
pub enum AgentError {
    /// Tool not found in registry
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    /// Tool registered twice under the same name
    #[error("Duplicate tool: {0}")]
    DuplicateTool(String),

    /// Arguments did not match the tool schema
    #[error("Invalid tool arguments: {0}")]
    ToolArgument(String),

    /// Tool handler exceeded its time budget
    #[error("Tool '{name}' timed out after {timeout_ms}ms")]
    ToolTimeout { name: String, timeout_ms: u64 },

    /// Tool handler returned an error or panicked
    #[error("Tool execution error: {0}")]
    ToolExecution(String),

    /// Backend unreachable, timed out or returned a server error
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Backend rejected the request for rate reasons
    #[error("Backend rate limited: {0}")]
    BackendRateLimited(String),

    /// Backend answered with something we cannot interpret
    #[error("Backend protocol error: {0}")]
    BackendProtocol(String),

    /// Persistence layer failure
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// Maximum iterations reached in the orchestration loop
    #[error("Loop limit exceeded: {0} iterations")]
    LoopLimitExceeded(usize),

    /// The initiating request was cancelled
    #[error("Run cancelled")]
    Cancelled,

    /// Caller supplied a malformed request
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// An append would break session ordering or tool-call references
    #[error("Session integrity violation: {0}")]
    SessionIntegrity(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Other/unknown error
    #[error("{0}")]
    Other(String),
}

/// Stable, wire-visible error classification
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    #[serde(rename = "UnknownToolError")]
    UnknownTool,
    #[serde(rename = "DuplicateToolError")]
    DuplicateTool,
    #[serde(rename = "ToolArgumentError")]
    ToolArgument,
    #[serde(rename = "ToolTimeoutError")]
    ToolTimeout,
    #[serde(rename = "ToolExecutionError")]
    ToolExecution,
    #[serde(rename = "BackendUnavailableError")]
    BackendUnavailable,
    #[serde(rename = "BackendRateLimitedError")]
    BackendRateLimited,
    #[serde(rename = "BackendProtocolError")]
    BackendProtocol,
    #[serde(rename = "StoreUnavailableError")]
    StoreUnavailable,
    #[serde(rename = "LoopLimitExceededError")]
    LoopLimitExceeded,
    #[serde(rename = "CancelledError")]
    Cancelled,
    #[serde(rename = "InvalidRequestError")]
    InvalidRequest,
    #[serde(rename = "SessionIntegrityError")]
    SessionIntegrity,
    #[serde(rename = "ConfigError")]
    Config,
    #[serde(rename = "InternalError")]
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::UnknownTool => "UnknownToolError",
            ErrorKind::DuplicateTool => "DuplicateToolError",
            ErrorKind::ToolArgument => "ToolArgumentError",
            ErrorKind::ToolTimeout => "ToolTimeoutError",
            ErrorKind::ToolExecution => "ToolExecutionError",
            ErrorKind::BackendUnavailable => "BackendUnavailableError",
            ErrorKind::BackendRateLimited => "BackendRateLimitedError",
            ErrorKind::BackendProtocol => "BackendProtocolError",
            ErrorKind::StoreUnavailable => "StoreUnavailableError",
            ErrorKind::LoopLimitExceeded => "LoopLimitExceededError",
            ErrorKind::Cancelled => "CancelledError",
            ErrorKind::InvalidRequest => "InvalidRequestError",
            ErrorKind::SessionIntegrity => "SessionIntegrityError",
            ErrorKind::Config => "ConfigError",
            ErrorKind::Internal => "InternalError",
        }
    }

    /// Tool-layer kinds are fed back to the model instead of aborting a run
    pub fn is_tool_layer(&self) -> bool {
        matches!(
            self,
            ErrorKind::UnknownTool
                | ErrorKind::DuplicateTool
                | ErrorKind::ToolArgument
                | ErrorKind::ToolTimeout
                | ErrorKind::ToolExecution
        )
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl AgentError {
    /// Classify the error
    pub fn kind(&self) -> ErrorKind {
        match self {
            AgentError::UnknownTool(_) => ErrorKind::UnknownTool,
            AgentError::DuplicateTool(_) => ErrorKind::DuplicateTool,
            AgentError::ToolArgument(_) => ErrorKind::ToolArgument,
            AgentError::ToolTimeout { .. } => ErrorKind::ToolTimeout,
            AgentError::ToolExecution(_) => ErrorKind::ToolExecution,
            AgentError::BackendUnavailable(_) => ErrorKind::BackendUnavailable,
            AgentError::BackendRateLimited(_) => ErrorKind::BackendRateLimited,
            AgentError::BackendProtocol(_) => ErrorKind::BackendProtocol,
            AgentError::StoreUnavailable(_) => ErrorKind::StoreUnavailable,
            AgentError::LoopLimitExceeded(_) => ErrorKind::LoopLimitExceeded,
            AgentError::Cancelled => ErrorKind::Cancelled,
            AgentError::InvalidRequest(_) | AgentError::Json(_) => ErrorKind::InvalidRequest,
            AgentError::SessionIntegrity(_) => ErrorKind::SessionIntegrity,
            AgentError::Config(_) => ErrorKind::Config,
            AgentError::Other(_) => ErrorKind::Internal,
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AgentError::BackendUnavailable(_)
                | AgentError::BackendRateLimited(_)
                | AgentError::StoreUnavailable(_)
        )
    }

    /// Whether the caller, rather than a collaborator, is at fault
    pub fn is_client_error(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::InvalidRequest | ErrorKind::UnknownTool | ErrorKind::ToolArgument
        )
    }

    /// Convert to a user-friendly message
    pub fn user_message(&self) -> String {
        match self {
            AgentError::UnknownTool(name) => format!("The tool '{}' is not available.", name),
            AgentError::ToolArgument(msg) => format!("Invalid tool input: {}", msg),
            AgentError::ToolTimeout { name, .. } => format!("The tool '{}' took too long to respond.", name),
            AgentError::ToolExecution(msg) => format!("Tool error: {}", msg),
            AgentError::BackendUnavailable(_) => "The AI service is currently unavailable. Please try again.".into(),
            AgentError::BackendRateLimited(_) => "The AI service is rate limiting requests. Please wait a moment.".into(),
            AgentError::BackendProtocol(_) => "The AI service returned a response that could not be understood.".into(),
            AgentError::StoreUnavailable(_) => "Conversation storage is currently unavailable. Please try again.".into(),
            AgentError::LoopLimitExceeded(max) => format!(
                "The request needed more than {} reasoning steps. Please try a simpler query.",
                max
            ),
            AgentError::Cancelled => "The request was cancelled.".into(),
            AgentError::InvalidRequest(msg) => format!("Invalid request: {}", msg),
            _ => "An unexpected error occurred.".into(),
        }
    }
}

impl From<anyhow::Error> for AgentError {
    fn from(err: anyhow::Error) -> Self {
        AgentError::Other(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_names_match_taxonomy() {
        assert_eq!(AgentError::UnknownTool("x".into()).kind().as_str(), "UnknownToolError");
        assert_eq!(AgentError::LoopLimitExceeded(3).kind().to_string(), "LoopLimitExceededError");
        assert_eq!(
            serde_json::to_value(ErrorKind::ToolTimeout).unwrap(),
            serde_json::json!("ToolTimeoutError")
        );
    }

    #[test]
    fn test_retryable() {
        assert!(AgentError::BackendRateLimited("429".into()).is_retryable());
        assert!(AgentError::StoreUnavailable("down".into()).is_retryable());
        assert!(!AgentError::BackendProtocol("bad json".into()).is_retryable());
        assert!(!AgentError::LoopLimitExceeded(10).is_retryable());
    }
}
