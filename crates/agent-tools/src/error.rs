//! Error Types for Agent Tools

use agent_core::AgentError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SourceError>;

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Collection not found: {0}")]
    CollectionNotFound(String),

    #[error("Invalid filter: {0}")]
    InvalidFilter(String),

    #[error("Invalid expression: {0}")]
    InvalidExpression(String),

    #[error("Document source error: {0}")]
    Backend(String),

    #[error("Remote tool server error: {0}")]
    Remote(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<SourceError> for AgentError {
    fn from(err: SourceError) -> Self {
        match err {
            SourceError::CollectionNotFound(_)
            | SourceError::InvalidFilter(_)
            | SourceError::InvalidExpression(_) => AgentError::ToolArgument(err.to_string()),
            other => AgentError::ToolExecution(other.to_string()),
        }
    }
}
