//! Error Types for Agent Store

use agent_core::AgentError;
use agent_tools::SourceError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("MongoDB error: {0}")]
    Mongo(#[from] mongodb::error::Error),

    #[error("Encoding error: {0}")]
    Encode(#[from] mongodb::bson::ser::Error),

    #[error("Decoding error: {0}")]
    Decode(#[from] mongodb::bson::de::Error),

    #[error("Corrupt session document {id}: {detail}")]
    Corrupt { id: String, detail: String },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl StoreError {
    /// MongoDB `BadValue` / `FailedToParse`: the query itself was rejected
    pub fn is_bad_query(&self) -> bool {
        match self {
            Self::Mongo(err) => matches!(
                err.kind.as_ref(),
                mongodb::error::ErrorKind::Command(cmd) if cmd.code == 2 || cmd.code == 9
            ),
            _ => false,
        }
    }
}

impl From<StoreError> for AgentError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Mongo(_) => AgentError::StoreUnavailable(err.to_string()),
            StoreError::Corrupt { .. } => AgentError::SessionIntegrity(err.to_string()),
            StoreError::Config(msg) => AgentError::Config(msg),
            other => AgentError::Other(other.to_string()),
        }
    }
}

impl From<StoreError> for SourceError {
    fn from(err: StoreError) -> Self {
        if err.is_bad_query() {
            SourceError::InvalidFilter(err.to_string())
        } else {
            SourceError::Backend(err.to_string())
        }
    }
}
