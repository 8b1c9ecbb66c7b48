//! # agent-runtime
//!
//! Model backend adapters for the agent orchestrator.
//!
//! ## Providers
//!
//! - **Ollama** (default): local inference via `/api/chat`, streamed and buffered
//! - **OpenAI-compatible**: hosted chat completions with native function calling
//!
//! ## Usage
//!
//! ```rust,ignore
//! use agent_runtime::{build_provider, BackendConfig};
//!
//! let backend = BackendConfig::from_env()?;
//! let orchestrator = Orchestrator::builder()
//!     .provider(build_provider(&backend)?)
//!     .model(backend.default_model())
//!     .build()?;
//! ```

pub mod ollama;
pub mod openai;
pub mod transport;

use std::sync::Arc;

use agent_core::{AgentError, LlmProvider, Result};
use serde_json::Value;

pub use ollama::{OllamaConfig, OllamaProvider};
pub use openai::{OpenAiConfig, OpenAiProvider};

/// Which backend to talk to, selected once at startup
#[derive(Clone, Debug)]
pub enum BackendConfig {
    /// Hosted OpenAI-compatible API
    Hosted(OpenAiConfig),
    /// Local Ollama runtime
    Local(OllamaConfig),
}

impl BackendConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// `BACKEND` is `local` (default, alias `ollama`) or `hosted` (alias `openai`)
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let backend = lookup("BACKEND").map(|b| b.trim().to_ascii_lowercase());
        match backend.as_deref() {
            None | Some("" | "local" | "ollama") => Ok(Self::Local(OllamaConfig::from_lookup(lookup)?)),
            Some("hosted" | "openai") => Ok(Self::Hosted(OpenAiConfig::from_lookup(lookup)?)),
            Some(other) => Err(AgentError::Config(format!(
                "BACKEND must be 'local' or 'hosted', got '{other}'"
            ))),
        }
    }

    /// Model used when `MODEL_NAME` is not set
    pub fn default_model(&self) -> &'static str {
        match self {
            Self::Hosted(_) => "gpt-4o-mini",
            Self::Local(_) => "llama3.2",
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Hosted(_) => "hosted",
            Self::Local(_) => "local",
        }
    }
}

/// Construct the provider for the configured backend
pub fn build_provider(config: &BackendConfig) -> Result<Arc<dyn LlmProvider>> {
    let provider: Arc<dyn LlmProvider> = match config {
        BackendConfig::Hosted(c) => {
            tracing::info!(base_url = %c.base_url, "Using hosted backend");
            Arc::new(OpenAiProvider::from_config(c.clone())?)
        }
        BackendConfig::Local(c) => {
            tracing::info!(base_url = %c.base_url(), "Using local Ollama backend");
            Arc::new(OllamaProvider::from_config(c.clone())?)
        }
    };
    Ok(provider)
}

fn parse_timeout(lookup: &impl Fn(&str) -> Option<String>) -> Result<Option<u64>> {
    let Some(raw) = lookup("BACKEND_TIMEOUT_SECS") else {
        return Ok(None);
    };
    match raw.trim().parse::<u64>() {
        Ok(0) | Err(_) => Err(AgentError::Config(format!(
            "BACKEND_TIMEOUT_SECS must be a positive integer, got '{raw}'"
        ))),
        Ok(secs) => Ok(Some(secs)),
    }
}

/// Tool arguments arrive as a JSON object or as a JSON-encoded string
fn decode_arguments(backend: &'static str, tool: &str, raw: Value) -> Result<Value> {
    let decoded = match raw {
        Value::Null => Value::Object(serde_json::Map::new()),
        Value::String(s) if s.trim().is_empty() => Value::Object(serde_json::Map::new()),
        Value::String(s) => serde_json::from_str(&s).map_err(|e| {
            transport::TransportError::malformed(backend, format!("arguments for '{tool}' are not JSON: {e}"))
        })?,
        other => other,
    };
    if decoded.is_object() {
        Ok(decoded)
    } else {
        Err(transport::TransportError::malformed(backend, format!("arguments for '{tool}' are not an object")).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_backend_selection() {
        let local = BackendConfig::from_lookup(|_| None).unwrap();
        assert_eq!(local.kind(), "local");
        assert_eq!(local.default_model(), "llama3.2");

        let hosted = BackendConfig::from_lookup(|key| match key {
            "BACKEND" => Some("Hosted".into()),
            "OPENAI_API_KEY" => Some("sk-test".into()),
            _ => None,
        })
        .unwrap();
        assert_eq!(hosted.kind(), "hosted");

        let bad = BackendConfig::from_lookup(|key| (key == "BACKEND").then(|| "cloud".to_string()));
        assert!(matches!(bad, Err(AgentError::Config(_))));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let err = BackendConfig::from_lookup(|key| (key == "BACKEND_TIMEOUT_SECS").then(|| "0".to_string()));
        assert!(matches!(err, Err(AgentError::Config(_))));
    }

    #[test]
    fn test_decode_arguments() {
        assert_eq!(decode_arguments("t", "x", json!("{\"a\":1}")).unwrap(), json!({"a": 1}));
        assert_eq!(decode_arguments("t", "x", Value::Null).unwrap(), json!({}));
        assert_eq!(decode_arguments("t", "x", json!({"b": 2})).unwrap(), json!({"b": 2}));
        assert!(decode_arguments("t", "x", json!("[1,2]")).is_err());
        assert!(decode_arguments("t", "x", json!("{oops")).is_err());
    }
}
