//! Server Configuration
//!
//! Everything is read once at startup from the environment (after `.env`).

use std::time::Duration;

use agent_core::{AgentError, Result, RetryPolicy};
use agent_runtime::BackendConfig;
use agent_store::MongoConfig;
use agent_tools::DATA_ANALYST_PROMPT;

/// Resolved server settings
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub backend: BackendConfig,
    pub model: String,
    pub backend_timeout: Duration,
    pub tool_timeout: Duration,
    pub max_iterations: usize,
    pub backend_retry: RetryPolicy,
    pub store_retry: RetryPolicy,
    /// `None` keeps sessions in memory and serves the demo dataset
    pub mongo: Option<MongoConfig>,
    pub system_prompt: String,
    pub remote_tools_url: Option<String>,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let backend = BackendConfig::from_lookup(&lookup)?;
        let model = get("MODEL_NAME").unwrap_or_else(|| backend.default_model().to_string());

        Ok(Self {
            bind_addr: get("BIND_ADDR").unwrap_or_else(|| "0.0.0.0:3000".into()),
            model,
            backend,
            backend_timeout: Duration::from_secs(positive(&get, "BACKEND_TIMEOUT_SECS", 120)?),
            tool_timeout: Duration::from_secs(positive(&get, "TOOL_TIMEOUT_SECS", 30)?),
            max_iterations: usize::try_from(positive(&get, "MAX_ITERATIONS", 10)?)
                .map_err(|_| AgentError::Config("MAX_ITERATIONS is too large".into()))?,
            backend_retry: retry(&get, "BACKEND_MAX_ATTEMPTS")?,
            store_retry: retry(&get, "STORE_MAX_ATTEMPTS")?,
            mongo: MongoConfig::from_lookup(&lookup)?,
            system_prompt: lookup("SYSTEM_PROMPT")
                .filter(|p| !p.trim().is_empty())
                .unwrap_or_else(|| DATA_ANALYST_PROMPT.to_string()),
            remote_tools_url: get("REMOTE_TOOLS_URL"),
        })
    }
}

/// Parse a required-positive integer, falling back to `default` when unset
fn positive(get: &impl Fn(&str) -> Option<String>, key: &str, default: u64) -> Result<u64> {
    match get(key) {
        None => Ok(default),
        Some(raw) => match raw.parse::<u64>() {
            Ok(0) | Err(_) => Err(AgentError::Config(format!("{key} must be a positive integer, got '{raw}'"))),
            Ok(value) => Ok(value),
        },
    }
}

fn retry(get: &impl Fn(&str) -> Option<String>, key: &str) -> Result<RetryPolicy> {
    let attempts = positive(get, key, 3)?;
    let attempts = usize::try_from(attempts).map_err(|_| AgentError::Config(format!("{key} is too large")))?;
    Ok(RetryPolicy::default().with_max_attempts(attempts))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ServerConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.bind_addr, "0.0.0.0:3000");
        assert_eq!(config.backend.kind(), "local");
        assert_eq!(config.model, "llama3.2");
        assert_eq!(config.backend_timeout, Duration::from_secs(120));
        assert_eq!(config.tool_timeout, Duration::from_secs(30));
        assert_eq!(config.max_iterations, 10);
        assert_eq!(config.backend_retry.max_attempts, 3);
        assert!(config.mongo.is_none());
        assert!(config.remote_tools_url.is_none());
        assert_eq!(config.system_prompt, DATA_ANALYST_PROMPT);
    }

    #[test]
    fn test_hosted_with_overrides() {
        let config = ServerConfig::from_lookup(lookup(&[
            ("BACKEND", "hosted"),
            ("OPENAI_API_KEY", "sk-test"),
            ("MODEL_NAME", "gpt-4o"),
            ("MAX_ITERATIONS", "4"),
            ("STORE_MAX_ATTEMPTS", "1"),
            ("MONGODB_URI", "mongodb://localhost:27017"),
            ("REMOTE_TOOLS_URL", "http://peer:3000"),
        ]))
        .unwrap();

        assert_eq!(config.backend.kind(), "hosted");
        assert_eq!(config.model, "gpt-4o");
        assert_eq!(config.max_iterations, 4);
        assert_eq!(config.store_retry, RetryPolicy::none());
        assert_eq!(config.mongo.unwrap().database, "agent_db");
        assert_eq!(config.remote_tools_url.as_deref(), Some("http://peer:3000"));
    }

    #[test]
    fn test_zero_values_rejected() {
        for key in ["MAX_ITERATIONS", "TOOL_TIMEOUT_SECS", "BACKEND_MAX_ATTEMPTS"] {
            let err = ServerConfig::from_lookup(lookup(&[(key, "0")])).unwrap_err();
            assert!(matches!(err, AgentError::Config(ref msg) if msg.contains(key)), "{key}");
        }
        assert!(ServerConfig::from_lookup(lookup(&[("TOOL_TIMEOUT_SECS", "soon")])).is_err());
    }

    #[test]
    fn test_hosted_requires_key() {
        let err = ServerConfig::from_lookup(lookup(&[("BACKEND", "hosted")])).unwrap_err();
        assert!(matches!(err, AgentError::Config(_)));
    }
}
