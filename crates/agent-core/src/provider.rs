//! LLM Provider Strategy Pattern
//!
//! Defines the one capability every model backend offers: given the session
//! transcript and the tool catalog, produce either a final answer or a batch of
//! tool calls. The hosted and local runtimes implement [`LlmProvider`] and are
//! selected once at startup.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use agent_core::provider::{CompletionRequest, LlmProvider};
//!
//! let response = provider.complete(&CompletionRequest {
//!     system_prompt: &prompt,
//!     messages: session.messages(),
//!     tools: &registry.schemas(),
//!     options: &options,
//! }).await?;
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::message::Message;
use crate::tool::{ToolCallRequest, ToolSchema};

/// Configuration for LLM generation
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GenerationOptions {
    /// Model identifier (e.g., "llama3.2", "gpt-4o-mini")
    pub model: String,

    /// Temperature for sampling (0.0 = deterministic, 1.0 = creative)
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens to generate
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Top-p nucleus sampling
    #[serde(default = "default_top_p")]
    pub top_p: f32,

    /// Stop sequences
    #[serde(default)]
    pub stop_sequences: Vec<String>,
}

fn default_temperature() -> f32 { 0.2 }
fn default_max_tokens() -> u32 { 2048 }
fn default_top_p() -> f32 { 0.9 }

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            model: "llama3.2".into(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            top_p: default_top_p(),
            stop_sequences: Vec::new(),
        }
    }
}

/// Everything a backend needs for one completion
#[derive(Clone, Copy, Debug)]
pub struct CompletionRequest<'a> {
    pub system_prompt: &'a str,
    pub messages: &'a [Message],
    pub tools: &'a [ToolSchema],
    pub options: &'a GenerationOptions,
}

/// Final answer from an LLM completion
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Completion {
    /// The generated text
    pub content: String,

    /// Model that generated this response
    pub model: String,

    /// Token usage statistics (if available)
    pub usage: Option<TokenUsage>,

    /// Finish reason
    pub finish_reason: Option<FinishReason>,
}

/// Token usage statistics
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl TokenUsage {
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens.saturating_add(completion_tokens),
        }
    }
}

/// Reason for completion finishing
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolUse,
    ContentFilter,
    Error,
}

impl FinishReason {
    /// Map the finish-reason strings used by OpenAI-style and Ollama backends
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "stop" => Some(FinishReason::Stop),
            "length" => Some(FinishReason::Length),
            "tool_calls" | "function_call" => Some(FinishReason::ToolUse),
            "content_filter" => Some(FinishReason::ContentFilter),
            "error" => Some(FinishReason::Error),
            _ => None,
        }
    }
}

/// Normalized backend reply
#[derive(Clone, Debug)]
pub enum BackendResponse {
    /// The model produced its final answer
    Answer(Completion),

    /// The model asked for one or more tools
    ToolCalls {
        calls: Vec<ToolCallRequest>,
        /// Text emitted alongside the calls, often empty
        content: String,
        model: String,
        usage: Option<TokenUsage>,
    },
}

impl BackendResponse {
    /// Build a response from decoded backend parts.
    ///
    /// When the backend returned no native tool calls, the content is checked
    /// for the text tool-call protocol before it is treated as an answer.
    pub fn from_parts(
        content: String,
        mut calls: Vec<ToolCallRequest>,
        model: impl Into<String>,
        usage: Option<TokenUsage>,
        finish_reason: Option<FinishReason>,
    ) -> Self {
        let model = model.into();
        let mut content = content;

        if calls.is_empty() {
            calls = extract_text_tool_calls(&content);
            if !calls.is_empty() {
                content.clear();
            }
        }

        if calls.is_empty() {
            BackendResponse::Answer(Completion {
                content,
                model,
                usage,
                finish_reason,
            })
        } else {
            BackendResponse::ToolCalls {
                calls,
                content,
                model,
                usage,
            }
        }
    }

    pub fn model(&self) -> &str {
        match self {
            BackendResponse::Answer(c) => &c.model,
            BackendResponse::ToolCalls { model, .. } => model,
        }
    }
}

/// Strategy trait for LLM providers
///
/// Implement this trait to add support for new LLM backends.
/// The orchestrator works exclusively through this interface.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider name for logs and health output
    fn name(&self) -> &str;

    /// Check if the provider is available and configured correctly
    async fn health_check(&self) -> Result<bool>;

    /// Produce the next step of the conversation
    async fn complete(&self, request: &CompletionRequest<'_>) -> Result<BackendResponse>;
}

/// Parse tool calls written as text by models without native function calling.
///
/// Two shapes are recognized: fenced ```` ```tool ```` blocks holding
/// `{"tool": .., "arguments": ..}`, and a reply that is entirely a JSON object
/// `{"name": .., "parameters" | "arguments": ..}`.
pub fn extract_text_tool_calls(content: &str) -> Vec<ToolCallRequest> {
    const FENCE: &str = "```tool";

    let mut calls = Vec::new();
    let mut rest = content;
    while let Some(start) = rest.find(FENCE) {
        let after_marker = &rest[start + FENCE.len()..];
        let Some(end) = after_marker.find("```") else {
            break;
        };
        if let Ok(Value::Object(obj)) = serde_json::from_str::<Value>(after_marker[..end].trim()) {
            if let Some(call) = call_from_object(&obj) {
                calls.push(call);
            }
        }
        rest = &after_marker[end + 3..];
    }
    if !calls.is_empty() {
        return calls;
    }

    let trimmed = strip_code_fence(content.trim());
    if let Ok(Value::Object(obj)) = serde_json::from_str::<Value>(trimmed) {
        if let Some(call) = call_from_object(&obj) {
            calls.push(call);
        }
    }
    calls
}

fn strip_code_fence(text: &str) -> &str {
    let Some(inner) = text.strip_prefix("```") else {
        return text;
    };
    let inner = inner.strip_prefix("json").unwrap_or(inner);
    inner.strip_suffix("```").unwrap_or(inner).trim()
}

fn call_from_object(obj: &serde_json::Map<String, Value>) -> Option<ToolCallRequest> {
    let (name, args) = if let Some(name) = obj.get("tool").and_then(Value::as_str) {
        (name, obj.get("arguments").or_else(|| obj.get("parameters")))
    } else {
        let name = obj.get("name").and_then(Value::as_str)?;
        // a bare {"name": ..} is too likely to be ordinary JSON output
        let args = obj.get("parameters").or_else(|| obj.get("arguments"))?;
        (name, Some(args))
    };

    let arguments = match args {
        None | Some(Value::Null) => Value::Object(serde_json::Map::new()),
        Some(Value::String(raw)) => serde_json::from_str(raw).ok()?,
        Some(other) => other.clone(),
    };

    let call = match obj.get("id").and_then(Value::as_str) {
        Some(id) => ToolCallRequest::new(id, name, arguments),
        None => ToolCallRequest::with_generated_id(name, arguments),
    };
    Some(call)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_generation_options_defaults() {
        let opts = GenerationOptions::default();
        assert_eq!(opts.max_tokens, 2048);
        assert_eq!(opts.model, "llama3.2");
    }

    #[test]
    fn test_parse_fenced_tool_call() {
        let content = r#"Let me check that for you.
```tool
{"tool": "calculate", "arguments": {"expression": "2 + 2"}}
```"#;

        let calls = extract_text_tool_calls(content);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "calculate");
        assert_eq!(calls[0].arguments, json!({"expression": "2 + 2"}));
        assert!(calls[0].id.starts_with("call_"));
    }

    #[test]
    fn test_parse_bare_json_tool_call() {
        let content = r#"{"name": "find_documents", "parameters": {"collection": "lanes"}}"#;
        let calls = extract_text_tool_calls(content);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "find_documents");

        // stringified arguments are decoded
        let content = r#"```json
{"name": "datetime", "arguments": "{\"format\": \"iso\"}"}
```"#;
        let calls = extract_text_tool_calls(content);
        assert_eq!(calls[0].arguments, json!({"format": "iso"}));
    }

    #[test]
    fn test_plain_answers_are_not_tool_calls() {
        assert!(extract_text_tool_calls("The answer is 4.").is_empty());
        assert!(extract_text_tool_calls(r#"{"name": "Ada Lovelace"}"#).is_empty());
    }

    #[test]
    fn test_from_parts_normalizes() {
        let answer = BackendResponse::from_parts("done".into(), Vec::new(), "m", None, Some(FinishReason::Stop));
        assert!(matches!(answer, BackendResponse::Answer(ref c) if c.content == "done"));

        let fallback = BackendResponse::from_parts(
            r#"{"name": "datetime", "parameters": {}}"#.into(),
            Vec::new(),
            "m",
            None,
            None,
        );
        match fallback {
            BackendResponse::ToolCalls { calls, content, .. } => {
                assert_eq!(calls[0].name, "datetime");
                assert!(content.is_empty());
            }
            BackendResponse::Answer(_) => panic!("expected tool calls"),
        }
    }
}
