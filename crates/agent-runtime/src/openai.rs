//! Hosted OpenAI-compatible Provider
//!
//! Implementation of `LlmProvider` against `POST {base_url}/chat/completions`
//! using native function calling. Works with OpenAI itself and with any
//! server exposing the same API (Ollama's `/v1`, vLLM, LiteLLM, ...).

use std::collections::HashSet;
use std::time::Duration;

use agent_core::{
    error::{AgentError, Result},
    message::{Message, Role},
    provider::{BackendResponse, CompletionRequest, FinishReason, LlmProvider, TokenUsage},
    tool::{ToolCallRequest, ToolCallResult, ToolSchema},
};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::transport::TransportError;

const BACKEND: &str = "openai";

/// Hosted provider configuration
#[derive(Clone, Debug)]
pub struct OpenAiConfig {
    /// API base URL, including the version segment
    pub base_url: String,

    /// Bearer token
    pub api_key: String,

    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".into(),
            api_key: String::new(),
            timeout_secs: 120,
        }
    }
}

impl OpenAiConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read `OPENAI_BASE_URL`, `OPENAI_API_KEY` and `BACKEND_TIMEOUT_SECS`
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let api_key = lookup("OPENAI_API_KEY")
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| AgentError::Config("OPENAI_API_KEY is required for the hosted backend".into()))?;

        let defaults = Self::default();
        Ok(Self {
            base_url: lookup("OPENAI_BASE_URL").unwrap_or(defaults.base_url),
            api_key,
            timeout_secs: crate::parse_timeout(&lookup)?.unwrap_or(defaults.timeout_secs),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }
}

/// OpenAI-compatible chat completions provider
pub struct OpenAiProvider {
    client: reqwest::Client,
    config: OpenAiConfig,
}

impl OpenAiProvider {
    pub fn from_config(config: OpenAiConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AgentError::Config(format!("HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    pub fn from_env() -> Result<Self> {
        Self::from_config(OpenAiConfig::from_env()?)
    }

    pub fn config(&self) -> &OpenAiConfig {
        &self.config
    }

    /// Convert the transcript to chat-completions messages.
    ///
    /// Consecutive tool-requesting assistant messages are merged back into the
    /// single batched message the API produced them from. A request whose
    /// result never reached the session (failed append, crash mid-phase) is
    /// answered with a failed tool message, since the API rejects a
    /// `tool_calls` turn that is not followed by a reply for every id.
    fn convert_messages(system_prompt: &str, messages: &[Message]) -> Vec<Value> {
        let mut wire = Vec::with_capacity(messages.len() + 1);
        if !system_prompt.is_empty() {
            wire.push(json!({ "role": "system", "content": system_prompt }));
        }

        let answered: HashSet<&str> = messages.iter().filter_map(Message::answered_call_id).collect();
        let mut pending_calls: Vec<Value> = Vec::new();
        let mut pending_text = String::new();
        let mut unanswered: Vec<&ToolCallRequest> = Vec::new();

        for message in messages {
            if let (Role::Assistant, Some(call)) = (message.role, &message.tool_call) {
                if pending_text.is_empty() {
                    pending_text.clone_from(&message.content);
                }
                if !answered.contains(call.id.as_str()) {
                    unanswered.push(call);
                }
                pending_calls.push(json!({
                    "id": call.id,
                    "type": "function",
                    "function": {
                        "name": call.name,
                        "arguments": call.arguments.to_string(),
                    },
                }));
                continue;
            }
            flush_calls(&mut wire, &mut pending_calls, &mut pending_text);
            if message.role != Role::Tool {
                settle_unanswered(&mut wire, &mut unanswered);
            }

            match message.role {
                Role::User => wire.push(json!({ "role": "user", "content": message.content })),
                Role::Assistant => wire.push(json!({ "role": "assistant", "content": message.content })),
                Role::Tool => wire.push(json!({
                    "role": "tool",
                    "tool_call_id": message.answered_call_id().unwrap_or_default(),
                    "content": message.content,
                })),
            }
        }
        flush_calls(&mut wire, &mut pending_calls, &mut pending_text);
        settle_unanswered(&mut wire, &mut unanswered);

        wire
    }

    fn convert_tools(tools: &[ToolSchema]) -> Vec<Value> {
        tools
            .iter()
            .map(|tool| {
                json!({
                    "type": "function",
                    "function": {
                        "name": tool.name,
                        "description": tool.description,
                        "parameters": tool.to_json_schema(),
                    },
                })
            })
            .collect()
    }

    fn build_body(request: &CompletionRequest<'_>) -> Value {
        let options = request.options;
        let mut body = Map::new();
        body.insert("model".into(), json!(options.model));
        body.insert(
            "messages".into(),
            Value::Array(Self::convert_messages(request.system_prompt, request.messages)),
        );
        body.insert("temperature".into(), json!(options.temperature));
        body.insert("top_p".into(), json!(options.top_p));
        body.insert("max_tokens".into(), json!(options.max_tokens));
        if !options.stop_sequences.is_empty() {
            body.insert("stop".into(), json!(options.stop_sequences));
        }
        if !request.tools.is_empty() {
            body.insert("tools".into(), Value::Array(Self::convert_tools(request.tools)));
            body.insert("tool_choice".into(), json!("auto"));
        }
        Value::Object(body)
    }

    fn parse_response(body: ChatResponse, requested_model: &str) -> Result<BackendResponse> {
        let choice = body
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| TransportError::malformed(BACKEND, "response has no choices"))?;

        let calls = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(WireToolCall::into_request)
            .collect::<Result<Vec<_>>>()?;

        let usage = body
            .usage
            .map(|u| TokenUsage::new(u.prompt_tokens, u.completion_tokens));

        Ok(BackendResponse::from_parts(
            choice.message.content.unwrap_or_default(),
            calls,
            body.model.unwrap_or_else(|| requested_model.to_string()),
            usage,
            choice.finish_reason.as_deref().and_then(FinishReason::parse),
        ))
    }
}

/// Reply to requests that have no recorded result
fn settle_unanswered(wire: &mut Vec<Value>, unanswered: &mut Vec<&ToolCallRequest>) {
    for call in unanswered.drain(..) {
        let err = AgentError::ToolExecution("no result was recorded for this call".into());
        wire.push(json!({
            "role": "tool",
            "tool_call_id": call.id,
            "content": ToolCallResult::failure(call, &err).to_model_content(),
        }));
    }
}

fn flush_calls(wire: &mut Vec<Value>, calls: &mut Vec<Value>, text: &mut String) {
    if calls.is_empty() {
        return;
    }
    let content = if text.is_empty() {
        Value::Null
    } else {
        Value::String(std::mem::take(text))
    };
    wire.push(json!({
        "role": "assistant",
        "content": content,
        "tool_calls": std::mem::take(calls),
    }));
    text.clear();
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Debug, Deserialize)]
struct WireToolCall {
    #[serde(default)]
    id: Option<String>,
    function: WireFunction,
}

#[derive(Debug, Deserialize)]
struct WireFunction {
    name: String,
    #[serde(default)]
    arguments: Value,
}

impl WireToolCall {
    fn into_request(self) -> Result<ToolCallRequest> {
        let arguments = crate::decode_arguments(BACKEND, &self.function.name, self.function.arguments)?;
        Ok(match self.id.filter(|id| !id.is_empty()) {
            Some(id) => ToolCallRequest::new(id, self.function.name, arguments),
            None => ToolCallRequest::with_generated_id(self.function.name, arguments),
        })
    }
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &str {
        BACKEND
    }

    async fn health_check(&self) -> Result<bool> {
        let response = self
            .client
            .get(self.config.endpoint("models"))
            .bearer_auth(&self.config.api_key)
            .send()
            .await;

        match response {
            Ok(r) if r.status().is_success() => Ok(true),
            Ok(r) => {
                tracing::warn!(status = %r.status(), "OpenAI health check failed");
                Ok(false)
            }
            Err(e) => {
                tracing::warn!("OpenAI health check failed: {}", e);
                Ok(false)
            }
        }
    }

    async fn complete(&self, request: &CompletionRequest<'_>) -> Result<BackendResponse> {
        let body = Self::build_body(request);
        tracing::debug!(
            model = %request.options.model,
            messages = request.messages.len(),
            tools = request.tools.len(),
            "Sending chat completion"
        );

        let response = self
            .client
            .post(self.config.endpoint("chat/completions"))
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| TransportError::from_reqwest(BACKEND, e))?;

        if !response.status().is_success() {
            return Err(TransportError::from_response(BACKEND, response).await.into());
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| TransportError::from_reqwest(BACKEND, e))?;

        Self::parse_response(parsed, &request.options.model)
    }
}
