//! Ollama LLM Provider
//!
//! Implementation of `LlmProvider` for local Ollama inference via
//! `POST /api/chat`. Responses are requested as an NDJSON stream and buffered
//! into one [`BackendResponse`] before returning.

use std::time::Duration;

use agent_core::{
    error::{AgentError, Result},
    message::{Message, Role},
    provider::{BackendResponse, CompletionRequest, FinishReason, GenerationOptions, LlmProvider, TokenUsage},
    tool::{ToolCallRequest, ToolSchema},
};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio_stream::StreamExt;

use crate::transport::TransportError;

const BACKEND: &str = "ollama";

/// Ollama provider configuration
#[derive(Clone, Debug)]
pub struct OllamaConfig {
    /// Ollama host URL
    pub host: String,

    /// Ollama port
    pub port: u16,

    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            host: "http://localhost".into(),
            port: 11434,
            timeout_secs: 120,
        }
    }
}

impl OllamaConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read `OLLAMA_HOST`, `OLLAMA_PORT` and `BACKEND_TIMEOUT_SECS`
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let port = match lookup("OLLAMA_PORT") {
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(|_| AgentError::Config(format!("OLLAMA_PORT is not a port number: {raw}")))?,
            None => defaults.port,
        };

        Ok(Self {
            host: lookup("OLLAMA_HOST").unwrap_or(defaults.host),
            port,
            timeout_secs: crate::parse_timeout(&lookup)?.unwrap_or(defaults.timeout_secs),
        })
    }

    pub fn base_url(&self) -> String {
        format!("{}:{}", self.host.trim_end_matches('/'), self.port)
    }
}

/// Ollama LLM provider
pub struct OllamaProvider {
    client: reqwest::Client,
    config: OllamaConfig,
}

impl OllamaProvider {
    /// Create a new Ollama provider with custom host/port
    pub fn new(host: impl Into<String>, port: u16) -> Result<Self> {
        Self::from_config(OllamaConfig {
            host: host.into(),
            port,
            ..Default::default()
        })
    }

    /// Create from configuration
    pub fn from_config(config: OllamaConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AgentError::Config(format!("HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    /// Create from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_config(OllamaConfig::from_env()?)
    }

    /// Create with default localhost settings
    pub fn localhost() -> Result<Self> {
        Self::from_config(OllamaConfig::default())
    }

    pub fn config(&self) -> &OllamaConfig {
        &self.config
    }

    /// Convert agent messages to Ollama format
    fn convert_messages(system_prompt: &str, messages: &[Message]) -> Vec<Value> {
        let mut wire: Vec<Value> = Vec::with_capacity(messages.len() + 1);
        if !system_prompt.is_empty() {
            wire.push(json!({ "role": "system", "content": system_prompt }));
        }

        for message in messages {
            match (message.role, &message.tool_call) {
                (Role::Assistant, Some(call)) => {
                    let wire_call = json!({
                        "function": { "name": call.name, "arguments": call.arguments }
                    });
                    // one batched assistant turn on the wire
                    let merged = wire.last_mut().and_then(|last| {
                        let is_batch = last["role"] == "assistant" && last.get("tool_calls").is_some();
                        is_batch.then_some(last)
                    });
                    match merged.and_then(|last| last["tool_calls"].as_array_mut()) {
                        Some(calls) => calls.push(wire_call),
                        None => wire.push(json!({
                            "role": "assistant",
                            "content": message.content,
                            "tool_calls": [wire_call],
                        })),
                    }
                }
                (Role::Tool, _) => wire.push(json!({
                    "role": "tool",
                    "content": message.content,
                    "tool_name": message.tool_result.as_ref().map(|r| r.name.as_str()),
                })),
                (role, _) => wire.push(json!({ "role": role.to_string(), "content": message.content })),
            }
        }

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

    /// Build Ollama generation options
    fn build_options(opts: &GenerationOptions) -> Value {
        let mut options = json!({
            "temperature": opts.temperature,
            "top_p": opts.top_p,
            "num_predict": opts.max_tokens,
        });
        if !opts.stop_sequences.is_empty() {
            options["stop"] = json!(opts.stop_sequences);
        }
        options
    }

    fn build_body(request: &CompletionRequest<'_>) -> Value {
        let mut body = json!({
            "model": request.options.model,
            "messages": Self::convert_messages(request.system_prompt, request.messages),
            "stream": true,
            "options": Self::build_options(request.options),
        });
        if !request.tools.is_empty() {
            body["tools"] = Value::Array(Self::convert_tools(request.tools));
        }
        body
    }
}

/// One NDJSON line of a streamed `/api/chat` response
#[derive(Debug, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    message: Option<ChunkMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    done_reason: Option<String>,
    #[serde(default)]
    prompt_eval_count: Option<u32>,
    #[serde(default)]
    eval_count: Option<u32>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChunkMessage {
    #[serde(default)]
    content: String,
    #[serde(default)]
    tool_calls: Vec<ChunkToolCall>,
}

#[derive(Debug, Deserialize)]
struct ChunkToolCall {
    function: ChunkFunction,
}

#[derive(Debug, Deserialize)]
struct ChunkFunction {
    name: String,
    #[serde(default)]
    arguments: Value,
}

/// Buffers a streamed chat response into a single reply
#[derive(Debug, Default)]
struct StreamAccumulator {
    pending: Vec<u8>,
    content: String,
    calls: Vec<ToolCallRequest>,
    model: Option<String>,
    usage: Option<TokenUsage>,
    finish_reason: Option<FinishReason>,
    done: bool,
}

impl StreamAccumulator {
    /// Feed raw bytes; complete lines are decoded immediately
    fn feed(&mut self, bytes: &[u8]) -> Result<()> {
        self.pending.extend_from_slice(bytes);
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            self.line(&line)?;
        }
        Ok(())
    }

    fn line(&mut self, raw: &[u8]) -> Result<()> {
        let text = std::str::from_utf8(raw)
            .map_err(|_| TransportError::malformed(BACKEND, "stream is not UTF-8"))?
            .trim();
        if text.is_empty() {
            return Ok(());
        }

        let chunk: ChatChunk = serde_json::from_str(text)
            .map_err(|e| TransportError::malformed(BACKEND, format!("bad stream line: {e}")))?;

        if let Some(error) = chunk.error {
            return Err(TransportError::malformed(BACKEND, format!("error in stream: {error}")).into());
        }
        if chunk.model.is_some() {
            self.model = chunk.model;
        }
        if let Some(message) = chunk.message {
            self.content.push_str(&message.content);
            for call in message.tool_calls {
                let arguments = crate::decode_arguments(BACKEND, &call.function.name, call.function.arguments)?;
                // Ollama does not assign call ids
                self.calls.push(ToolCallRequest::with_generated_id(call.function.name, arguments));
            }
        }
        if chunk.done {
            self.done = true;
            self.finish_reason = chunk.done_reason.as_deref().and_then(FinishReason::parse);
            if chunk.prompt_eval_count.is_some() || chunk.eval_count.is_some() {
                self.usage = Some(TokenUsage::new(
                    chunk.prompt_eval_count.unwrap_or(0),
                    chunk.eval_count.unwrap_or(0),
                ));
            }
        }
        Ok(())
    }

    fn finish(mut self, requested_model: &str) -> Result<BackendResponse> {
        if !self.pending.is_empty() {
            let rest = std::mem::take(&mut self.pending);
            self.line(&rest)?;
        }
        if !self.done {
            return Err(TransportError::malformed(BACKEND, "stream ended before completion").into());
        }

        Ok(BackendResponse::from_parts(
            self.content,
            self.calls,
            self.model.unwrap_or_else(|| requested_model.to_string()),
            self.usage,
            self.finish_reason,
        ))
    }
}

#[async_trait]
impl LlmProvider for OllamaProvider {
    fn name(&self) -> &str {
        BACKEND
    }

    async fn health_check(&self) -> Result<bool> {
        let url = format!("{}/api/tags", self.config.base_url());
        match self.client.get(url).send().await {
            Ok(r) if r.status().is_success() => Ok(true),
            Ok(r) => {
                tracing::warn!(status = %r.status(), "Ollama health check failed");
                Ok(false)
            }
            Err(e) => {
                tracing::warn!("Ollama health check failed: {}", e);
                Ok(false)
            }
        }
    }

    async fn complete(&self, request: &CompletionRequest<'_>) -> Result<BackendResponse> {
        let url = format!("{}/api/chat", self.config.base_url());
        tracing::debug!(
            model = %request.options.model,
            messages = request.messages.len(),
            tools = request.tools.len(),
            "Sending Ollama chat request"
        );

        let response = self
            .client
            .post(url)
            .json(&Self::build_body(request))
            .send()
            .await
            .map_err(|e| TransportError::from_reqwest(BACKEND, e))?;

        if !response.status().is_success() {
            return Err(TransportError::from_response(BACKEND, response).await.into());
        }

        let mut accumulator = StreamAccumulator::default();
        let stream = response.bytes_stream();
        tokio::pin!(stream);
        while let Some(chunk) = stream.next().await {
            let bytes = chunk.map_err(|e| TransportError::from_reqwest(BACKEND, e))?;
            accumulator.feed(&bytes)?;
        }

        accumulator.finish(&request.options.model)
    }
}
