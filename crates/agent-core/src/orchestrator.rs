//! Orchestration Loop
//!
//! Drives one user turn through the `AwaitingModel → ResolvingTools → …`
//! cycle until the model answers, an unrecovered error occurs, or the
//! iteration limit is reached.
//!
//! ```text
//!            ┌──────────────── tool results appended ───────────────┐
//!            ▼                                                       │
//!   ┌─────────────────┐  tool calls   ┌────────────────┐             │
//!   │  AwaitingModel  │──────────────▶│ ResolvingTools │─────────────┘
//!   └─────────────────┘               └────────────────┘
//!        │ answer          │ error / limit / cancel
//!        ▼                 ▼
//!      Done              Failed
//! ```

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::{AgentError, ErrorKind, Result};
use crate::invoker::ToolInvoker;
use crate::message::Message;
use crate::provider::{BackendResponse, CompletionRequest, GenerationOptions, LlmProvider};
use crate::retry::RetryPolicy;
use crate::session::{Session, SessionId};
use crate::store::{ConversationStore, MemorySessionStore, SessionHandle, SessionStore};
use crate::tool::{new_call_id, Tool, ToolCallRequest, ToolRegistry};

/// Orchestrator configuration
#[derive(Clone, Debug)]
pub struct OrchestratorConfig {
    /// System prompt sent with every backend call
    pub system_prompt: String,

    /// Maximum `AwaitingModel` entries per user turn
    pub max_iterations: usize,

    /// Generation options
    pub generation: GenerationOptions,

    /// Whether to append tool descriptions to system prompt
    pub inject_tool_descriptions: bool,

    /// Upper bound on a single backend call
    pub backend_timeout: Duration,

    /// Retry bounds for transient backend failures
    pub backend_retry: RetryPolicy,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.into(),
            max_iterations: 10,
            generation: GenerationOptions::default(),
            inject_tool_descriptions: true,
            backend_timeout: Duration::from_secs(120),
            backend_retry: RetryPolicy::default(),
        }
    }
}

pub const DEFAULT_SYSTEM_PROMPT: &str = r#"You are a helpful assistant with access to tools.

Use a tool whenever it gives a more accurate answer than you could produce yourself,
for example the current date and time, arithmetic, or data held in the database.
If you cannot call tools natively, respond with a JSON block in this exact format:
```tool
{"tool": "tool_name", "arguments": {"arg1": "value1"}}
```

When a tool result reports an error, correct the call or explain the problem.
After receiving tool results, synthesize them into a concise answer."#;

/// States of the orchestration loop
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    AwaitingModel,
    ResolvingTools,
    Done,
    Failed,
}

impl LoopState {
    pub fn is_terminal(self) -> bool {
        matches!(self, LoopState::Done | LoopState::Failed)
    }
}

/// Terminal result of one run
#[derive(Debug)]
pub struct RunOutcome {
    pub session_id: SessionId,
    pub state: LoopState,
    pub reply: Option<String>,
    pub error: Option<AgentError>,
    /// `AwaitingModel` entries made during the run
    pub iterations: usize,
}

impl RunOutcome {
    pub fn is_done(&self) -> bool {
        self.state == LoopState::Done
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(AgentError::kind)
    }
}

/// The tool-calling orchestrator
pub struct Orchestrator {
    provider: Arc<dyn LlmProvider>,
    invoker: ToolInvoker,
    store: ConversationStore,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        invoker: ToolInvoker,
        store: ConversationStore,
        config: OrchestratorConfig,
    ) -> Result<Self> {
        if config.max_iterations == 0 {
            return Err(AgentError::Config("max_iterations must be at least 1".into()));
        }
        if config.backend_timeout.is_zero() {
            return Err(AgentError::Config("backend timeout must be non-zero".into()));
        }
        Ok(Self {
            provider,
            invoker,
            store,
            config,
        })
    }

    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::new()
    }

    /// Build the full system prompt including tool descriptions
    pub fn system_prompt(&self) -> String {
        let mut prompt = self.config.system_prompt.clone();

        let registry = self.invoker.registry();
        if self.config.inject_tool_descriptions && !registry.is_empty() {
            prompt.push_str("\n\n");
            prompt.push_str(&registry.generate_prompt_section());
        }

        prompt
    }

    /// Run one user turn on a session, creating the session when `session_id` is `None`.
    ///
    /// Never returns an error: failures are reported through the outcome's
    /// `Failed` state. Messages appended before a failure stay in the session.
    pub async fn run(
        &self,
        session_id: Option<SessionId>,
        message: impl Into<String>,
        cancel: &CancellationToken,
    ) -> RunOutcome {
        let session_id = session_id.unwrap_or_default();
        let message = message.into();
        let mut iterations = 0;

        let result = self.run_turn(&session_id, message, cancel, &mut iterations).await;

        match result {
            Ok(reply) => {
                tracing::info!(session_id = %session_id, iterations, "Run finished");
                RunOutcome {
                    session_id,
                    state: LoopState::Done,
                    reply: Some(reply),
                    error: None,
                    iterations,
                }
            }
            Err(err) => {
                tracing::warn!(
                    session_id = %session_id,
                    iterations,
                    kind = %err.kind(),
                    error = %err,
                    "Run failed"
                );
                RunOutcome {
                    session_id,
                    state: LoopState::Failed,
                    reply: None,
                    error: Some(err),
                    iterations,
                }
            }
        }
    }

    async fn run_turn(
        &self,
        session_id: &SessionId,
        message: String,
        cancel: &CancellationToken,
        iterations: &mut usize,
    ) -> Result<String> {
        if message.trim().is_empty() {
            return Err(AgentError::InvalidRequest("message must not be empty".into()));
        }

        let mut handle = self.store.open(session_id.clone()).await?;
        handle.append(Message::user(message)).await?;

        self.drive(&mut handle, cancel, iterations).await
    }

    async fn drive(
        &self,
        handle: &mut SessionHandle,
        cancel: &CancellationToken,
        iterations: &mut usize,
    ) -> Result<String> {
        let system_prompt = self.system_prompt();
        let tools = self.invoker.registry().schemas();
        let max = self.config.max_iterations;

        loop {
            if cancel.is_cancelled() {
                return Err(AgentError::Cancelled);
            }
            // iterations counts backend calls actually made
            if *iterations >= max {
                return Err(AgentError::LoopLimitExceeded(max));
            }
            *iterations += 1;
            tracing::debug!(
                session_id = %handle.id(),
                iteration = *iterations,
                state = ?LoopState::AwaitingModel,
                "Calling backend"
            );

            let request = CompletionRequest {
                system_prompt: &system_prompt,
                messages: handle.messages(),
                tools: &tools,
                options: &self.config.generation,
            };
            let response = self.complete(&request).await?;

            let (calls, content, model, usage) = match response {
                BackendResponse::Answer(completion) => {
                    let reply = completion.content.clone();
                    handle
                        .append(Message::assistant(completion.content).with_metadata(completion.model, completion.usage))
                        .await?;
                    return Ok(reply);
                }
                BackendResponse::ToolCalls {
                    calls,
                    content,
                    model,
                    usage,
                } => (calls, content, model, usage),
            };

            if cancel.is_cancelled() {
                return Err(AgentError::Cancelled);
            }
            tracing::debug!(
                session_id = %handle.id(),
                calls = calls.len(),
                state = ?LoopState::ResolvingTools,
                "Resolving tool calls"
            );

            let calls = assign_unique_ids(handle.session(), calls);
            let mut usage = usage;
            for (index, call) in calls.iter().enumerate() {
                let text = if index == 0 { content.as_str() } else { "" };
                let request = Message::tool_request(text, call.clone()).with_metadata(model.as_str(), usage.take());
                handle.append(request).await?;
            }

            let results = self.invoker.invoke_all(&calls).await;
            for result in results {
                handle.append(Message::tool_result(result)).await?;
            }
        }
    }

    async fn complete(&self, request: &CompletionRequest<'_>) -> Result<BackendResponse> {
        let provider = &self.provider;
        let timeout = self.config.backend_timeout;

        self.config
            .backend_retry
            .run("backend.complete", move || async move {
                match tokio::time::timeout(timeout, provider.complete(request)).await {
                    Ok(result) => result,
                    Err(_) => Err(AgentError::BackendUnavailable(format!(
                        "{} did not respond within {}s",
                        provider.name(),
                        timeout.as_secs()
                    ))),
                }
            })
            .await
    }

    pub fn provider(&self) -> &Arc<dyn LlmProvider> {
        &self.provider
    }

    pub fn invoker(&self) -> &ToolInvoker {
        &self.invoker
    }

    pub fn store(&self) -> &ConversationStore {
        &self.store
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }
}

/// Give every call an id not yet used in the session (or earlier in the batch)
fn assign_unique_ids(session: &Session, calls: Vec<ToolCallRequest>) -> Vec<ToolCallRequest> {
    let mut seen: HashSet<String> = session.call_ids().into_iter().map(str::to_owned).collect();

    calls
        .into_iter()
        .map(|mut call| {
            if call.id.is_empty() || seen.contains(&call.id) {
                let fresh = new_call_id();
                tracing::debug!(tool = %call.name, old = %call.id, new = %fresh, "Re-minted tool call id");
                call.id = fresh;
            }
            seen.insert(call.id.clone());
            call
        })
        .collect()
}

/// Builder for Orchestrator configuration
pub struct OrchestratorBuilder {
    provider: Option<Arc<dyn LlmProvider>>,
    tools: ToolRegistry,
    shared_tools: Option<Arc<ToolRegistry>>,
    tool_timeout: Duration,
    session_store: Option<Arc<dyn SessionStore>>,
    store_retry: RetryPolicy,
    config: OrchestratorConfig,
    pending_error: Option<AgentError>,
}

impl Default for OrchestratorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl OrchestratorBuilder {
    pub fn new() -> Self {
        Self {
            provider: None,
            tools: ToolRegistry::new(),
            shared_tools: None,
            tool_timeout: Duration::from_secs(30),
            session_store: None,
            store_retry: RetryPolicy::default(),
            config: OrchestratorConfig::default(),
            pending_error: None,
        }
    }

    pub fn provider(mut self, provider: Arc<dyn LlmProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn tool<T: Tool + 'static>(mut self, tool: T) -> Self {
        if let Err(err) = self.tools.register(tool) {
            self.pending_error.get_or_insert(err);
        }
        self
    }

    /// Use an already-built registry (replaces any tools added with [`Self::tool`])
    pub fn tools(mut self, tools: Arc<ToolRegistry>) -> Self {
        self.shared_tools = Some(tools);
        self
    }

    pub fn tool_timeout(mut self, timeout: Duration) -> Self {
        self.tool_timeout = timeout;
        self
    }

    pub fn session_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.session_store = Some(store);
        self
    }

    pub fn store_retry(mut self, retry: RetryPolicy) -> Self {
        self.store_retry = retry;
        self
    }

    pub fn backend_retry(mut self, retry: RetryPolicy) -> Self {
        self.config.backend_retry = retry;
        self
    }

    pub fn backend_timeout(mut self, timeout: Duration) -> Self {
        self.config.backend_timeout = timeout;
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = prompt.into();
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.generation.model = model.into();
        self
    }

    pub fn temperature(mut self, temp: f32) -> Self {
        self.config.generation.temperature = temp;
        self
    }

    pub fn max_iterations(mut self, max: usize) -> Self {
        self.config.max_iterations = max;
        self
    }

    pub fn inject_tool_descriptions(mut self, inject: bool) -> Self {
        self.config.inject_tool_descriptions = inject;
        self
    }

    pub fn config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Result<Orchestrator> {
        if let Some(err) = self.pending_error {
            return Err(err);
        }
        let provider = self
            .provider
            .ok_or_else(|| AgentError::Config("Provider is required".into()))?;
        if self.tool_timeout.is_zero() {
            return Err(AgentError::Config("tool timeout must be non-zero".into()));
        }

        let registry = self.shared_tools.unwrap_or_else(|| Arc::new(self.tools));
        let invoker = ToolInvoker::new(registry, self.tool_timeout);
        let backend = self
            .session_store
            .unwrap_or_else(|| Arc::new(MemorySessionStore::new()));
        let store = ConversationStore::new(backend, self.store_retry);

        Orchestrator::new(provider, invoker, store, self.config)
    }
}
