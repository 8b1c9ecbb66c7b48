//! End-to-end behaviour of the orchestration loop against scripted backends.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use agent_core::provider::Completion;
use agent_core::tool::ParameterSchema;
use agent_core::{
    AgentError, BackendResponse, CancellationToken, CompletionRequest, ErrorKind, LlmProvider, LoopState,
    MemorySessionStore, Message, Orchestrator, Result, RetryPolicy, Role, Session, SessionId,
    SessionStore, SessionSummary, Tool, ToolCallRequest, ToolSchema,
};
use async_trait::async_trait;
use serde_json::{json, Value};

// ---------------------------------------------------------------------------
// Test doubles
// ---------------------------------------------------------------------------

enum Fallback {
    Echo,
    AlwaysTool(&'static str),
}

struct ScriptedProvider {
    steps: Mutex<VecDeque<Result<BackendResponse>>>,
    fallback: Fallback,
    calls: AtomicUsize,
    delay: Duration,
}

impl ScriptedProvider {
    fn new(steps: Vec<Result<BackendResponse>>, fallback: Fallback) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            fallback,
            calls: AtomicUsize::new(0),
            delay: Duration::ZERO,
        }
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

fn answer(text: &str) -> BackendResponse {
    BackendResponse::Answer(Completion {
        content: text.into(),
        model: "scripted".into(),
        usage: None,
        finish_reason: None,
    })
}

fn tool_calls(calls: Vec<ToolCallRequest>) -> BackendResponse {
    BackendResponse::ToolCalls {
        calls,
        content: String::new(),
        model: "scripted".into(),
        usage: None,
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }

    async fn complete(&self, request: &CompletionRequest<'_>) -> Result<BackendResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let scripted = self.steps.lock().unwrap().pop_front();
        if let Some(step) = scripted {
            return step;
        }

        match self.fallback {
            Fallback::Echo => {
                let last = request
                    .messages
                    .iter()
                    .rev()
                    .find(|m| m.role == Role::User)
                    .map(|m| m.content.clone())
                    .unwrap_or_default();
                Ok(answer(&format!("echo: {last}")))
            }
            Fallback::AlwaysTool(name) => Ok(tool_calls(vec![ToolCallRequest::with_generated_id(
                name,
                json!({}),
            )])),
        }
    }
}

struct SleepTool {
    name: &'static str,
    delay: Duration,
}

#[async_trait]
impl Tool for SleepTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: self.name.into(),
            description: "Sleeps, then returns its own name".into(),
            parameters: vec![ParameterSchema::optional("note", "string", "Ignored")],
            category: None,
            has_side_effects: false,
            timeout_secs: None,
        }
    }

    async fn execute(&self, _call: &ToolCallRequest) -> Result<Value> {
        tokio::time::sleep(self.delay).await;
        Ok(json!(format!("{}-result", self.name)))
    }
}

/// Memory store whose first `failures` appends report the store as unavailable
struct FlakyStore {
    inner: MemorySessionStore,
    failures: AtomicUsize,
}

#[async_trait]
impl SessionStore for FlakyStore {
    async fn load(&self, id: &SessionId) -> Result<Session> {
        self.inner.load(id).await
    }

    async fn append(&self, id: &SessionId, message: &Message) -> Result<()> {
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(AgentError::StoreUnavailable("connection reset".into()));
        }
        self.inner.append(id, message).await
    }

    async fn snapshot(&self, id: &SessionId) -> Result<Vec<Message>> {
        self.inner.snapshot(id).await
    }

    async fn delete(&self, id: &SessionId) -> Result<()> {
        self.inner.delete(id).await
    }

    async fn list(&self, limit: usize) -> Result<Vec<SessionSummary>> {
        self.inner.list(limit).await
    }
}

fn orchestrator(provider: Arc<ScriptedProvider>, max_iterations: usize) -> Orchestrator {
    Orchestrator::builder()
        .provider(provider)
        .tool(SleepTool { name: "slow", delay: Duration::from_millis(200) })
        .tool(SleepTool { name: "fast", delay: Duration::from_millis(10) })
        .max_iterations(max_iterations)
        .backend_retry(RetryPolicy::none())
        .store_retry(RetryPolicy::none())
        .build()
        .unwrap()
}

/// Every tool result must answer exactly one earlier request
fn assert_referential_integrity(messages: &[Message]) {
    for (index, message) in messages.iter().enumerate() {
        if let Some(call_id) = message.answered_call_id() {
            let matching = messages[..index]
                .iter()
                .filter(|m| m.requested_call_id() == Some(call_id))
                .count();
            assert_eq!(matching, 1, "tool result {call_id} has {matching} preceding requests");
        }
    }
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_plain_answer_finishes_in_one_cycle() {
    let provider = Arc::new(ScriptedProvider::new(vec![Ok(answer("42"))], Fallback::Echo));
    let orchestrator = orchestrator(provider.clone(), 5);

    let outcome = orchestrator.run(None, "meaning of life?", &CancellationToken::new()).await;

    assert_eq!(outcome.state, LoopState::Done);
    assert_eq!(outcome.reply.as_deref(), Some("42"));
    assert_eq!(outcome.iterations, 1);
    assert_eq!(provider.calls(), 1);

    let messages = orchestrator.store().snapshot(&outcome.session_id).await.unwrap();
    let roles: Vec<Role> = messages.iter().map(|m| m.role).collect();
    assert_eq!(roles, [Role::User, Role::Assistant]);
}

#[tokio::test]
async fn test_tool_results_keep_request_order() {
    let provider = Arc::new(ScriptedProvider::new(
        vec![
            Ok(tool_calls(vec![
                ToolCallRequest::new("A", "slow", json!({})),
                ToolCallRequest::new("B", "fast", json!({})),
            ])),
            Ok(answer("both done")),
        ],
        Fallback::Echo,
    ));
    let orchestrator = orchestrator(provider, 5);

    let outcome = orchestrator.run(None, "run both", &CancellationToken::new()).await;
    assert!(outcome.is_done());
    assert_eq!(outcome.iterations, 2);

    let messages = orchestrator.store().snapshot(&outcome.session_id).await.unwrap();
    let answered: Vec<&str> = messages.iter().filter_map(Message::answered_call_id).collect();
    assert_eq!(answered, ["A", "B"]);
    assert_eq!(messages[3].content, "slow-result");
    assert_eq!(messages[4].content, "fast-result");
    assert_referential_integrity(&messages);
}

#[tokio::test]
async fn test_loop_limit_after_exact_iterations() {
    let provider = Arc::new(ScriptedProvider::new(Vec::new(), Fallback::AlwaysTool("fast")));
    let orchestrator = orchestrator(provider.clone(), 3);

    let outcome = orchestrator.run(None, "loop forever", &CancellationToken::new()).await;

    assert_eq!(outcome.state, LoopState::Failed);
    assert_eq!(outcome.error_kind(), Some(ErrorKind::LoopLimitExceeded));
    assert_eq!(provider.calls(), 3);
    assert_eq!(outcome.iterations, 3);

    let messages = orchestrator.store().snapshot(&outcome.session_id).await.unwrap();
    // user + 3 × (request, result)
    assert_eq!(messages.len(), 7);
    assert_referential_integrity(&messages);
}

#[tokio::test]
async fn test_unknown_tool_is_fed_back_and_loop_continues() {
    let provider = Arc::new(ScriptedProvider::new(
        vec![
            Ok(tool_calls(vec![ToolCallRequest::new("c1", "teleport", json!({}))])),
            Ok(answer("I cannot teleport.")),
        ],
        Fallback::Echo,
    ));
    let orchestrator = orchestrator(provider, 5);

    let outcome = orchestrator.run(None, "beam me up", &CancellationToken::new()).await;
    assert!(outcome.is_done());

    let messages = orchestrator.store().snapshot(&outcome.session_id).await.unwrap();
    let result = messages[2].tool_result.as_ref().unwrap();
    assert!(!result.success);
    assert_eq!(result.error_kind(), Some(ErrorKind::UnknownTool));
    assert!(messages[2].content.contains("UnknownToolError"));
}

#[tokio::test]
async fn test_reused_call_ids_across_turns_are_reminted() {
    let provider = Arc::new(ScriptedProvider::new(
        vec![
            Ok(tool_calls(vec![ToolCallRequest::new("call_0", "fast", json!({}))])),
            Ok(answer("first")),
            Ok(tool_calls(vec![ToolCallRequest::new("call_0", "fast", json!({}))])),
            Ok(answer("second")),
        ],
        Fallback::Echo,
    ));
    let orchestrator = orchestrator(provider, 5);
    let cancel = CancellationToken::new();

    let first = orchestrator.run(None, "one", &cancel).await;
    let second = orchestrator.run(Some(first.session_id.clone()), "two", &cancel).await;
    assert!(second.is_done());

    let messages = orchestrator.store().snapshot(&first.session_id).await.unwrap();
    assert_eq!(messages.len(), 8);
    assert_referential_integrity(&messages);
}

#[tokio::test]
async fn test_same_session_requests_do_not_interleave() {
    let provider = Arc::new(ScriptedProvider::new(Vec::new(), Fallback::Echo).with_delay(Duration::from_millis(20)));
    let orchestrator = Arc::new(orchestrator(provider, 5));
    let session_id = SessionId::from_string("shared");

    let mut tasks = Vec::new();
    for text in ["first", "second", "third"] {
        let orchestrator = orchestrator.clone();
        let session_id = session_id.clone();
        tasks.push(tokio::spawn(async move {
            orchestrator
                .run(Some(session_id), text, &CancellationToken::new())
                .await
        }));
    }
    for task in tasks {
        assert!(task.await.unwrap().is_done());
    }

    let messages = orchestrator.store().snapshot(&session_id).await.unwrap();
    assert_eq!(messages.len(), 6);
    for pair in messages.chunks(2) {
        assert_eq!(pair[0].role, Role::User);
        assert_eq!(pair[1].content, format!("echo: {}", pair[0].content));
    }
}

#[tokio::test(start_paused = true)]
async fn test_transient_failures_are_retried() {
    let provider = Arc::new(ScriptedProvider::new(
        vec![
            Err(AgentError::BackendRateLimited("429".into())),
            Err(AgentError::BackendUnavailable("503".into())),
            Ok(answer("recovered")),
        ],
        Fallback::Echo,
    ));
    let store = Arc::new(FlakyStore {
        inner: MemorySessionStore::new(),
        failures: AtomicUsize::new(2),
    });
    let orchestrator = Orchestrator::builder()
        .provider(provider.clone())
        .session_store(store)
        .backend_retry(RetryPolicy::default())
        .store_retry(RetryPolicy::default())
        .build()
        .unwrap();

    let outcome = orchestrator.run(None, "hello", &CancellationToken::new()).await;

    assert!(outcome.is_done());
    assert_eq!(outcome.reply.as_deref(), Some("recovered"));
    assert_eq!(outcome.iterations, 1);
    assert_eq!(provider.calls(), 3);
    assert_eq!(orchestrator.store().snapshot(&outcome.session_id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_store_failure_beyond_retries_fails_the_run() {
    let provider = Arc::new(ScriptedProvider::new(Vec::new(), Fallback::Echo));
    let store = Arc::new(FlakyStore {
        inner: MemorySessionStore::new(),
        failures: AtomicUsize::new(usize::MAX),
    });
    let orchestrator = Orchestrator::builder()
        .provider(provider.clone())
        .session_store(store)
        .store_retry(RetryPolicy::none())
        .build()
        .unwrap();

    let outcome = orchestrator.run(None, "hello", &CancellationToken::new()).await;

    assert_eq!(outcome.error_kind(), Some(ErrorKind::StoreUnavailable));
    assert_eq!(provider.calls(), 0);
}

#[tokio::test]
async fn test_protocol_errors_are_not_retried() {
    let provider = Arc::new(ScriptedProvider::new(
        vec![Err(AgentError::BackendProtocol("unexpected body".into()))],
        Fallback::Echo,
    ));
    let orchestrator = Orchestrator::builder()
        .provider(provider.clone())
        .backend_retry(RetryPolicy::default())
        .build()
        .unwrap();

    let outcome = orchestrator.run(None, "hi", &CancellationToken::new()).await;
    assert_eq!(outcome.error_kind(), Some(ErrorKind::BackendProtocol));
    assert_eq!(provider.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_backend_timeout_is_unavailable() {
    let provider = Arc::new(ScriptedProvider::new(Vec::new(), Fallback::Echo).with_delay(Duration::from_secs(3600)));
    let orchestrator = Orchestrator::builder()
        .provider(provider)
        .backend_timeout(Duration::from_secs(5))
        .backend_retry(RetryPolicy::none())
        .build()
        .unwrap();

    let outcome = orchestrator.run(None, "hello?", &CancellationToken::new()).await;
    assert_eq!(outcome.error_kind(), Some(ErrorKind::BackendUnavailable));
}

#[tokio::test]
async fn test_cancelled_before_backend_keeps_user_message() {
    let provider = Arc::new(ScriptedProvider::new(Vec::new(), Fallback::Echo));
    let orchestrator = orchestrator(provider.clone(), 5);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let outcome = orchestrator.run(None, "never answered", &cancel).await;

    assert_eq!(outcome.error_kind(), Some(ErrorKind::Cancelled));
    assert_eq!(provider.calls(), 0);
    assert_eq!(outcome.iterations, 0);

    let messages = orchestrator.store().snapshot(&outcome.session_id).await.unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].content, "never answered");
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_while_backend_asks_for_tools() {
    let provider = Arc::new(
        ScriptedProvider::new(
            vec![Ok(tool_calls(vec![ToolCallRequest::new("call_1", "fast", json!({}))]))],
            Fallback::Echo,
        )
        .with_delay(Duration::from_millis(500)),
    );
    let orchestrator = Arc::new(orchestrator(provider.clone(), 5));
    let cancel = CancellationToken::new();

    let run = {
        let orchestrator = orchestrator.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { orchestrator.run(None, "what now?", &cancel).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    cancel.cancel();
    let outcome = run.await.unwrap();

    assert_eq!(outcome.state, LoopState::Failed);
    assert_eq!(outcome.error_kind(), Some(ErrorKind::Cancelled));
    assert_eq!(outcome.iterations, 1);

    // the tool calls that arrived after cancellation are never recorded
    let messages = orchestrator.store().snapshot(&outcome.session_id).await.unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].role, Role::User);
    assert!(messages.iter().all(|m| m.requested_call_id().is_none()));

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(provider.calls(), 1);
}
