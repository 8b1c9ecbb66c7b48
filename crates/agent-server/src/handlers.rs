//! HTTP Handlers

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use agent_core::{
    AgentError, CancellationToken, ErrorKind, LoopState, Message, RunOutcome, SessionId, SessionSummary,
    ToolCallRequest, ToolSchema,
};

use crate::state::AppState;

const DEFAULT_SESSION_LIST: usize = 20;
const MAX_SESSION_LIST: usize = 200;

// ============================================================================
// Request / Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    #[serde(default)]
    pub session_id: Option<String>,
    pub message: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatResponse {
    pub session_id: String,
    /// Final answer; empty unless `status` is `done`
    pub reply: String,
    pub status: LoopState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    pub iterations: usize,
}

impl ChatResponse {
    fn failed(session_id: &SessionId, err: &AgentError) -> Self {
        Self {
            session_id: session_id.to_string(),
            reply: String::new(),
            status: LoopState::Failed,
            error: Some(err.user_message()),
            error_kind: Some(err.kind()),
            iterations: 0,
        }
    }
}

impl From<RunOutcome> for ChatResponse {
    fn from(outcome: RunOutcome) -> Self {
        Self {
            session_id: outcome.session_id.to_string(),
            reply: outcome.reply.unwrap_or_default(),
            status: outcome.state,
            error_kind: outcome.error.as_ref().map(AgentError::kind),
            error: outcome.error.as_ref().map(AgentError::user_message),
            iterations: outcome.iterations,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: ErrorKind,
}

#[derive(Debug, Deserialize)]
pub struct InvokeToolRequest {
    #[serde(default = "empty_arguments")]
    pub arguments: Value,
}

fn empty_arguments() -> Value {
    Value::Object(Map::new())
}

#[derive(Debug, Serialize)]
pub struct ToolListResponse {
    pub tools: Vec<ToolSchema>,
}

#[derive(Debug, Deserialize)]
pub struct SessionListQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct SessionListResponse {
    pub sessions: Vec<SessionSummary>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptResponse {
    pub session_id: String,
    pub messages: Vec<Message>,
}

#[derive(Debug, Serialize)]
pub struct BackendHealth {
    pub name: String,
    pub connected: bool,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub backend: BackendHealth,
    pub store_connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database_connected: Option<bool>,
    pub tools: usize,
}

// ============================================================================
// Status mapping
// ============================================================================

/// HTTP status for a terminal run failure
pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::InvalidRequest => StatusCode::BAD_REQUEST,
        ErrorKind::BackendUnavailable | ErrorKind::BackendRateLimited | ErrorKind::StoreUnavailable => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        ErrorKind::BackendProtocol => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// HTTP status for a direct tool invocation
pub fn tool_status_for(kind: Option<ErrorKind>) -> StatusCode {
    match kind {
        None => StatusCode::OK,
        Some(ErrorKind::UnknownTool) => StatusCode::NOT_FOUND,
        Some(ErrorKind::ToolArgument) => StatusCode::UNPROCESSABLE_ENTITY,
        Some(ErrorKind::ToolTimeout) => StatusCode::GATEWAY_TIMEOUT,
        Some(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(err: &AgentError) -> Response {
    let kind = err.kind();
    if !err.is_client_error() {
        tracing::error!(kind = %kind, error = %err, "Request failed");
    }
    (
        status_for(kind),
        Json(ErrorResponse {
            error: err.user_message(),
            code: kind,
        }),
    )
        .into_response()
}

fn rejection_response(rejection: &JsonRejection) -> Response {
    error_response(&AgentError::InvalidRequest(rejection.body_text()))
}

// ============================================================================
// Handlers
// ============================================================================

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let provider = state.orchestrator.provider();
    let backend_connected = provider.health_check().await.unwrap_or(false);
    let store_connected = state
        .orchestrator
        .store()
        .backend()
        .health_check()
        .await
        .unwrap_or(false);
    let database_connected = match &state.documents {
        Some(source) => Some(source.health_check().await),
        None => None,
    };

    let healthy = backend_connected && store_connected && database_connected.unwrap_or(true);
    Json(HealthResponse {
        status: if healthy { "healthy" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        backend: BackendHealth {
            name: provider.name().to_string(),
            connected: backend_connected,
        },
        store_connected,
        database_connected,
        tools: state.orchestrator.invoker().registry().len(),
    })
}

/// Run one user turn through the orchestration loop
///
/// The loop runs on its own task; if the client goes away this handler is
/// dropped, the guard cancels the token and the loop stops at its next
/// checkpoint.
pub async fn chat_handler(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Response {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => return rejection_response(&rejection),
    };

    let session_id = request
        .session_id
        .filter(|id| !id.trim().is_empty())
        .map_or_else(SessionId::new, SessionId::from_string);

    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();
    let orchestrator = state.orchestrator.clone();
    let run_id = session_id.clone();
    let task = tokio::spawn(async move { orchestrator.run(Some(run_id), request.message, &cancel).await });

    let outcome = match task.await {
        Ok(outcome) => outcome,
        Err(err) => {
            tracing::error!(session_id = %session_id, error = %err, "Orchestration task aborted");
            let err = AgentError::Other(err.to_string());
            return (status_for(err.kind()), Json(ChatResponse::failed(&session_id, &err))).into_response();
        }
    };

    let status = outcome.error_kind().map_or(StatusCode::OK, status_for);
    (status, Json(ChatResponse::from(outcome))).into_response()
}

/// List the registered tool schemas
pub async fn list_tools(State(state): State<AppState>) -> Json<ToolListResponse> {
    Json(ToolListResponse {
        tools: state.orchestrator.invoker().registry().schemas(),
    })
}

/// Run a single tool through the invoker
pub async fn invoke_tool(
    State(state): State<AppState>,
    Path(name): Path<String>,
    payload: Result<Json<InvokeToolRequest>, JsonRejection>,
) -> Response {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => return rejection_response(&rejection),
    };

    let call = ToolCallRequest::with_generated_id(name, request.arguments);
    let result = state.orchestrator.invoker().invoke(&call).await;
    (tool_status_for(result.error_kind()), Json(result)).into_response()
}

/// Most recently updated sessions
pub async fn list_sessions(State(state): State<AppState>, Query(query): Query<SessionListQuery>) -> Response {
    let limit = query.limit.unwrap_or(DEFAULT_SESSION_LIST).min(MAX_SESSION_LIST);
    match state.orchestrator.store().list(limit).await {
        Ok(sessions) => Json(SessionListResponse { sessions }).into_response(),
        Err(err) => error_response(&err),
    }
}

/// Transcript of one session (empty if unknown)
pub async fn get_session(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let session_id = SessionId::from_string(id);
    match state.orchestrator.store().snapshot(&session_id).await {
        Ok(messages) => Json(TranscriptResponse {
            session_id: session_id.to_string(),
            messages,
        })
        .into_response(),
        Err(err) => error_response(&err),
    }
}

pub async fn delete_session(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.orchestrator.store().delete(&SessionId::from_string(id)).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => error_response(&err),
    }
}
