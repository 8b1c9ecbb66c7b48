//! Router

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::handlers::{
    chat_handler, delete_session, get_session, health_check, invoke_tool, list_sessions, list_tools,
};
use crate::state::AppState;

pub const ENDPOINTS: &[(&str, &str, &str)] = &[
    ("GET", "/health", "Backend and store health"),
    ("POST", "/api/chat", "Run one user turn"),
    ("GET", "/api/tools", "List tool schemas"),
    ("POST", "/api/tools/{name}", "Invoke a tool directly"),
    ("GET", "/api/sessions", "Recent sessions"),
    ("GET", "/api/sessions/{id}", "Session transcript"),
    ("DELETE", "/api/sessions/{id}", "Delete a session"),
];

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        // Agent API
        .route("/api/chat", post(chat_handler))
        // Tools
        .route("/api/tools", get(list_tools))
        .route("/api/tools/{name}", post(invoke_tool))
        // Sessions
        .route("/api/sessions", get(list_sessions))
        .route("/api/sessions/{id}", get(get_session).delete(delete_session))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
