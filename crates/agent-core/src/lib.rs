//! # agent-core
//!
//! Core orchestration logic with provider-agnostic LLM abstraction and a
//! validated, timeout-bounded tool system.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                         Orchestrator                             │
//! │  ┌──────────────┐  ┌──────────────┐  ┌────────────────────────┐  │
//! │  │ Orchestration│  │ ToolInvoker  │  │  LlmProvider           │  │
//! │  │    Loop      │──│  + Registry  │  │  (Strategy)            │  │
//! │  └──────────────┘  └──────────────┘  └────────────────────────┘  │
//! │          │                                                       │
//! │  ┌──────────────────────────────────┐                            │
//! │  │ ConversationStore (per-session   │── SessionStore (memory,    │
//! │  │ locks, integrity checks)         │   MongoDB, ...)            │
//! │  └──────────────────────────────────┘                            │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The `LlmProvider` trait enables swapping between a hosted OpenAI-compatible
//! API and a local Ollama runtime without changing orchestration logic.

pub mod error;
pub mod invoker;
pub mod message;
pub mod orchestrator;
pub mod provider;
pub mod retry;
pub mod session;
pub mod store;
pub mod tool;

pub use error::{AgentError, ErrorKind, Result};
pub use invoker::ToolInvoker;
pub use message::{Message, Role};
pub use orchestrator::{LoopState, Orchestrator, OrchestratorBuilder, OrchestratorConfig, RunOutcome};
pub use provider::{BackendResponse, CompletionRequest, GenerationOptions, LlmProvider};
pub use retry::RetryPolicy;
pub use session::{Session, SessionId, SessionSummary};
pub use store::{ConversationStore, MemorySessionStore, SessionHandle, SessionStore};
pub use tool::{Tool, ToolCallRequest, ToolCallResult, ToolDescriptor, ToolRegistry, ToolSchema};

/// Re-exported so callers can build cancellation tokens without a direct dependency
pub use tokio_util::sync::CancellationToken;
