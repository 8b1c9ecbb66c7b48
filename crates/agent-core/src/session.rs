//! Session Management
//!
//! A session is the ordered, append-only transcript of one conversation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

use crate::error::{AgentError, Result};
use crate::message::{Message, Role};

/// Unique session identifier
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A complete agent session
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Session {
    /// Unique identifier
    pub id: SessionId,

    /// Conversation history, append-only
    messages: Vec<Message>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last activity timestamp
    pub updated_at: DateTime<Utc>,
}

impl Session {
    /// Create an empty session
    pub fn new(id: SessionId) -> Self {
        let now = Utc::now();
        Self {
            id,
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Rebuild a session from persisted parts, re-checking every append
    pub fn from_parts(
        id: SessionId,
        messages: Vec<Message>,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Result<Self> {
        let mut session = Self::new(id);
        for message in messages {
            session.push(message)?;
        }
        session.created_at = created_at;
        session.updated_at = updated_at;
        Ok(session)
    }

    /// Messages in append order
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Append a message, enforcing tool-call referential integrity
    pub fn push(&mut self, message: Message) -> Result<()> {
        self.check_append(&message)?;
        self.messages.push(message);
        self.touch();
        Ok(())
    }

    /// Validate an append without performing it
    pub fn check_append(&self, message: &Message) -> Result<()> {
        match message.role {
            Role::Assistant => {
                if let Some(id) = message.requested_call_id() {
                    if self.has_call(id) {
                        return Err(AgentError::SessionIntegrity(format!(
                            "tool call id '{}' already used in session {}",
                            id, self.id
                        )));
                    }
                }
            }
            Role::Tool => {
                let Some(id) = message.answered_call_id() else {
                    return Err(AgentError::SessionIntegrity(
                        "tool message without a tool result reference".into(),
                    ));
                };
                if !self.has_call(id) {
                    return Err(AgentError::SessionIntegrity(format!(
                        "tool result references unknown call id '{}'",
                        id
                    )));
                }
                if self.messages.iter().any(|m| m.answered_call_id() == Some(id)) {
                    return Err(AgentError::SessionIntegrity(format!(
                        "tool call '{}' already has a result",
                        id
                    )));
                }
            }
            Role::User => {}
        }
        Ok(())
    }

    /// Whether a tool call with this ID has been requested in the session
    pub fn has_call(&self, call_id: &str) -> bool {
        self.messages.iter().any(|m| m.requested_call_id() == Some(call_id))
    }

    /// All tool-call IDs requested so far
    pub fn call_ids(&self) -> HashSet<&str> {
        self.messages.iter().filter_map(Message::requested_call_id).collect()
    }

    /// Update the activity timestamp
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Message count
    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Title derived from the first user message
    pub fn title(&self) -> String {
        self.messages
            .iter()
            .find(|m| m.role == Role::User)
            .map(|m| {
                let preview: String = m.content.chars().take(50).collect();
                if m.content.chars().count() > 50 {
                    format!("{}...", preview)
                } else {
                    preview
                }
            })
            .unwrap_or_else(|| format!("Session {}", self.id.as_str().chars().take(8).collect::<String>()))
    }

    /// Lightweight listing entry
    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            id: self.id.clone(),
            title: self.title(),
            message_count: self.message_count(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Listing entry for a stored session
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: SessionId,
    pub title: String,
    pub message_count: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
