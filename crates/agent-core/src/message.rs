//! Conversation Messages
//!
//! Standard message format used across the agent system.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::provider::TokenUsage;
use crate::tool::{ToolCallRequest, ToolCallResult};

/// Role of a message sender
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// User input
    User,
    /// Assistant (LLM) response or tool request
    Assistant,
    /// Tool result (injected as context)
    Tool,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
            Role::Tool => write!(f, "tool"),
        }
    }
}

/// A single message in a conversation
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Message role
    pub role: Role,

    /// Text content
    #[serde(default)]
    pub content: String,

    /// Tool request carried by an assistant message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call: Option<ToolCallRequest>,

    /// Tool outcome carried by a tool message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_result: Option<ToolCallResult>,

    /// Timestamp
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,

    /// Optional metadata
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<MessageMetadata>,
}

/// Additional message metadata
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageMetadata {
    /// Model that generated this (for assistant messages)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Token usage reported by the backend
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
}

impl Message {
    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_call: None,
            tool_result: None,
            timestamp: Utc::now(),
            metadata: None,
        }
    }

    /// Create a user message
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// Create an assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Create an assistant message requesting a tool
    pub fn tool_request(content: impl Into<String>, call: ToolCallRequest) -> Self {
        let mut msg = Self::new(Role::Assistant, content);
        msg.tool_call = Some(call);
        msg
    }

    /// Create a tool result message
    pub fn tool_result(result: ToolCallResult) -> Self {
        let mut msg = Self::new(Role::Tool, result.to_model_content());
        msg.tool_result = Some(result);
        msg
    }

    /// Attach generation metadata
    pub fn with_metadata(mut self, model: impl Into<String>, usage: Option<TokenUsage>) -> Self {
        self.metadata = Some(MessageMetadata {
            model: Some(model.into()),
            usage,
        });
        self
    }

    /// Call ID requested by this message, if any
    pub fn requested_call_id(&self) -> Option<&str> {
        self.tool_call.as_ref().map(|c| c.id.as_str())
    }

    /// Call ID answered by this message, if any
    pub fn answered_call_id(&self) -> Option<&str> {
        self.tool_result.as_ref().map(|r| r.call_id.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_creation() {
        let msg = Message::user("Hello");
        assert_eq!(msg.role, Role::User);
        assert_eq!(msg.content, "Hello");
        assert!(msg.requested_call_id().is_none());
    }

    #[test]
    fn test_tool_messages_carry_references() {
        let call = ToolCallRequest::new("call_7", "datetime", json!({}));
        let request = Message::tool_request("", call.clone());
        assert_eq!(request.role, Role::Assistant);
        assert_eq!(request.requested_call_id(), Some("call_7"));

        let result = Message::tool_result(ToolCallResult::success(&call, json!("noon")));
        assert_eq!(result.role, Role::Tool);
        assert_eq!(result.answered_call_id(), Some("call_7"));
        assert_eq!(result.content, "noon");
    }

    #[test]
    fn test_serde_shape() {
        let value = serde_json::to_value(Message::assistant("hi")).unwrap();
        assert_eq!(value["role"], "assistant");
        assert!(value.get("tool_call").is_none());

        let back: Message = serde_json::from_value(value).unwrap();
        assert_eq!(back.content, "hi");
    }
}
