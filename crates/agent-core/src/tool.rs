//! Tool System
//!
//! Schema-described tools the model may request. Tools are registered once at
//! startup into a [`ToolRegistry`] which is read-only afterwards and shared as
//! `Arc<ToolRegistry>`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{AgentError, ErrorKind, Result};

/// Tool call request produced by a model backend
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    /// Unique call identifier
    pub id: String,

    /// Tool identifier
    pub name: String,

    /// Arguments as a JSON object
    #[serde(default = "empty_object")]
    pub arguments: Value,
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

impl ToolCallRequest {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }

    /// Create a request with a freshly minted call ID
    pub fn with_generated_id(name: impl Into<String>, arguments: Value) -> Self {
        Self::new(new_call_id(), name, arguments)
    }

    pub fn arg(&self, key: &str) -> Option<&Value> {
        self.arguments.get(key)
    }

    pub fn arg_str(&self, key: &str) -> Option<&str> {
        self.arg(key).and_then(Value::as_str)
    }

    pub fn arg_u64(&self, key: &str) -> Option<u64> {
        self.arg(key).and_then(Value::as_u64)
    }
}

/// Mint a call ID in the `call_<hex>` shape used by hosted backends
pub fn new_call_id() -> String {
    format!("call_{}", uuid::Uuid::new_v4().simple())
}

/// Failure detail attached to an unsuccessful tool call
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolFailure {
    pub kind: ErrorKind,
    pub message: String,
}

/// Result from tool execution
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCallResult {
    /// Matches the originating `ToolCallRequest::id`
    pub call_id: String,

    /// Tool that was called
    pub name: String,

    /// Whether execution succeeded
    pub success: bool,

    /// Structured output on success
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,

    /// Error description on failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ToolFailure>,
}

impl ToolCallResult {
    pub fn success(call: &ToolCallRequest, output: Value) -> Self {
        Self {
            call_id: call.id.clone(),
            name: call.name.clone(),
            success: true,
            output: Some(output),
            error: None,
        }
    }

    pub fn failure(call: &ToolCallRequest, err: &AgentError) -> Self {
        Self {
            call_id: call.id.clone(),
            name: call.name.clone(),
            success: false,
            output: None,
            error: Some(ToolFailure {
                kind: err.kind(),
                message: err.to_string(),
            }),
        }
    }

    /// Error kind, if the call failed
    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }

    /// Render the result as the content of a tool message for the model
    pub fn to_model_content(&self) -> String {
        if self.success {
            match &self.output {
                Some(Value::String(s)) => s.clone(),
                Some(v) => v.to_string(),
                None => "null".into(),
            }
        } else {
            let (kind, message) = self
                .error
                .as_ref()
                .map(|e| (e.kind.as_str(), e.message.as_str()))
                .unwrap_or(("ToolExecutionError", "unknown failure"));
            json!({ "error": { "kind": kind, "message": message } }).to_string()
        }
    }
}

/// Parameter definition for tool schema
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ParameterSchema {
    /// Parameter name
    pub name: String,

    /// JSON Schema type (string, number, integer, boolean, object, array)
    #[serde(rename = "type")]
    pub param_type: String,

    /// Human-readable description
    pub description: String,

    /// Whether this parameter is required
    #[serde(default)]
    pub required: bool,

    /// Default value if not provided
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,

    /// Enum of allowed values
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<Value>>,
}

impl ParameterSchema {
    pub fn required(name: impl Into<String>, param_type: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            param_type: param_type.into(),
            description: description.into(),
            required: true,
            default: None,
            enum_values: None,
        }
    }

    pub fn optional(name: impl Into<String>, param_type: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            required: false,
            ..Self::required(name, param_type, description)
        }
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    pub fn with_enum(mut self, values: Vec<Value>) -> Self {
        self.enum_values = Some(values);
        self
    }

    fn accepts_type(&self, value: &Value) -> bool {
        match self.param_type.as_str() {
            "string" => value.is_string(),
            "number" => value.is_number(),
            "integer" => value.is_i64() || value.is_u64(),
            "boolean" => value.is_boolean(),
            "object" => value.is_object(),
            "array" => value.is_array(),
            _ => true,
        }
    }
}

/// Tool definition schema (for LLM function calling)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolSchema {
    /// Unique tool identifier
    pub name: String,

    /// Human-readable description (shown to LLM)
    pub description: String,

    /// Parameter definitions
    pub parameters: Vec<ParameterSchema>,

    /// Category for grouping
    #[serde(default)]
    pub category: Option<String>,

    /// Whether tool has side effects
    #[serde(default)]
    pub has_side_effects: bool,

    /// Tool-specific timeout overriding the invoker default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl ToolSchema {
    /// Validate a model-supplied argument payload against this schema
    pub fn validate(&self, arguments: &Value) -> Result<()> {
        let Some(args) = arguments.as_object() else {
            return Err(AgentError::ToolArgument(format!(
                "arguments for '{}' must be a JSON object",
                self.name
            )));
        };

        for param in &self.parameters {
            match args.get(&param.name) {
                None | Some(Value::Null) if param.required => {
                    return Err(AgentError::ToolArgument(format!(
                        "Missing required parameter: {}",
                        param.name
                    )));
                }
                None | Some(Value::Null) => {}
                Some(value) => {
                    if !param.accepts_type(value) {
                        return Err(AgentError::ToolArgument(format!(
                            "Parameter '{}' must be of type {}",
                            param.name, param.param_type
                        )));
                    }
                    if let Some(allowed) = &param.enum_values {
                        if !allowed.contains(value) {
                            return Err(AgentError::ToolArgument(format!(
                                "Parameter '{}' must be one of {}",
                                param.name,
                                Value::Array(allowed.clone())
                            )));
                        }
                    }
                }
            }
        }

        if let Some(unknown) = args
            .keys()
            .find(|key| !self.parameters.iter().any(|p| &p.name == *key))
        {
            return Err(AgentError::ToolArgument(format!(
                "Unknown parameter '{}' for tool '{}'",
                unknown, self.name
            )));
        }

        Ok(())
    }

    /// JSON Schema object describing the parameters
    pub fn to_json_schema(&self) -> Value {
        let mut properties = Map::new();
        for param in &self.parameters {
            let mut prop = Map::new();
            prop.insert("type".into(), json!(param.param_type));
            prop.insert("description".into(), json!(param.description));
            if let Some(values) = &param.enum_values {
                prop.insert("enum".into(), Value::Array(values.clone()));
            }
            if let Some(default) = &param.default {
                prop.insert("default".into(), default.clone());
            }
            properties.insert(param.name.clone(), Value::Object(prop));
        }

        let required: Vec<&str> = self
            .parameters
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name.as_str())
            .collect();

        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }
}

/// Tool trait - implement to add new capabilities
#[async_trait]
pub trait Tool: Send + Sync {
    /// Get the tool's schema for LLM function calling
    fn schema(&self) -> ToolSchema;

    /// Execute the tool with already-validated arguments
    async fn execute(&self, call: &ToolCallRequest) -> Result<Value>;
}

/// A registered tool: its schema captured at registration plus the handler
#[derive(Clone)]
pub struct ToolDescriptor {
    schema: ToolSchema,
    handler: Arc<dyn Tool>,
}

impl ToolDescriptor {
    pub fn new(handler: Arc<dyn Tool>) -> Self {
        Self {
            schema: handler.schema(),
            handler,
        }
    }

    pub fn name(&self) -> &str {
        &self.schema.name
    }

    pub fn schema(&self) -> &ToolSchema {
        &self.schema
    }

    pub fn handler(&self) -> Arc<dyn Tool> {
        self.handler.clone()
    }
}

impl std::fmt::Debug for ToolDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolDescriptor")
            .field("name", &self.schema.name)
            .finish_non_exhaustive()
    }
}

/// Registry for available tools
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, ToolDescriptor>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new tool
    pub fn register<T: Tool + 'static>(&mut self, tool: T) -> Result<()> {
        self.register_descriptor(ToolDescriptor::new(Arc::new(tool)))
    }

    /// Register a shared tool
    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) -> Result<()> {
        self.register_descriptor(ToolDescriptor::new(tool))
    }

    /// Register a descriptor, rejecting name collisions
    pub fn register_descriptor(&mut self, descriptor: ToolDescriptor) -> Result<()> {
        let name = descriptor.name().to_string();
        if self.tools.contains_key(&name) {
            return Err(AgentError::DuplicateTool(name));
        }
        tracing::debug!(tool = %name, "Registered tool");
        self.tools.insert(name, descriptor);
        Ok(())
    }

    /// Look up a tool by name
    pub fn lookup(&self, name: &str) -> Result<&ToolDescriptor> {
        self.tools
            .get(name)
            .ok_or_else(|| AgentError::UnknownTool(name.to_string()))
    }

    /// All tool schemas, sorted by name
    pub fn schemas(&self) -> Vec<ToolSchema> {
        let mut schemas: Vec<ToolSchema> = self.tools.values().map(|d| d.schema.clone()).collect();
        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        schemas
    }

    /// Tool names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Number of registered tools
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Generate system prompt section describing available tools
    pub fn generate_prompt_section(&self) -> String {
        let mut prompt = String::from("## Available Tools\n\n");
        prompt.push_str("Prefer native function calling. If it is unavailable, respond with a JSON block:\n\n");
        prompt.push_str("```tool\n{\"tool\": \"tool_name\", \"arguments\": {\"arg\": \"value\"}}\n```\n\n");

        for schema in self.schemas() {
            prompt.push_str(&format!("### {}\n", schema.name));
            prompt.push_str(&format!("{}\n", schema.description));

            if !schema.parameters.is_empty() {
                prompt.push_str("**Parameters:**\n");
                for param in &schema.parameters {
                    let required = if param.required { " (required)" } else { "" };
                    prompt.push_str(&format!(
                        "- `{}` ({}){}: {}\n",
                        param.name, param.param_type, required, param.description
                    ));
                }
            }
            prompt.push('\n');
        }

        prompt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn schema(&self) -> ToolSchema {
            ToolSchema {
                name: "echo".into(),
                description: "Echo the input".into(),
                parameters: vec![
                    ParameterSchema::required("text", "string", "Text to echo"),
                    ParameterSchema::optional("times", "integer", "Repeat count"),
                    ParameterSchema::optional("mode", "string", "Output mode")
                        .with_enum(vec![json!("plain"), json!("loud")]),
                ],
                category: None,
                has_side_effects: false,
                timeout_secs: None,
            }
        }

        async fn execute(&self, call: &ToolCallRequest) -> Result<Value> {
            Ok(json!(call.arg_str("text").unwrap_or_default()))
        }
    }

    #[test]
    fn test_register_rejects_duplicates() {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool).unwrap();

        let err = registry.register(EchoTool).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DuplicateTool);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_lookup_unknown() {
        let registry = ToolRegistry::new();
        let err = registry.lookup("missing").unwrap_err();
        assert!(matches!(err, AgentError::UnknownTool(name) if name == "missing"));
    }

    #[test]
    fn test_schema_validation() {
        let schema = EchoTool.schema();

        assert!(schema.validate(&json!({"text": "hi"})).is_ok());
        assert!(schema.validate(&json!({"text": "hi", "times": 2, "mode": "loud"})).is_ok());

        let missing = schema.validate(&json!({})).unwrap_err();
        assert_eq!(missing.kind(), ErrorKind::ToolArgument);

        assert!(schema.validate(&json!({"text": 5})).is_err());
        assert!(schema.validate(&json!({"text": "hi", "times": 1.5})).is_err());
        assert!(schema.validate(&json!({"text": "hi", "mode": "quiet"})).is_err());
        assert!(schema.validate(&json!({"text": "hi", "extra": true})).is_err());
        assert!(schema.validate(&json!(["hi"])).is_err());
    }

    #[test]
    fn test_json_schema_export() {
        let exported = EchoTool.schema().to_json_schema();
        assert_eq!(exported["type"], "object");
        assert_eq!(exported["required"], json!(["text"]));
        assert_eq!(exported["properties"]["mode"]["enum"], json!(["plain", "loud"]));
    }

    #[test]
    fn test_failure_renders_error_kind() {
        let call = ToolCallRequest::new("call_1", "nope", json!({}));
        let result = ToolCallResult::failure(&call, &AgentError::UnknownTool("nope".into()));

        assert!(!result.success);
        assert_eq!(result.error_kind(), Some(ErrorKind::UnknownTool));
        let content: Value = serde_json::from_str(&result.to_model_content()).unwrap();
        assert_eq!(content["error"]["kind"], "UnknownToolError");
    }
}
