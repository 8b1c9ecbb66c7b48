//! Remote Tools
//!
//! Proxies tools served by a peer agent server: discovery through
//! `GET {base}/api/tools`, invocation through `POST {base}/api/tools/{name}`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use agent_core::{
    AgentError, ErrorKind, Result as CoreResult, Tool, ToolCallRequest, ToolCallResult, ToolSchema,
};

use crate::error::{Result, SourceError};

#[derive(Debug, Deserialize)]
struct ToolListing {
    tools: Vec<ToolSchema>,
}

/// HTTP client for a peer tool server
#[derive(Clone)]
pub struct RemoteToolClient {
    client: reqwest::Client,
    base_url: String,
}

impl RemoteToolClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Fetch the peer's tool list and wrap each entry as a local tool
    pub async fn discover(&self) -> Result<Vec<RemoteTool>> {
        let response = self
            .client
            .get(format!("{}/api/tools", self.base_url))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(SourceError::Remote(format!(
                "tool discovery at {} returned HTTP {}",
                self.base_url,
                response.status()
            )));
        }

        let listing: ToolListing = response.json().await?;
        tracing::info!(base_url = %self.base_url, tools = listing.tools.len(), "Discovered remote tools");

        let shared = Arc::new(self.clone());
        Ok(listing
            .tools
            .into_iter()
            .map(|schema| RemoteTool {
                schema,
                client: shared.clone(),
            })
            .collect())
    }

    /// Run a tool on the peer and return its output
    pub async fn invoke(&self, name: &str, arguments: &Value) -> Result<ToolCallResult> {
        let response = self
            .client
            .post(format!("{}/api/tools/{}", self.base_url, name))
            .json(&json!({ "arguments": arguments }))
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        // failures still carry a ToolCallResult body
        serde_json::from_str::<ToolCallResult>(&body).map_err(|_| {
            SourceError::Remote(format!("'{name}' returned HTTP {status} without a tool result"))
        })
    }
}

/// A tool executed by a peer server
pub struct RemoteTool {
    schema: ToolSchema,
    client: Arc<RemoteToolClient>,
}

#[async_trait]
impl Tool for RemoteTool {
    fn schema(&self) -> ToolSchema {
        self.schema.clone()
    }

    async fn execute(&self, call: &ToolCallRequest) -> CoreResult<Value> {
        let result = self.client.invoke(&self.schema.name, &call.arguments).await?;
        if result.success {
            return Ok(result.output.unwrap_or(Value::Null));
        }

        let (kind, message) = result
            .error
            .map(|e| (Some(e.kind), e.message))
            .unwrap_or((None, "remote tool failed".into()));
        Err(match kind {
            Some(ErrorKind::ToolArgument) => AgentError::ToolArgument(message),
            _ => AgentError::ToolExecution(format!("remote: {message}")),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_core::tool::ParameterSchema;
    use axum::extract::Path;
    use axum::http::StatusCode;
    use axum::routing::{get, post};
    use axum::{Json, Router};

    fn echo_schema() -> ToolSchema {
        ToolSchema {
            name: "echo".into(),
            description: "Echo the text back".into(),
            parameters: vec![ParameterSchema::required("text", "string", "Text to echo")],
            category: None,
            has_side_effects: false,
            timeout_secs: None,
        }
    }

    async fn peer() -> String {
        let router = Router::new()
            .route("/api/tools", get(|| async { Json(json!({ "tools": [echo_schema()] })) }))
            .route(
                "/api/tools/{name}",
                post(|Path(name): Path<String>, Json(body): Json<Value>| async move {
                    let call = ToolCallRequest::new("remote", name, body["arguments"].clone());
                    match call.arg_str("text") {
                        Some(text) => {
                            let output = json!(text.to_uppercase());
                            (StatusCode::OK, Json(ToolCallResult::success(&call, output)))
                        }
                        None => {
                            let err = AgentError::ToolArgument("text is required".into());
                            (StatusCode::UNPROCESSABLE_ENTITY, Json(ToolCallResult::failure(&call, &err)))
                        }
                    }
                }),
            );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}/")
    }

    #[tokio::test]
    async fn test_discover_and_invoke() {
        let client = RemoteToolClient::new(peer().await, Duration::from_secs(5)).unwrap();
        let tools = client.discover().await.unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].schema().name, "echo");

        let out = tools[0]
            .execute(&ToolCallRequest::new("c1", "echo", json!({"text": "hi"})))
            .await
            .unwrap();
        assert_eq!(out, json!("HI"));

        let err = tools[0]
            .execute(&ToolCallRequest::new("c2", "echo", json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::ToolArgument(_)));
    }
}
