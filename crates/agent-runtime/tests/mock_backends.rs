//! Adapters against in-process mock servers speaking each backend's wire format.

use agent_core::{BackendResponse, CompletionRequest, ErrorKind, GenerationOptions, LlmProvider, Message};
use agent_runtime::{OllamaConfig, OllamaProvider, OpenAiConfig, OpenAiProvider};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};

async fn serve(router: Router) -> std::net::SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

fn openai(addr: std::net::SocketAddr) -> OpenAiProvider {
    OpenAiProvider::from_config(OpenAiConfig {
        base_url: format!("http://{addr}/v1"),
        api_key: "sk-test".into(),
        timeout_secs: 5,
    })
    .unwrap()
}

fn ollama(addr: std::net::SocketAddr) -> OllamaProvider {
    OllamaProvider::from_config(OllamaConfig {
        host: "http://127.0.0.1".into(),
        port: addr.port(),
        timeout_secs: 5,
    })
    .unwrap()
}

async fn complete(provider: &dyn LlmProvider) -> agent_core::Result<BackendResponse> {
    let messages = vec![Message::user("what time is it?")];
    let options = GenerationOptions::default();
    provider
        .complete(&CompletionRequest {
            system_prompt: "be brief",
            messages: &messages,
            tools: &[],
            options: &options,
        })
        .await
}

#[tokio::test]
async fn test_openai_answer_round_trip() {
    let router = Router::new().route(
        "/v1/chat/completions",
        post(|Json(body): Json<Value>| async move {
            assert_eq!(body["messages"][0]["role"], "system");
            assert_eq!(body["messages"][1]["content"], "what time is it?");
            Json(json!({
                "model": "gpt-4o-mini",
                "choices": [{"message": {"role": "assistant", "content": "It is noon."}, "finish_reason": "stop"}]
            }))
        }),
    );
    let provider = openai(serve(router).await);

    match complete(&provider).await.unwrap() {
        BackendResponse::Answer(c) => assert_eq!(c.content, "It is noon."),
        BackendResponse::ToolCalls { .. } => panic!("expected answer"),
    }
}

#[tokio::test]
async fn test_openai_status_codes_are_classified() {
    let router = Router::new()
        .route("/limited/chat/completions", post(|| async { StatusCode::TOO_MANY_REQUESTS }))
        .route("/down/chat/completions", post(|| async { StatusCode::BAD_GATEWAY }))
        .route("/bad/chat/completions", post(|| async { (StatusCode::BAD_REQUEST, "no such model") }))
        .route("/garbage/chat/completions", post(|| async { "not json" }));
    let addr = serve(router).await;

    for (path, expected) in [
        ("limited", ErrorKind::BackendRateLimited),
        ("down", ErrorKind::BackendUnavailable),
        ("bad", ErrorKind::BackendProtocol),
        ("garbage", ErrorKind::BackendProtocol),
    ] {
        let provider = OpenAiProvider::from_config(OpenAiConfig {
            base_url: format!("http://{addr}/{path}"),
            api_key: "sk-test".into(),
            timeout_secs: 5,
        })
        .unwrap();
        let err = complete(&provider).await.unwrap_err();
        assert_eq!(err.kind(), expected, "path {path}");
    }
}

#[tokio::test]
async fn test_unreachable_backend_is_unavailable() {
    // bind then drop to get a port nothing listens on
    let addr = {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };

    let err = complete(&openai(addr)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BackendUnavailable);

    let err = complete(&ollama(addr)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BackendUnavailable);
    assert!(!ollama(addr).health_check().await.unwrap());
}

#[tokio::test]
async fn test_ollama_streamed_tool_call() {
    let router = Router::new()
        .route(
            "/api/chat",
            post(|Json(body): Json<Value>| async move {
                assert_eq!(body["stream"], true);
                [
                    r#"{"model":"llama3.2","message":{"role":"assistant","content":"","tool_calls":[{"function":{"name":"datetime","arguments":{}}}]},"done":false}"#,
                    r#"{"model":"llama3.2","message":{"role":"assistant","content":""},"done":true,"done_reason":"stop"}"#,
                ]
                .join("\n")
            }),
        )
        .route("/api/tags", get(|| async { Json(json!({"models": []})) }));
    let addr = serve(router).await;
    let provider = ollama(addr);

    assert!(provider.health_check().await.unwrap());
    match complete(&provider).await.unwrap() {
        BackendResponse::ToolCalls { calls, model, .. } => {
            assert_eq!(calls.len(), 1);
            assert_eq!(calls[0].name, "datetime");
            assert!(calls[0].id.starts_with("call_"));
            assert_eq!(model, "llama3.2");
        }
        BackendResponse::Answer(_) => panic!("expected tool calls"),
    }
}

#[tokio::test]
async fn test_ollama_text_tool_call_fallback() {
    let router = Router::new().route(
        "/api/chat",
        post(|| async {
            let content = serde_json::to_string(r#"{"name": "datetime", "parameters": {}}"#).unwrap();
            format!(r#"{{"message":{{"role":"assistant","content":{content}}},"done":true}}"#)
        }),
    );
    let provider = ollama(serve(router).await);

    match complete(&provider).await.unwrap() {
        BackendResponse::ToolCalls { calls, .. } => assert_eq!(calls[0].name, "datetime"),
        BackendResponse::Answer(c) => panic!("expected fallback tool call, got {:?}", c.content),
    }
}
