//! OpenRouter client against a local stub of the chat completions API.

use std::sync::{Arc, Mutex};

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{json, Value};

use intel_hub::config::LlmConfig;
use intel_hub::error::GatewayError;
use intel_hub::llm::{ChatMessage, CompletionRequest, LlmGateway, ModelTier, OpenRouterClient};

#[derive(Clone, Default)]
struct Recorded {
    bodies: Arc<Mutex<Vec<Value>>>,
    auth: Arc<Mutex<Vec<String>>>,
}

/// `broken/model` answers 500, `garbled/model` answers 200 with no
/// choices, anything else succeeds and echoes the model name.
async fn completions(
    State(rec): State<Recorded>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    rec.bodies.lock().unwrap().push(body.clone());
    if let Some(auth) = headers.get("authorization").and_then(|v| v.to_str().ok()) {
        rec.auth.lock().unwrap().push(auth.to_string());
    }
    let model = body["model"].as_str().unwrap_or_default().to_string();
    match model.as_str() {
        "broken/model" => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": {"message": "overloaded"}})),
        ),
        "garbled/model" => (StatusCode::OK, Json(json!({"choices": []}))),
        _ => (
            StatusCode::OK,
            Json(json!({
                "model": model,
                "choices": [{"message": {"role": "assistant", "content": format!("hello from {}", model)}}],
                "usage": {"prompt_tokens": 12, "completion_tokens": 3}
            })),
        ),
    }
}

async fn stub() -> (String, Recorded) {
    let rec = Recorded::default();
    let app = Router::new()
        .route("/chat/completions", post(completions))
        .with_state(rec.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}", addr), rec)
}

fn client(base_url: &str, chat_model: &str) -> OpenRouterClient {
    let mut config = LlmConfig {
        base_url: base_url.to_string(),
        ..Default::default()
    };
    config.models.chat = chat_model.to_string();
    config.models.fallback = "backup/model".to_string();
    OpenRouterClient::new(config, "sk-test".to_string()).unwrap()
}

fn request() -> CompletionRequest {
    CompletionRequest::new(
        ModelTier::Chat,
        vec![ChatMessage::system("be brief"), ChatMessage::user("hi")],
    )
    .temperature(0.3)
}

#[tokio::test]
async fn completion_uses_tier_model() {
    let (base, rec) = stub().await;
    let gateway = client(&base, "primary/model");

    let c = gateway.complete(request()).await.unwrap();
    assert_eq!(c.content, "hello from primary/model");
    assert_eq!(c.model, "primary/model");
    assert_eq!(c.prompt_tokens, 12);
    assert_eq!(c.completion_tokens, 3);

    let bodies = rec.bodies.lock().unwrap();
    assert_eq!(bodies.len(), 1);
    assert_eq!(bodies[0]["messages"].as_array().unwrap().len(), 2);
    assert!(bodies[0].get("response_format").is_none());
    assert_eq!(rec.auth.lock().unwrap()[0], "Bearer sk-test");
}

#[tokio::test]
async fn failed_model_falls_back_once() {
    let (base, rec) = stub().await;
    let gateway = client(&base, "broken/model");

    let c = gateway.complete(request()).await.unwrap();
    assert_eq!(c.model, "backup/model");

    let models: Vec<String> = rec
        .bodies
        .lock()
        .unwrap()
        .iter()
        .map(|b| b["model"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(models, vec!["broken/model", "backup/model"]);
}

#[tokio::test]
async fn pinned_model_does_not_fall_back() {
    let (base, rec) = stub().await;
    let gateway = client(&base, "primary/model");

    let err = gateway
        .complete(request().model(Some("broken/model".to_string())))
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::Api { status: 500, .. }));
    assert_eq!(rec.bodies.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn malformed_response_is_a_parse_error() {
    let (base, rec) = stub().await;
    let gateway = client(&base, "garbled/model");

    let err = gateway.complete(request().json()).await.unwrap_err();
    assert!(matches!(err, GatewayError::Parse(_)));
    assert_eq!(rec.bodies.lock().unwrap().len(), 1);
    assert_eq!(rec.bodies.lock().unwrap()[0]["response_format"]["type"], "json_object");
}
