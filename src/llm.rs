//! LLM gateway client (OpenRouter chat completions).
//!
//! Callers pick a [`ModelTier`]; the tier decides the model, the request
//! timeout and the default `max_tokens`. When a tier model fails and the
//! caller did not pin a model, the request is sent once more to the
//! configured fallback model.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::LlmConfig;
use crate::error::GatewayError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelTier {
    /// Conversational answers.
    Chat,
    /// Multi-step analysis; longest timeout.
    Reasoning,
    /// Short rewrites and classification.
    Fast,
    /// Structured extraction over full reports.
    Extraction,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub tier: ModelTier,
    pub messages: Vec<ChatMessage>,
    /// Overrides the tier model and disables the fallback.
    pub model: Option<String>,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    /// Ask for `response_format: json_object`.
    pub json_mode: bool,
}

impl CompletionRequest {
    pub fn new(tier: ModelTier, messages: Vec<ChatMessage>) -> Self {
        Self {
            tier,
            messages,
            model: None,
            temperature: 0.3,
            max_tokens: None,
            json_mode: false,
        }
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.temperature = t;
        self
    }

    pub fn json(mut self) -> Self {
        self.json_mode = true;
        self
    }

    pub fn model(mut self, model: Option<String>) -> Self {
        self.model = model;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub content: String,
    pub model: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

#[async_trait]
pub trait LlmGateway: Send + Sync {
    async fn complete(&self, req: CompletionRequest) -> Result<Completion, GatewayError>;
}

pub struct OpenRouterClient {
    config: LlmConfig,
    api_key: String,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct ApiRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    choices: Vec<ApiChoice>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiMessage,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

impl OpenRouterClient {
    pub fn new(config: LlmConfig, api_key: String) -> Result<Self, GatewayError> {
        // Per-request timeouts are set by tier; this is only the connect bound.
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| GatewayError::Connection(e.to_string()))?;
        Ok(Self {
            config,
            api_key,
            client,
        })
    }

    /// Builds a client with the key from `OPENROUTER_API_KEY`.
    pub fn from_env(config: &LlmConfig) -> Result<Self, GatewayError> {
        let key = std::env::var("OPENROUTER_API_KEY")
            .map_err(|_| GatewayError::NotConfigured("OPENROUTER_API_KEY not set".to_string()))?;
        Self::new(config.clone(), key)
    }

    pub fn model_for(&self, tier: ModelTier) -> &str {
        let m = &self.config.models;
        match tier {
            ModelTier::Chat => &m.chat,
            ModelTier::Reasoning => &m.reasoning,
            ModelTier::Fast => &m.fast,
            ModelTier::Extraction => &m.extraction,
        }
    }

    fn timeout_for(&self, tier: ModelTier) -> u64 {
        let t = &self.config.timeouts;
        match tier {
            ModelTier::Chat => t.chat,
            ModelTier::Reasoning => t.reasoning,
            ModelTier::Fast => t.fast,
            ModelTier::Extraction => t.extraction,
        }
    }

    fn max_tokens_for(&self, tier: ModelTier) -> u32 {
        let t = &self.config.max_tokens;
        match tier {
            ModelTier::Chat => t.chat,
            ModelTier::Reasoning => t.reasoning,
            ModelTier::Fast => t.fast,
            ModelTier::Extraction => t.extraction,
        }
    }

    async fn call(&self, model: &str, req: &CompletionRequest) -> Result<Completion, GatewayError> {
        let timeout = self.timeout_for(req.tier);
        let body = ApiRequest {
            model,
            messages: &req.messages,
            max_tokens: req.max_tokens.unwrap_or_else(|| self.max_tokens_for(req.tier)),
            temperature: req.temperature,
            response_format: req.json_mode.then_some(ResponseFormat {
                kind: "json_object",
            }),
        };

        let url = format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'));
        let resp = self
            .client
            .post(&url)
            .timeout(Duration::from_secs(timeout))
            .bearer_auth(&self.api_key)
            .header("HTTP-Referer", &self.config.app_url)
            .header("X-Title", &self.config.app_name)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GatewayError::Timeout(timeout)
                } else {
                    GatewayError::Connection(e.to_string())
                }
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(GatewayError::Api {
                status: status.as_u16(),
                body: body.chars().take(500).collect(),
            });
        }

        let parsed: ApiResponse = resp
            .json()
            .await
            .map_err(|e| GatewayError::Parse(e.to_string()))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| GatewayError::Parse("response has no choices".to_string()))?;
        let usage = parsed.usage.unwrap_or(ApiUsage {
            prompt_tokens: 0,
            completion_tokens: 0,
        });

        Ok(Completion {
            content,
            model: parsed.model.unwrap_or_else(|| model.to_string()),
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
        })
    }
}

#[async_trait]
impl LlmGateway for OpenRouterClient {
    async fn complete(&self, req: CompletionRequest) -> Result<Completion, GatewayError> {
        let pinned = req.model.is_some();
        let model = req
            .model
            .clone()
            .unwrap_or_else(|| self.model_for(req.tier).to_string());

        tracing::debug!("gateway call: model={} tier={:?}", model, req.tier);
        match self.call(&model, &req).await {
            Ok(c) => Ok(c),
            Err(e @ GatewayError::Parse(_)) => Err(e),
            Err(e) => {
                let fallback = self.config.models.fallback.as_str();
                if pinned || fallback == model {
                    return Err(e);
                }
                tracing::warn!("model {} failed ({}), retrying on {}", model, e, fallback);
                self.call(fallback, &req).await
            }
        }
    }
}

/// Removes a surrounding markdown code fence (and a leading `json` tag)
/// from a model reply.
pub fn strip_code_fences(raw: &str) -> &str {
    let mut s = raw.trim();
    if let Some(rest) = s.strip_prefix("```") {
        s = rest.strip_prefix("json").unwrap_or(rest);
        s = s.strip_suffix("```").unwrap_or(s);
    }
    s.trim()
}
