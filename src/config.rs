//! TOML configuration.
//!
//! Everything except `[db]` has defaults, so a minimal file is:
//!
//! ```toml
//! [db]
//! path = "./data/hub.sqlite"
//! ```
//!
//! API keys are never read from the file. They come from the environment
//! (`OPENROUTER_API_KEY`, `RAGFLOW_API_KEY`, `FIRECRAWL_API_KEY`,
//! `TAVILY_API_KEY`), optionally loaded from a `.env` file at startup.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub processing: ProcessingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub web: WebConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

impl Config {
    /// Directory that owns unpacked bundles for the lifetime of their documents.
    pub fn bundles_dir(&self) -> PathBuf {
        match &self.processing.bundles_dir {
            Some(dir) => dir.clone(),
            None => self
                .db
                .path
                .parent()
                .unwrap_or_else(|| Path::new("."))
                .join("bundles"),
        }
    }
}

// ============ [processing] ============

#[derive(Debug, Deserialize, Clone)]
pub struct ProcessingConfig {
    /// Directory holding one sub-directory per report bundle.
    #[serde(default)]
    pub reports_path: Option<PathBuf>,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Characters of report text sent to the extraction prompt.
    #[serde(default = "default_max_content_chars")]
    pub max_content_chars: usize,
    /// Additional attempts after a failed extraction call.
    #[serde(default = "default_extraction_retries")]
    pub extraction_retries: u32,
    /// Bundle directory names matching any of these globs are not processed.
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    /// Where bundles unpacked from archives and uploads are kept. Defaults
    /// to `bundles/` next to the database.
    #[serde(default)]
    pub bundles_dir: Option<PathBuf>,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            reports_path: None,
            max_concurrent: default_max_concurrent(),
            max_content_chars: default_max_content_chars(),
            extraction_retries: default_extraction_retries(),
            exclude_globs: Vec::new(),
            bundles_dir: None,
        }
    }
}

fn default_max_concurrent() -> usize {
    5
}
fn default_max_content_chars() -> usize {
    500_000
}
fn default_extraction_retries() -> u32 {
    1
}

// ============ [retrieval] ============

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_ragflow_url")]
    pub base_url: String,
    #[serde(default = "default_dataset_name")]
    pub dataset_name: String,
    #[serde(default = "default_chunk_method")]
    pub chunk_method: String,
    #[serde(default = "default_top_k_single")]
    pub top_k_single: usize,
    #[serde(default = "default_top_k_all")]
    pub top_k_all: usize,
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,
    #[serde(default = "default_keyword_weight")]
    pub keyword_weight: f64,
    #[serde(default = "default_true")]
    pub enable_graph: bool,
    #[serde(default = "default_graph_method")]
    pub graph_method: String,
    #[serde(default = "default_entity_types")]
    pub entity_types: Vec<String>,
    #[serde(default = "default_store_timeout")]
    pub timeout_secs: u64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            base_url: default_ragflow_url(),
            dataset_name: default_dataset_name(),
            chunk_method: default_chunk_method(),
            top_k_single: default_top_k_single(),
            top_k_all: default_top_k_all(),
            similarity_threshold: default_similarity_threshold(),
            keyword_weight: default_keyword_weight(),
            enable_graph: true,
            graph_method: default_graph_method(),
            entity_types: default_entity_types(),
            timeout_secs: default_store_timeout(),
        }
    }
}

fn default_ragflow_url() -> String {
    "http://localhost:9380".to_string()
}
fn default_dataset_name() -> String {
    "Intelligence Hub".to_string()
}
fn default_chunk_method() -> String {
    "naive".to_string()
}
fn default_top_k_single() -> usize {
    5
}
fn default_top_k_all() -> usize {
    10
}
fn default_similarity_threshold() -> f64 {
    0.2
}
fn default_keyword_weight() -> f64 {
    0.3
}
fn default_true() -> bool {
    true
}
fn default_graph_method() -> String {
    "light".to_string()
}
fn default_entity_types() -> Vec<String> {
    ["organization", "person", "geo", "event", "technology", "policy"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_store_timeout() -> u64 {
    60
}

// ============ [llm] ============

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_openrouter_url")]
    pub base_url: String,
    /// Sent as `HTTP-Referer`.
    #[serde(default = "default_app_url")]
    pub app_url: String,
    /// Sent as `X-Title`.
    #[serde(default = "default_app_name")]
    pub app_name: String,
    #[serde(default)]
    pub models: ModelTiers,
    #[serde(default)]
    pub timeouts: TierTimeouts,
    #[serde(default)]
    pub max_tokens: TierMaxTokens,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_openrouter_url(),
            app_url: default_app_url(),
            app_name: default_app_name(),
            models: ModelTiers::default(),
            timeouts: TierTimeouts::default(),
            max_tokens: TierMaxTokens::default(),
        }
    }
}

fn default_openrouter_url() -> String {
    "https://openrouter.ai/api/v1".to_string()
}
fn default_app_url() -> String {
    "http://localhost:3000".to_string()
}
fn default_app_name() -> String {
    "Intel Hub".to_string()
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ModelTiers {
    pub chat: String,
    pub reasoning: String,
    pub fast: String,
    pub extraction: String,
    /// Used once when a tier model returns an error.
    pub fallback: String,
}

impl Default for ModelTiers {
    fn default() -> Self {
        Self {
            chat: "anthropic/claude-sonnet-4".to_string(),
            reasoning: "anthropic/claude-opus-4".to_string(),
            fast: "google/gemini-2.0-flash-001".to_string(),
            extraction: "google/gemini-2.5-pro".to_string(),
            fallback: "openai/gpt-4o".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TierTimeouts {
    pub chat: u64,
    pub reasoning: u64,
    pub fast: u64,
    pub extraction: u64,
}

impl Default for TierTimeouts {
    fn default() -> Self {
        Self {
            chat: 60,
            reasoning: 180,
            fast: 30,
            extraction: 120,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TierMaxTokens {
    pub chat: u32,
    pub reasoning: u32,
    pub fast: u32,
    pub extraction: u32,
}

impl Default for TierMaxTokens {
    fn default() -> Self {
        Self {
            chat: 4096,
            reasoning: 8192,
            fast: 1024,
            extraction: 16384,
        }
    }
}

// ============ [retry] ============

/// Backoff for retrieval-store and gateway calls. The delay before attempt
/// `n` (1-based retries) is `base_delay_ms * 2^(n-1)`, capped at
/// `max_delay_ms`.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay_ms: 1000,
            max_delay_ms: 32_000,
        }
    }
}

// ============ [web] ============

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct WebConfig {
    pub firecrawl_url: String,
    pub tavily_url: String,
    pub max_results: usize,
    pub timeout_secs: u64,
    /// Characters of article text sent to the news analysis prompt.
    pub article_max_chars: usize,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            firecrawl_url: "https://api.firecrawl.dev".to_string(),
            tavily_url: "https://api.tavily.com".to_string(),
            max_results: 5,
            timeout_secs: 30,
            article_max_chars: 15_000,
        }
    }
}

// ============ [server] ============

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    /// Largest archive accepted by `POST /api/processing/upload`.
    pub max_upload_mb: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
            max_upload_mb: 512,
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    if config.processing.max_concurrent == 0 {
        anyhow::bail!("processing.max_concurrent must be >= 1");
    }
    if config.processing.max_content_chars < 1000 {
        anyhow::bail!("processing.max_content_chars must be >= 1000");
    }

    if config.retrieval.top_k_single == 0 || config.retrieval.top_k_all == 0 {
        anyhow::bail!("retrieval.top_k_single and retrieval.top_k_all must be >= 1");
    }
    if !(0.0..=1.0).contains(&config.retrieval.similarity_threshold) {
        anyhow::bail!("retrieval.similarity_threshold must be in [0.0, 1.0]");
    }
    if !(0.0..=1.0).contains(&config.retrieval.keyword_weight) {
        anyhow::bail!("retrieval.keyword_weight must be in [0.0, 1.0]");
    }

    if config.server.max_upload_mb == 0 {
        anyhow::bail!("server.max_upload_mb must be >= 1");
    }

    if config.retry.max_attempts == 0 {
        anyhow::bail!("retry.max_attempts must be >= 1");
    }
    if config.retry.max_delay_ms < config.retry.base_delay_ms {
        anyhow::bail!("retry.max_delay_ms must be >= retry.base_delay_ms");
    }

    let tiers = &config.llm.models;
    for (name, model) in [
        ("chat", &tiers.chat),
        ("reasoning", &tiers.reasoning),
        ("fast", &tiers.fast),
        ("extraction", &tiers.extraction),
        ("fallback", &tiers.fallback),
    ] {
        if model.trim().is_empty() {
            anyhow::bail!("llm.models.{} must not be empty", name);
        }
    }

    Ok(())
}
