//! Web search (Tavily) and article scraping (Firecrawl).
//!
//! Both sit behind traits so the minister chain and the news analyzer can be
//! driven by in-memory fakes. Missing API keys are not an error at startup:
//! the `from_env` constructors return `None` and the callers skip the step.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;

use crate::config::WebConfig;
use crate::error::WebError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebResult {
    pub title: String,
    pub url: String,
    pub content: String,
    #[serde(default)]
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScrapedArticle {
    pub url: String,
    pub title: String,
    /// Markdown body.
    pub content: String,
    pub author: Option<String>,
    pub published_at: Option<String>,
    pub source_domain: String,
}

#[async_trait]
pub trait WebSearch: Send + Sync {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<WebResult>, WebError>;
}

#[async_trait]
pub trait Scraper: Send + Sync {
    async fn scrape(&self, url: &str) -> Result<ScrapedArticle, WebError>;
}

fn http_client(timeout_secs: u64) -> Result<reqwest::Client, WebError> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| WebError::Connection(e.to_string()))
}

fn map_send_error(e: reqwest::Error, timeout_secs: u64) -> WebError {
    if e.is_timeout() {
        WebError::Timeout(timeout_secs)
    } else {
        WebError::Connection(e.to_string())
    }
}

async fn read_json(resp: reqwest::Response) -> Result<serde_json::Value, WebError> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(WebError::Http {
            status: status.as_u16(),
            body: body.chars().take(500).collect(),
        });
    }
    resp.json().await.map_err(|e| WebError::Parse(e.to_string()))
}

// ============ Tavily ============

pub struct TavilyClient {
    base_url: String,
    api_key: String,
    timeout_secs: u64,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    results: Vec<WebResult>,
}

impl TavilyClient {
    pub fn new(config: &WebConfig, api_key: String) -> Result<Self, WebError> {
        Ok(Self {
            base_url: config.tavily_url.trim_end_matches('/').to_string(),
            api_key,
            timeout_secs: config.timeout_secs,
            client: http_client(config.timeout_secs)?,
        })
    }

    /// `None` when `TAVILY_API_KEY` is unset or empty.
    pub fn from_env(config: &WebConfig) -> Option<Result<Self, WebError>> {
        let key = std::env::var("TAVILY_API_KEY").ok().filter(|k| !k.trim().is_empty())?;
        Some(Self::new(config, key))
    }
}

#[async_trait]
impl WebSearch for TavilyClient {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<WebResult>, WebError> {
        tracing::debug!("tavily search: {}", query);
        let resp = self
            .client
            .post(format!("{}/search", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&json!({
                "api_key": self.api_key,
                "query": query,
                "max_results": max_results,
                "search_depth": "basic",
                "include_answer": false,
            }))
            .send()
            .await
            .map_err(|e| map_send_error(e, self.timeout_secs))?;

        let value = read_json(resp).await?;
        let parsed: TavilyResponse =
            serde_json::from_value(value).map_err(|e| WebError::Parse(e.to_string()))?;
        Ok(parsed.results.into_iter().take(max_results).collect())
    }
}

// ============ Firecrawl ============

pub struct FirecrawlClient {
    base_url: String,
    api_key: String,
    timeout_secs: u64,
    client: reqwest::Client,
}

impl FirecrawlClient {
    pub fn new(config: &WebConfig, api_key: String) -> Result<Self, WebError> {
        Ok(Self {
            base_url: config.firecrawl_url.trim_end_matches('/').to_string(),
            api_key,
            timeout_secs: config.timeout_secs,
            client: http_client(config.timeout_secs)?,
        })
    }

    /// `None` when `FIRECRAWL_API_KEY` is unset or empty.
    pub fn from_env(config: &WebConfig) -> Option<Result<Self, WebError>> {
        let key = std::env::var("FIRECRAWL_API_KEY").ok().filter(|k| !k.trim().is_empty())?;
        Some(Self::new(config, key))
    }
}

#[async_trait]
impl Scraper for FirecrawlClient {
    async fn scrape(&self, url: &str) -> Result<ScrapedArticle, WebError> {
        tracing::info!("scraping {}", url);
        let resp = self
            .client
            .post(format!("{}/v1/scrape", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&json!({
                "url": url,
                "formats": ["markdown"],
                "onlyMainContent": true,
                "waitFor": 2000,
            }))
            .send()
            .await
            .map_err(|e| map_send_error(e, self.timeout_secs))?;

        let value = read_json(resp).await?;
        parse_scrape(url, &value)
    }
}

pub fn parse_scrape(url: &str, value: &serde_json::Value) -> Result<ScrapedArticle, WebError> {
    if !value.get("success").and_then(|v| v.as_bool()).unwrap_or(false) {
        let msg = value
            .get("error")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown error");
        return Err(WebError::Parse(format!("scrape unsuccessful: {}", msg)));
    }

    let data = &value["data"];
    let meta = &data["metadata"];
    let content = data["markdown"]
        .as_str()
        .filter(|s| !s.trim().is_empty())
        .or_else(|| data["content"].as_str())
        .unwrap_or_default()
        .to_string();
    let title = meta["title"]
        .as_str()
        .or_else(|| meta["ogTitle"].as_str())
        .unwrap_or("Untitled")
        .to_string();

    Ok(ScrapedArticle {
        url: url.to_string(),
        title,
        content,
        author: meta["author"].as_str().map(String::from),
        published_at: meta["publishedTime"].as_str().map(String::from),
        source_domain: domain_of(url),
    })
}

/// Host part of an http(s) URL, without a leading `www.`.
pub fn domain_of(url: &str) -> String {
    let rest = url
        .split_once("://")
        .map(|(_, r)| r)
        .unwrap_or(url);
    let host = rest.split(['/', '?', '#']).next().unwrap_or_default();
    let host = host.rsplit('@').next().unwrap_or(host);
    let host = host.split(':').next().unwrap_or(host);
    host.trim_start_matches("www.").to_lowercase()
}

/// Numbered block of results for the minister web step.
pub fn format_results(results: &[WebResult]) -> String {
    results
        .iter()
        .enumerate()
        .map(|(i, r)| format!("[{}] {}\n{}\n{}", i + 1, r.title, r.url, r.content.trim()))
        .collect::<Vec<_>>()
        .join("\n\n")
}
