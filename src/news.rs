//! "So What?" analysis of news articles.
//!
//! Analyses are cached per URL in `news_items`; a second request for the
//! same URL returns the stored analysis unless `refresh` is set. Article
//! text comes from the request when given, otherwise from the scraper.

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::audit;
use crate::config::{Config, WebConfig};
use crate::db;
use crate::error::{GatewayError, HubError};
use crate::extraction::truncate_content;
use crate::llm::{strip_code_fences, ChatMessage, CompletionRequest, LlmGateway, ModelTier, OpenRouterClient};
use crate::models::format_ts_iso;
use crate::prompts::{self, fill};
use crate::web::{domain_of, FirecrawlClient, Scraper};

#[derive(Debug, Clone, Deserialize)]
pub struct AnalyzeRequest {
    pub url: String,
    #[serde(default)]
    pub title: Option<String>,
    /// Article text; skips scraping when present.
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub refresh: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SoWhatAnalysis {
    pub summary: String,
    pub so_what: String,
    pub uae_implications: String,
    #[serde(default)]
    pub opportunities: Vec<String>,
    #[serde(default)]
    pub risks: Vec<String>,
    pub talking_point: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewsItem {
    pub id: String,
    pub url: String,
    pub title: Option<String>,
    pub source: Option<String>,
    pub analysis: SoWhatAnalysis,
    pub model_used: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalyzeResponse {
    pub news_item: NewsItem,
    pub is_cached: bool,
}

#[derive(Clone)]
pub struct NewsAnalyzer {
    pool: SqlitePool,
    gateway: Arc<dyn LlmGateway>,
    scraper: Option<Arc<dyn Scraper>>,
    article_max_chars: usize,
}

impl NewsAnalyzer {
    pub fn new(
        pool: SqlitePool,
        gateway: Arc<dyn LlmGateway>,
        scraper: Option<Arc<dyn Scraper>>,
        config: &WebConfig,
    ) -> Self {
        Self {
            pool,
            gateway,
            scraper,
            article_max_chars: config.article_max_chars,
        }
    }

    pub async fn analyze(&self, req: AnalyzeRequest) -> Result<AnalyzeResponse, HubError> {
        let url = validate_url(&req.url)?;

        if !req.refresh {
            if let Some(item) = self.cached(&url).await? {
                tracing::debug!("news analysis cache hit: {}", url);
                return Ok(AnalyzeResponse {
                    news_item: item,
                    is_cached: true,
                });
            }
        }

        let supplied = req.text.as_deref().map(str::trim).filter(|t| !t.is_empty());
        let (title, content) = match supplied {
            Some(text) => (
                req.title.clone().unwrap_or_else(|| domain_of(&url)),
                text.to_string(),
            ),
            None => {
                let scraper = self.scraper.as_ref().ok_or_else(|| {
                    HubError::Scrape("FIRECRAWL_API_KEY not configured and no article text supplied".into())
                })?;
                let article = scraper
                    .scrape(&url)
                    .await
                    .map_err(|e| HubError::Scrape(e.to_string()))?;
                if article.content.trim().is_empty() {
                    return Err(HubError::Scrape(format!("no article text at {}", url)));
                }
                (req.title.clone().unwrap_or(article.title), article.content)
            }
        };

        let (body, truncated) = truncate_content(&content, self.article_max_chars);
        if truncated {
            tracing::debug!("article truncated to {} chars: {}", self.article_max_chars, url);
        }
        let prompt = fill(
            prompts::SO_WHAT_TEMPLATE,
            &[("title", &title), ("url", &url), ("content", body)],
        );
        let completion = self
            .gateway
            .complete(
                CompletionRequest::new(
                    ModelTier::Chat,
                    vec![
                        ChatMessage::system(prompts::SO_WHAT_SYSTEM),
                        ChatMessage::user(prompt),
                    ],
                )
                .temperature(0.3)
                .json(),
            )
            .await?;
        let analysis = parse_analysis(&completion.content)?;

        let item = self
            .store(&url, &title, &domain_of(&url), &analysis, &completion.model)
            .await?;
        tracing::info!("analyzed {}", url);
        Ok(AnalyzeResponse {
            news_item: item,
            is_cached: false,
        })
    }

    async fn cached(&self, url: &str) -> Result<Option<NewsItem>, HubError> {
        let row = sqlx::query(&format!("{} WHERE url = ?", NEWS_SELECT))
            .bind(url)
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        // An unreadable cache entry is treated as a miss.
        let item = item_from_row(&row);
        if item.is_none() {
            tracing::warn!("discarding unreadable cached analysis for {}", url);
        }
        Ok(item)
    }

    async fn store(
        &self,
        url: &str,
        title: &str,
        source: &str,
        analysis: &SoWhatAnalysis,
        model: &str,
    ) -> Result<NewsItem, HubError> {
        let now = chrono::Utc::now().timestamp();
        let json = serde_json::to_string(analysis).map_err(|e| HubError::StorageWrite(e.to_string()))?;
        let id: String = sqlx::query_scalar(
            r#"
            INSERT INTO news_items (id, url, title, source, analysis_json, model_used, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(url) DO UPDATE SET
                title = excluded.title,
                source = excluded.source,
                analysis_json = excluded.analysis_json,
                model_used = excluded.model_used,
                created_at = excluded.created_at
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(url)
        .bind(title)
        .bind(source)
        .bind(&json)
        .bind(model)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        Ok(NewsItem {
            id,
            url: url.to_string(),
            title: Some(title.to_string()),
            source: Some(source.to_string()),
            analysis: analysis.clone(),
            model_used: Some(model.to_string()),
            created_at: format_ts_iso(now),
        })
    }
}

const NEWS_SELECT: &str =
    "SELECT id, url, title, source, analysis_json, model_used, created_at FROM news_items";

fn item_from_row(row: &sqlx::sqlite::SqliteRow) -> Option<NewsItem> {
    let raw: String = row.get("analysis_json");
    let analysis = serde_json::from_str(&raw).ok()?;
    Some(NewsItem {
        id: row.get("id"),
        url: row.get("url"),
        title: row.get("title"),
        source: row.get("source"),
        analysis,
        model_used: row.get("model_used"),
        created_at: format_ts_iso(row.get("created_at")),
    })
}

/// Analysed articles, newest first. Rows with an unreadable analysis are left out.
pub async fn list_news(pool: &SqlitePool, limit: i64, offset: i64) -> Result<Vec<NewsItem>, HubError> {
    let rows = sqlx::query(&format!(
        "{} ORDER BY created_at DESC, rowid DESC LIMIT ? OFFSET ?",
        NEWS_SELECT
    ))
    .bind(limit.clamp(1, 100))
    .bind(offset.max(0))
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().filter_map(item_from_row).collect())
}

pub async fn get_news(pool: &SqlitePool, id: &str) -> Result<NewsItem, HubError> {
    let row = sqlx::query(&format!("{} WHERE id = ?", NEWS_SELECT))
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| HubError::NewsNotFound(id.to_string()))?;
    item_from_row(&row).ok_or_else(|| HubError::NewsNotFound(id.to_string()))
}

pub async fn delete_news(pool: &SqlitePool, id: &str, actor: &str) -> Result<(), HubError> {
    let mut tx = pool.begin().await?;
    let result = sqlx::query("DELETE FROM news_items WHERE id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    if result.rows_affected() == 0 {
        return Err(HubError::NewsNotFound(id.to_string()));
    }
    audit::record(&mut *tx, actor, "news.delete", id, None).await?;
    tx.commit().await?;
    Ok(())
}

/// Trims the URL and requires an http(s) scheme with a host.
pub fn validate_url(raw: &str) -> Result<String, HubError> {
    let url = raw.trim();
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .ok_or_else(|| HubError::BadRequest(format!("url must start with http:// or https://: {}", url)))?;
    if rest.is_empty() || rest.starts_with('/') || url.chars().any(char::is_whitespace) {
        return Err(HubError::BadRequest(format!("invalid url: {}", url)));
    }
    Ok(url.to_string())
}

/// Parses and checks the model's JSON; every text field must be non-empty.
pub fn parse_analysis(raw: &str) -> Result<SoWhatAnalysis, HubError> {
    let analysis: SoWhatAnalysis = serde_json::from_str(strip_code_fences(raw))
        .map_err(|e| GatewayError::Parse(format!("analysis is not valid JSON: {}", e)))?;
    for (name, value) in [
        ("summary", &analysis.summary),
        ("so_what", &analysis.so_what),
        ("uae_implications", &analysis.uae_implications),
        ("talking_point", &analysis.talking_point),
    ] {
        if value.trim().is_empty() {
            return Err(GatewayError::Parse(format!("analysis field '{}' is empty", name)).into());
        }
    }
    Ok(analysis)
}

/// CLI entry point for `hub analyze <url>`.
pub async fn run_analyze(
    config: &Config,
    url: &str,
    title: Option<String>,
    text_file: Option<&Path>,
    refresh: bool,
) -> Result<()> {
    let text = match text_file {
        Some(p) => Some(std::fs::read_to_string(p)?),
        None => None,
    };

    let pool = db::connect(config).await?;
    let gateway = OpenRouterClient::from_env(&config.llm)?;
    let scraper: Option<Arc<dyn Scraper>> = match FirecrawlClient::from_env(&config.web) {
        Some(client) => Some(Arc::new(client?)),
        None => None,
    };
    let analyzer = NewsAnalyzer::new(pool.clone(), Arc::new(gateway), scraper, &config.web);

    let resp = analyzer
        .analyze(AnalyzeRequest {
            url: url.to_string(),
            title,
            text,
            refresh,
        })
        .await?;

    let item = &resp.news_item;
    let a = &item.analysis;
    println!("{}", item.title.as_deref().unwrap_or(&item.url));
    println!("  url: {}", item.url);
    if resp.is_cached {
        println!("  (cached {})", item.created_at);
    }
    println!();
    println!("Summary:\n  {}\n", a.summary);
    println!("So what:\n  {}\n", a.so_what);
    println!("UAE implications:\n  {}\n", a.uae_implications);
    if !a.opportunities.is_empty() {
        println!("Opportunities:");
        for o in &a.opportunities {
            println!("  - {}", o);
        }
        println!();
    }
    if !a.risks.is_empty() {
        println!("Risks:");
        for r in &a.risks {
            println!("  - {}", r);
        }
        println!();
    }
    println!("Talking point:\n  \"{}\"", a.talking_point);

    pool.close().await;
    Ok(())
}
