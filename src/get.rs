//! Document retrieval by ID.
//!
//! Fetches a document record with its full extracted-intelligence payload.
//! Used by both the `hub get` CLI command and `GET /api/library/{id}`.
//! [`get_brief`] condenses the same record to one page.

use anyhow::Result;
use serde::Serialize;
use sqlx::{Row, SqlitePool};

use crate::config::Config;
use crate::db;
use crate::error::HubError;
use crate::models::{format_ts_iso, IntelItem, Intelligence, ItemType};

const BRIEF_ITEMS: usize = 5;

#[derive(Debug, Clone, Serialize)]
pub struct DocumentDetail {
    pub id: String,
    pub bundle_key: String,
    pub title: String,
    pub source: String,
    pub year: Option<i32>,
    pub category: String,
    pub page_count: i64,
    pub state: String,
    pub error: Option<String>,
    pub store_doc_id: Option<String>,
    pub summary: Option<String>,
    pub briefing_hook: Option<String>,
    pub intelligence: Option<Intelligence>,
    pub page_warnings: Vec<String>,
    pub created_at: String,
    pub updated_at: String,
    pub processed_at: Option<String>,
}

pub async fn get_document(pool: &SqlitePool, id: &str) -> Result<DocumentDetail, HubError> {
    let row = sqlx::query(
        r#"
        SELECT id, bundle_key, title, source, year, category, page_count, state, error,
               store_doc_id, summary, briefing_hook, intelligence_json, page_warnings_json,
               created_at, updated_at, processed_at
        FROM documents WHERE id = ?
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| HubError::DocumentNotFound(id.to_string()))?;

    let payload: Option<String> = row.get("intelligence_json");
    let intelligence = payload.and_then(|p| match serde_json::from_str(&p) {
        Ok(i) => Some(i),
        Err(e) => {
            tracing::warn!("document {} has an unreadable payload: {}", id, e);
            None
        }
    });
    let warnings: String = row.get("page_warnings_json");
    let processed_at: Option<i64> = row.get("processed_at");

    Ok(DocumentDetail {
        id: row.get("id"),
        bundle_key: row.get("bundle_key"),
        title: row.get("title"),
        source: row.get("source"),
        year: row.get("year"),
        category: row.get("category"),
        page_count: row.get("page_count"),
        state: row.get("state"),
        error: row.get("error"),
        store_doc_id: row.get("store_doc_id"),
        summary: row.get("summary"),
        briefing_hook: row.get("briefing_hook"),
        intelligence,
        page_warnings: serde_json::from_str(&warnings).unwrap_or_default(),
        created_at: format_ts_iso(row.get("created_at")),
        updated_at: format_ts_iso(row.get("updated_at")),
        processed_at: processed_at.map(format_ts_iso),
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct DocumentBrief {
    pub id: String,
    pub title: String,
    pub source: String,
    pub year: Option<i32>,
    pub summary: String,
    pub briefing_hook: Option<String>,
    pub top_findings: Vec<IntelItem>,
    pub key_statistics: Vec<IntelItem>,
    pub main_recommendation: Option<IntelItem>,
}

/// Summary, the first five findings and statistics, and the first
/// recommendation.
pub async fn get_brief(pool: &SqlitePool, id: &str) -> Result<DocumentBrief, HubError> {
    let doc = get_document(pool, id).await?;
    let intel = doc.intelligence.unwrap_or_default();

    Ok(DocumentBrief {
        summary: doc
            .summary
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "No summary available.".to_string()),
        top_findings: intel.findings.iter().take(BRIEF_ITEMS).cloned().collect(),
        key_statistics: intel.statistics.iter().take(BRIEF_ITEMS).cloned().collect(),
        main_recommendation: intel.recommendations.first().cloned(),
        id: doc.id,
        title: doc.title,
        source: doc.source,
        year: doc.year,
        briefing_hook: doc.briefing_hook,
    })
}

/// CLI entry point for `hub brief <id>`.
pub async fn run_brief(config: &Config, id: &str) -> Result<()> {
    let pool = db::connect(config).await?;
    let brief = get_brief(&pool, id).await;
    pool.close().await;
    let brief = brief?;

    let year = brief.year.map(|y| y.to_string()).unwrap_or_else(|| "-".into());
    println!("{} ({}, {})", brief.title, brief.source, year);
    println!();
    if let Some(ref hook) = brief.briefing_hook {
        println!("{}", hook);
        println!();
    }
    println!("{}", brief.summary);
    for (label, items) in [("Top findings", &brief.top_findings), ("Key statistics", &brief.key_statistics)] {
        if items.is_empty() {
            continue;
        }
        println!();
        println!("{}:", label);
        for item in items.iter() {
            let page = item.page.map(|p| format!(" [p.{}]", p)).unwrap_or_default();
            println!("  - {}{}", item.body, page);
        }
    }
    if let Some(ref rec) = brief.main_recommendation {
        println!();
        println!("Recommendation: {}", rec.body);
    }
    Ok(())
}

/// CLI entry point: calls get_document and prints to stdout.
pub async fn run_get(config: &Config, id: &str) -> Result<()> {
    let pool = db::connect(config).await?;
    let doc = get_document(&pool, id).await;
    pool.close().await;
    let doc = doc?;

    println!("--- Document ---");
    println!("id:         {}", doc.id);
    println!("title:      {}", doc.title);
    println!("source:     {}", doc.source);
    println!(
        "year:       {}",
        doc.year.map(|y| y.to_string()).unwrap_or_else(|| "-".into())
    );
    println!("category:   {}", doc.category);
    println!("pages:      {}", doc.page_count);
    println!("state:      {}", doc.state);
    if let Some(ref err) = doc.error {
        println!("error:      {}", err);
    }
    if let Some(ref store) = doc.store_doc_id {
        println!("store id:   {}", store);
    }
    println!("updated_at: {}", doc.updated_at);
    println!();

    if let Some(ref hook) = doc.briefing_hook {
        println!("--- Briefing hook ---");
        println!("{}", hook);
        println!();
    }
    if let Some(ref summary) = doc.summary {
        println!("--- Summary ---");
        println!("{}", summary);
        println!();
    }

    if let Some(ref intel) = doc.intelligence {
        for kind in ItemType::ALL {
            let items = intel.list(kind);
            if items.is_empty() {
                continue;
            }
            println!("--- {}s ({}) ---", kind, items.len());
            for (i, item) in items.iter().enumerate() {
                let page = item.page.map(|p| format!(" [p.{}]", p)).unwrap_or_default();
                println!("{}. {}{}", i + 1, item.body, page);
                if let Some(ref ctx) = item.context {
                    println!("   {}", ctx);
                }
            }
            println!();
        }
        if let Some(ref m) = intel.methodology {
            println!("--- Methodology ---\n{}\n", m);
        }
        if let Some(ref l) = intel.limitations {
            println!("--- Limitations ---\n{}\n", l);
        }
    }

    if !doc.page_warnings.is_empty() {
        println!("--- Page warnings ({}) ---", doc.page_warnings.len());
        for w in &doc.page_warnings {
            println!("  {}", w);
        }
    }

    Ok(())
}
