//! Processing status overview.
//!
//! Counts how much of the library made it through extraction: totals,
//! documents with a summary, with a recognised source, with findings, and
//! those still missing extraction. Used by `hub status` and
//! `GET /api/processing/status`.

use std::collections::BTreeMap;

use anyhow::Result;
use serde::Serialize;
use sqlx::{Row, SqlitePool};

use crate::config::Config;
use crate::db;
use crate::error::HubError;
use crate::metadata::UNKNOWN_SOURCE;
use crate::models::format_ts_iso;

#[derive(Debug, Clone, Serialize)]
pub struct ProcessingStatus {
    pub total_documents: i64,
    pub with_summary: i64,
    pub with_source: i64,
    pub with_findings: i64,
    pub missing_extraction: i64,
    pub total_items: i64,
    pub by_state: BTreeMap<String, i64>,
    pub last_processed_at: Option<String>,
}

pub async fn processing_status(pool: &SqlitePool) -> Result<ProcessingStatus, HubError> {
    let row = sqlx::query(
        r#"
        SELECT
            COUNT(*) AS total,
            COALESCE(SUM(CASE WHEN summary IS NOT NULL AND summary != '' THEN 1 ELSE 0 END), 0) AS with_summary,
            COALESCE(SUM(CASE WHEN source != ? THEN 1 ELSE 0 END), 0) AS with_source,
            COALESCE(SUM(CASE WHEN intelligence_json IS NULL THEN 1 ELSE 0 END), 0) AS missing,
            MAX(processed_at) AS last_processed
        FROM documents
        "#,
    )
    .bind(UNKNOWN_SOURCE)
    .fetch_one(pool)
    .await?;

    let with_findings: i64 = sqlx::query_scalar(
        "SELECT COUNT(DISTINCT document_id) FROM extracted_items WHERE item_type = 'finding'",
    )
    .fetch_one(pool)
    .await?;
    let total_items: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM extracted_items")
        .fetch_one(pool)
        .await?;

    let mut by_state: BTreeMap<String, i64> = ["pending", "processing", "completed", "failed"]
        .iter()
        .map(|s| (s.to_string(), 0))
        .collect();
    for r in sqlx::query("SELECT state, COUNT(*) AS n FROM documents GROUP BY state")
        .fetch_all(pool)
        .await?
    {
        by_state.insert(r.get("state"), r.get("n"));
    }

    let last: Option<i64> = row.get("last_processed");
    Ok(ProcessingStatus {
        total_documents: row.get("total"),
        with_summary: row.get("with_summary"),
        with_source: row.get("with_source"),
        with_findings,
        missing_extraction: row.get("missing"),
        total_items,
        by_state,
        last_processed_at: last.map(format_ts_iso),
    })
}

/// Run the status command: query the database and print a summary.
pub async fn run_status(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let status = processing_status(&pool).await?;
    let last: Option<i64> = sqlx::query_scalar("SELECT MAX(processed_at) FROM documents")
        .fetch_one(&pool)
        .await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Intel Hub: Processing Status");
    println!("============================");
    println!();
    println!("  Database:     {}", config.db.path.display());
    println!("  Size:         {}", format_bytes(db_size));
    println!();
    println!("  Documents:    {}", status.total_documents);
    println!(
        "  Summaries:    {} ({}%)",
        status.with_summary,
        percent(status.with_summary, status.total_documents)
    );
    println!(
        "  With source:  {} ({}%)",
        status.with_source,
        percent(status.with_source, status.total_documents)
    );
    println!("  With findings:{:>4}", status.with_findings);
    println!("  Missing:      {}", status.missing_extraction);
    println!("  Items:        {}", status.total_items);
    println!(
        "  Last run:     {}",
        last.map(format_ts_relative).unwrap_or_else(|| "never".to_string())
    );
    println!();
    println!("  By state:");
    for (state, n) in &status.by_state {
        println!("    {:<12} {:>6}", state, n);
    }
    println!();

    pool.close().await;
    Ok(())
}

fn percent(part: i64, total: i64) -> i64 {
    if total > 0 {
        (part * 100) / total
    } else {
        0
    }
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format a Unix timestamp as a relative time string (e.g. "3 hours ago").
fn format_ts_relative(ts: i64) -> String {
    let now = chrono::Utc::now().timestamp();
    let delta = now - ts;

    if delta < 0 {
        return format_ts_iso(ts);
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_ts_iso(ts)
    }
}
