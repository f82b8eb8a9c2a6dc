//! Batch job bookkeeping.
//!
//! Counters live on the `processing_jobs` row and are only ever changed by
//! single `UPDATE ... SET n = n + 1` statements, so concurrent document
//! pipelines never race on them. A job is finalized by a conditional
//! update that matches only while it is still `running` and every item has
//! reached a terminal state, which makes finalization happen exactly once.
//!
//! Skipped items count as processed (they are already complete) and are
//! also tallied in `skipped_items`.

use anyhow::Result;
use serde::Serialize;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::config::Config;
use crate::db;
use crate::error::HubError;
use crate::models::{format_ts_iso, ItemStatus, JobStatus};

#[derive(Debug, Clone, Serialize)]
pub struct JobSummary {
    pub id: String,
    pub kind: String,
    pub status: String,
    pub total_items: i64,
    pub processed_items: i64,
    pub failed_items: i64,
    pub skipped_items: i64,
    pub error: Option<String>,
    pub created_at: String,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobItem {
    pub bundle_key: String,
    pub status: String,
    pub document_id: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobDetail {
    #[serde(flatten)]
    pub job: JobSummary,
    pub items: Vec<JobItem>,
}

/// Creates a running job with one pending item per bundle key.
pub async fn create_job(pool: &SqlitePool, kind: &str, keys: &[String]) -> Result<String, HubError> {
    let id = Uuid::new_v4().to_string();
    let now = chrono::Utc::now().timestamp();

    let mut tx = pool.begin().await?;
    sqlx::query(
        r#"
        INSERT INTO processing_jobs (id, kind, status, total_items, created_at, started_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&id)
    .bind(kind)
    .bind(JobStatus::Running.as_str())
    .bind(keys.len() as i64)
    .bind(now)
    .bind(now)
    .execute(&mut *tx)
    .await?;

    for (position, key) in keys.iter().enumerate() {
        sqlx::query(
            "INSERT INTO job_items (job_id, bundle_key, position, status, updated_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(key)
        .bind(position as i64)
        .bind(ItemStatus::Pending.as_str())
        .bind(now)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;

    // An empty batch has nothing to wait for.
    if keys.is_empty() {
        try_finalize(pool, &id).await?;
    }

    Ok(id)
}

pub async fn mark_item_started(pool: &SqlitePool, job_id: &str, key: &str) -> Result<(), HubError> {
    sqlx::query("UPDATE job_items SET status = ?, updated_at = ? WHERE job_id = ? AND bundle_key = ?")
        .bind(ItemStatus::Processing.as_str())
        .bind(chrono::Utc::now().timestamp())
        .bind(job_id)
        .bind(key)
        .execute(pool)
        .await?;
    Ok(())
}

/// Records a terminal item status, bumps the matching counter, and
/// finalizes the job if this was the last outstanding item. Returns the
/// job's final status when this call finalized it.
pub async fn record_item(
    pool: &SqlitePool,
    job_id: &str,
    key: &str,
    status: ItemStatus,
    document_id: Option<&str>,
    error: Option<&str>,
) -> Result<Option<JobStatus>, HubError> {
    if !status.is_terminal() {
        return Err(HubError::BadRequest(format!(
            "item status '{}' is not terminal",
            status.as_str()
        )));
    }
    let now = chrono::Utc::now().timestamp();

    let mut tx = pool.begin().await?;
    let updated = sqlx::query(
        r#"
        UPDATE job_items SET status = ?, document_id = ?, error = ?, updated_at = ?
        WHERE job_id = ? AND bundle_key = ? AND status IN ('pending', 'processing')
        "#,
    )
    .bind(status.as_str())
    .bind(document_id)
    .bind(error)
    .bind(now)
    .bind(job_id)
    .bind(key)
    .execute(&mut *tx)
    .await?;

    // Already terminal: do not count twice.
    if updated.rows_affected() == 0 {
        tx.rollback().await?;
        return Ok(None);
    }

    let counter_sql = match status {
        ItemStatus::Failed => "UPDATE processing_jobs SET failed_items = failed_items + 1 WHERE id = ?",
        ItemStatus::Skipped => {
            "UPDATE processing_jobs SET processed_items = processed_items + 1, skipped_items = skipped_items + 1 WHERE id = ?"
        }
        _ => "UPDATE processing_jobs SET processed_items = processed_items + 1 WHERE id = ?",
    };
    sqlx::query(counter_sql).bind(job_id).execute(&mut *tx).await?;
    tx.commit().await?;

    try_finalize(pool, job_id).await
}

async fn try_finalize(pool: &SqlitePool, job_id: &str) -> Result<Option<JobStatus>, HubError> {
    let now = chrono::Utc::now().timestamp();
    let result = sqlx::query(
        r#"
        UPDATE processing_jobs
        SET status = CASE
                WHEN processed_items > 0 OR total_items = 0 THEN 'completed'
                ELSE 'failed'
            END,
            error = CASE
                WHEN processed_items = 0 AND total_items > 0 THEN 'every item failed'
                ELSE NULL
            END,
            completed_at = ?
        WHERE id = ? AND status = 'running' AND processed_items + failed_items >= total_items
        "#,
    )
    .bind(now)
    .bind(job_id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Ok(None);
    }

    let status: String = sqlx::query_scalar("SELECT status FROM processing_jobs WHERE id = ?")
        .bind(job_id)
        .fetch_one(pool)
        .await?;
    let status = if status == "completed" {
        JobStatus::Completed
    } else {
        JobStatus::Failed
    };
    tracing::info!("job {} finalized as {}", job_id, status.as_str());
    Ok(Some(status))
}

pub async fn get_job(pool: &SqlitePool, job_id: &str) -> Result<JobDetail, HubError> {
    let row = sqlx::query(&format!("{} WHERE id = ?", JOB_SELECT))
        .bind(job_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| HubError::JobNotFound(job_id.to_string()))?;
    let job = job_from_row(&row);

    let items = sqlx::query(
        "SELECT bundle_key, status, document_id, error FROM job_items WHERE job_id = ? ORDER BY position ASC",
    )
    .bind(job_id)
    .fetch_all(pool)
    .await?
    .iter()
    .map(|r| JobItem {
        bundle_key: r.get("bundle_key"),
        status: r.get("status"),
        document_id: r.get("document_id"),
        error: r.get("error"),
    })
    .collect();

    Ok(JobDetail { job, items })
}

pub async fn list_jobs(pool: &SqlitePool, limit: i64) -> Result<Vec<JobSummary>, HubError> {
    let rows = sqlx::query(&format!("{} ORDER BY created_at DESC, rowid DESC LIMIT ?", JOB_SELECT))
        .bind(limit.clamp(1, 200))
        .fetch_all(pool)
        .await?;
    Ok(rows.iter().map(job_from_row).collect())
}

const JOB_SELECT: &str = "SELECT id, kind, status, total_items, processed_items, failed_items, \
    skipped_items, error, created_at, started_at, completed_at FROM processing_jobs";

fn job_from_row(row: &sqlx::sqlite::SqliteRow) -> JobSummary {
    let started: Option<i64> = row.get("started_at");
    let completed: Option<i64> = row.get("completed_at");
    JobSummary {
        id: row.get("id"),
        kind: row.get("kind"),
        status: row.get("status"),
        total_items: row.get("total_items"),
        processed_items: row.get("processed_items"),
        failed_items: row.get("failed_items"),
        skipped_items: row.get("skipped_items"),
        error: row.get("error"),
        created_at: format_ts_iso(row.get("created_at")),
        started_at: started.map(format_ts_iso),
        completed_at: completed.map(format_ts_iso),
    }
}

/// CLI entry point for `hub jobs [<id>]`.
pub async fn run_jobs(config: &Config, id: Option<&str>, limit: i64) -> Result<()> {
    let pool = db::connect(config).await?;

    match id {
        Some(id) => {
            let detail = get_job(&pool, id).await?;
            let j = &detail.job;
            println!("job {} ({})", j.id, j.kind);
            println!("  status:    {}", j.status);
            println!(
                "  progress:  {} processed ({} skipped), {} failed, {} total",
                j.processed_items, j.skipped_items, j.failed_items, j.total_items
            );
            println!("  created:   {}", j.created_at);
            if let Some(ref done) = j.completed_at {
                println!("  completed: {}", done);
            }
            println!();
            for item in &detail.items {
                match item.error {
                    Some(ref err) => println!("  {:<10} {}  {}", item.status, item.bundle_key, err),
                    None => println!("  {:<10} {}", item.status, item.bundle_key),
                }
            }
        }
        None => {
            let jobs = list_jobs(&pool, limit).await?;
            if jobs.is_empty() {
                println!("No jobs.");
            }
            for j in &jobs {
                println!(
                    "{}  {:<10} {:<9} {:>4}/{:<4} failed {:<4} {}",
                    j.id, j.kind, j.status, j.processed_items, j.total_items, j.failed_items, j.created_at
                );
            }
        }
    }

    pool.close().await;
    Ok(())
}
