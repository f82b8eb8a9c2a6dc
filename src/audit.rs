//! Append-only audit trail for administrative actions.

use sqlx::SqliteExecutor;
use uuid::Uuid;

pub async fn record<'e>(
    executor: impl SqliteExecutor<'e>,
    actor: &str,
    action: &str,
    subject: &str,
    detail: Option<&str>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO audit_log (id, actor, action, subject, detail, created_at) VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(actor)
    .bind(action)
    .bind(subject)
    .bind(detail)
    .bind(chrono::Utc::now().timestamp())
    .execute(executor)
    .await?;
    Ok(())
}
