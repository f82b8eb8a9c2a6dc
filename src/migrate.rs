use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Creates every table and index. Safe to run repeatedly.
pub async fn apply(pool: &SqlitePool) -> Result<()> {
    // Report documents and their extracted intelligence
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            id TEXT PRIMARY KEY,
            bundle_key TEXT NOT NULL UNIQUE,
            title TEXT NOT NULL,
            source TEXT NOT NULL DEFAULT 'Unknown',
            year INTEGER,
            category TEXT NOT NULL DEFAULT 'Research',
            page_count INTEGER NOT NULL DEFAULT 0,
            bundle_path TEXT NOT NULL,
            content_hash TEXT NOT NULL,
            store_doc_id TEXT,
            state TEXT NOT NULL DEFAULT 'pending'
                CHECK (state IN ('pending', 'processing', 'completed', 'failed')),
            error TEXT,
            summary TEXT,
            briefing_hook TEXT,
            intelligence_json TEXT,
            page_warnings_json TEXT NOT NULL DEFAULT '[]',
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            processed_at INTEGER
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS extracted_items (
            id TEXT PRIMARY KEY,
            document_id TEXT NOT NULL,
            item_type TEXT NOT NULL
                CHECK (item_type IN ('finding', 'statistic', 'quote', 'insight', 'recommendation')),
            body TEXT NOT NULL,
            context TEXT,
            significance TEXT,
            page INTEGER,
            tags_json TEXT NOT NULL DEFAULT '[]',
            position INTEGER NOT NULL,
            created_at INTEGER NOT NULL,
            FOREIGN KEY (document_id) REFERENCES documents(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Chat history
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS conversations (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            mode TEXT NOT NULL CHECK (mode IN ('single', 'all', 'minister')),
            document_id TEXT,
            title TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            FOREIGN KEY (document_id) REFERENCES documents(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS messages (
            id TEXT PRIMARY KEY,
            conversation_id TEXT NOT NULL,
            seq INTEGER NOT NULL,
            role TEXT NOT NULL CHECK (role IN ('user', 'assistant', 'system')),
            content TEXT NOT NULL,
            citations_json TEXT NOT NULL DEFAULT '[]',
            model_used TEXT,
            created_at INTEGER NOT NULL,
            UNIQUE(conversation_id, seq),
            FOREIGN KEY (conversation_id) REFERENCES conversations(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Batch bookkeeping
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS processing_jobs (
            id TEXT PRIMARY KEY,
            kind TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending'
                CHECK (status IN ('pending', 'running', 'completed', 'failed')),
            total_items INTEGER NOT NULL,
            processed_items INTEGER NOT NULL DEFAULT 0,
            failed_items INTEGER NOT NULL DEFAULT 0,
            skipped_items INTEGER NOT NULL DEFAULT 0,
            error TEXT,
            created_at INTEGER NOT NULL,
            started_at INTEGER,
            completed_at INTEGER
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS job_items (
            job_id TEXT NOT NULL,
            bundle_key TEXT NOT NULL,
            position INTEGER NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending'
                CHECK (status IN ('pending', 'processing', 'completed', 'skipped', 'failed')),
            document_id TEXT,
            error TEXT,
            updated_at INTEGER NOT NULL,
            PRIMARY KEY (job_id, bundle_key),
            FOREIGN KEY (job_id) REFERENCES processing_jobs(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS news_items (
            id TEXT PRIMARY KEY,
            url TEXT NOT NULL UNIQUE,
            title TEXT,
            source TEXT,
            analysis_json TEXT NOT NULL,
            model_used TEXT,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS user_preferences (
            user_id TEXT PRIMARY KEY,
            default_mode TEXT NOT NULL DEFAULT 'all',
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS audit_log (
            id TEXT PRIMARY KEY,
            actor TEXT NOT NULL,
            action TEXT NOT NULL,
            subject TEXT NOT NULL,
            detail TEXT,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    for stmt in [
        "CREATE INDEX IF NOT EXISTS idx_documents_state ON documents(state)",
        "CREATE INDEX IF NOT EXISTS idx_documents_source ON documents(source)",
        "CREATE INDEX IF NOT EXISTS idx_documents_store_doc_id ON documents(store_doc_id)",
        "CREATE INDEX IF NOT EXISTS idx_documents_created_at ON documents(created_at DESC)",
        "CREATE INDEX IF NOT EXISTS idx_items_document_id ON extracted_items(document_id, item_type, position)",
        "CREATE INDEX IF NOT EXISTS idx_items_type ON extracted_items(item_type)",
        "CREATE INDEX IF NOT EXISTS idx_conversations_user ON conversations(user_id, updated_at DESC)",
        "CREATE INDEX IF NOT EXISTS idx_audit_created_at ON audit_log(created_at DESC)",
    ] {
        sqlx::query(stmt).execute(pool).await?;
    }

    Ok(())
}
