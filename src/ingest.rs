//! Ingestion pipeline orchestration.
//!
//! Each bundle runs the same sequence in its own task:
//!
//! ```text
//! parse → infer metadata → upload to retrieval store → extract → persist
//! ```
//!
//! A failure at any stage is recorded on the document (when one exists) and
//! on the job item, then the task ends. Siblings are never cancelled.
//! Concurrency is bounded by a semaphore sized `--concurrent`.
//!
//! Re-running a batch is safe: completed documents are skipped unless
//! `force` is set, and failed or pending ones are reprocessed in place under
//! the same `bundle_key`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use sqlx::{Row, SqlitePool};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use uuid::Uuid;
use walkdir::WalkDir;

use crate::archive;
use crate::audit;
use crate::bundle::{self, Bundle};
use crate::config::{Config, ProcessingConfig};
use crate::db;
use crate::error::{HubError, StoreError};
use crate::extraction::{self, ExtractionInput, ExtractionOutput};
use crate::jobs;
use crate::llm::{LlmGateway, OpenRouterClient};
use crate::metadata::{self, MetadataOverrides};
use crate::models::{DocumentState, ItemStatus};
use crate::progress::{BatchProgressEvent, BatchProgressReporter, NoProgress, ProgressMode};
use crate::ragflow::{RagflowClient, RetrievalStore, UploadRequest};
use crate::retry::RetryPolicy;

/// Optional per-bundle file with explicit metadata (`source`, `year`, `category`).
const OVERRIDES_FILE: &str = "metadata.json";

/// Result of one bundle's run.
#[derive(Debug, Clone, PartialEq)]
pub enum DocOutcome {
    Completed {
        document_id: String,
        items: usize,
        page_warnings: usize,
    },
    Skipped {
        document_id: String,
    },
    Failed {
        document_id: Option<String>,
        error: String,
    },
}

impl DocOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            DocOutcome::Completed { .. } => "completed",
            DocOutcome::Skipped { .. } => "skipped",
            DocOutcome::Failed { .. } => "failed",
        }
    }

    fn item_status(&self) -> ItemStatus {
        match self {
            DocOutcome::Completed { .. } => ItemStatus::Completed,
            DocOutcome::Skipped { .. } => ItemStatus::Skipped,
            DocOutcome::Failed { .. } => ItemStatus::Failed,
        }
    }

    fn document_id(&self) -> Option<&str> {
        match self {
            DocOutcome::Completed { document_id, .. } | DocOutcome::Skipped { document_id } => {
                Some(document_id.as_str())
            }
            DocOutcome::Failed { document_id, .. } => document_id.as_deref(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub concurrent: usize,
    pub force: bool,
    /// `batch` or `reprocess`; stored as the job kind.
    pub kind: &'static str,
    pub actor: String,
}

impl BatchOptions {
    pub fn reprocess(actor: &str) -> Self {
        Self {
            concurrent: 1,
            force: true,
            kind: "reprocess",
            actor: actor.to_string(),
        }
    }
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            concurrent: 5,
            force: false,
            kind: "batch",
            actor: "cli".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub job_id: String,
    pub total: usize,
    pub completed: usize,
    pub skipped: usize,
    pub failed: usize,
    /// `(bundle_key, error record)` for every failed bundle.
    pub errors: Vec<(String, String)>,
}

/// A job whose items are recorded but not yet run.
#[derive(Debug)]
pub struct SubmittedBatch {
    pub job_id: String,
    queue: Vec<(String, PathBuf)>,
}

struct ExistingDoc {
    id: String,
    state: String,
    content_hash: String,
    store_doc_id: Option<String>,
}

/// Shared handles for the per-bundle tasks. Cheap to clone.
#[derive(Clone)]
pub struct Pipeline {
    pool: SqlitePool,
    store: Arc<dyn RetrievalStore>,
    gateway: Arc<dyn LlmGateway>,
    processing: ProcessingConfig,
    retry: RetryPolicy,
}

impl Pipeline {
    pub fn new(
        pool: SqlitePool,
        store: Arc<dyn RetrievalStore>,
        gateway: Arc<dyn LlmGateway>,
        processing: ProcessingConfig,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            pool,
            store,
            gateway,
            processing,
            retry,
        }
    }

    /// Runs every bundle under one job and waits for all of them.
    pub async fn process_batch(
        &self,
        bundles: Vec<PathBuf>,
        opts: &BatchOptions,
        reporter: &dyn BatchProgressReporter,
    ) -> Result<BatchReport, HubError> {
        let batch = self.submit(bundles, opts).await?;
        self.run_submitted(batch, opts, reporter).await
    }

    /// Creates the job and its pending items without running anything.
    pub async fn submit(&self, bundles: Vec<PathBuf>, opts: &BatchOptions) -> Result<SubmittedBatch, HubError> {
        let mut seen = std::collections::HashSet::new();
        let mut queue = Vec::with_capacity(bundles.len());
        for path in bundles {
            let key = bundle::bundle_key(&path).unwrap_or_else(|_| path.display().to_string());
            if seen.insert(key.clone()) {
                queue.push((key, path));
            } else {
                tracing::warn!("duplicate bundle key '{}' ignored: {}", key, path.display());
            }
        }

        let keys: Vec<String> = queue.iter().map(|(k, _)| k.clone()).collect();
        let job_id = jobs::create_job(&self.pool, opts.kind, &keys).await?;
        audit::record(
            &self.pool,
            &opts.actor,
            "job.submit",
            &job_id,
            Some(&format!("{} bundles, force={}", keys.len(), opts.force)),
        )
        .await?;
        tracing::info!("job {} started with {} bundles", job_id, keys.len());
        Ok(SubmittedBatch { job_id, queue })
    }

    /// Runs a submitted batch to completion.
    pub async fn run_submitted(
        &self,
        batch: SubmittedBatch,
        opts: &BatchOptions,
        reporter: &dyn BatchProgressReporter,
    ) -> Result<BatchReport, HubError> {
        let SubmittedBatch { job_id, queue } = batch;
        let total = queue.len();
        reporter.report(BatchProgressEvent::Started {
            job_id: job_id.clone(),
            total: total as u64,
        });

        let semaphore = Arc::new(Semaphore::new(opts.concurrent.max(1)));
        let mut set = JoinSet::new();
        for (key, path) in queue {
            let pipeline = self.clone();
            let semaphore = semaphore.clone();
            let job_id = job_id.clone();
            let force = opts.force;
            set.spawn(async move {
                let outcome = match semaphore.acquire_owned().await {
                    Ok(_permit) => pipeline.run_item(&job_id, &key, &path, force).await,
                    Err(e) => DocOutcome::Failed {
                        document_id: None,
                        error: format!("scheduler closed: {}", e),
                    },
                };
                (key, outcome)
            });
        }

        let mut report = BatchReport {
            job_id: job_id.clone(),
            total,
            ..Default::default()
        };
        let mut done = 0u64;
        while let Some(joined) = set.join_next().await {
            let (key, outcome) = match joined {
                Ok(pair) => pair,
                Err(e) => {
                    tracing::error!("bundle task aborted: {}", e);
                    continue;
                }
            };
            done += 1;
            reporter.report(BatchProgressEvent::Finished {
                bundle_key: key.clone(),
                outcome: outcome.label(),
                n: done,
                total: total as u64,
            });
            match outcome {
                DocOutcome::Completed { .. } => report.completed += 1,
                DocOutcome::Skipped { .. } => report.skipped += 1,
                DocOutcome::Failed { error, .. } => {
                    report.failed += 1;
                    report.errors.push((key, error));
                }
            }
        }

        // A task that panicked never reported; close its item so the job finalizes.
        let orphans: Vec<String> = sqlx::query_scalar(
            "SELECT bundle_key FROM job_items WHERE job_id = ? AND status IN ('pending', 'processing')",
        )
        .bind(&job_id)
        .fetch_all(&self.pool)
        .await?;
        for key in orphans {
            jobs::record_item(&self.pool, &job_id, &key, ItemStatus::Failed, None, Some("task aborted"))
                .await?;
            report.failed += 1;
            report.errors.push((key, "task aborted".to_string()));
        }

        let summary = format!(
            "{} completed, {} skipped, {} failed",
            report.completed, report.skipped, report.failed
        );
        audit::record(&self.pool, &opts.actor, "job.complete", &job_id, Some(&summary)).await?;
        tracing::info!("job {} done: {}", job_id, summary);

        Ok(report)
    }

    async fn run_item(&self, job_id: &str, key: &str, path: &Path, force: bool) -> DocOutcome {
        if let Err(e) = jobs::mark_item_started(&self.pool, job_id, key).await {
            tracing::warn!("could not mark {} as processing: {}", key, e);
        }

        let outcome = self.process_one(path, force).await;
        let error = match &outcome {
            DocOutcome::Failed { error, .. } => Some(error.as_str()),
            _ => None,
        };
        if let Err(e) = jobs::record_item(
            &self.pool,
            job_id,
            key,
            outcome.item_status(),
            outcome.document_id(),
            error,
        )
        .await
        {
            tracing::error!("could not record outcome for {}: {}", key, e);
        }
        outcome
    }

    /// Bundle directory a stored document was ingested from. Fails with
    /// `BadRequest` when the directory is gone, before any job is created.
    pub async fn bundle_path(&self, document_id: &str) -> Result<PathBuf, HubError> {
        let path: String = sqlx::query_scalar("SELECT bundle_path FROM documents WHERE id = ?")
            .bind(document_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| HubError::DocumentNotFound(document_id.to_string()))?;
        let path = PathBuf::from(path);
        if !path.is_dir() {
            return Err(HubError::BadRequest(format!(
                "bundle for document {} is no longer available: {}",
                document_id,
                path.display()
            )));
        }
        Ok(path)
    }

    /// Forces a fresh run of one stored document and waits for it.
    pub async fn reprocess(&self, document_id: &str, actor: &str) -> Result<BatchReport, HubError> {
        let path = self.bundle_path(document_id).await?;
        self.process_batch(vec![path], &BatchOptions::reprocess(actor), &NoProgress)
            .await
    }

    /// Runs the full sequence for one bundle. Never returns an error: every
    /// failure becomes [`DocOutcome::Failed`].
    pub async fn process_one(&self, path: &Path, force: bool) -> DocOutcome {
        let bundle = match bundle::parse_bundle(path) {
            Ok(b) => b,
            Err(err) => {
                tracing::warn!("{}: {}", path.display(), err);
                // Only an already-known document gets a failure record, and a
                // completed one keeps its extraction.
                let document_id = match bundle::bundle_key(path) {
                    Ok(key) => match self.find_existing(&key).await {
                        Ok(Some(doc)) => {
                            if doc.state != DocumentState::Completed.as_str() {
                                self.mark_failed(&doc.id, &err).await;
                            }
                            Some(doc.id)
                        }
                        _ => None,
                    },
                    Err(_) => None,
                };
                return DocOutcome::Failed {
                    document_id,
                    error: err.to_record(),
                };
            }
        };

        let existing = match self.find_existing(&bundle.key).await {
            Ok(doc) => doc,
            Err(e) => {
                return DocOutcome::Failed {
                    document_id: None,
                    error: e.to_record(),
                }
            }
        };
        if let Some(doc) = &existing {
            if doc.state == DocumentState::Completed.as_str() && !force {
                tracing::debug!("{} already completed, skipping", bundle.key);
                return DocOutcome::Skipped {
                    document_id: doc.id.clone(),
                };
            }
        }

        let document_id = match self.upsert_processing(&bundle, existing.as_ref()).await {
            Ok(id) => id,
            Err(e) => {
                return DocOutcome::Failed {
                    document_id: existing.map(|d| d.id),
                    error: e.to_record(),
                }
            }
        };

        match self.run_stages(&bundle, &document_id, existing.as_ref()).await {
            Ok((items, page_warnings)) => {
                tracing::info!(
                    "{} completed: {} items, {} page warnings",
                    bundle.key,
                    items,
                    page_warnings
                );
                DocOutcome::Completed {
                    document_id,
                    items,
                    page_warnings,
                }
            }
            Err(err) => {
                tracing::warn!("{} failed: {}", bundle.key, err);
                self.mark_failed(&document_id, &err).await;
                DocOutcome::Failed {
                    document_id: Some(document_id),
                    error: err.to_record(),
                }
            }
        }
    }

    async fn run_stages(
        &self,
        bundle: &Bundle,
        document_id: &str,
        existing: Option<&ExistingDoc>,
    ) -> Result<(usize, usize), HubError> {
        let overrides = read_overrides(&bundle.path);
        let meta = metadata::infer_with(&bundle.key, &bundle.text, &overrides);
        self.store_metadata(document_id, &meta).await?;

        // Unchanged text keeps its store document.
        let reusable = existing
            .filter(|d| d.content_hash == bundle.content_hash)
            .and_then(|d| d.store_doc_id.clone());
        let store_doc_id = match reusable {
            Some(id) => id,
            None => {
                let id = self.upload(bundle).await?;
                sqlx::query("UPDATE documents SET store_doc_id = ?, updated_at = ? WHERE id = ?")
                    .bind(&id)
                    .bind(chrono::Utc::now().timestamp())
                    .bind(document_id)
                    .execute(&self.pool)
                    .await?;
                if let Some(stale) = existing.and_then(|d| d.store_doc_id.as_deref()) {
                    if stale != id {
                        self.remove_stale(&bundle.key, stale).await;
                    }
                }
                id
            }
        };

        let input = ExtractionInput {
            title: &bundle.title,
            source: &meta.source,
            year: meta.year,
            page_count: bundle.page_count,
            text: &bundle.text,
        };
        let output = extraction::extract(
            self.gateway.as_ref(),
            &input,
            self.processing.max_content_chars,
            self.processing.extraction_retries,
        )
        .await?;
        tracing::debug!(
            "{} extracted by {} in {} attempt(s)",
            bundle.key,
            output.model,
            output.attempts
        );

        let warnings = extraction::page_warnings(&output.intelligence, &bundle.known_pages());
        for w in &warnings {
            tracing::warn!("{}: {}", bundle.key, w);
        }

        persist_success(&self.pool, document_id, &store_doc_id, &output, &warnings)
            .await
            .map_err(|e| HubError::StorageWrite(e.to_string()))?;

        Ok((output.intelligence.item_count(), warnings.len()))
    }

    async fn upload(&self, bundle: &Bundle) -> Result<String, HubError> {
        let req = UploadRequest {
            name: &bundle.key,
            text: &bundle.text,
        };
        let label = format!("upload {}", bundle.key);
        self.retry
            .run(&label, || self.store.upload_document(&req), StoreError::is_retryable)
            .await
            .map_err(|e| HubError::IndexUpload(e.to_string()))
    }

    /// Drops the store copy of superseded text. A failure leaves a
    /// duplicate in the store but does not fail the document.
    async fn remove_stale(&self, key: &str, store_doc_id: &str) {
        let label = format!("delete {}", store_doc_id);
        let result = self
            .retry
            .run(&label, || self.store.delete_document(store_doc_id), StoreError::is_retryable)
            .await;
        match result {
            Ok(()) => tracing::info!("{}: removed superseded store document {}", key, store_doc_id),
            Err(e) => tracing::warn!(
                "{}: could not remove superseded store document {}: {}",
                key,
                store_doc_id,
                e
            ),
        }
    }

    async fn find_existing(&self, key: &str) -> Result<Option<ExistingDoc>, HubError> {
        let row = sqlx::query(
            "SELECT id, state, content_hash, store_doc_id FROM documents WHERE bundle_key = ?",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| ExistingDoc {
            id: r.get("id"),
            state: r.get("state"),
            content_hash: r.get("content_hash"),
            store_doc_id: r.get("store_doc_id"),
        }))
    }

    async fn upsert_processing(
        &self,
        bundle: &Bundle,
        existing: Option<&ExistingDoc>,
    ) -> Result<String, HubError> {
        let now = chrono::Utc::now().timestamp();
        let candidate = existing
            .map(|d| d.id.clone())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let id: String = sqlx::query_scalar(
            r#"
            INSERT INTO documents (id, bundle_key, title, page_count, bundle_path, content_hash,
                                   state, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, 'processing', ?, ?)
            ON CONFLICT(bundle_key) DO UPDATE SET
                title = excluded.title,
                page_count = excluded.page_count,
                bundle_path = excluded.bundle_path,
                content_hash = excluded.content_hash,
                state = 'processing',
                error = NULL,
                updated_at = excluded.updated_at
            RETURNING id
            "#,
        )
        .bind(&candidate)
        .bind(&bundle.key)
        .bind(&bundle.title)
        .bind(bundle.page_count)
        .bind(bundle.path.to_string_lossy().to_string())
        .bind(&bundle.content_hash)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    async fn store_metadata(
        &self,
        document_id: &str,
        meta: &metadata::DocumentMetadata,
    ) -> Result<(), HubError> {
        sqlx::query("UPDATE documents SET source = ?, year = ?, category = ?, updated_at = ? WHERE id = ?")
            .bind(&meta.source)
            .bind(meta.year)
            .bind(&meta.category)
            .bind(chrono::Utc::now().timestamp())
            .bind(document_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn mark_failed(&self, document_id: &str, err: &HubError) {
        let result = sqlx::query("UPDATE documents SET state = 'failed', error = ?, updated_at = ? WHERE id = ?")
            .bind(err.to_record())
            .bind(chrono::Utc::now().timestamp())
            .bind(document_id)
            .execute(&self.pool)
            .await;
        if let Err(e) = result {
            tracing::error!("could not mark document {} failed: {}", document_id, e);
        }
    }
}

/// Marks the document completed and replaces its items, all in one
/// transaction.
pub async fn persist_success(
    pool: &SqlitePool,
    document_id: &str,
    store_doc_id: &str,
    output: &ExtractionOutput,
    page_warnings: &[String],
) -> Result<(), sqlx::Error> {
    let intel = &output.intelligence;
    let now = chrono::Utc::now().timestamp();
    let payload = serde_json::to_string(intel).unwrap_or_else(|_| "{}".to_string());
    let warnings = serde_json::to_string(page_warnings).unwrap_or_else(|_| "[]".to_string());

    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        UPDATE documents SET
            state = 'completed',
            error = NULL,
            summary = ?,
            briefing_hook = ?,
            intelligence_json = ?,
            page_warnings_json = ?,
            store_doc_id = ?,
            processed_at = ?,
            updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(&intel.summary)
    .bind(&intel.briefing_hook)
    .bind(&payload)
    .bind(&warnings)
    .bind(store_doc_id)
    .bind(now)
    .bind(now)
    .bind(document_id)
    .execute(&mut *tx)
    .await?;

    sqlx::query("DELETE FROM extracted_items WHERE document_id = ?")
        .bind(document_id)
        .execute(&mut *tx)
        .await?;

    for (kind, position, item) in intel.entries() {
        let tags = serde_json::to_string(&item.tags).unwrap_or_else(|_| "[]".to_string());
        sqlx::query(
            r#"
            INSERT INTO extracted_items (id, document_id, item_type, body, context, significance,
                                         page, tags_json, position, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(document_id)
        .bind(kind.as_str())
        .bind(&item.body)
        .bind(&item.context)
        .bind(&item.significance)
        .bind(item.page)
        .bind(&tags)
        .bind(position as i64)
        .bind(now)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(())
}

fn read_overrides(bundle_path: &Path) -> MetadataOverrides {
    let path = bundle_path.join(OVERRIDES_FILE);
    let Ok(raw) = std::fs::read_to_string(&path) else {
        return MetadataOverrides::default();
    };
    match serde_json::from_str(&raw) {
        Ok(o) => o,
        Err(e) => {
            tracing::warn!("ignoring malformed {}: {}", path.display(), e);
            MetadataOverrides::default()
        }
    }
}

/// Immediate subdirectories of `root`, sorted by name, minus hidden ones and
/// those matching `exclude`, after skipping `start` and keeping at most `limit`.
pub fn discover_bundles(
    root: &Path,
    exclude: &[String],
    start: usize,
    limit: Option<usize>,
) -> Result<Vec<PathBuf>> {
    if !root.is_dir() {
        bail!("Reports directory not found: {}", root.display());
    }
    let exclude_set = build_globset(exclude)?;

    let mut dirs: Vec<PathBuf> = WalkDir::new(root)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_dir())
        .filter(|e| {
            let name = e.file_name().to_string_lossy();
            !name.starts_with('.') && !exclude_set.is_match(name.as_ref())
        })
        .map(|e| e.into_path())
        .collect();

    dirs = dirs.into_iter().skip(start).collect();
    if let Some(limit) = limit {
        dirs.truncate(limit);
    }
    Ok(dirs)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("Invalid exclude glob: {}", pattern))?);
    }
    Ok(builder.build()?)
}

#[derive(Debug, Clone)]
pub struct ProcessArgs {
    pub path: Option<PathBuf>,
    pub archive: Option<PathBuf>,
    pub limit: Option<usize>,
    pub start: usize,
    pub concurrent: Option<usize>,
    pub force: bool,
    pub dry_run: bool,
    pub progress: ProgressMode,
}

fn pipeline_from_env(config: &Config, pool: SqlitePool) -> Result<Pipeline> {
    let store = RagflowClient::from_env(&config.retrieval)?;
    let gateway = OpenRouterClient::from_env(&config.llm)?;
    Ok(Pipeline::new(
        pool,
        Arc::new(store),
        Arc::new(gateway),
        config.processing.clone(),
        RetryPolicy::from_config(&config.retry),
    ))
}

/// CLI entry point for `hub process`.
pub async fn run_process(config: &Config, args: ProcessArgs) -> Result<()> {
    // Archive contents are unpacked here, then copied to the bundles directory.
    let mut scratch: Option<tempfile::TempDir> = None;

    let root = match (&args.archive, &args.path) {
        (Some(archive_path), _) => {
            let dir = tempfile::TempDir::new().context("Failed to create scratch directory")?;
            let root = archive::unpack(archive_path, dir.path())?;
            scratch = Some(dir);
            root
        }
        (None, Some(path)) => path.clone(),
        (None, None) => match &config.processing.reports_path {
            Some(p) => p.clone(),
            None => bail!("No reports directory. Pass --path, --archive, or set processing.reports_path"),
        },
    };

    let bundles = discover_bundles(&root, &config.processing.exclude_globs, args.start, args.limit)?;

    if args.dry_run {
        println!("process (dry-run)");
        println!("  root: {}", root.display());
        println!("  bundles: {}", bundles.len());
        for path in &bundles {
            println!("    {}", path.file_name().unwrap_or_default().to_string_lossy());
        }
        return Ok(());
    }

    let bundles = match scratch.take() {
        Some(dir) => {
            let kept = archive::keep_bundles(&bundles, &config.bundles_dir())?;
            drop(dir);
            kept
        }
        None => bundles,
    };

    let pool = db::connect(config).await?;
    let pipeline = pipeline_from_env(config, pool.clone())?;
    let opts = BatchOptions {
        concurrent: args.concurrent.unwrap_or(config.processing.max_concurrent),
        force: args.force,
        ..Default::default()
    };
    let reporter = args.progress.reporter();
    let report = pipeline.process_batch(bundles, &opts, reporter.as_ref()).await?;

    println!("process");
    println!("  job: {}", report.job_id);
    println!("  bundles: {}", report.total);
    println!("  completed: {}", report.completed);
    println!("  skipped: {}", report.skipped);
    println!("  failed: {}", report.failed);
    for (key, err) in &report.errors {
        println!("    {}: {}", key, err);
    }
    println!("ok");

    pool.close().await;
    Ok(())
}

/// CLI entry point for `hub reprocess <id>`.
pub async fn run_reprocess(config: &Config, document_id: &str) -> Result<()> {
    let pool = db::connect(config).await?;
    let pipeline = pipeline_from_env(config, pool.clone())?;
    let report = pipeline.reprocess(document_id, "cli").await;
    pool.close().await;
    let report = report?;

    println!("reprocess {}", document_id);
    println!("  job: {}", report.job_id);
    match report.errors.first() {
        Some((_, err)) => println!("  failed: {}", err),
        None => println!("ok"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discover_sorts_and_windows() {
        let tmp = tempfile::TempDir::new().unwrap();
        for name in ["c_report", "a_report", "b_report", ".hidden", "_drafts"] {
            std::fs::create_dir(tmp.path().join(name)).unwrap();
        }
        std::fs::write(tmp.path().join("notes.txt"), "x").unwrap();

        let all = discover_bundles(tmp.path(), &["_*".to_string()], 0, None).unwrap();
        let names: Vec<_> = all
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a_report", "b_report", "c_report"]);

        let window = discover_bundles(tmp.path(), &[], 1, Some(1)).unwrap();
        assert_eq!(window.len(), 1);
        assert!(window[0].ends_with("a_report"));
    }

    #[test]
    fn overrides_default_when_absent_or_malformed() {
        let tmp = tempfile::TempDir::new().unwrap();
        assert!(read_overrides(tmp.path()).source.is_none());

        std::fs::write(tmp.path().join(OVERRIDES_FILE), "{not json").unwrap();
        assert!(read_overrides(tmp.path()).source.is_none());

        std::fs::write(
            tmp.path().join(OVERRIDES_FILE),
            r#"{"source": "WEF", "year": 2023}"#,
        )
        .unwrap();
        let o = read_overrides(tmp.path());
        assert_eq!(o.source.as_deref(), Some("WEF"));
        assert_eq!(o.year, Some(2023));
    }
}
