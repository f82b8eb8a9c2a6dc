//! Shared fixtures: in-memory fakes of the retrieval store and LLM gateway,
//! bundle writers, and a migrated scratch database.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use sqlx::SqlitePool;
use tempfile::TempDir;

use intel_hub::config::Config;
use intel_hub::error::{GatewayError, StoreError};
use intel_hub::ingest::Pipeline;
use intel_hub::llm::{Completion, CompletionRequest, LlmGateway, ModelTier};
use intel_hub::models::RetrievedChunk;
use intel_hub::ragflow::{RetrievalQuery, RetrievalStore, UploadRequest};
use intel_hub::retry::RetryPolicy;
use intel_hub::{db, migrate};

// ============ Retrieval store ============

#[derive(Default)]
pub struct FakeStore {
    pub uploads: AtomicUsize,
    /// Upload attempts that fail with HTTP 503 before one succeeds.
    pub upload_failures: AtomicUsize,
    pub chunks: Mutex<Vec<RetrievedChunk>>,
    pub queries: Mutex<Vec<RetrievalQuery>>,
    /// Names of successful uploads, in order.
    pub stored: Mutex<Vec<String>>,
    pub deleted: Mutex<Vec<String>>,
    pub retrieval_down: std::sync::atomic::AtomicBool,
}

impl FakeStore {
    pub fn with_chunks(chunks: Vec<RetrievedChunk>) -> Self {
        Self {
            chunks: Mutex::new(chunks),
            ..Default::default()
        }
    }

    pub fn retrieve_calls(&self) -> usize {
        self.queries.lock().unwrap().len()
    }
}

#[async_trait]
impl RetrievalStore for FakeStore {
    async fn upload_document(&self, req: &UploadRequest<'_>) -> Result<String, StoreError> {
        self.uploads.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .upload_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(StoreError::Http {
                status: 503,
                body: "busy".to_string(),
            });
        }
        // First upload of a name is `store-<name>`; later ones get a version suffix.
        let mut stored = self.stored.lock().unwrap();
        let earlier = stored.iter().filter(|n| n.as_str() == req.name).count();
        stored.push(req.name.to_string());
        Ok(match earlier {
            0 => format!("store-{}", req.name),
            n => format!("store-{}-v{}", req.name, n + 1),
        })
    }

    async fn retrieve(&self, query: &RetrievalQuery) -> Result<Vec<RetrievedChunk>, StoreError> {
        self.queries.lock().unwrap().push(query.clone());
        if self.retrieval_down.load(Ordering::SeqCst) {
            return Err(StoreError::Connection("connection refused".to_string()));
        }
        Ok(self.chunks.lock().unwrap().clone())
    }

    async fn delete_document(&self, store_doc_id: &str) -> Result<(), StoreError> {
        self.deleted.lock().unwrap().push(store_doc_id.to_string());
        Ok(())
    }
}

pub fn chunk(store_doc_id: &str, content: &str, page: Option<i64>) -> RetrievedChunk {
    RetrievedChunk {
        store_doc_id: store_doc_id.to_string(),
        doc_name: format!("{}.md", store_doc_id),
        content: content.to_string(),
        page,
        score: 0.9,
    }
}

// ============ LLM gateway ============

/// Scripted gateway. Queued replies are used first, in order; after that
/// extraction calls get the payload of the first marker found in the
/// prompt (or the default payload), and other tiers get canned text.
pub struct FakeGateway {
    pub requests: Mutex<Vec<CompletionRequest>>,
    pub queued: Mutex<VecDeque<Result<String, GatewayError>>>,
    pub extraction_default: Mutex<String>,
    pub extraction_by_marker: Mutex<Vec<(String, String)>>,
    pub fail_all: std::sync::atomic::AtomicBool,
}

impl Default for FakeGateway {
    fn default() -> Self {
        Self {
            requests: Mutex::new(Vec::new()),
            queued: Mutex::new(VecDeque::new()),
            extraction_default: Mutex::new(payload(1, 1, 1, 1, 1)),
            extraction_by_marker: Mutex::new(Vec::new()),
            fail_all: std::sync::atomic::AtomicBool::new(false),
        }
    }
}

impl FakeGateway {
    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn calls_for(&self, tier: ModelTier) -> usize {
        self.requests.lock().unwrap().iter().filter(|r| r.tier == tier).count()
    }

    pub fn push_reply(&self, reply: Result<String, GatewayError>) {
        self.queued.lock().unwrap().push_back(reply);
    }

    pub fn extract_for(&self, marker: &str, reply: impl Into<String>) {
        self.extraction_by_marker
            .lock()
            .unwrap()
            .push((marker.to_string(), reply.into()));
    }

    pub fn set_failing(&self, failing: bool) {
        self.fail_all.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl LlmGateway for FakeGateway {
    async fn complete(&self, req: CompletionRequest) -> Result<Completion, GatewayError> {
        let prompt = req
            .messages
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        let tier = req.tier;
        let step = {
            let mut requests = self.requests.lock().unwrap();
            requests.push(req);
            requests.len()
        };

        if self.fail_all.load(Ordering::SeqCst) {
            return Err(GatewayError::Api {
                status: 503,
                body: "upstream unavailable".to_string(),
            });
        }

        let queued = self.queued.lock().unwrap().pop_front();
        let content = match queued {
            Some(reply) => reply?,
            None => match tier {
                ModelTier::Extraction => {
                    let markers = self.extraction_by_marker.lock().unwrap();
                    markers
                        .iter()
                        .find(|(m, _)| prompt.contains(m.as_str()))
                        .map(|(_, r)| r.clone())
                        .unwrap_or_else(|| self.extraction_default.lock().unwrap().clone())
                }
                ModelTier::Chat => "Grounded answer [1].".to_string(),
                ModelTier::Reasoning => format!("reasoning output {}", step),
                ModelTier::Fast => r#"{"enhanced": "expanded query", "improvements": ["added scope"]}"#.to_string(),
            },
        };

        Ok(Completion {
            content,
            model: "fake/model".to_string(),
            prompt_tokens: 10,
            completion_tokens: 5,
        })
    }
}

/// A valid extraction payload with the given number of entries per list.
pub fn payload(findings: usize, statistics: usize, quotes: usize, insights: usize, recommendations: usize) -> String {
    let findings: Vec<_> = (0..findings)
        .map(|i| serde_json::json!({"finding": format!("finding {}", i), "page": 1, "category": "economy"}))
        .collect();
    let statistics: Vec<_> = (0..statistics)
        .map(|i| serde_json::json!({"stat": format!("{}% growth", i + 10), "page": 2}))
        .collect();
    let quotes: Vec<_> = (0..quotes)
        .map(|i| serde_json::json!({"quote": format!("quote {}", i), "speaker": "Analyst"}))
        .collect();
    let insights: Vec<_> = (0..insights)
        .map(|i| serde_json::json!({"insight": format!("insight {}", i)}))
        .collect();
    let recommendations: Vec<_> = (0..recommendations)
        .map(|i| serde_json::json!({"recommendation": format!("recommendation {}", i)}))
        .collect();

    serde_json::json!({
        "executive_summary": {
            "core_message": "The core message.",
            "key_takeaways": "Takeaways.",
            "briefing_hook": "Open with this."
        },
        "key_findings": findings,
        "statistics": statistics,
        "quotes": quotes,
        "aha_moments": insights,
        "recommendations": recommendations,
        "methodology": "Survey of 500 firms."
    })
    .to_string()
}

// ============ Bundles and database ============

/// Writes `<root>/<key>/<key>.md` and a content list covering `pages`.
pub fn write_bundle(root: &Path, key: &str, markdown: &str, pages: &[i64]) -> PathBuf {
    let dir = root.join(key);
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join(format!("{}.md", key)), markdown).unwrap();
    let blocks: Vec<_> = pages
        .iter()
        .map(|p| serde_json::json!({"page_idx": p - 1, "text": format!("page {}", p)}))
        .collect();
    std::fs::write(
        dir.join(format!("{}_content_list.json", key)),
        serde_json::to_string(&blocks).unwrap(),
    )
    .unwrap();
    dir
}

pub fn test_config(dir: &Path) -> Config {
    let toml = format!(
        r#"
[db]
path = "{}"

[retry]
max_attempts = 3
base_delay_ms = 1
max_delay_ms = 2
"#,
        dir.join("data").join("hub.sqlite").display()
    );
    let cfg: Config = toml::from_str(&toml).unwrap();
    intel_hub::config::validate(&cfg).unwrap();
    cfg
}

pub struct Harness {
    pub tmp: TempDir,
    pub config: Config,
    pub pool: SqlitePool,
    pub store: Arc<FakeStore>,
    pub gateway: Arc<FakeGateway>,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with(FakeStore::default(), FakeGateway::default()).await
    }

    pub async fn with(store: FakeStore, gateway: FakeGateway) -> Self {
        let tmp = TempDir::new().unwrap();
        let config = test_config(tmp.path());
        let pool = db::connect(&config).await.unwrap();
        migrate::apply(&pool).await.unwrap();
        Self {
            tmp,
            config,
            pool,
            store: Arc::new(store),
            gateway: Arc::new(gateway),
        }
    }

    pub fn reports(&self) -> PathBuf {
        let dir = self.tmp.path().join("reports");
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    pub fn pipeline(&self) -> Pipeline {
        Pipeline::new(
            self.pool.clone(),
            self.store.clone(),
            self.gateway.clone(),
            self.config.processing.clone(),
            RetryPolicy::from_config(&self.config.retry),
        )
    }

    /// Inserts a completed, indexed document and returns its id.
    pub async fn seed_document(&self, id: &str, title: &str, store_doc_id: Option<&str>) -> String {
        sqlx::query(
            r#"
            INSERT INTO documents (id, bundle_key, title, source, year, category, page_count,
                                   bundle_path, content_hash, store_doc_id, state, summary,
                                   created_at, updated_at)
            VALUES (?, ?, ?, 'IMF', 2024, 'Research', 10, ?, 'hash', ?, 'completed', 'Summary.', 1, 1)
            "#,
        )
        .bind(id)
        .bind(format!("bundle-{}", id))
        .bind(title)
        .bind(self.tmp.path().join(id).display().to_string())
        .bind(store_doc_id)
        .execute(&self.pool)
        .await
        .unwrap();
        id.to_string()
    }

    pub async fn count(&self, sql: &str) -> i64 {
        sqlx::query_scalar(sql).fetch_one(&self.pool).await.unwrap()
    }
}
