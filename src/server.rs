//! HTTP API.
//!
//! JSON over axum. Caller identity comes from the `x-user-id` header
//! (authentication happens upstream); requests without it act as
//! `anonymous`. Conversations and preferences are scoped to that id.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `POST` | `/api/chat` | Chat in `single`, `all` or `minister` mode |
//! | `POST` | `/api/chat/enhance` | Rewrite a query for retrieval |
//! | `GET`  | `/api/chat/conversations` | Caller's conversations |
//! | `GET`/`DELETE` | `/api/chat/conversations/{id}` | Conversation with messages / delete |
//! | `GET`/`PUT` | `/api/chat/preferences` | Caller's default chat mode |
//! | `GET`  | `/api/library` | List and search documents |
//! | `GET`  | `/api/library/sources`, `/categories`, `/years` | Facet counts |
//! | `POST` | `/api/library/search` | Semantic search, one hit per document |
//! | `GET`  | `/api/library/{id}` | Document with full intelligence payload |
//! | `GET`  | `/api/library/{id}/brief` | One-page brief |
//! | `GET`  | `/api/library/{id}/related` | Documents with similar content |
//! | `GET`  | `/api/databank` | List and search extracted items |
//! | `GET`  | `/api/databank/stats`, `/api/databank/tags` | Aggregates |
//! | `GET`  | `/api/databank/{id}` | One extracted item |
//! | `GET`  | `/api/news` | Analysed articles |
//! | `POST` | `/api/news/analyze` | "So What?" analysis of an article |
//! | `GET`/`DELETE` | `/api/news/{id}` | One analysis / delete |
//! | `GET`  | `/api/processing/status` | Extraction coverage counts |
//! | `GET`  | `/api/processing/jobs`, `/api/processing/jobs/{id}` | Batch jobs |
//! | `POST` | `/api/processing/upload` | ZIP of report bundles (multipart `file`) |
//! | `POST` | `/api/processing/reprocess/{id}` | Force a fresh run of one document |
//!
//! Upload and reprocess return `202` with the new job; the batch keeps
//! running in the background.
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "not_found", "message": "document not found: 42" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `upstream_error` (502),
//! `timeout` (504), `internal` (500).

use std::convert::Infallible;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        DefaultBodyLimit, FromRequestParts, Multipart, Path, Query, State,
    },
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tower_http::cors::{Any, CorsLayer};

use crate::archive;
use crate::chat::{ChatRequest, ChatService};
use crate::config::Config;
use crate::databank::{self, DataBankQuery};
use crate::db;
use crate::error::HubError;
use crate::get::{get_brief, get_document};
use crate::ingest::{self, BatchOptions, Pipeline};
use crate::jobs;
use crate::llm::{LlmGateway, OpenRouterClient};
use crate::models::ChatMode;
use crate::news::{self, AnalyzeRequest, NewsAnalyzer};
use crate::progress::NoProgress;
use crate::ragflow::{RagflowClient, RetrievalStore};
use crate::retry::RetryPolicy;
use crate::search::{self, LibraryQuery, SemanticSearchRequest};
use crate::stats::processing_status;
use crate::web::{FirecrawlClient, Scraper, TavilyClient, WebSearch};

const USER_HEADER: &str = "x-user-id";
const ANONYMOUS: &str = "anonymous";

/// Shared handles for every route handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub pool: SqlitePool,
    pub store: Arc<dyn RetrievalStore>,
    pub chat: ChatService,
    pub news: NewsAnalyzer,
    pub pipeline: Pipeline,
}

impl AppState {
    pub fn new(
        config: Config,
        pool: SqlitePool,
        store: Arc<dyn RetrievalStore>,
        gateway: Arc<dyn LlmGateway>,
        web: Option<Arc<dyn WebSearch>>,
        scraper: Option<Arc<dyn Scraper>>,
    ) -> Self {
        let chat = ChatService::new(pool.clone(), store.clone(), gateway.clone(), config.retrieval.clone())
            .with_web(web, config.web.max_results);
        let news = NewsAnalyzer::new(pool.clone(), gateway.clone(), scraper, &config.web);
        let pipeline = Pipeline::new(
            pool.clone(),
            store.clone(),
            gateway,
            config.processing.clone(),
            RetryPolicy::from_config(&config.retry),
        );
        Self {
            config: Arc::new(config),
            pool,
            store,
            chat,
            news,
            pipeline,
        }
    }
}

/// Builds the application router over the given state.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);
    let upload_limit = state.config.server.max_upload_mb * 1024 * 1024;

    Router::new()
        .route("/health", get(handle_health))
        .route("/api/chat", post(handle_chat))
        .route("/api/chat/enhance", post(handle_enhance))
        .route("/api/chat/conversations", get(handle_list_conversations))
        .route(
            "/api/chat/conversations/{id}",
            get(handle_get_conversation).delete(handle_delete_conversation),
        )
        .route(
            "/api/chat/preferences",
            get(handle_get_preferences).put(handle_put_preferences),
        )
        .route("/api/library", get(handle_library))
        .route("/api/library/sources", get(handle_library_sources))
        .route("/api/library/categories", get(handle_library_categories))
        .route("/api/library/years", get(handle_library_years))
        .route("/api/library/search", post(handle_library_search))
        .route("/api/library/{id}", get(handle_library_get))
        .route("/api/library/{id}/brief", get(handle_library_brief))
        .route("/api/library/{id}/related", get(handle_library_related))
        .route("/api/databank", get(handle_databank))
        .route("/api/databank/stats", get(handle_databank_stats))
        .route("/api/databank/tags", get(handle_databank_tags))
        .route("/api/databank/{id}", get(handle_databank_get))
        .route("/api/news", get(handle_list_news))
        .route("/api/news/analyze", post(handle_analyze))
        .route("/api/news/{id}", get(handle_get_news).delete(handle_delete_news))
        .route("/api/processing/status", get(handle_processing_status))
        .route("/api/processing/jobs", get(handle_list_jobs))
        .route("/api/processing/jobs/{id}", get(handle_get_job))
        .route(
            "/api/processing/upload",
            post(handle_upload).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/api/processing/reprocess/{id}", post(handle_reprocess))
        .layer(cors)
        .with_state(state)
}

/// Starts the HTTP server on `[server].bind` with clients built from the
/// environment. Runs until the process is interrupted.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let pool = db::connect(config).await?;
    let store = RagflowClient::from_env(&config.retrieval)?;
    let gateway = OpenRouterClient::from_env(&config.llm)?;
    let web: Option<Arc<dyn WebSearch>> = match TavilyClient::from_env(&config.web) {
        Some(client) => Some(Arc::new(client?)),
        None => {
            tracing::info!("TAVILY_API_KEY not set; minister web step disabled");
            None
        }
    };
    let scraper: Option<Arc<dyn Scraper>> = match FirecrawlClient::from_env(&config.web) {
        Some(client) => Some(Arc::new(client?)),
        None => {
            tracing::info!("FIRECRAWL_API_KEY not set; news analysis needs supplied text");
            None
        }
    };

    let state = AppState::new(
        config.clone(),
        pool,
        Arc::new(store),
        Arc::new(gateway),
        web,
        scraper,
    );
    let app = router(state);

    let bind_addr = &config.server.bind;
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    println!("Intel Hub listening on http://{}", bind_addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
}

pub struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

fn internal(err: impl std::fmt::Display) -> AppError {
    tracing::error!("internal error: {}", err);
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal",
        message: "internal error".to_string(),
    }
}

impl From<HubError> for AppError {
    fn from(err: HubError) -> Self {
        if err.is_not_found() {
            return AppError {
                status: StatusCode::NOT_FOUND,
                code: "not_found",
                message: err.to_string(),
            };
        }
        if err.is_timeout() {
            return AppError {
                status: StatusCode::GATEWAY_TIMEOUT,
                code: "timeout",
                message: err.to_string(),
            };
        }
        match err {
            HubError::BadRequest(msg) => bad_request(msg),
            HubError::Gateway(_)
            | HubError::Retrieval(_)
            | HubError::Scrape(_)
            | HubError::WebSearch(_)
            | HubError::IndexUpload(_)
            | HubError::Extraction(_) => {
                tracing::warn!("upstream failure: {}", err);
                AppError {
                    status: StatusCode::BAD_GATEWAY,
                    code: "upstream_error",
                    message: err.to_string(),
                }
            }
            other => internal(other),
        }
    }
}

fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, AppError> {
    payload.map(|Json(v)| v).map_err(|e| bad_request(e.body_text()))
}

fn query_params<T>(params: Result<Query<T>, QueryRejection>) -> Result<T, AppError> {
    params.map(|Query(v)| v).map_err(|e| bad_request(e.body_text()))
}

// ============ Caller identity ============

/// Caller id from the `x-user-id` header, or `anonymous`.
pub struct UserId(pub String);

impl<S: Send + Sync> FromRequestParts<S> for UserId {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let id = parts
            .headers
            .get(USER_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(ANONYMOUS);
        Ok(UserId(id.to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct ListParams {
    #[serde(default)]
    limit: Option<i64>,
    #[serde(default)]
    offset: Option<i64>,
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

// ============ /api/chat ============

async fn handle_chat(
    State(state): State<AppState>,
    UserId(user): UserId,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let req = json_body(payload)?;
    let resp = state.chat.send(&user, req).await?;
    Ok(Json(resp))
}

#[derive(Debug, Deserialize)]
struct EnhanceRequest {
    query: String,
}

async fn handle_enhance(
    State(state): State<AppState>,
    payload: Result<Json<EnhanceRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let req = json_body(payload)?;
    if req.query.trim().is_empty() {
        return Err(bad_request("query must not be empty"));
    }
    Ok(Json(state.chat.enhance_query(req.query.trim()).await?))
}

async fn handle_list_conversations(
    State(state): State<AppState>,
    UserId(user): UserId,
    params: Result<Query<ListParams>, QueryRejection>,
) -> Result<impl IntoResponse, AppError> {
    let p = query_params(params)?;
    let list = state
        .chat
        .list_conversations(&user, p.limit.unwrap_or(20), p.offset.unwrap_or(0))
        .await?;
    Ok(Json(list))
}

async fn handle_get_conversation(
    State(state): State<AppState>,
    UserId(user): UserId,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.chat.get_conversation(&user, &id).await?))
}

async fn handle_delete_conversation(
    State(state): State<AppState>,
    UserId(user): UserId,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    state.chat.delete_conversation(&user, &id).await?;
    Ok(Json(serde_json::json!({ "deleted": id })))
}

#[derive(Debug, Serialize, Deserialize)]
struct Preferences {
    default_mode: ChatMode,
}

async fn handle_get_preferences(
    State(state): State<AppState>,
    UserId(user): UserId,
) -> Result<impl IntoResponse, AppError> {
    let default_mode = state.chat.default_mode(&user).await?;
    Ok(Json(Preferences { default_mode }))
}

async fn handle_put_preferences(
    State(state): State<AppState>,
    UserId(user): UserId,
    payload: Result<Json<Preferences>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let prefs = json_body(payload)?;
    state.chat.set_default_mode(&user, prefs.default_mode).await?;
    Ok(Json(prefs))
}

// ============ /api/library ============

async fn handle_library(
    State(state): State<AppState>,
    params: Result<Query<LibraryQuery>, QueryRejection>,
) -> Result<impl IntoResponse, AppError> {
    let q = query_params(params)?;
    Ok(Json(search::search_documents(&state.pool, &q).await?))
}

async fn handle_library_sources(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    Ok(Json(search::sources(&state.pool).await?))
}

async fn handle_library_categories(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    Ok(Json(search::categories(&state.pool).await?))
}

async fn handle_library_years(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    Ok(Json(search::years(&state.pool).await?))
}

async fn handle_library_get(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(get_document(&state.pool, &id).await?))
}

async fn handle_library_search(
    State(state): State<AppState>,
    payload: Result<Json<SemanticSearchRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let req = json_body(payload)?;
    Ok(Json(search::semantic_search(&state.pool, state.store.as_ref(), &req).await?))
}

async fn handle_library_brief(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(get_brief(&state.pool, &id).await?))
}

#[derive(Debug, Deserialize)]
struct RelatedParams {
    #[serde(default)]
    limit: Option<usize>,
}

async fn handle_library_related(
    State(state): State<AppState>,
    Path(id): Path<String>,
    params: Result<Query<RelatedParams>, QueryRejection>,
) -> Result<impl IntoResponse, AppError> {
    let p = query_params(params)?;
    let related =
        search::related_documents(&state.pool, state.store.as_ref(), &id, p.limit.unwrap_or(10)).await?;
    Ok(Json(related))
}

// ============ /api/databank ============

async fn handle_databank(
    State(state): State<AppState>,
    params: Result<Query<DataBankQuery>, QueryRejection>,
) -> Result<impl IntoResponse, AppError> {
    let q = query_params(params)?;
    Ok(Json(databank::list_items(&state.pool, &q).await?))
}

async fn handle_databank_stats(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    Ok(Json(databank::databank_stats(&state.pool).await?))
}

async fn handle_databank_tags(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    Ok(Json(databank::all_tags(&state.pool).await?))
}

async fn handle_databank_get(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(databank::get_item(&state.pool, &id).await?))
}

// ============ /api/news ============

async fn handle_list_news(
    State(state): State<AppState>,
    params: Result<Query<ListParams>, QueryRejection>,
) -> Result<impl IntoResponse, AppError> {
    let p = query_params(params)?;
    let items = news::list_news(&state.pool, p.limit.unwrap_or(20), p.offset.unwrap_or(0)).await?;
    Ok(Json(items))
}

async fn handle_analyze(
    State(state): State<AppState>,
    payload: Result<Json<AnalyzeRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let req = json_body(payload)?;
    Ok(Json(state.news.analyze(req).await?))
}

async fn handle_get_news(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(news::get_news(&state.pool, &id).await?))
}

async fn handle_delete_news(
    State(state): State<AppState>,
    UserId(user): UserId,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    news::delete_news(&state.pool, &id, &user).await?;
    Ok(Json(serde_json::json!({ "deleted": id })))
}

// ============ /api/processing ============

async fn handle_processing_status(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    Ok(Json(processing_status(&state.pool).await?))
}

async fn handle_list_jobs(
    State(state): State<AppState>,
    params: Result<Query<ListParams>, QueryRejection>,
) -> Result<impl IntoResponse, AppError> {
    let p = query_params(params)?;
    Ok(Json(jobs::list_jobs(&state.pool, p.limit.unwrap_or(20)).await?))
}

async fn handle_get_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(jobs::get_job(&state.pool, &id).await?))
}

async fn handle_upload(
    State(state): State<AppState>,
    UserId(user): UserId,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    let scratch = tempfile::TempDir::new().map_err(internal)?;
    let archive_path = scratch.path().join("upload.zip");

    let mut received = false;
    while let Some(field) = multipart.next_field().await.map_err(|e| bad_request(e.body_text()))? {
        if field.name() != Some("file") {
            continue;
        }
        let bytes = field.bytes().await.map_err(|e| bad_request(e.body_text()))?;
        tokio::fs::write(&archive_path, &bytes).await.map_err(internal)?;
        received = true;
        break;
    }
    if !received {
        return Err(bad_request("multipart field 'file' is required"));
    }

    let dest = scratch.path().join("bundles");
    let exclude = state.config.processing.exclude_globs.clone();
    let bundles = tokio::task::spawn_blocking(move || -> anyhow::Result<Vec<PathBuf>> {
        std::fs::create_dir_all(&dest)?;
        let root = archive::unpack(&archive_path, &dest)?;
        ingest::discover_bundles(&root, &exclude, 0, None)
    })
    .await
    .map_err(internal)?
    .map_err(|e| bad_request(format!("{:#}", e)))?;
    if bundles.is_empty() {
        return Err(bad_request("archive contains no report bundles"));
    }

    let home = state.config.bundles_dir();
    let bundles = tokio::task::spawn_blocking(move || {
        let kept = archive::keep_bundles(&bundles, &home);
        drop(scratch);
        kept
    })
    .await
    .map_err(internal)?
    .map_err(internal)?;

    let opts = BatchOptions {
        concurrent: state.config.processing.max_concurrent,
        actor: user,
        ..Default::default()
    };
    let job_id = spawn_batch(&state.pipeline, bundles, opts).await?;
    let job = jobs::get_job(&state.pool, &job_id).await?;
    Ok((StatusCode::ACCEPTED, Json(job)))
}

async fn handle_reprocess(
    State(state): State<AppState>,
    UserId(user): UserId,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let path = state.pipeline.bundle_path(&id).await?;
    let job_id = spawn_batch(&state.pipeline, vec![path], BatchOptions::reprocess(&user)).await?;
    let job = jobs::get_job(&state.pool, &job_id).await?;
    Ok((StatusCode::ACCEPTED, Json(job)))
}

/// Records the job, then runs it on a background task.
async fn spawn_batch(pipeline: &Pipeline, bundles: Vec<PathBuf>, opts: BatchOptions) -> Result<String, HubError> {
    let batch = pipeline.submit(bundles, &opts).await?;
    let job_id = batch.job_id.clone();
    let pipeline = pipeline.clone();
    tokio::spawn(async move {
        let job_id = batch.job_id.clone();
        if let Err(e) = pipeline.run_submitted(batch, &opts, &NoProgress).await {
            tracing::error!("job {} did not finish: {}", job_id, e);
        }
    });
    Ok(job_id)
}
