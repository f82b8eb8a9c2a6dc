//! Library listing and search over document records.
//!
//! Filters combine with AND; `search` matches title, summary or source with
//! a case-insensitive `LIKE`. Sort fields are whitelisted, so the sort
//! clause never carries caller text.
//!
//! [`semantic_search`] and [`related_documents`] go through the retrieval
//! store instead and collapse passages to one hit per document.

use std::collections::HashSet;

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};

use crate::chat::known_documents;
use crate::config::Config;
use crate::db;
use crate::error::HubError;
use crate::models::{format_ts_iso, RetrievedChunk};
use crate::ragflow::{RagflowClient, RetrievalQuery, RetrievalStore};

pub const DEFAULT_PAGE_SIZE: i64 = 20;
pub const MAX_PAGE_SIZE: i64 = 100;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LibraryQuery {
    #[serde(default)]
    pub search: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    /// `created_at` (default), `year` or `title`.
    #[serde(default)]
    pub sort: Option<String>,
    /// `asc` or `desc` (default).
    #[serde(default)]
    pub order: Option<String>,
    #[serde(default)]
    pub page: Option<i64>,
    #[serde(default)]
    pub limit: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DocumentSummary {
    pub id: String,
    pub title: String,
    pub source: String,
    pub year: Option<i32>,
    pub category: String,
    pub page_count: i64,
    pub state: String,
    pub has_summary: bool,
    pub item_count: i64,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub page: i64,
    pub limit: i64,
    pub has_more: bool,
}

/// Clamps a 1-based page number and a page size into valid ranges.
pub fn paging(page: Option<i64>, limit: Option<i64>) -> (i64, i64) {
    let page = page.unwrap_or(1).max(1);
    let limit = limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
    (page, limit)
}

fn sort_clause(sort: Option<&str>, order: Option<&str>) -> Result<String, HubError> {
    let column = match sort.unwrap_or("created_at") {
        "created_at" => "d.created_at",
        "year" => "d.year",
        "title" => "d.title COLLATE NOCASE",
        other => {
            return Err(HubError::BadRequest(format!(
                "unknown sort field: '{}'. Use created_at, year, or title.",
                other
            )))
        }
    };
    let direction = match order.unwrap_or("desc") {
        "asc" => "ASC",
        "desc" => "DESC",
        other => {
            return Err(HubError::BadRequest(format!(
                "unknown order: '{}'. Use asc or desc.",
                other
            )))
        }
    };
    Ok(format!(" ORDER BY {} {}, d.id ASC", column, direction))
}

fn push_filters<'a>(qb: &mut QueryBuilder<'a, Sqlite>, q: &'a LibraryQuery) {
    qb.push(" WHERE 1 = 1");
    if let Some(search) = q.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        let pattern = format!("%{}%", search);
        qb.push(" AND (d.title LIKE ")
            .push_bind(pattern.clone())
            .push(" OR d.summary LIKE ")
            .push_bind(pattern.clone())
            .push(" OR d.source LIKE ")
            .push_bind(pattern)
            .push(")");
    }
    if let Some(source) = q.source.as_deref().filter(|s| !s.is_empty()) {
        qb.push(" AND d.source = ").push_bind(source);
    }
    if let Some(year) = q.year {
        qb.push(" AND d.year = ").push_bind(year);
    }
    if let Some(category) = q.category.as_deref().filter(|s| !s.is_empty()) {
        qb.push(" AND d.category = ").push_bind(category);
    }
    if let Some(state) = q.state.as_deref().filter(|s| !s.is_empty()) {
        qb.push(" AND d.state = ").push_bind(state);
    }
}

pub async fn search_documents(pool: &SqlitePool, q: &LibraryQuery) -> Result<Page<DocumentSummary>, HubError> {
    let (page, limit) = paging(q.page, q.limit);
    let order = sort_clause(q.sort.as_deref(), q.order.as_deref())?;

    let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM documents d");
    push_filters(&mut count, q);
    let total: i64 = count.build_query_scalar().fetch_one(pool).await?;

    let mut qb = QueryBuilder::<Sqlite>::new(
        r#"SELECT d.id, d.title, d.source, d.year, d.category, d.page_count, d.state,
               d.summary IS NOT NULL AND d.summary != '' AS has_summary,
               (SELECT COUNT(*) FROM extracted_items i WHERE i.document_id = d.id) AS item_count,
               d.created_at
           FROM documents d"#,
    );
    push_filters(&mut qb, q);
    qb.push(order);
    qb.push(" LIMIT ").push_bind(limit);
    qb.push(" OFFSET ").push_bind((page - 1) * limit);

    let items: Vec<DocumentSummary> = qb
        .build()
        .fetch_all(pool)
        .await?
        .iter()
        .map(|r| DocumentSummary {
            id: r.get("id"),
            title: r.get("title"),
            source: r.get("source"),
            year: r.get("year"),
            category: r.get("category"),
            page_count: r.get("page_count"),
            state: r.get("state"),
            has_summary: r.get("has_summary"),
            item_count: r.get("item_count"),
            created_at: format_ts_iso(r.get("created_at")),
        })
        .collect();

    Ok(Page {
        has_more: page * limit < total,
        items,
        total,
        page,
        limit,
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct Facet<T> {
    pub value: T,
    pub count: i64,
}

/// Distinct sources with document counts, most common first.
pub async fn sources(pool: &SqlitePool) -> Result<Vec<Facet<String>>, HubError> {
    let rows = sqlx::query(
        "SELECT source, COUNT(*) AS n FROM documents GROUP BY source ORDER BY n DESC, source ASC",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows
        .iter()
        .map(|r| Facet {
            value: r.get("source"),
            count: r.get("n"),
        })
        .collect())
}

pub async fn categories(pool: &SqlitePool) -> Result<Vec<Facet<String>>, HubError> {
    let rows = sqlx::query(
        "SELECT category, COUNT(*) AS n FROM documents GROUP BY category ORDER BY category ASC",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows
        .iter()
        .map(|r| Facet {
            value: r.get("category"),
            count: r.get("n"),
        })
        .collect())
}

/// Distinct publication years, newest first.
pub async fn years(pool: &SqlitePool) -> Result<Vec<Facet<i32>>, HubError> {
    let rows = sqlx::query(
        "SELECT year, COUNT(*) AS n FROM documents WHERE year IS NOT NULL GROUP BY year ORDER BY year DESC",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows
        .iter()
        .map(|r| Facet {
            value: r.get("year"),
            count: r.get("n"),
        })
        .collect())
}

// ============ Retrieval-backed search ============

pub const MAX_QUERY_CHARS: usize = 1000;
const DEFAULT_HITS: usize = 20;
const MAX_HITS: usize = 100;
const EXCERPT_CHARS: usize = 200;
/// Relevance reported for keyword matches, which have no score.
const KEYWORD_RELEVANCE: f64 = 0.5;

#[derive(Debug, Clone, Deserialize)]
pub struct SemanticSearchRequest {
    pub query: String,
    /// `false` skips the retrieval store and matches text only.
    #[serde(default = "default_semantic")]
    pub semantic: bool,
    #[serde(default)]
    pub limit: Option<usize>,
}

fn default_semantic() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMethod {
    Semantic,
    Keyword,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    /// Local document id; `None` for store documents with no local record.
    pub document_id: Option<String>,
    pub store_doc_id: Option<String>,
    pub title: String,
    pub source: Option<String>,
    pub year: Option<i32>,
    pub excerpt: String,
    pub relevance: f64,
    pub matched_section: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResults {
    pub method: SearchMethod,
    pub hits: Vec<SearchHit>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RelatedDocument {
    pub id: String,
    pub title: String,
    pub source: String,
    pub year: Option<i32>,
    pub relevance: f64,
}

fn excerpt(text: &str) -> String {
    let head: String = text.chars().take(EXCERPT_CHARS).collect();
    format!("{}...", head)
}

/// Searches passages in the retrieval store and returns one hit per
/// document, best first. When the store fails, falls back to matching
/// title, summary and source.
pub async fn semantic_search(
    pool: &SqlitePool,
    store: &dyn RetrievalStore,
    req: &SemanticSearchRequest,
) -> Result<SearchResults, HubError> {
    let query = req.query.trim();
    if query.is_empty() {
        return Err(HubError::BadRequest("query must not be empty".into()));
    }
    if query.chars().count() > MAX_QUERY_CHARS {
        return Err(HubError::BadRequest(format!(
            "query exceeds {} characters",
            MAX_QUERY_CHARS
        )));
    }
    let limit = req.limit.unwrap_or(DEFAULT_HITS).clamp(1, MAX_HITS);

    if req.semantic {
        let retrieval = RetrievalQuery {
            question: query.to_string(),
            document_ids: Vec::new(),
            top_k: limit,
        };
        match store.retrieve(&retrieval).await {
            Ok(chunks) => {
                let known = known_documents(pool, &chunks).await?;
                let hits = distinct_by_document(&chunks)
                    .into_iter()
                    .map(|c| {
                        let doc = known.get(&c.store_doc_id);
                        let page = c.page.map(|p| p.to_string()).unwrap_or_else(|| "?".into());
                        SearchHit {
                            document_id: doc.map(|d| d.id.clone()),
                            store_doc_id: Some(c.store_doc_id.clone()),
                            title: doc.map(|d| d.title.clone()).unwrap_or_else(|| c.doc_name.clone()),
                            source: doc.map(|d| d.source.clone()),
                            year: doc.and_then(|d| d.year),
                            excerpt: excerpt(&c.content),
                            relevance: c.score,
                            matched_section: format!("Page {}", page),
                        }
                    })
                    .collect();
                return Ok(SearchResults {
                    method: SearchMethod::Semantic,
                    hits,
                });
            }
            Err(e) => tracing::warn!("semantic search failed, using keyword match: {}", e),
        }
    }

    Ok(SearchResults {
        method: SearchMethod::Keyword,
        hits: keyword_hits(pool, query, limit).await?,
    })
}

async fn keyword_hits(pool: &SqlitePool, query: &str, limit: usize) -> Result<Vec<SearchHit>, HubError> {
    let pattern = format!("%{}%", query);
    let rows = sqlx::query(
        r#"
        SELECT id, store_doc_id, title, source, year, summary FROM documents
        WHERE title LIKE ? OR summary LIKE ? OR source LIKE ?
        ORDER BY created_at DESC, id ASC
        LIMIT ?
        "#,
    )
    .bind(&pattern)
    .bind(&pattern)
    .bind(&pattern)
    .bind(limit as i64)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|r| {
            let summary: Option<String> = r.get("summary");
            SearchHit {
                document_id: Some(r.get("id")),
                store_doc_id: r.get("store_doc_id"),
                title: r.get("title"),
                source: Some(r.get("source")),
                year: r.get("year"),
                excerpt: summary
                    .filter(|s| !s.is_empty())
                    .map(|s| excerpt(&s))
                    .unwrap_or_else(|| "No summary".to_string()),
                relevance: KEYWORD_RELEVANCE,
                matched_section: "title/summary".to_string(),
            }
        })
        .collect())
}

/// First passage of each store document, in retrieval order.
fn distinct_by_document(chunks: &[RetrievedChunk]) -> Vec<&RetrievedChunk> {
    let mut seen = HashSet::new();
    chunks
        .iter()
        .filter(|c| seen.insert(c.store_doc_id.as_str()))
        .collect()
}

/// Other library documents whose passages best match this document's
/// title and summary. Only documents with a local record are returned.
pub async fn related_documents(
    pool: &SqlitePool,
    store: &dyn RetrievalStore,
    document_id: &str,
    limit: usize,
) -> Result<Vec<RelatedDocument>, HubError> {
    let row = sqlx::query("SELECT title, summary, store_doc_id FROM documents WHERE id = ?")
        .bind(document_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| HubError::DocumentNotFound(document_id.to_string()))?;
    let title: String = row.get("title");
    let summary: Option<String> = row.get("summary");
    let own_store_id: Option<String> = row.get("store_doc_id");

    let limit = limit.clamp(1, 50);
    let question: String = match summary.filter(|s| !s.is_empty()) {
        Some(summary) => format!("{}\n\n{}", title, summary),
        None => title,
    }
    .chars()
    .take(MAX_QUERY_CHARS)
    .collect();

    // Over-fetch: the document's own passages come back first.
    let chunks = store
        .retrieve(&RetrievalQuery {
            question,
            document_ids: Vec::new(),
            top_k: limit * 3,
        })
        .await?;
    let known = known_documents(pool, &chunks).await?;

    Ok(distinct_by_document(&chunks)
        .into_iter()
        .filter(|c| own_store_id.as_deref() != Some(c.store_doc_id.as_str()))
        .filter_map(|c| {
            known.get(&c.store_doc_id).map(|d| RelatedDocument {
                id: d.id.clone(),
                title: d.title.clone(),
                source: d.source.clone(),
                year: d.year,
                relevance: c.score,
            })
        })
        .filter(|d| d.id != document_id)
        .take(limit)
        .collect())
}

/// CLI entry point for `hub search --semantic`.
pub async fn run_semantic_search(config: &Config, query: &str, limit: Option<i64>) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = RagflowClient::from_env(&config.retrieval)?;
    let req = SemanticSearchRequest {
        query: query.to_string(),
        semantic: true,
        limit: limit.map(|l| l.max(1) as usize),
    };
    let result = semantic_search(&pool, &store, &req).await;
    pool.close().await;
    let results = match result {
        Ok(r) => r,
        Err(HubError::BadRequest(msg)) => bail!(msg),
        Err(e) => return Err(e.into()),
    };

    if results.method == SearchMethod::Keyword {
        println!("(retrieval store unavailable; keyword matches)");
    }
    if results.hits.is_empty() {
        println!("No results.");
        return Ok(());
    }
    for (i, hit) in results.hits.iter().enumerate() {
        let year = hit.year.map(|y| y.to_string()).unwrap_or_else(|| "----".into());
        let source = hit.source.as_deref().unwrap_or("-");
        println!(
            "{}. [{:.2}] {} ({}, {}) {}",
            i + 1,
            hit.relevance,
            hit.title,
            source,
            year,
            hit.matched_section
        );
        if let Some(ref id) = hit.document_id {
            println!("    id: {}", id);
        }
        println!("    {}", hit.excerpt);
    }
    Ok(())
}

/// CLI entry point for `hub related <id>`.
pub async fn run_related(config: &Config, document_id: &str, limit: usize) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = RagflowClient::from_env(&config.retrieval)?;
    let related = related_documents(&pool, &store, document_id, limit).await;
    pool.close().await;
    let related = related?;

    if related.is_empty() {
        println!("No related documents.");
        return Ok(());
    }
    for (i, d) in related.iter().enumerate() {
        let year = d.year.map(|y| y.to_string()).unwrap_or_else(|| "----".into());
        println!("{}. [{:.2}] {} ({}, {})", i + 1, d.relevance, d.title, d.source, year);
        println!("    id: {}", d.id);
    }
    Ok(())
}

/// CLI entry point for `hub search`.
pub async fn run_search(config: &Config, q: LibraryQuery) -> Result<()> {
    let pool = db::connect(config).await?;
    let result = search_documents(&pool, &q).await;
    pool.close().await;
    let page = match result {
        Ok(p) => p,
        Err(HubError::BadRequest(msg)) => bail!(msg),
        Err(e) => return Err(e.into()),
    };

    if page.items.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, d) in page.items.iter().enumerate() {
        let rank = (page.page - 1) * page.limit + i as i64 + 1;
        let year = d.year.map(|y| y.to_string()).unwrap_or_else(|| "----".into());
        println!("{}. [{}] {} ({}, {})", rank, d.state, d.title, d.source, year);
        println!("    id: {}  category: {}  items: {}", d.id, d.category, d.item_count);
    }
    println!();
    println!(
        "page {} of {} documents{}",
        page.page,
        page.total,
        if page.has_more { " (more available)" } else { "" }
    );
    Ok(())
}
