//! Chat dispatch over the retrieval store.
//!
//! A request is resolved to a mode, scoped retrieval runs, the mode's prompt
//! is assembled and sent to the gateway (or to the minister chain), and only
//! after a successful completion are the conversation and both messages
//! written, together, in one transaction. A failed call leaves no trace.
//!
//! | Mode | Retrieval scope | top-k | Tier |
//! |------|-----------------|-------|------|
//! | `single` | one store document | `retrieval.top_k_single` | chat |
//! | `all` | whole corpus | `retrieval.top_k_all` | chat |
//! | `minister` | whole corpus | `retrieval.top_k_all` | reasoning (5 steps) |

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::audit;
use crate::config::{Config, RetrievalConfig};
use crate::db;
use crate::error::HubError;
use crate::llm::{strip_code_fences, ChatMessage, CompletionRequest, LlmGateway, ModelTier, OpenRouterClient};
use crate::minister::{MinisterChain, Step, StepOutput};
use crate::models::{format_ts_iso, ChatMode, Citation, RetrievedChunk, Role};
use crate::prompts::{self, fill};
use crate::ragflow::{RagflowClient, RetrievalQuery, RetrievalStore};
use crate::web::{TavilyClient, WebSearch};

const MAX_MESSAGE_CHARS: usize = 10_000;
const MAX_CITATIONS: usize = 5;
const EXCERPT_CHARS: usize = 200;
const TITLE_CHARS: usize = 50;
/// Prior messages replayed to the model when continuing a conversation.
const HISTORY_MESSAGES: i64 = 10;

#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub mode: Option<ChatMode>,
    #[serde(default)]
    pub document_id: Option<String>,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default, alias = "enable_web_search")]
    pub web_search: bool,
    /// Pins a model and disables the fallback.
    #[serde(default)]
    pub model: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatResponse {
    pub response: String,
    pub citations: Vec<Citation>,
    pub conversation_id: String,
    pub mode: ChatMode,
    pub model_used: String,
    pub tokens_used: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_contributions: Option<Vec<StepOutput>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EnhanceResponse {
    pub original: String,
    pub enhanced: String,
    pub improvements: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConversationSummary {
    pub id: String,
    pub mode: String,
    pub title: String,
    pub document_id: Option<String>,
    pub document_title: Option<String>,
    pub message_count: i64,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct MessageView {
    pub id: String,
    pub seq: i64,
    pub role: String,
    pub content: String,
    pub citations: Vec<Citation>,
    pub model_used: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConversationDetail {
    #[serde(flatten)]
    pub summary: ConversationSummary,
    pub messages: Vec<MessageView>,
}

/// Local record behind a store document id.
#[derive(Debug, Clone)]
pub struct KnownDoc {
    pub id: String,
    pub title: String,
    pub source: String,
    pub year: Option<i32>,
}

struct ConversationRef {
    id: String,
    mode: ChatMode,
    document_id: Option<String>,
}

#[derive(Clone)]
pub struct ChatService {
    pool: SqlitePool,
    store: Arc<dyn RetrievalStore>,
    gateway: Arc<dyn LlmGateway>,
    web: Option<Arc<dyn WebSearch>>,
    retrieval: RetrievalConfig,
    web_max_results: usize,
}

impl ChatService {
    pub fn new(
        pool: SqlitePool,
        store: Arc<dyn RetrievalStore>,
        gateway: Arc<dyn LlmGateway>,
        retrieval: RetrievalConfig,
    ) -> Self {
        Self {
            pool,
            store,
            gateway,
            web: None,
            retrieval,
            web_max_results: 5,
        }
    }

    pub fn with_web(mut self, web: Option<Arc<dyn WebSearch>>, max_results: usize) -> Self {
        self.web = web;
        self.web_max_results = max_results;
        self
    }

    pub async fn send(&self, user_id: &str, req: ChatRequest) -> Result<ChatResponse, HubError> {
        let message = req.message.trim();
        if message.is_empty() {
            return Err(HubError::BadRequest("message must not be empty".into()));
        }
        if message.chars().count() > MAX_MESSAGE_CHARS {
            return Err(HubError::BadRequest(format!(
                "message exceeds {} characters",
                MAX_MESSAGE_CHARS
            )));
        }

        let existing = match &req.conversation_id {
            Some(id) => Some(self.owned_conversation(user_id, id).await?),
            None => None,
        };
        let mode = match (req.mode, &existing) {
            (Some(m), _) => m,
            (None, Some(conv)) => conv.mode,
            (None, None) => self.default_mode(user_id).await?,
        };
        let document_id = req
            .document_id
            .clone()
            .or_else(|| existing.as_ref().and_then(|c| c.document_id.clone()));

        tracing::info!(
            "chat: user={} mode={} document={:?}",
            user_id,
            mode.as_str(),
            document_id
        );

        // Resolve the scope before any external call.
        let single_doc = match mode {
            ChatMode::Single => {
                let id = document_id
                    .as_deref()
                    .ok_or_else(|| HubError::BadRequest("document_id is required for 'single' mode".into()))?;
                Some(self.indexed_document(id).await?)
            }
            _ => None,
        };

        let query = RetrievalQuery {
            question: message.to_string(),
            document_ids: single_doc
                .as_ref()
                .map(|(_, store_id)| vec![store_id.clone()])
                .unwrap_or_default(),
            top_k: match mode {
                ChatMode::Single => self.retrieval.top_k_single,
                _ => self.retrieval.top_k_all,
            },
        };
        let chunks = self.store.retrieve(&query).await?;
        let context = if chunks.is_empty() {
            prompts::NO_CONTEXT.to_string()
        } else {
            format_context(&chunks)
        };

        let history = match &existing {
            Some(conv) => self.history(&conv.id).await?,
            None => Vec::new(),
        };

        let (content, model, tokens, contributions) = match mode {
            ChatMode::Minister => {
                let web = if req.web_search { self.web.as_deref() } else { None };
                let outcome = MinisterChain::new(self.gateway.as_ref())
                    .with_web(web, self.web_max_results)
                    .with_model(req.model.clone())
                    .run(message, &context)
                    .await?;
                let a = outcome.answer;
                (
                    a.content,
                    a.model,
                    a.prompt_tokens + a.completion_tokens,
                    Some(outcome.steps),
                )
            }
            ChatMode::Single | ChatMode::All => {
                let system = match &single_doc {
                    Some((doc, _)) => {
                        let year = doc.year.map(|y| y.to_string()).unwrap_or_else(|| "Unknown".into());
                        fill(
                            prompts::CHAT_SINGLE_SYSTEM,
                            &[
                                ("title", &doc.title),
                                ("source", &doc.source),
                                ("year", &year),
                                ("context", &context),
                            ],
                        )
                    }
                    None => fill(prompts::CHAT_ALL_SYSTEM, &[("context", &context)]),
                };
                let mut messages = Vec::with_capacity(history.len() + 2);
                messages.push(ChatMessage::system(system));
                messages.extend(history);
                messages.push(ChatMessage::user(message));

                let req = CompletionRequest::new(ModelTier::Chat, messages)
                    .temperature(0.3)
                    .model(req.model.clone());
                let c = self.gateway.complete(req).await?;
                (c.content, c.model, c.prompt_tokens + c.completion_tokens, None)
            }
        };

        let known = known_documents(&self.pool, &chunks).await?;
        let citations = build_citations(&chunks, &known);

        let conversation_id = self
            .persist_exchange(
                user_id,
                existing.as_ref().map(|c| c.id.as_str()),
                mode,
                single_doc.as_ref().map(|(d, _)| d.id.as_str()),
                message,
                &content,
                &citations,
                &model,
            )
            .await?;

        Ok(ChatResponse {
            response: content,
            citations,
            conversation_id,
            mode,
            model_used: model,
            tokens_used: tokens,
            agent_contributions: contributions,
        })
    }

    /// Rewrites a query for retrieval. Any failure returns the original.
    pub async fn enhance_query(&self, query: &str) -> Result<EnhanceResponse, HubError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(HubError::BadRequest("query must not be empty".into()));
        }

        let req = CompletionRequest::new(
            ModelTier::Fast,
            vec![ChatMessage::user(fill(prompts::ENHANCE_QUERY, &[("query", query)]))],
        )
        .temperature(0.3)
        .json();

        let parsed = match self.gateway.complete(req).await {
            Ok(c) => parse_enhancement(&c.content),
            Err(e) => {
                tracing::warn!("query enhancement failed: {}", e);
                None
            }
        };

        Ok(match parsed {
            Some((enhanced, improvements)) => EnhanceResponse {
                original: query.to_string(),
                enhanced,
                improvements,
            },
            None => EnhanceResponse {
                original: query.to_string(),
                enhanced: query.to_string(),
                improvements: vec!["Enhancement failed, using original query".to_string()],
            },
        })
    }

    // ============ Conversations ============

    pub async fn list_conversations(
        &self,
        user_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<ConversationSummary>, HubError> {
        let rows = sqlx::query(&format!(
            "{} WHERE c.user_id = ? ORDER BY c.updated_at DESC, c.rowid DESC LIMIT ? OFFSET ?",
            CONVERSATION_SELECT
        ))
        .bind(user_id)
        .bind(limit.clamp(1, 100))
        .bind(offset.max(0))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(summary_from_row).collect())
    }

    pub async fn get_conversation(&self, user_id: &str, id: &str) -> Result<ConversationDetail, HubError> {
        let row = sqlx::query(&format!("{} WHERE c.id = ? AND c.user_id = ?", CONVERSATION_SELECT))
            .bind(id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| HubError::ConversationNotFound(id.to_string()))?;
        let summary = summary_from_row(&row);

        let messages = sqlx::query(
            r#"
            SELECT id, seq, role, content, citations_json, model_used, created_at
            FROM messages WHERE conversation_id = ? ORDER BY seq ASC
            "#,
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(|r| {
            let citations_json: String = r.get("citations_json");
            MessageView {
                id: r.get("id"),
                seq: r.get("seq"),
                role: r.get("role"),
                content: r.get("content"),
                citations: serde_json::from_str(&citations_json).unwrap_or_default(),
                model_used: r.get("model_used"),
                created_at: format_ts_iso(r.get("created_at")),
            }
        })
        .collect();

        Ok(ConversationDetail { summary, messages })
    }

    /// Deletes a conversation the caller owns; messages cascade.
    pub async fn delete_conversation(&self, user_id: &str, id: &str) -> Result<(), HubError> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query("DELETE FROM conversations WHERE id = ? AND user_id = ?")
            .bind(id)
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(HubError::ConversationNotFound(id.to_string()));
        }
        audit::record(&mut *tx, user_id, "conversation.delete", id, None).await?;
        tx.commit().await?;
        tracing::info!("conversation {} deleted by {}", id, user_id);
        Ok(())
    }

    // ============ Preferences ============

    pub async fn default_mode(&self, user_id: &str) -> Result<ChatMode, HubError> {
        let mode: Option<String> =
            sqlx::query_scalar("SELECT default_mode FROM user_preferences WHERE user_id = ?")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(mode.and_then(|m| m.parse().ok()).unwrap_or(ChatMode::All))
    }

    pub async fn set_default_mode(&self, user_id: &str, mode: ChatMode) -> Result<(), HubError> {
        sqlx::query(
            r#"
            INSERT INTO user_preferences (user_id, default_mode, updated_at) VALUES (?, ?, ?)
            ON CONFLICT(user_id) DO UPDATE SET default_mode = excluded.default_mode, updated_at = excluded.updated_at
            "#,
        )
        .bind(user_id)
        .bind(mode.as_str())
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // ============ Internals ============

    async fn owned_conversation(&self, user_id: &str, id: &str) -> Result<ConversationRef, HubError> {
        let row = sqlx::query("SELECT id, mode, document_id FROM conversations WHERE id = ? AND user_id = ?")
            .bind(id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| HubError::ConversationNotFound(id.to_string()))?;
        let mode: String = row.get("mode");
        Ok(ConversationRef {
            id: row.get("id"),
            mode: mode.parse().unwrap_or(ChatMode::All),
            document_id: row.get("document_id"),
        })
    }

    /// The local document and its store id, or `DocumentNotFound` when
    /// either is missing.
    async fn indexed_document(&self, id: &str) -> Result<(KnownDoc, String), HubError> {
        let row = sqlx::query("SELECT id, title, source, year, store_doc_id FROM documents WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| HubError::DocumentNotFound(id.to_string()))?;
        let store_id: Option<String> = row.get("store_doc_id");
        let store_id = store_id.ok_or_else(|| {
            HubError::DocumentNotFound(format!("{} has not been indexed", id))
        })?;
        Ok((
            KnownDoc {
                id: row.get("id"),
                title: row.get("title"),
                source: row.get("source"),
                year: row.get("year"),
            },
            store_id,
        ))
    }

    async fn history(&self, conversation_id: &str) -> Result<Vec<ChatMessage>, HubError> {
        let rows = sqlx::query(
            r#"
            SELECT role, content FROM (
                SELECT seq, role, content FROM messages
                WHERE conversation_id = ? ORDER BY seq DESC LIMIT ?
            ) ORDER BY seq ASC
            "#,
        )
        .bind(conversation_id)
        .bind(HISTORY_MESSAGES)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .filter_map(|r| {
                let role: String = r.get("role");
                let content: String = r.get("content");
                match role.parse::<Role>().ok()? {
                    Role::User => Some(ChatMessage::user(content)),
                    Role::Assistant => Some(ChatMessage::assistant(content)),
                    Role::System => None,
                }
            })
            .collect())
    }

    #[allow(clippy::too_many_arguments)]
    async fn persist_exchange(
        &self,
        user_id: &str,
        conversation_id: Option<&str>,
        mode: ChatMode,
        document_id: Option<&str>,
        message: &str,
        answer: &str,
        citations: &[Citation],
        model: &str,
    ) -> Result<String, HubError> {
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;

        let conversation_id = match conversation_id {
            Some(id) => id.to_string(),
            None => {
                let id = Uuid::new_v4().to_string();
                sqlx::query(
                    r#"
                    INSERT INTO conversations (id, user_id, mode, document_id, title, created_at, updated_at)
                    VALUES (?, ?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(&id)
                .bind(user_id)
                .bind(mode.as_str())
                .bind(document_id)
                .bind(conversation_title(message))
                .bind(now)
                .bind(now)
                .execute(&mut *tx)
                .await?;
                id
            }
        };

        let next_seq: i64 =
            sqlx::query_scalar("SELECT COALESCE(MAX(seq), 0) + 1 FROM messages WHERE conversation_id = ?")
                .bind(&conversation_id)
                .fetch_one(&mut *tx)
                .await?;
        let citations_json = serde_json::to_string(citations).unwrap_or_else(|_| "[]".to_string());

        for (seq, role, content, cites, model_used) in [
            (next_seq, Role::User, message, "[]", None),
            (next_seq + 1, Role::Assistant, answer, citations_json.as_str(), Some(model)),
        ] {
            sqlx::query(
                r#"
                INSERT INTO messages (id, conversation_id, seq, role, content, citations_json, model_used, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(Uuid::new_v4().to_string())
            .bind(&conversation_id)
            .bind(seq)
            .bind(role.as_str())
            .bind(content)
            .bind(cites)
            .bind(model_used)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        // A continuation may switch mode or document; the row follows the latest exchange.
        sqlx::query("UPDATE conversations SET mode = ?, document_id = ?, updated_at = ? WHERE id = ?")
            .bind(mode.as_str())
            .bind(document_id)
            .bind(now)
            .bind(&conversation_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(conversation_id)
    }
}

/// CLI entry point for `hub chat`.
pub async fn run_chat(config: &Config, user_id: &str, req: ChatRequest) -> anyhow::Result<()> {
    let pool = db::connect(config).await?;
    let store = RagflowClient::from_env(&config.retrieval)?;
    let gateway = OpenRouterClient::from_env(&config.llm)?;
    let web: Option<Arc<dyn WebSearch>> = match TavilyClient::from_env(&config.web) {
        Some(client) if req.web_search => Some(Arc::new(client?)),
        _ => None,
    };
    let service = ChatService::new(pool.clone(), Arc::new(store), Arc::new(gateway), config.retrieval.clone())
        .with_web(web, config.web.max_results);

    let resp = service.send(user_id, req).await;
    pool.close().await;
    let resp = resp?;

    if let Some(steps) = &resp.agent_contributions {
        for step in steps.iter().filter(|s| s.step != Step::Combine) {
            println!("--- {} ({}) ---", step.step.as_str(), step.model);
            println!("{}", step.content);
            println!();
        }
        println!("--- answer ---");
    }
    println!("{}", resp.response);
    println!();
    if !resp.citations.is_empty() {
        println!("Sources:");
        for (i, c) in resp.citations.iter().enumerate() {
            let page = c.page.map(|p| format!(", p.{}", p)).unwrap_or_default();
            let source = c.source.as_deref().unwrap_or("-");
            println!("  [{}] {} ({}{})", i + 1, c.title, source, page);
        }
        println!();
    }
    println!(
        "conversation: {}  mode: {}  model: {}  tokens: {}",
        resp.conversation_id,
        resp.mode.as_str(),
        resp.model_used,
        resp.tokens_used
    );
    Ok(())
}

const CONVERSATION_SELECT: &str = r#"
    SELECT c.id, c.mode, c.title, c.document_id, d.title AS document_title,
           (SELECT COUNT(*) FROM messages m WHERE m.conversation_id = c.id) AS message_count,
           c.created_at, c.updated_at
    FROM conversations c
    LEFT JOIN documents d ON d.id = c.document_id"#;

fn summary_from_row(row: &sqlx::sqlite::SqliteRow) -> ConversationSummary {
    ConversationSummary {
        id: row.get("id"),
        mode: row.get("mode"),
        title: row.get("title"),
        document_id: row.get("document_id"),
        document_title: row.get("document_title"),
        message_count: row.get("message_count"),
        created_at: format_ts_iso(row.get("created_at")),
        updated_at: format_ts_iso(row.get("updated_at")),
    }
}

/// Local documents behind the store ids in `chunks`. Store documents with
/// no local record are left out.
pub async fn known_documents(
    pool: &SqlitePool,
    chunks: &[RetrievedChunk],
) -> Result<HashMap<String, KnownDoc>, HubError> {
    let mut known = HashMap::new();
    for chunk in chunks {
        if known.contains_key(&chunk.store_doc_id) {
            continue;
        }
        let row = sqlx::query("SELECT id, title, source, year FROM documents WHERE store_doc_id = ?")
            .bind(&chunk.store_doc_id)
            .fetch_optional(pool)
            .await?;
        if let Some(r) = row {
            known.insert(
                chunk.store_doc_id.clone(),
                KnownDoc {
                    id: r.get("id"),
                    title: r.get("title"),
                    source: r.get("source"),
                    year: r.get("year"),
                },
            );
        }
    }
    Ok(known)
}

/// Prompt context: numbered passages separated by rules.
pub fn format_context(chunks: &[RetrievedChunk]) -> String {
    chunks
        .iter()
        .enumerate()
        .map(|(i, c)| {
            let page = c.page.map(|p| p.to_string()).unwrap_or_else(|| "?".into());
            format!(
                "[{}] {} (p.{}, relevance: {:.2})\n{}",
                i + 1,
                c.doc_name,
                page,
                c.score,
                c.content
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n---\n\n")
}

/// One citation per store document, in retrieval order, at most five.
pub fn build_citations(chunks: &[RetrievedChunk], known: &HashMap<String, KnownDoc>) -> Vec<Citation> {
    let mut seen = std::collections::HashSet::new();
    chunks
        .iter()
        .filter(|c| seen.insert(c.store_doc_id.as_str()))
        .take(MAX_CITATIONS)
        .map(|c| {
            let doc = known.get(&c.store_doc_id);
            let excerpt: String = c.content.chars().take(EXCERPT_CHARS).collect();
            Citation {
                document_id: doc.map(|d| d.id.clone()),
                store_doc_id: c.store_doc_id.clone(),
                title: doc.map(|d| d.title.clone()).unwrap_or_else(|| c.doc_name.clone()),
                source: doc.map(|d| d.source.clone()),
                page: c.page,
                excerpt: format!("{}...", excerpt),
                score: c.score,
            }
        })
        .collect()
}

fn conversation_title(message: &str) -> String {
    if message.chars().count() > TITLE_CHARS {
        let head: String = message.chars().take(TITLE_CHARS).collect();
        format!("{}...", head)
    } else {
        message.to_string()
    }
}

fn parse_enhancement(raw: &str) -> Option<(String, Vec<String>)> {
    let value: serde_json::Value = serde_json::from_str(strip_code_fences(raw)).ok()?;
    let enhanced = value.get("enhanced")?.as_str()?.trim().to_string();
    if enhanced.is_empty() {
        return None;
    }
    let improvements = value
        .get("improvements")
        .and_then(|v| v.as_array())
        .map(|a| a.iter().filter_map(|s| s.as_str().map(String::from)).collect())
        .unwrap_or_default();
    Some((enhanced, improvements))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(store: &str, content: &str, page: Option<i64>) -> RetrievedChunk {
        RetrievedChunk {
            store_doc_id: store.to_string(),
            doc_name: format!("{}.md", store),
            content: content.to_string(),
            page,
            score: 0.8,
        }
    }

    #[test]
    fn context_blocks_are_numbered() {
        let ctx = format_context(&[chunk("a", "alpha", Some(3)), chunk("b", "beta", None)]);
        assert_eq!(
            ctx,
            "[1] a.md (p.3, relevance: 0.80)\nalpha\n\n---\n\n[2] b.md (p.?, relevance: 0.80)\nbeta"
        );
    }

    #[test]
    fn citations_dedupe_and_cap() {
        let long = "x".repeat(300);
        let chunks: Vec<_> = ["a", "a", "b", "c", "d", "e", "f"]
            .iter()
            .map(|s| chunk(s, &long, Some(1)))
            .collect();
        let mut known = HashMap::new();
        known.insert(
            "b".to_string(),
            KnownDoc {
                id: "doc-b".into(),
                title: "Report B".into(),
                source: "OECD".into(),
                year: Some(2024),
            },
        );

        let cites = build_citations(&chunks, &known);
        assert_eq!(cites.len(), 5);
        let ids: Vec<_> = cites.iter().map(|c| c.store_doc_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c", "d", "e"]);
        assert_eq!(cites[0].excerpt.chars().count(), 203);
        assert!(cites[0].excerpt.ends_with("..."));
        assert_eq!(cites[0].document_id, None);
        assert_eq!(cites[1].document_id.as_deref(), Some("doc-b"));
        assert_eq!(cites[1].title, "Report B");
    }

    #[test]
    fn title_truncates_long_messages() {
        assert_eq!(conversation_title("short"), "short");
        let t = conversation_title(&"é".repeat(60));
        assert_eq!(t.chars().count(), 53);
    }

    #[test]
    fn enhancement_requires_non_empty_text() {
        let ok = parse_enhancement("```json\n{\"enhanced\": \"AI adoption in UAE government\", \"improvements\": [\"expanded\"]}\n```");
        assert_eq!(
            ok,
            Some(("AI adoption in UAE government".to_string(), vec!["expanded".to_string()]))
        );
        assert_eq!(parse_enhancement("{\"enhanced\": \"  \"}"), None);
        assert_eq!(parse_enhancement("not json"), None);
    }
}
