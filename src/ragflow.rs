//! Retrieval store client (RAGFlow REST API).
//!
//! The pipeline and chat dispatcher only see the [`RetrievalStore`] trait;
//! [`RagflowClient`] is the production implementation. Retries are applied
//! by callers through [`crate::retry::RetryPolicy`] using
//! [`StoreError::is_retryable`].
//!
//! # Endpoints used
//!
//! | Method | Path | Purpose |
//! |--------|------|---------|
//! | `GET`  | `/api/v1/datasets?name=` | find the configured dataset |
//! | `POST` | `/api/v1/datasets` | create it, with knowledge-graph extraction |
//! | `POST` | `/api/v1/datasets/{id}/documents` | multipart upload |
//! | `POST` | `/api/v1/datasets/{id}/documents/run` | start parsing |
//! | `DELETE` | `/api/v1/datasets/{id}/documents` | remove superseded documents |
//! | `POST` | `/api/v1/retrieval` | top-k passage retrieval |
//!
//! Every response is wrapped as `{ "code": 0, "data": ... }`; a non-zero
//! code is a [`StoreError::Api`].

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::OnceCell;

use crate::config::RetrievalConfig;
use crate::error::StoreError;
use crate::models::RetrievedChunk;

/// Metadata attached to an uploaded document.
#[derive(Debug, Clone)]
pub struct UploadRequest<'a> {
    /// File name in the store; `.md` is appended when it has no text extension.
    pub name: &'a str,
    pub text: &'a str,
}

#[derive(Debug, Clone)]
pub struct RetrievalQuery {
    pub question: String,
    /// Store document ids to scope to; empty means the whole corpus.
    pub document_ids: Vec<String>,
    pub top_k: usize,
}

#[async_trait]
pub trait RetrievalStore: Send + Sync {
    /// Uploads the text and requests parsing. Returns the store-side id.
    async fn upload_document(&self, req: &UploadRequest<'_>) -> Result<String, StoreError>;

    async fn retrieve(&self, query: &RetrievalQuery) -> Result<Vec<RetrievedChunk>, StoreError>;

    async fn delete_document(&self, store_doc_id: &str) -> Result<(), StoreError>;
}

pub struct RagflowClient {
    config: RetrievalConfig,
    api_key: String,
    client: reqwest::Client,
    dataset_id: OnceCell<String>,
}

impl RagflowClient {
    pub fn new(config: RetrievalConfig, api_key: String) -> Result<Self, StoreError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        Ok(Self {
            config,
            api_key,
            client,
            dataset_id: OnceCell::new(),
        })
    }

    /// Builds a client with the key from `RAGFLOW_API_KEY`.
    pub fn from_env(config: &RetrievalConfig) -> Result<Self, StoreError> {
        let key = std::env::var("RAGFLOW_API_KEY")
            .map_err(|_| StoreError::NotConfigured("RAGFLOW_API_KEY not set".to_string()))?;
        Self::new(config.clone(), key)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn map_send_error(&self, e: reqwest::Error) -> StoreError {
        if e.is_timeout() {
            StoreError::Timeout(self.config.timeout_secs)
        } else {
            StoreError::Connection(e.to_string())
        }
    }

    async fn send(&self, req: reqwest::RequestBuilder) -> Result<Value, StoreError> {
        let resp = req
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(StoreError::Http {
                status: status.as_u16(),
                body: truncate(&body, 500),
            });
        }

        let envelope: Value = resp
            .json()
            .await
            .map_err(|e| StoreError::Parse(e.to_string()))?;
        unwrap_envelope(envelope)
    }

    /// Resolves the dataset id once per client, creating the dataset if
    /// it does not exist yet.
    async fn dataset_id(&self) -> Result<&str, StoreError> {
        let id = self
            .dataset_id
            .get_or_try_init(|| async {
                if let Some(id) = self.find_dataset().await? {
                    return Ok(id);
                }
                self.create_dataset().await
            })
            .await?;
        Ok(id.as_str())
    }

    async fn find_dataset(&self) -> Result<Option<String>, StoreError> {
        let data = self
            .send(
                self.client
                    .get(self.url("/api/v1/datasets"))
                    .query(&[("name", self.config.dataset_name.as_str())]),
            )
            .await;

        // RAGFlow answers an unknown name with a non-zero code rather than
        // an empty list.
        let data = match data {
            Ok(data) => data,
            Err(StoreError::Api { .. }) => return Ok(None),
            Err(e) => return Err(e),
        };

        Ok(data.as_array().and_then(|sets| {
            sets.iter()
                .find(|d| d.get("name").and_then(Value::as_str) == Some(self.config.dataset_name.as_str()))
                .and_then(|d| d.get("id").and_then(Value::as_str))
                .map(str::to_string)
        }))
    }

    async fn create_dataset(&self) -> Result<String, StoreError> {
        tracing::info!("creating retrieval dataset '{}'", self.config.dataset_name);
        let payload = json!({
            "name": self.config.dataset_name,
            "description": "Executive intelligence reports",
            "language": "English",
            "chunk_method": self.config.chunk_method,
            "parser_config": {
                "graphrag": {
                    "use_graphrag": self.config.enable_graph,
                    "method": self.config.graph_method,
                    "entity_types": self.config.entity_types,
                }
            }
        });
        let data = self
            .send(self.client.post(self.url("/api/v1/datasets")).json(&payload))
            .await?;
        data.get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| StoreError::Parse("dataset response has no id".to_string()))
    }
}

#[async_trait]
impl RetrievalStore for RagflowClient {
    async fn upload_document(&self, req: &UploadRequest<'_>) -> Result<String, StoreError> {
        let dataset_id = self.dataset_id().await?;

        let name = if req.name.ends_with(".md") || req.name.ends_with(".txt") {
            req.name.to_string()
        } else {
            format!("{}.md", req.name)
        };
        let part = Part::bytes(req.text.as_bytes().to_vec())
            .file_name(name.clone())
            .mime_str("text/markdown")
            .map_err(|e| StoreError::Parse(e.to_string()))?;
        let form = Form::new().part("file", part);

        let data = self
            .send(
                self.client
                    .post(self.url(&format!("/api/v1/datasets/{}/documents", dataset_id)))
                    .multipart(form),
            )
            .await?;

        let doc_id = data
            .as_array()
            .and_then(|docs| docs.first())
            .unwrap_or(&data)
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| StoreError::Parse("upload response has no document id".to_string()))?;

        tracing::info!("uploaded {} to retrieval store (id: {})", name, doc_id);

        // The upload stands even if parsing cannot be started; it can be
        // re-triggered from the store's console.
        let run = self
            .send(
                self.client
                    .post(self.url(&format!("/api/v1/datasets/{}/documents/run", dataset_id)))
                    .json(&json!({ "document_ids": [doc_id] })),
            )
            .await;
        if let Err(e) = run {
            tracing::warn!("parse trigger failed for {}: {}", doc_id, e);
        }

        Ok(doc_id)
    }

    async fn retrieve(&self, query: &RetrievalQuery) -> Result<Vec<RetrievedChunk>, StoreError> {
        let dataset_id = self.dataset_id().await?;

        let mut payload = json!({
            "dataset_ids": [dataset_id],
            "question": query.question,
            "top_k": query.top_k,
            "similarity_threshold": self.config.similarity_threshold,
            "keyword_similarity_weight": self.config.keyword_weight,
        });
        if !query.document_ids.is_empty() {
            payload["document_ids"] = json!(query.document_ids);
        }

        let data = self
            .send(self.client.post(self.url("/api/v1/retrieval")).json(&payload))
            .await?;

        let mut chunks = parse_chunks(&data);
        chunks.truncate(query.top_k);
        Ok(chunks)
    }

    async fn delete_document(&self, store_doc_id: &str) -> Result<(), StoreError> {
        let dataset_id = self.dataset_id().await?;
        self.send(
            self.client
                .delete(self.url(&format!("/api/v1/datasets/{}/documents", dataset_id)))
                .json(&json!({ "ids": [store_doc_id] })),
        )
        .await?;
        tracing::info!("deleted {} from retrieval store", store_doc_id);
        Ok(())
    }
}

fn unwrap_envelope(envelope: Value) -> Result<Value, StoreError> {
    let code = envelope.get("code").and_then(Value::as_i64).unwrap_or(0);
    if code != 0 {
        let message = envelope
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown store error")
            .to_string();
        return Err(StoreError::Api { code, message });
    }
    Ok(envelope.get("data").cloned().unwrap_or(Value::Null))
}

/// Accepts both a bare list and `{ "chunks": [...] }`.
pub fn parse_chunks(data: &Value) -> Vec<RetrievedChunk> {
    let list = data
        .as_array()
        .or_else(|| data.get("chunks").and_then(Value::as_array));
    let Some(list) = list else {
        return Vec::new();
    };

    list.iter()
        .filter_map(|c| {
            let store_doc_id = c.get("document_id").and_then(Value::as_str)?.to_string();
            let content = c
                .get("content")
                .or_else(|| c.get("content_with_weight"))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let doc_name = c
                .get("document_keyword")
                .or_else(|| c.get("document_name"))
                .and_then(Value::as_str)
                .unwrap_or("Unknown document")
                .to_string();
            let page = c
                .get("page_num")
                .or_else(|| c.get("page"))
                .and_then(as_page)
                .or_else(|| {
                    c.get("positions")
                        .and_then(|p| p.get(0))
                        .and_then(|p| p.get(0))
                        .and_then(as_page)
                });
            let score = c
                .get("similarity")
                .or_else(|| c.get("score"))
                .and_then(Value::as_f64)
                .unwrap_or(0.0);
            Some(RetrievedChunk {
                store_doc_id,
                doc_name,
                content,
                page,
                score,
            })
        })
        .collect()
}

fn as_page(v: &Value) -> Option<i64> {
    v.as_i64()
        .or_else(|| v.as_array().and_then(|a| a.first()).and_then(Value::as_i64))
}

fn truncate(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}
