//! Error taxonomy for the ingestion pipeline and request handlers.
//!
//! Pipeline stages return [`HubError`]; the batch runner catches it at the
//! document boundary and records [`HubError::to_record`] on the document
//! and job item. The HTTP layer maps each variant to a status code.
//!
//! | Variant | Raised by | Retried |
//! |---------|-----------|---------|
//! | `Parse` | bundle parser | no |
//! | `IndexUpload` | retrieval-store upload | bounded backoff |
//! | `Extraction` | LLM extraction | once |
//! | `DocumentNotFound` | single-document chat, lookups | no |
//! | `StorageWrite` | persistence of extraction results | no |

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HubError {
    #[error("bundle could not be parsed: {0}")]
    Parse(String),

    #[error("index upload failed: {0}")]
    IndexUpload(String),

    #[error("extraction failed: {0}")]
    Extraction(String),

    #[error("document not found: {0}")]
    DocumentNotFound(String),

    #[error("conversation not found: {0}")]
    ConversationNotFound(String),

    #[error("job not found: {0}")]
    JobNotFound(String),

    #[error("news item not found: {0}")]
    NewsNotFound(String),

    #[error("data bank item not found: {0}")]
    ItemNotFound(String),

    #[error("storage write failed: {0}")]
    StorageWrite(String),

    #[error("{0}")]
    BadRequest(String),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error("retrieval failed: {0}")]
    Retrieval(#[from] StoreError),

    #[error("article scrape failed: {0}")]
    Scrape(String),

    #[error("web search failed: {0}")]
    WebSearch(WebError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl HubError {
    /// Stable name of the error class, as stored on failed records.
    pub fn kind(&self) -> &'static str {
        match self {
            HubError::Parse(_) => "ParseError",
            HubError::IndexUpload(_) => "IndexUploadError",
            HubError::Extraction(_) => "ExtractionError",
            HubError::DocumentNotFound(_) => "DocumentNotFound",
            HubError::ConversationNotFound(_) => "ConversationNotFound",
            HubError::JobNotFound(_) => "JobNotFound",
            HubError::NewsNotFound(_) => "NewsNotFound",
            HubError::ItemNotFound(_) => "ItemNotFound",
            HubError::StorageWrite(_) => "StorageWriteError",
            HubError::BadRequest(_) => "ValidationError",
            HubError::Gateway(_) => "GatewayError",
            HubError::Retrieval(_) => "RetrievalError",
            HubError::Scrape(_) => "ScrapeError",
            HubError::WebSearch(_) => "WebSearchError",
            HubError::Database(_) => "DatabaseError",
        }
    }

    /// `"<Kind>: <message>"`, the form written to `documents.error` and
    /// `job_items.error`.
    pub fn to_record(&self) -> String {
        format!("{}: {}", self.kind(), self)
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            HubError::DocumentNotFound(_)
                | HubError::ConversationNotFound(_)
                | HubError::JobNotFound(_)
                | HubError::NewsNotFound(_)
                | HubError::ItemNotFound(_)
        )
    }

    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            HubError::Gateway(GatewayError::Timeout(_))
                | HubError::Retrieval(StoreError::Timeout(_))
                | HubError::WebSearch(WebError::Timeout(_))
        )
    }
}

/// Failure talking to the LLM gateway.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("LLM gateway not configured: {0}")]
    NotConfigured(String),
    #[error("LLM gateway connection error: {0}")]
    Connection(String),
    #[error("LLM gateway timed out after {0}s")]
    Timeout(u64),
    #[error("LLM gateway returned HTTP {status}: {body}")]
    Api { status: u16, body: String },
    #[error("LLM gateway response could not be parsed: {0}")]
    Parse(String),
}

impl GatewayError {
    pub fn is_retryable(&self) -> bool {
        match self {
            GatewayError::Connection(_) | GatewayError::Timeout(_) => true,
            GatewayError::Api { status, .. } => *status == 429 || *status >= 500,
            GatewayError::NotConfigured(_) | GatewayError::Parse(_) => false,
        }
    }
}

/// Failure talking to the retrieval store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("retrieval store not configured: {0}")]
    NotConfigured(String),
    #[error("connection error: {0}")]
    Connection(String),
    #[error("timed out after {0}s")]
    Timeout(u64),
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("store error code {code}: {message}")]
    Api { code: i64, message: String },
    #[error("unexpected response: {0}")]
    Parse(String),
}

impl StoreError {
    pub fn is_retryable(&self) -> bool {
        match self {
            StoreError::Connection(_) | StoreError::Timeout(_) => true,
            StoreError::Http { status, .. } => *status == 429 || *status >= 500,
            StoreError::NotConfigured(_) | StoreError::Api { .. } | StoreError::Parse(_) => false,
        }
    }
}

/// Failure talking to the web search or scrape APIs.
#[derive(Debug, Error)]
pub enum WebError {
    #[error("not configured: {0}")]
    NotConfigured(String),
    #[error("connection error: {0}")]
    Connection(String),
    #[error("timed out after {0}s")]
    Timeout(u64),
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("unexpected response: {0}")]
    Parse(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_carries_kind_prefix() {
        let err = HubError::Extraction("payload is not valid JSON".into());
        assert_eq!(
            err.to_record(),
            "ExtractionError: extraction failed: payload is not valid JSON"
        );
    }

    #[test]
    fn only_transient_gateway_errors_retry() {
        assert!(GatewayError::Api {
            status: 503,
            body: String::new()
        }
        .is_retryable());
        assert!(GatewayError::Api {
            status: 429,
            body: String::new()
        }
        .is_retryable());
        assert!(!GatewayError::Api {
            status: 401,
            body: String::new()
        }
        .is_retryable());
        assert!(!GatewayError::Parse("bad".into()).is_retryable());
    }

    #[test]
    fn store_application_errors_do_not_retry() {
        assert!(!StoreError::Api {
            code: 102,
            message: "dataset missing".into()
        }
        .is_retryable());
        assert!(StoreError::Connection("refused".into()).is_retryable());
    }
}
