//! Core data types shared by the pipeline, chat dispatch and HTTP layer.
//!
//! Timestamps are stored as Unix seconds and rendered as ISO-8601 at the
//! response boundary.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle of a document record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentState {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl DocumentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentState::Pending => "pending",
            DocumentState::Processing => "processing",
            DocumentState::Completed => "completed",
            DocumentState::Failed => "failed",
        }
    }
}

impl FromStr for DocumentState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(DocumentState::Pending),
            "processing" => Ok(DocumentState::Processing),
            "completed" => Ok(DocumentState::Completed),
            "failed" => Ok(DocumentState::Failed),
            other => Err(format!("unknown document state: {}", other)),
        }
    }
}

/// Kind of an extracted-intelligence entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemType {
    Finding,
    Statistic,
    Quote,
    Insight,
    Recommendation,
}

impl ItemType {
    pub const ALL: [ItemType; 5] = [
        ItemType::Finding,
        ItemType::Statistic,
        ItemType::Quote,
        ItemType::Insight,
        ItemType::Recommendation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ItemType::Finding => "finding",
            ItemType::Statistic => "statistic",
            ItemType::Quote => "quote",
            ItemType::Insight => "insight",
            ItemType::Recommendation => "recommendation",
        }
    }
}

impl fmt::Display for ItemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ItemType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "finding" => Ok(ItemType::Finding),
            "statistic" => Ok(ItemType::Statistic),
            "quote" => Ok(ItemType::Quote),
            // "aha_moment" is the name the extraction prompt uses
            "insight" | "aha_moment" => Ok(ItemType::Insight),
            "recommendation" => Ok(ItemType::Recommendation),
            other => Err(format!(
                "unknown item type: '{}'. Use finding, statistic, quote, insight, or recommendation.",
                other
            )),
        }
    }
}

/// One entry of an extracted list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IntelItem {
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    /// Page number exactly as the model reported it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub significance: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Structured intelligence extracted from one report.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Intelligence {
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub briefing_hook: Option<String>,
    pub findings: Vec<IntelItem>,
    pub statistics: Vec<IntelItem>,
    pub quotes: Vec<IntelItem>,
    pub insights: Vec<IntelItem>,
    pub recommendations: Vec<IntelItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub methodology: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limitations: Option<String>,
}

impl Intelligence {
    pub fn list(&self, kind: ItemType) -> &[IntelItem] {
        match kind {
            ItemType::Finding => &self.findings,
            ItemType::Statistic => &self.statistics,
            ItemType::Quote => &self.quotes,
            ItemType::Insight => &self.insights,
            ItemType::Recommendation => &self.recommendations,
        }
    }

    /// Every entry with its type and position in its own list, in list order.
    pub fn entries(&self) -> impl Iterator<Item = (ItemType, usize, &IntelItem)> {
        ItemType::ALL.into_iter().flat_map(move |kind| {
            self.list(kind)
                .iter()
                .enumerate()
                .map(move |(pos, item)| (kind, pos, item))
        })
    }

    pub fn item_count(&self) -> usize {
        ItemType::ALL.iter().map(|k| self.list(*k).len()).sum()
    }
}

/// Retrieval scope of a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatMode {
    Single,
    All,
    Minister,
}

impl ChatMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatMode::Single => "single",
            ChatMode::All => "all",
            ChatMode::Minister => "minister",
        }
    }
}

impl FromStr for ChatMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "single" => Ok(ChatMode::Single),
            "all" => Ok(ChatMode::All),
            "minister" => Ok(ChatMode::Minister),
            other => Err(format!(
                "unknown chat mode: '{}'. Use single, all, or minister.",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "system" => Ok(Role::System),
            other => Err(format!("unknown role: {}", other)),
        }
    }
}

/// A passage returned by the retrieval store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievedChunk {
    /// Store-side document id.
    pub store_doc_id: String,
    pub doc_name: String,
    pub content: String,
    pub page: Option<i64>,
    pub score: f64,
}

/// Reference from an assistant message back to a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    /// Local document id, when the store id maps to a known document.
    pub document_id: Option<String>,
    pub store_doc_id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<i64>,
    pub excerpt: String,
    pub score: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

/// Per-bundle status inside a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    Pending,
    Processing,
    Completed,
    Skipped,
    Failed,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Pending => "pending",
            ItemStatus::Processing => "processing",
            ItemStatus::Completed => "completed",
            ItemStatus::Skipped => "skipped",
            ItemStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ItemStatus::Completed | ItemStatus::Skipped | ItemStatus::Failed
        )
    }
}

pub fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_else(|| ts.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(body: &str) -> IntelItem {
        IntelItem {
            body: body.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn entries_keep_list_order_within_type() {
        let intel = Intelligence {
            summary: "s".into(),
            findings: vec![item("f0"), item("f1")],
            recommendations: vec![item("r0")],
            ..Default::default()
        };
        let got: Vec<(ItemType, usize, String)> = intel
            .entries()
            .map(|(k, p, i)| (k, p, i.body.clone()))
            .collect();
        assert_eq!(
            got,
            vec![
                (ItemType::Finding, 0, "f0".to_string()),
                (ItemType::Finding, 1, "f1".to_string()),
                (ItemType::Recommendation, 0, "r0".to_string()),
            ]
        );
        assert_eq!(intel.item_count(), 3);
    }

    #[test]
    fn aha_moment_parses_as_insight() {
        assert_eq!("aha_moment".parse::<ItemType>(), Ok(ItemType::Insight));
        assert!("trend".parse::<ItemType>().is_err());
    }
}
