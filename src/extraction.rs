//! Intelligence extraction: one JSON-mode gateway call per report, then
//! shape validation.
//!
//! A reply is accepted only if it is a JSON object with a non-empty
//! `executive_summary` and array-valued `key_findings`, `statistics`,
//! `quotes`, `aha_moments` and `recommendations`. Anything else is an
//! [`HubError::Extraction`]; the call is repeated `extraction_retries`
//! times with the same prompt before the error is returned.
//!
//! List order is preserved exactly as returned. Page numbers are stored
//! verbatim; [`page_warnings`] flags those that do not appear in the
//! bundle's content map.

use serde_json::{Map, Value};
use std::collections::BTreeSet;

use crate::error::HubError;
use crate::llm::{strip_code_fences, ChatMessage, CompletionRequest, LlmGateway, ModelTier};
use crate::models::{IntelItem, Intelligence, ItemType};
use crate::prompts;

const REQUIRED_LISTS: [&str; 5] = [
    "key_findings",
    "statistics",
    "quotes",
    "aha_moments",
    "recommendations",
];

#[derive(Debug, Clone)]
pub struct ExtractionInput<'a> {
    pub title: &'a str,
    pub source: &'a str,
    pub year: Option<i32>,
    pub page_count: i64,
    pub text: &'a str,
}

/// The accepted reply and the model that produced it.
#[derive(Debug, Clone)]
pub struct ExtractionOutput {
    pub intelligence: Intelligence,
    pub model: String,
    pub attempts: u32,
}

pub async fn extract(
    gateway: &dyn LlmGateway,
    input: &ExtractionInput<'_>,
    max_content_chars: usize,
    retries: u32,
) -> Result<ExtractionOutput, HubError> {
    let prompt = build_prompt(input, max_content_chars);
    let mut last_err = None;

    for attempt in 0..=retries {
        let req = CompletionRequest::new(
            ModelTier::Extraction,
            vec![
                ChatMessage::system(prompts::EXTRACTION_SYSTEM),
                ChatMessage::user(prompt.clone()),
            ],
        )
        .temperature(0.1)
        .json();

        let result = match gateway.complete(req).await {
            Ok(completion) => parse_payload(&completion.content).map(|intel| (intel, completion.model)),
            Err(e) => Err(HubError::Extraction(e.to_string())),
        };

        match result {
            Ok((intelligence, model)) => {
                return Ok(ExtractionOutput {
                    intelligence,
                    model,
                    attempts: attempt + 1,
                })
            }
            Err(e) => {
                tracing::warn!(
                    "extraction attempt {}/{} for '{}' failed: {}",
                    attempt + 1,
                    retries + 1,
                    input.title,
                    e
                );
                last_err = Some(e);
            }
        }
    }

    Err(last_err.unwrap_or_else(|| HubError::Extraction("no extraction attempt was made".into())))
}

pub fn build_prompt(input: &ExtractionInput<'_>, max_content_chars: usize) -> String {
    let (content, truncated) = truncate_content(input.text, max_content_chars);
    let mut content = content.to_string();
    if truncated {
        content.push_str(prompts::TRUNCATION_NOTE);
    }
    let year = input
        .year
        .map(|y| y.to_string())
        .unwrap_or_else(|| "Unknown".to_string());
    let pages = input.page_count.to_string();

    // Content goes last so placeholders inside the report text stay untouched.
    prompts::fill(
        prompts::EXTRACTION_TEMPLATE,
        &[
            ("title", input.title),
            ("source", input.source),
            ("year", &year),
            ("page_count", &pages),
            ("content", &content),
        ],
    )
}

/// Cuts `text` to at most `max_chars` characters on a char boundary.
pub fn truncate_content(text: &str, max_chars: usize) -> (&str, bool) {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => (&text[..byte_idx], true),
        None => (text, false),
    }
}

/// Validates and normalizes a model reply.
pub fn parse_payload(raw: &str) -> Result<Intelligence, HubError> {
    let cleaned = strip_code_fences(raw);
    let value: Value = serde_json::from_str(cleaned)
        .map_err(|e| HubError::Extraction(format!("payload is not valid JSON: {}", e)))?;
    let obj = value
        .as_object()
        .ok_or_else(|| HubError::Extraction("payload is not a JSON object".to_string()))?;

    for key in REQUIRED_LISTS {
        match obj.get(key) {
            Some(Value::Array(_)) => {}
            Some(_) => {
                return Err(HubError::Extraction(format!("'{}' is not a list", key)));
            }
            None => {
                return Err(HubError::Extraction(format!("missing required key '{}'", key)));
            }
        }
    }

    let (summary, briefing_hook) = obj
        .get("executive_summary")
        .map(flatten_summary)
        .ok_or_else(|| HubError::Extraction("missing required key 'executive_summary'".into()))?;
    if summary.trim().is_empty() {
        return Err(HubError::Extraction("executive_summary is empty".to_string()));
    }

    Ok(Intelligence {
        summary,
        briefing_hook,
        findings: list(obj, "key_findings", ItemType::Finding),
        statistics: list(obj, "statistics", ItemType::Statistic),
        quotes: list(obj, "quotes", ItemType::Quote),
        insights: list(obj, "aha_moments", ItemType::Insight),
        recommendations: list(obj, "recommendations", ItemType::Recommendation),
        methodology: obj.get("methodology").and_then(flatten_text),
        limitations: obj.get("limitations").and_then(flatten_text),
    })
}

/// The summary is either a string or the structured object the prompt asks
/// for; the object's parts are joined by blank lines.
fn flatten_summary(v: &Value) -> (String, Option<String>) {
    match v {
        Value::String(s) => (s.trim().to_string(), None),
        Value::Object(map) => {
            let parts: Vec<&str> = ["core_message", "key_takeaways", "strategic_implications"]
                .iter()
                .filter_map(|k| map.get(*k).and_then(Value::as_str))
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .collect();
            let hook = str_field(map, "briefing_hook");
            (parts.join("\n\n"), hook)
        }
        _ => (String::new(), None),
    }
}

/// Strings pass through; objects become `key: value` lines.
fn flatten_text(v: &Value) -> Option<String> {
    let text = match v {
        Value::String(s) => s.trim().to_string(),
        Value::Object(map) => map
            .iter()
            .filter_map(|(k, v)| {
                let val = match v {
                    Value::String(s) => s.trim().to_string(),
                    Value::Null => return None,
                    other => other.to_string(),
                };
                (!val.is_empty()).then(|| format!("{}: {}", k, val))
            })
            .collect::<Vec<_>>()
            .join("\n"),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

fn list(obj: &Map<String, Value>, key: &str, kind: ItemType) -> Vec<IntelItem> {
    obj.get(key)
        .and_then(Value::as_array)
        .map(|entries| {
            entries
                .iter()
                .filter_map(|e| {
                    let item = to_item(e, kind);
                    if item.is_none() {
                        tracing::debug!("dropping {} entry without a body", kind);
                    }
                    item
                })
                .collect()
        })
        .unwrap_or_default()
}

fn to_item(entry: &Value, kind: ItemType) -> Option<IntelItem> {
    let map = match entry {
        Value::String(s) if !s.trim().is_empty() => {
            return Some(IntelItem {
                body: s.trim().to_string(),
                ..Default::default()
            })
        }
        Value::Object(map) => map,
        _ => return None,
    };

    let mut item = match kind {
        ItemType::Finding => IntelItem {
            body: str_field(map, "finding")?,
            context: str_field(map, "evidence"),
            significance: str_field(map, "significance_uae").or_else(|| str_field(map, "significance")),
            tags: str_field(map, "category").into_iter().collect(),
            ..Default::default()
        },
        ItemType::Statistic => IntelItem {
            body: str_field(map, "stat").or_else(|| str_field(map, "value_raw"))?,
            context: str_field(map, "context"),
            significance: str_field(map, "comparisons"),
            ..Default::default()
        },
        ItemType::Quote => IntelItem {
            body: str_field(map, "quote").or_else(|| str_field(map, "text"))?,
            context: match (str_field(map, "speaker"), str_field(map, "context")) {
                (Some(speaker), Some(ctx)) => Some(format!("{}: {}", speaker, ctx)),
                (speaker, ctx) => speaker.or(ctx),
            },
            ..Default::default()
        },
        ItemType::Insight => IntelItem {
            body: str_field(map, "insight")?,
            context: str_field(map, "conventional_wisdom"),
            significance: str_field(map, "implications_uae").or_else(|| str_field(map, "why_surprising")),
            ..Default::default()
        },
        ItemType::Recommendation => IntelItem {
            body: str_field(map, "recommendation")?,
            context: str_field(map, "rationale"),
            significance: str_field(map, "priority"),
            ..Default::default()
        },
    };

    item.page = map.get("page").and_then(page_number);
    if let Some(tags) = map.get("tags").and_then(Value::as_array) {
        item.tags.extend(
            tags.iter()
                .filter_map(Value::as_str)
                .map(|t| t.trim().to_lowercase())
                .filter(|t| !t.is_empty()),
        );
    }
    Some(item)
}

fn str_field(map: &Map<String, Value>, key: &str) -> Option<String> {
    map.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Integers, integral floats and numeric strings; anything else is `None`.
fn page_number(v: &Value) -> Option<i64> {
    match v {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Describes every extracted page reference that falls outside the pages
/// known from the content map. Empty when the map is empty.
pub fn page_warnings(intel: &Intelligence, known_pages: &BTreeSet<i64>) -> Vec<String> {
    if known_pages.is_empty() {
        return Vec::new();
    }
    intel
        .entries()
        .filter_map(|(kind, pos, item)| {
            let page = item.page?;
            (!known_pages.contains(&page)).then(|| {
                format!(
                    "{} #{} cites page {} which is not in the content map",
                    kind,
                    pos + 1,
                    page
                )
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> String {
        serde_json::json!({
            "executive_summary": {
                "core_message": "AI adoption is accelerating.",
                "key_takeaways": "Talent is the bottleneck.",
                "strategic_implications": "",
                "briefing_hook": "Half of firms now use AI."
            },
            "key_findings": [
                {"finding": "F1", "evidence": "survey", "page": 3, "category": "trend"},
                {"finding": "F2", "page": "7"}
            ],
            "statistics": [{"stat": "45% of CEOs", "context": "survey of 1000", "page": 2.0}],
            "quotes": [{"quote": "Q", "speaker": "CEO", "context": "keynote"}],
            "aha_moments": [],
            "recommendations": ["Invest in compute"],
            "methodology": {"research_type": "survey", "sample_description": null},
            "limitations": "Self-reported data"
        })
        .to_string()
    }

    #[test]
    fn parses_structured_summary_and_lists() {
        let intel = parse_payload(&sample()).unwrap();
        assert_eq!(intel.summary, "AI adoption is accelerating.\n\nTalent is the bottleneck.");
        assert_eq!(intel.briefing_hook.as_deref(), Some("Half of firms now use AI."));
        assert_eq!(intel.findings.len(), 2);
        assert_eq!(intel.findings[0].tags, vec!["trend".to_string()]);
        assert_eq!(intel.findings[1].page, Some(7));
        assert_eq!(intel.statistics[0].page, Some(2));
        assert_eq!(intel.quotes[0].context.as_deref(), Some("CEO: keynote"));
        assert!(intel.insights.is_empty());
        assert_eq!(intel.recommendations[0].body, "Invest in compute");
        assert_eq!(intel.methodology.as_deref(), Some("research_type: survey"));
        assert_eq!(intel.limitations.as_deref(), Some("Self-reported data"));
    }

    #[test]
    fn accepts_fenced_reply() {
        let fenced = format!("```json\n{}\n```", sample());
        assert!(parse_payload(&fenced).is_ok());
    }

    #[test]
    fn rejects_invalid_json() {
        let err = parse_payload("{\"executive_summary\": ").unwrap_err();
        assert!(matches!(err, HubError::Extraction(_)));
    }

    #[test]
    fn rejects_missing_list() {
        let raw = r#"{"executive_summary": "ok", "key_findings": [], "statistics": [], "quotes": [], "aha_moments": []}"#;
        let err = parse_payload(raw).unwrap_err();
        assert!(err.to_string().contains("recommendations"));
    }

    #[test]
    fn rejects_empty_summary() {
        let raw = r#"{"executive_summary": " ", "key_findings": [], "statistics": [], "quotes": [], "aha_moments": [], "recommendations": []}"#;
        assert!(parse_payload(raw).is_err());
    }

    #[test]
    fn truncates_on_char_boundary() {
        let (cut, truncated) = truncate_content("héllo wörld", 4);
        assert_eq!(cut, "héll");
        assert!(truncated);
        let (all, truncated) = truncate_content("short", 10);
        assert_eq!(all, "short");
        assert!(!truncated);
    }

    #[test]
    fn prompt_marks_truncation() {
        let text = "x".repeat(2000);
        let input = ExtractionInput {
            title: "T",
            source: "BCG",
            year: None,
            page_count: 4,
            text: &text,
        };
        let prompt = build_prompt(&input, 1000);
        assert!(prompt.contains("Content truncated"));
        assert!(prompt.contains("YEAR: Unknown"));
        assert!(!prompt.contains(&"x".repeat(1001)));
    }

    #[test]
    fn flags_pages_outside_content_map() {
        let intel = parse_payload(&sample()).unwrap();
        let warnings = page_warnings(&intel, &BTreeSet::from([1, 2, 3]));
        assert_eq!(warnings, vec!["finding #2 cites page 7 which is not in the content map"]);
        assert!(page_warnings(&intel, &BTreeSet::new()).is_empty());
    }
}
