//! Provenance inference from bundle names and report text.
//!
//! Never fails: anything that cannot be inferred falls back to `"Unknown"`
//! (source), `None` (year) or `"Research"` (category).

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

pub const UNKNOWN_SOURCE: &str = "Unknown";
pub const DEFAULT_CATEGORY: &str = "Research";

/// Characters of report text searched for a publication-year marker.
const YEAR_SCAN_CHARS: usize = 5000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub source: String,
    pub year: Option<i32>,
    pub category: String,
}

/// Explicitly supplied values; each one wins over inference.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MetadataOverrides {
    pub source: Option<String>,
    pub year: Option<i32>,
    pub category: Option<String>,
}

/// Ordered needle table; the first match wins, so specific names come before
/// the generic UAE/Dubai fallbacks at the end. Needles of four characters or
/// fewer only match whole `_`/`-`/space separated tokens.
const SOURCES: &[(&str, &str)] = &[
    // Consulting
    ("bcg", "BCG"),
    ("mckinsey", "McKinsey"),
    ("deloitte", "Deloitte"),
    ("accenture", "Accenture"),
    ("kpmg", "KPMG"),
    ("ey", "EY"),
    ("pwc", "PwC"),
    ("capgemini", "Capgemini"),
    ("bain", "Bain & Company"),
    ("cognizant", "Cognizant"),
    ("heidrick", "Heidrick & Struggles"),
    ("kearney", "Kearney"),
    ("roland_berger", "Roland Berger"),
    ("oliver_wyman", "Oliver Wyman"),
    // Technology companies
    ("google", "Google"),
    ("microsoft", "Microsoft"),
    ("amazon", "Amazon"),
    ("aws", "AWS"),
    ("cisco", "Cisco"),
    ("anthropic", "Anthropic"),
    ("openai", "OpenAI"),
    ("nvidia", "NVIDIA"),
    ("ibm", "IBM"),
    ("salesforce", "Salesforce"),
    // Think tanks and research
    ("atlantic", "Atlantic Council"),
    ("brookings", "Brookings Institution"),
    ("arxiv", "arXiv"),
    ("ai_now", "AI Now Institute"),
    ("future_of_life", "Future of Life Institute"),
    ("future_of_humanity", "Future of Humanity Institute"),
    ("gartner", "Gartner"),
    ("forrester", "Forrester"),
    ("idc", "IDC"),
    ("nist", "NIST"),
    ("ieee", "IEEE"),
    // International organizations
    ("world_bank", "World Bank"),
    ("un", "United Nations"),
    ("imf", "IMF"),
    ("wef", "World Economic Forum"),
    ("oecd", "OECD"),
    ("g7", "G7"),
    ("european_parliament", "European Parliament"),
    ("eu", "European Union"),
    ("nato", "NATO"),
    ("unesco", "UNESCO"),
    ("who", "WHO"),
    // UAE entities
    ("dcai", "DCAI"),
    ("dff", "DFF"),
    ("dubai_future", "Dubai Future Foundation"),
    ("dubai_health", "Dubai Health Authority"),
    ("dubai_government", "Dubai Government"),
    ("digital_dubai", "Digital Dubai"),
    ("mbrsg", "MBRSG"),
    ("abu_dhabi", "Abu Dhabi Government"),
    // Government agencies
    ("white_house", "US White House"),
    ("dhs", "US DHS"),
    ("dod", "US DoD"),
    ("cisa", "US CISA"),
    ("california", "State of California"),
    // Academic
    ("mit", "MIT"),
    ("stanford", "Stanford"),
    ("harvard", "Harvard"),
    ("oxford", "Oxford"),
    ("cambridge", "Cambridge"),
    // Fallback UAE mentions
    ("uae", "UAE Government"),
    ("dubai", "Dubai Government"),
    ("emirates", "UAE Government"),
];

const CONSULTING: &[&str] = &[
    "BCG",
    "McKinsey",
    "Deloitte",
    "Accenture",
    "KPMG",
    "EY",
    "PwC",
    "Bain & Company",
    "Cognizant",
    "Capgemini",
    "Heidrick & Struggles",
    "Kearney",
    "Roland Berger",
    "Oliver Wyman",
];

const GOVERNMENT: &[&str] = &[
    "DCAI",
    "DFF",
    "Dubai Government",
    "UAE Government",
    "Abu Dhabi Government",
    "Dubai Future Foundation",
    "Dubai Health Authority",
    "Digital Dubai",
    "US White House",
    "US DHS",
    "US DoD",
    "US CISA",
    "State of California",
];

const THINK_TANKS: &[&str] = &[
    "Atlantic Council",
    "Brookings Institution",
    "AI Now Institute",
    "Future of Life Institute",
    "Future of Humanity Institute",
];

const ACADEMIC: &[&str] = &["arXiv", "MIT", "Stanford", "Harvard", "Oxford", "Cambridge"];

const NEWS_SOURCES: &[&str] = &["Dubai News", "UAE News", "News Article"];

const POLICY_KEYWORDS: &[&str] = &["policy", "regulation", "act", "law", "governance"];
const NEWS_KEYWORDS: &[&str] = &["news", "article", "press"];

fn news_prefix() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\d{4})-\d{2}-\d{2}_").expect("valid regex"))
}

fn year_in_name() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"20(1\d|2\d)").expect("valid regex"))
}

fn year_marker() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)(?:copyright|published|©)\D{0,20}(20[12]\d)").expect("valid regex")
    })
}

pub fn infer(bundle_key: &str, text: &str) -> DocumentMetadata {
    let lower = bundle_key.to_lowercase();

    if let Some(caps) = news_prefix().captures(bundle_key) {
        let year = caps.get(1).and_then(|m| m.as_str().parse().ok());
        let source = if lower.contains("dubai") {
            "Dubai News"
        } else if lower.contains("uae") || lower.contains("emirates") {
            "UAE News"
        } else {
            "News Article"
        };
        return DocumentMetadata {
            source: source.to_string(),
            year,
            category: "News".to_string(),
        };
    }

    let source = detect_source(&lower).unwrap_or(UNKNOWN_SOURCE).to_string();
    let year = detect_year(bundle_key, text);
    let category = detect_category(&source, &lower).to_string();

    DocumentMetadata {
        source,
        year,
        category,
    }
}

pub fn infer_with(bundle_key: &str, text: &str, overrides: &MetadataOverrides) -> DocumentMetadata {
    let mut meta = infer(bundle_key, text);
    if let Some(source) = overrides.source.as_ref().filter(|s| !s.trim().is_empty()) {
        meta.source = source.clone();
    }
    if overrides.year.is_some() {
        meta.year = overrides.year;
    }
    if let Some(category) = overrides.category.as_ref().filter(|s| !s.trim().is_empty()) {
        meta.category = category.clone();
    }
    meta
}

fn detect_source(lower: &str) -> Option<&'static str> {
    let tokens: Vec<&str> = lower
        .split(|c: char| c == '_' || c == '-' || c == ' ' || c == '.')
        .filter(|t| !t.is_empty())
        .collect();

    SOURCES
        .iter()
        .find(|(needle, _)| {
            if needle.len() <= 4 {
                tokens.contains(needle)
            } else {
                lower.contains(needle)
            }
        })
        .map(|(_, name)| *name)
}

fn detect_year(bundle_key: &str, text: &str) -> Option<i32> {
    if let Some(m) = year_in_name().find(bundle_key) {
        return m.as_str().parse().ok();
    }

    let head: String = text.chars().take(YEAR_SCAN_CHARS).collect();
    year_marker()
        .captures(&head)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

fn detect_category(source: &str, lower: &str) -> &'static str {
    if CONSULTING.contains(&source) {
        "Consulting"
    } else if GOVERNMENT.contains(&source) {
        "Policy"
    } else if THINK_TANKS.contains(&source) {
        "Think Tank"
    } else if NEWS_SOURCES.contains(&source) {
        "News"
    } else if ACADEMIC.contains(&source) {
        "Academic"
    } else if POLICY_KEYWORDS.iter().any(|k| lower.contains(k)) {
        "Policy"
    } else if NEWS_KEYWORDS.iter().any(|k| lower.contains(k)) {
        "News"
    } else {
        DEFAULT_CATEGORY
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consulting_report() {
        let meta = infer("BCG_AI_at_Work_2024", "");
        assert_eq!(meta.source, "BCG");
        assert_eq!(meta.year, Some(2024));
        assert_eq!(meta.category, "Consulting");
    }

    #[test]
    fn dated_prefix_is_news() {
        let meta = infer("2025-03-14_dubai_launches_ai_campus", "");
        assert_eq!(meta.source, "Dubai News");
        assert_eq!(meta.year, Some(2025));
        assert_eq!(meta.category, "News");
    }

    #[test]
    fn short_needles_match_whole_tokens_only() {
        // "they" and "summit" must not read as EY or MIT
        let meta = infer("what_they_said_at_the_summit", "");
        assert_eq!(meta.source, UNKNOWN_SOURCE);
        assert_eq!(infer("ey_tax_outlook", "").source, "EY");
    }

    #[test]
    fn specific_uae_entity_beats_generic_dubai() {
        assert_eq!(infer("dubai_future_foresight", "").source, "Dubai Future Foundation");
        assert_eq!(infer("dubai_ai_roadmap", "").source, "Dubai Government");
        assert_eq!(infer("dubai_ai_roadmap", "").category, "Policy");
    }

    #[test]
    fn year_from_text_marker() {
        let meta = infer("untitled_report", "Intro\nCopyright © 2023 Some Org");
        assert_eq!(meta.year, Some(2023));
    }

    #[test]
    fn unknown_defaults() {
        let meta = infer("miscellaneous", "no dates here");
        assert_eq!(meta.source, UNKNOWN_SOURCE);
        assert_eq!(meta.year, None);
        assert_eq!(meta.category, DEFAULT_CATEGORY);
    }

    #[test]
    fn keyword_category_for_unknown_source() {
        assert_eq!(infer("national_data_policy", "").category, "Policy");
        assert_eq!(infer("press_briefing_notes", "").category, "News");
    }

    #[test]
    fn overrides_win() {
        let overrides = MetadataOverrides {
            source: Some("Ministry of Economy".into()),
            year: Some(2021),
            category: None,
        };
        let meta = infer_with("bcg_report_2024", "", &overrides);
        assert_eq!(meta.source, "Ministry of Economy");
        assert_eq!(meta.year, Some(2021));
        assert_eq!(meta.category, "Consulting");
    }
}
