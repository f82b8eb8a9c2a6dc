//! Report bundle parsing.
//!
//! A bundle is one directory per report, as produced by the upstream PDF
//! conversion step:
//!
//! ```text
//! <bundle>/
//!   vlm/                         (optional; used when present)
//!     <name>.md                  primary text
//!     <name>_content_list.json   [{ "page_idx": 0, "text": "..." }, ...]
//!     <name>_origin.pdf          original file
//! ```
//!
//! A missing or empty primary text is a [`HubError::Parse`]. A missing or
//! malformed content list only costs the page map.

use globset::{Glob, GlobMatcher};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::error::HubError;

/// Lines scanned for a `# ` heading when picking a title.
const TITLE_SCAN_LINES: usize = 20;

#[derive(Debug, Clone)]
pub struct Bundle {
    /// Directory name; the idempotence key for the document record.
    pub key: String,
    pub path: PathBuf,
    pub title: String,
    pub text: String,
    pub blocks: Vec<PageBlock>,
    /// Distinct pages referenced by the content list.
    pub page_count: i64,
    pub content_hash: String,
    pub original: Option<PathBuf>,
}

/// One entry of the content list. Image and table blocks carry no text.
#[derive(Debug, Clone, Deserialize)]
pub struct PageBlock {
    pub page_idx: i64,
    #[serde(default)]
    pub text: Option<String>,
}

impl Bundle {
    /// 1-based page numbers present in the content list.
    pub fn known_pages(&self) -> BTreeSet<i64> {
        self.blocks.iter().map(|b| b.page_idx + 1).collect()
    }
}

pub fn parse_bundle(path: &Path) -> Result<Bundle, HubError> {
    if !path.is_dir() {
        return Err(HubError::Parse(format!(
            "bundle directory not found: {}",
            path.display()
        )));
    }

    let key = bundle_key(path)?;
    let dir = content_dir(path);

    let primary = find_primary(&dir, &key).ok_or_else(|| {
        HubError::Parse(format!("no markdown file in {}", dir.display()))
    })?;

    let bytes = std::fs::read(&primary).map_err(|e| {
        HubError::Parse(format!("cannot read {}: {}", primary.display(), e))
    })?;
    let text = decode_text(bytes);
    if text.trim().is_empty() {
        return Err(HubError::Parse(format!(
            "empty markdown content: {}",
            primary.display()
        )));
    }

    let stem = primary
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(key.as_str())
        .to_string();

    let blocks = read_content_list(&dir.join(format!("{}_content_list.json", stem)));
    let page_count = blocks
        .iter()
        .map(|b| b.page_idx)
        .collect::<BTreeSet<_>>()
        .len() as i64;

    let original = dir.join(format!("{}_origin.pdf", stem));
    let original = original.is_file().then_some(original);

    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let content_hash = format!("{:x}", hasher.finalize());

    Ok(Bundle {
        title: extract_title(&text, &key),
        key,
        path: path.to_path_buf(),
        text,
        blocks,
        page_count,
        content_hash,
        original,
    })
}

pub fn bundle_key(path: &Path) -> Result<String, HubError> {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.to_string())
        .ok_or_else(|| HubError::Parse(format!("bundle path has no name: {}", path.display())))
}

fn content_dir(path: &Path) -> PathBuf {
    let vlm = path.join("vlm");
    if vlm.is_dir() {
        vlm
    } else {
        path.to_path_buf()
    }
}

/// `<key>.md` when present, otherwise the first markdown file by name.
fn find_primary(dir: &Path, key: &str) -> Option<PathBuf> {
    let preferred = dir.join(format!("{}.md", key));
    if preferred.is_file() {
        return Some(preferred);
    }

    let matcher: GlobMatcher = Glob::new("*.md").ok()?.compile_matcher();
    let mut candidates: Vec<PathBuf> = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| p.file_name().map(|n| matcher.is_match(n)).unwrap_or(false))
        .collect();
    candidates.sort();
    candidates.into_iter().next()
}

fn read_content_list(path: &Path) -> Vec<PageBlock> {
    let raw = match std::fs::read(path) {
        Ok(raw) => raw,
        Err(_) => {
            tracing::debug!("no content list at {}", path.display());
            return Vec::new();
        }
    };

    // Individual malformed entries are skipped rather than dropping the map.
    match serde_json::from_slice::<Vec<serde_json::Value>>(&raw) {
        Ok(values) => values
            .into_iter()
            .filter_map(|v| serde_json::from_value::<PageBlock>(v).ok())
            .collect(),
        Err(e) => {
            tracing::warn!("ignoring malformed content list {}: {}", path.display(), e);
            Vec::new()
        }
    }
}

/// UTF-8, falling back to Latin-1 so a stray byte never loses a report.
fn decode_text(bytes: Vec<u8>) -> String {
    match String::from_utf8(bytes) {
        Ok(s) => s,
        Err(e) => e.into_bytes().iter().map(|&b| b as char).collect(),
    }
}

/// First `# ` heading near the top, else the first plausible plain line,
/// else the humanized bundle key.
pub fn extract_title(text: &str, key: &str) -> String {
    for line in text.lines().take(TITLE_SCAN_LINES) {
        if let Some(heading) = line.trim().strip_prefix("# ") {
            let heading = heading.trim();
            if !heading.is_empty() {
                return heading.to_string();
            }
        }
    }

    for line in text.lines() {
        let line = line.trim();
        let len = line.chars().count();
        if !line.starts_with('#') && len > 10 && len < 200 {
            return line.to_string();
        }
    }

    humanize_key(key)
}

fn humanize_key(key: &str) -> String {
    key.split(['_', '-'])
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
