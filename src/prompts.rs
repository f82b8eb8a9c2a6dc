//! Prompt templates.
//!
//! Placeholders are `{name}` and are filled with [`fill`]. Templates that ask
//! for JSON spell out the exact keys the parsers in `extraction` and `news`
//! accept.

/// Replaces each `{key}` with its value in a single pass, so substituted
/// text is never expanded again. Unknown `{...}` spans are left as written.
pub fn fill(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let value = after.find('}').and_then(|close| {
            let key = &after[..close];
            vars.iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| (*v, close))
        });
        match value {
            Some((v, close)) => {
                out.push_str(v);
                rest = &after[close + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

// ============ Extraction ============

pub const EXTRACTION_SYSTEM: &str = "You are an intelligence analyst preparing briefing material \
for a government minister responsible for artificial intelligence. You read full reports and \
return strict JSON. You never invent statistics, quotes or page numbers.";

pub const EXTRACTION_TEMPLATE: &str = r#"Extract structured intelligence from the report below.

TITLE: {title}
SOURCE: {source}
YEAR: {year}
PAGES: {page_count}

--- CONTENT START ---
{content}
--- CONTENT END ---

Rules:
- Extract everything relevant. Long reports routinely yield dozens of findings and statistics.
- Statistics and quotes must be verbatim, with original units.
- Give the page number when it is visible in the text, otherwise null.
- Frame significance for the UAE's AI strategy.
- Use null (not "null") for missing values. Output one JSON object and nothing else.

Return exactly these top-level keys. Every list must be present, even if empty.

{
  "executive_summary": {
    "core_message": "1-2 sentences",
    "key_takeaways": "2-3 sentences",
    "strategic_implications": "2-3 sentences",
    "briefing_hook": "one sentence to open a briefing"
  },
  "key_findings": [
    {"finding": "...", "evidence": "...", "page": 1, "significance_uae": "...",
     "category": "trend|opportunity|risk|benchmark|framework|warning", "confidence": "high|medium|low"}
  ],
  "statistics": [
    {"stat": "...", "value_raw": "...", "context": "...", "page": 1, "tags": ["..."]}
  ],
  "quotes": [
    {"quote": "...", "speaker": "...", "context": "...", "page": 1}
  ],
  "aha_moments": [
    {"insight": "...", "conventional_wisdom": "...", "why_surprising": "...", "implications_uae": "..."}
  ],
  "recommendations": [
    {"recommendation": "...", "rationale": "...", "priority": "high|medium|low", "page": 1}
  ],
  "methodology": {"research_type": "...", "sample_description": "...", "geographic_scope": "..."},
  "limitations": {"acknowledged": "...", "inferred": "..."}
}"#;

pub const TRUNCATION_NOTE: &str =
    "\n\n[Content truncated. Extract from the portion above only.]";

// ============ Chat ============

pub const CHAT_SINGLE_SYSTEM: &str = r#"You are helping an executive analyse one report.

REPORT: {title}
SOURCE: {source}
YEAR: {year}

CONTEXT FROM THE REPORT:
{context}

Answer from this context only. Cite pages as [p.X]. If the answer is not in the context, say so
and suggest asking across all reports instead. Be concise and use bullet points for lists."#;

pub const CHAT_ALL_SYSTEM: &str = r#"You are answering questions over a library of strategic reports on AI, technology and policy.

RETRIEVED CONTEXT:
{context}

Synthesize across sources where they overlap and note where they disagree. Cite inline as
[Report title, p.X]. Always attribute statistics. If nothing relevant was retrieved, say so plainly
rather than answering from general knowledge."#;

pub const NO_CONTEXT: &str = "(no matching passages were retrieved)";

pub const ENHANCE_QUERY: &str = r#"Rewrite this question so it retrieves better passages from a library of strategic reports on AI.

QUESTION:
{query}

Expand abbreviations, resolve ambiguous terms and add closely related concepts. Keep it a natural
question. Return JSON: {"enhanced": "...", "improvements": ["..."]}"#;

// ============ Minister chain ============

pub const MINISTER_SYSTEM: &str = "You advise a cabinet-level minister for artificial intelligence. \
You are strategic rather than operational, you challenge assumptions, and you are brief.";

pub const MINISTER_SEARCH: &str = r#"QUESTION: {query}

PASSAGES FROM THE REPORT LIBRARY:
{context}

List the findings, statistics and quotes from these passages that bear on the question. Keep every
citation in the form [Report title, p.X]. Do not add outside knowledge."#;

pub const MINISTER_FRAME: &str = r#"QUESTION: {query}

EVIDENCE:
{findings}

Pick the one or two consulting frameworks (for example Three Horizons, Porter's Five Forces, PESTLE,
SWOT, Build/Partner/Buy) that best structure this question, and apply them to the evidence."#;

pub const MINISTER_CHALLENGE: &str = r#"QUESTION: {query}

EVIDENCE:
{findings}

PROPOSED FRAMING:
{framing}

Act as a red team. Identify weak assumptions, missing perspectives, second-order risks and the
strongest counter-argument. Be specific."#;

pub const MINISTER_WEB: &str = r#"QUESTION: {query}

RECENT WEB RESULTS:
{results}

Summarize what these results add that a library of published reports would miss: recent events,
announcements, figures. Cite URLs."#;

pub const MINISTER_COMBINE: &str = r#"QUESTION: {query}

LIBRARY EVIDENCE:
{findings}

FRAMEWORK ANALYSIS:
{framing}

RED-TEAM CHALLENGE:
{challenge}

RECENT DEVELOPMENTS:
{web}

Write the final advice with these sections:
## Executive Summary
## Analysis
## Key Risks
## Recommendations
## Sources"#;

pub const WEB_SKIPPED: &str = "(web search not used for this request)";

// ============ News ============

pub const SO_WHAT_SYSTEM: &str = "You brief a minister for artificial intelligence on news. \
You explain why a story matters for the UAE and return strict JSON.";

pub const SO_WHAT_TEMPLATE: &str = r#"ARTICLE TITLE: {title}
URL: {url}

ARTICLE:
{content}

Return one JSON object:
{
  "summary": "2-3 sentence neutral summary",
  "so_what": "why this matters, in 2-3 sentences",
  "uae_implications": "specific implications for the UAE",
  "opportunities": ["..."],
  "risks": ["..."],
  "talking_point": "one sentence the minister could say publicly"
}"#;
