//! Pulls parameters and WHERE conditions out of raw model output.
//!
//! Models rarely answer with exactly the requested shape. They repeat the
//! prompt's examples, wrap the answer in prose, switch between a full
//! statement and a bare condition list, or leave a trailing comma in the
//! parameter array. Extraction therefore works in three passes:
//!
//! 1. [`ResponseExtractor::extract`] finds every fenced block and drops the
//!    ones that precede the answer marker (or keeps only the last few when
//!    no marker is present).
//! 2. [`ResponseExtractor::classify`] tags each block once with a
//!    [`BlockKind`].
//! 3. [`ResponseExtractor::resolve_params`] and
//!    [`ResponseExtractor::resolve_where`] pick the parameter list and the
//!    WHERE fragment from the tagged blocks.
//!
//! The heuristics are deliberately shallow. They decide which text to hand
//! to the validator; the validator decides whether it is safe.

use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

use crate::config::ExtractorConfig;
use crate::error::{ExtractionError, Rejection};
use crate::models::{BlockKind, ClassifiedBlock, ExtractedBlock, ParsedParameters};

const FENCE: &str = "```";

static SELECT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bSELECT\b").expect("valid regex"));
static FROM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bFROM\b").expect("valid regex"));
static WHERE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bWHERE\b").expect("valid regex"));
static CONNECTOR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(AND|OR)\b").expect("valid regex"));

/// Span between `WHERE` and the first clause that can follow it.
static WHERE_CLAUSE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)\bWHERE\b(.*?)(?:\bGROUP\s+BY\b|\bORDER\s+BY\b|\bLIMIT\b|$)")
        .expect("valid regex")
});

static DIALECT_PREFIX_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(sql|mysql|mariadb|sqlite|postgres|postgresql|tsql)\b\s*")
        .expect("valid regex")
});
static LEADING_WHERE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^WHERE\b\s*").expect("valid regex"));

/// A comma directly before a closing bracket: `[1, 2, ]`.
static DANGLING_COMMA_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r",\s*([\]}])").expect("valid regex"));

/// Fence info strings look like `sql`, `json`, `c++`; anything with spaces
/// is content that happens to sit on the fence line.
static LANG_TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_+.-]*$").expect("valid regex"));

/// Stateless extractor configured once per pipeline.
#[derive(Debug, Clone)]
pub struct ResponseExtractor {
    markers: Vec<String>,
    trailing_blocks: usize,
    primary_table: String,
    placeholder: String,
}

impl ResponseExtractor {
    pub fn new(config: &ExtractorConfig, placeholder: &str) -> Self {
        Self {
            markers: config
                .markers
                .iter()
                .filter(|m| !m.is_empty())
                .cloned()
                .collect(),
            trailing_blocks: config.trailing_blocks.max(1),
            primary_table: config.primary_table.to_lowercase(),
            placeholder: placeholder.to_string(),
        }
    }

    /// Locates the answer blocks in `raw`, in document order.
    ///
    /// Returns [`ExtractionError::NoBlocksFound`] only when the text has no
    /// fenced block at all. When a marker is present but every block comes
    /// before it, the result is empty and parameter resolution reports the
    /// failure.
    pub fn extract(&self, raw: &str) -> Result<Vec<ExtractedBlock>, ExtractionError> {
        let blocks = find_fenced_blocks(raw);
        if blocks.is_empty() {
            return Err(ExtractionError::NoBlocksFound);
        }

        match self.last_marker_offset(raw) {
            Some(marker) => {
                let answer: Vec<ExtractedBlock> = blocks
                    .into_iter()
                    .filter(|b| b.start_offset >= marker)
                    .collect();
                tracing::debug!(marker, kept = answer.len(), "answer marker found");
                Ok(answer)
            }
            None => {
                let skip = blocks.len().saturating_sub(self.trailing_blocks);
                tracing::debug!(
                    total = blocks.len(),
                    kept = blocks.len() - skip,
                    "no answer marker, keeping trailing blocks"
                );
                Ok(blocks.into_iter().skip(skip).collect())
            }
        }
    }

    fn last_marker_offset(&self, raw: &str) -> Option<usize> {
        self.markers.iter().filter_map(|m| raw.rfind(m.as_str())).max()
    }

    pub fn classify(&self, blocks: Vec<ExtractedBlock>) -> Vec<ClassifiedBlock> {
        blocks
            .into_iter()
            .map(|block| {
                let kind = self.classify_text(&block.content);
                ClassifiedBlock { block, kind }
            })
            .collect()
    }

    fn classify_text(&self, text: &str) -> BlockKind {
        let trimmed = text.trim();
        if trimmed.starts_with('[') || trimmed.starts_with('{') {
            if let Some(value) = parse_json_lenient(trimmed) {
                return BlockKind::Json(value);
            }
        }

        let has_select = SELECT_RE.is_match(trimmed);
        let has_from = FROM_RE.is_match(trimmed);

        if has_select && has_from && WHERE_RE.is_match(trimmed) {
            BlockKind::FullStatement
        } else if !has_select
            && !has_from
            && (trimmed.contains(self.placeholder.as_str()) || CONNECTOR_RE.is_match(trimmed))
        {
            BlockKind::WhereOnly
        } else {
            BlockKind::Ambiguous
        }
    }

    /// Picks the parameter list and reports which block it came from.
    ///
    /// The first block whose content starts with `[` is the parameter block;
    /// if it did not parse (even after trimming trailing separators) the
    /// parameters are missing. Without such a block, a JSON object carrying
    /// a `params` member is accepted.
    pub fn resolve_params(
        &self,
        blocks: &[ClassifiedBlock],
    ) -> Result<(usize, ParsedParameters), Rejection> {
        let array_block = blocks
            .iter()
            .enumerate()
            .find(|(_, b)| b.block.content.trim_start().starts_with('['));

        if let Some((idx, candidate)) = array_block {
            return match &candidate.kind {
                BlockKind::Json(value) => Ok((idx, ParsedParameters::from_json(value)?)),
                _ => {
                    tracing::warn!(
                        block = idx,
                        "parameter block is not valid JSON after repair"
                    );
                    Err(ExtractionError::NoParametersFound.into())
                }
            };
        }

        for (idx, candidate) in blocks.iter().enumerate() {
            if let BlockKind::Json(Value::Object(obj)) = &candidate.kind {
                if let Some(params) = obj.get("params") {
                    return Ok((idx, ParsedParameters::from_json(params)?));
                }
            }
        }

        Err(ExtractionError::NoParametersFound.into())
    }

    /// Finds the WHERE conditions among the blocks, skipping the parameter
    /// block. Rules are tried in priority order across all blocks before
    /// falling through to the next rule.
    pub fn resolve_where(
        &self,
        blocks: &[ClassifiedBlock],
        excluding_params_block: Option<usize>,
    ) -> Result<String, ExtractionError> {
        let candidates = self.where_candidates(blocks, excluding_params_block);

        // 1. full statement
        for (text, kind) in &candidates {
            if *kind == BlockKind::FullStatement {
                if let Some(fragment) = extract_where_clause(text).and_then(clean_fragment) {
                    return Ok(fragment);
                }
            }
        }

        // 2. bare conditions
        for (text, kind) in &candidates {
            if *kind == BlockKind::WhereOnly {
                if let Some(fragment) = clean_fragment(text) {
                    return Ok(fragment);
                }
            }
        }

        // 3. anything mentioning WHERE
        for (text, _) in &candidates {
            if WHERE_RE.is_match(text) {
                if let Some(fragment) = extract_where_clause(text).and_then(clean_fragment) {
                    return Ok(fragment);
                }
            }
        }

        // 4. last resort
        for (text, _) in &candidates {
            let mentions_table =
                !self.primary_table.is_empty() && text.to_lowercase().contains(&self.primary_table);
            if mentions_table || text.contains(self.placeholder.as_str()) {
                if let Some(fragment) = clean_fragment(text) {
                    tracing::warn!(
                        fragment = %fragment,
                        "accepting loosely matched block as WHERE fragment"
                    );
                    return Ok(fragment);
                }
            }
        }

        Err(ExtractionError::NoWhereFound)
    }

    /// Texts eligible for WHERE resolution. JSON objects contribute their
    /// `sql` member; parameter arrays contribute nothing.
    fn where_candidates(
        &self,
        blocks: &[ClassifiedBlock],
        excluding: Option<usize>,
    ) -> Vec<(String, BlockKind)> {
        let mut out = Vec::new();
        for (idx, candidate) in blocks.iter().enumerate() {
            match &candidate.kind {
                BlockKind::Json(Value::Object(obj)) => {
                    if let Some(sql) = obj.get("sql").and_then(Value::as_str) {
                        out.push((sql.to_string(), self.classify_text(sql)));
                    }
                }
                BlockKind::Json(_) => {}
                kind => {
                    if Some(idx) != excluding {
                        out.push((candidate.block.content.clone(), kind.clone()));
                    }
                }
            }
        }
        out
    }
}

/// Every fenced segment in `raw`, in document order.
///
/// A fence line carrying a single word (```` ```sql ````) records the word
/// as the block language. An unterminated final fence runs to the end of
/// the text.
pub fn find_fenced_blocks(raw: &str) -> Vec<ExtractedBlock> {
    let mut blocks = Vec::new();
    let mut cursor = 0;

    while let Some(rel) = raw[cursor..].find(FENCE) {
        let start = cursor + rel;
        let body_start = start + FENCE.len();
        let (body_end, end) = match raw[body_start..].find(FENCE) {
            Some(rel_close) => {
                let close = body_start + rel_close;
                (close, close + FENCE.len())
            }
            None => (raw.len(), raw.len()),
        };

        let body = &raw[body_start..body_end];
        let (lang, content) = match body.split_once('\n') {
            Some((first, rest)) if LANG_TAG_RE.is_match(first.trim()) => {
                let tag = first.trim();
                let lang = (!tag.is_empty()).then(|| tag.to_lowercase());
                (lang, rest)
            }
            _ => (None, body),
        };

        blocks.push(ExtractedBlock {
            content: content.trim().to_string(),
            start_offset: start,
            end_offset: end,
            lang,
        });

        cursor = end;
    }

    blocks
}

/// Parses JSON, retrying once with trailing separators removed.
fn parse_json_lenient(text: &str) -> Option<Value> {
    if let Ok(value) = serde_json::from_str(text) {
        return Some(value);
    }
    let repaired = text.trim_end_matches(|c: char| c == ',' || c.is_whitespace());
    let repaired = DANGLING_COMMA_RE.replace_all(repaired, "$1");
    serde_json::from_str(&repaired).ok()
}

/// Text between the first `WHERE` and the clause that ends it.
pub fn extract_where_clause(statement: &str) -> Option<&str> {
    WHERE_CLAUSE_RE
        .captures(statement)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

/// Normalizes a fragment; `None` when nothing is left.
pub fn clean_fragment(raw: &str) -> Option<String> {
    let mut s = raw.trim();
    s = s.strip_suffix(FENCE).unwrap_or(s).trim_end();
    s = s.strip_suffix(';').unwrap_or(s).trim_end();
    if let Some(m) = DIALECT_PREFIX_RE.find(s) {
        s = &s[m.end()..];
    }
    if let Some(m) = LEADING_WHERE_RE.find(s) {
        s = &s[m.end()..];
    }
    let s = s.trim();
    (!s.is_empty()).then(|| s.to_string())
}
