//! Core data models used throughout the translation pipeline.
//!
//! Everything here is scoped to a single search request: created while the
//! model output is parsed and dropped once the response is sent.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{GeneratorError, Rejection, ValidationError};

/// A fenced segment located in raw model output.
///
/// Offsets are byte positions into the original text: `start_offset` is the
/// opening fence, `end_offset` the end of the closing fence (or of the text
/// when the fence is never closed).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedBlock {
    pub content: String,
    pub start_offset: usize,
    pub end_offset: usize,
    /// Fence info string such as `sql` or `json`, when present.
    pub lang: Option<String>,
}

/// Shape of a block, decided once when the block is classified.
#[derive(Debug, Clone, PartialEq)]
pub enum BlockKind {
    /// Parsed JSON: an array of parameters, or an object with `sql`/`params`.
    Json(Value),
    /// Contains SELECT, FROM and WHERE.
    FullStatement,
    /// Boolean conditions only.
    WhereOnly,
    Ambiguous,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassifiedBlock {
    pub block: ExtractedBlock,
    pub kind: BlockKind,
}

/// A single bound value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl ParamValue {
    /// Converts a JSON scalar. Arrays and objects have no scalar form.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Null => Some(ParamValue::Null),
            Value::Bool(b) => Some(ParamValue::Bool(*b)),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Some(ParamValue::Int(i)),
                None => n.as_f64().map(ParamValue::Float),
            },
            Value::String(s) => Some(ParamValue::Text(s.clone())),
            Value::Array(_) | Value::Object(_) => None,
        }
    }
}

/// Ordered parameter list, bound left to right to the template placeholders.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParsedParameters(pub Vec<ParamValue>);

impl ParsedParameters {
    pub fn from_json(value: &Value) -> Result<Self, ValidationError> {
        let items = value.as_array().ok_or(ValidationError::ParamsNotArray)?;
        items
            .iter()
            .map(|v| ParamValue::from_json(v).ok_or(ValidationError::ParamsNotArray))
            .collect::<Result<Vec<_>, _>>()
            .map(ParsedParameters)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ParamValue> {
        self.0.iter()
    }

    /// Compact JSON rendering used in prompts and logs.
    pub fn to_json_string(&self) -> String {
        serde_json::to_string(&self.0).unwrap_or_else(|_| "[]".to_string())
    }
}

/// The final statement: fixed skeleton plus the model's WHERE conditions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlTemplate {
    pub sql: String,
    /// The WHERE conditions as they were spliced into the skeleton.
    pub fragment: String,
}

impl SqlTemplate {
    pub fn as_str(&self) -> &str {
        &self.sql
    }
}

/// A template together with the parameters it must be executed with.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub template: SqlTemplate,
    pub params: ParsedParameters,
}

/// One round-trip of the repair loop.
#[derive(Debug, Clone)]
pub struct Attempt {
    /// 1-based attempt number.
    pub number: u32,
    pub template_before: String,
    pub params_before: ParsedParameters,
    /// The reason the `before` pair was rejected.
    pub reason: Rejection,
    pub template_after: Option<String>,
    pub params_after: Option<ParsedParameters>,
    /// Set when the correction call itself failed.
    pub generator_error: Option<GeneratorError>,
}

/// Result of a successful translation.
#[derive(Debug, Clone)]
pub struct Translation {
    pub template: SqlTemplate,
    pub params: ParsedParameters,
    pub attempts: Vec<Attempt>,
}

/// Request body for `POST /api/search`.
#[derive(Debug, Clone, Deserialize)]
pub struct SearchRequest {
    pub query: String,
}

/// Response body for `POST /api/search`.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub sql: String,
    pub results: Vec<serde_json::Map<String, Value>>,
}
