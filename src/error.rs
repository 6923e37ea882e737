//! Error taxonomy for the translation pipeline and its collaborators.
//!
//! | Type | Meaning | Caller sees |
//! |------|---------|-------------|
//! | [`ExtractionError`] | model output has no usable structure | 4xx |
//! | [`ValidationError`] | a safety rule rejected the template | drives repair |
//! | [`TranslationError::RepairExhausted`] | retry budget spent | 4xx, no SQL |
//! | [`GeneratorError`] | backend unreachable or slow | 5xx, generic |
//! | [`ExecutionError`] | database rejected the query | 5xx, generic |

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractionError {
    #[error("no fenced blocks found in model output")]
    NoBlocksFound,
    #[error("no parameter array found in model output")]
    NoParametersFound,
    #[error("no WHERE conditions found in model output")]
    NoWhereFound,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("params must be a flat JSON array of scalar values")]
    ParamsNotArray,
    #[error("SQL has {placeholders} placeholders but {params} params were provided")]
    PlaceholderParamMismatch { placeholders: usize, params: usize },
    #[error("only SELECT queries are allowed")]
    NotASelect,
    #[error("forbidden operation: {0}")]
    ForbiddenKeyword(String),
    #[error("comment-based SQL injection pattern detected")]
    CommentInjection,
    #[error("multiple SQL statements are not allowed")]
    MultipleStatements,
    #[error("invalid SQL syntax: {0}")]
    SyntaxError(String),
}

impl ValidationError {
    /// Message safe to return to API callers. Parser diagnostics quote the
    /// rejected SQL, so syntax errors collapse to a fixed text.
    pub fn public_message(&self) -> String {
        match self {
            ValidationError::SyntaxError(_) => "invalid SQL syntax".to_string(),
            other => other.to_string(),
        }
    }
}

/// Why a candidate was turned down: either it could not be pulled out of
/// the model output, or it was pulled out and failed a safety rule.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error(transparent)]
    Extraction(#[from] ExtractionError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

impl Rejection {
    pub fn public_message(&self) -> String {
        match self {
            Rejection::Extraction(e) => e.to_string(),
            Rejection::Validation(e) => e.public_message(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GeneratorError {
    #[error("generator unavailable: {0}")]
    Unavailable(String),
    #[error("generator timed out after {0:?}")]
    Timeout(Duration),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("query execution failed: {0}")]
pub struct ExecutionError(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TranslationError {
    /// The first answer had nothing to validate, so there was nothing to repair.
    #[error("model output could not be parsed: {0}")]
    Unparseable(Rejection),
    #[error("no safe query after {attempts} repair attempts: {last_reason}")]
    RepairExhausted {
        attempts: u32,
        last_reason: Rejection,
    },
    #[error(transparent)]
    Generator(#[from] GeneratorError),
}

impl TranslationError {
    /// Machine-readable code used in HTTP error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            TranslationError::Unparseable(_) => "UNPARSEABLE_MODEL_OUTPUT",
            TranslationError::RepairExhausted { .. } => "SQL_VALIDATION_FAILED",
            TranslationError::Generator(GeneratorError::Unavailable(_)) => "LLM_CONNECTION_ERROR",
            TranslationError::Generator(GeneratorError::Timeout(_)) => "LLM_TIMEOUT",
        }
    }

    /// True when the failure stems from what the model produced rather than
    /// from infrastructure.
    pub fn is_client_facing(&self) -> bool {
        !matches!(self, TranslationError::Generator(_))
    }

    /// [`Display`](std::fmt::Display) without parser diagnostics.
    pub fn public_message(&self) -> String {
        match self {
            TranslationError::Unparseable(reason) => {
                format!("model output could not be parsed: {}", reason.public_message())
            }
            TranslationError::RepairExhausted {
                attempts,
                last_reason,
            } => format!(
                "no safe query after {} repair attempts: {}",
                attempts,
                last_reason.public_message()
            ),
            TranslationError::Generator(e) => e.to_string(),
        }
    }
}
