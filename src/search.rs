//! The property search use case.
//!
//! ```text
//! query ─▶ validate input ─▶ translate ─▶ execute ─▶ { sql, results }
//! ```
//!
//! [`SearchService`] owns the translation pipeline and the repository and is
//! shared by the HTTP server and the `nlq search` command. Every call runs in
//! its own `search` span tagged with a fresh request id.

use std::sync::Arc;
use thiserror::Error;
use tracing::Instrument;
use uuid::Uuid;

use crate::error::{ExecutionError, TranslationError};
use crate::models::SearchResponse;
use crate::pipeline::TranslationPipeline;
use crate::repository::PropertyRepository;

pub const MAX_QUERY_CHARS: usize = 500;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SearchError {
    #[error("{0}")]
    InvalidQuery(String),
    #[error(transparent)]
    Translation(#[from] TranslationError),
    #[error(transparent)]
    Execution(#[from] ExecutionError),
}

impl SearchError {
    pub fn code(&self) -> &'static str {
        match self {
            SearchError::InvalidQuery(_) => "INVALID_QUERY",
            SearchError::Translation(e) => e.code(),
            SearchError::Execution(_) => "DATABASE_ERROR",
        }
    }

    /// True when the caller can act on the message.
    pub fn is_client_facing(&self) -> bool {
        match self {
            SearchError::InvalidQuery(_) => true,
            SearchError::Translation(e) => e.is_client_facing(),
            SearchError::Execution(_) => false,
        }
    }

    /// Text for API error bodies. Never quotes rejected SQL.
    pub fn public_message(&self) -> String {
        match self {
            SearchError::Translation(e) => e.public_message(),
            other => other.to_string(),
        }
    }
}

/// Trims `query` and checks it is non-empty and at most
/// [`MAX_QUERY_CHARS`] characters.
pub fn validate_query(query: &str) -> Result<&str, SearchError> {
    let trimmed = query.trim();
    if trimmed.is_empty() {
        return Err(SearchError::InvalidQuery("query must not be empty".to_string()));
    }
    let chars = trimmed.chars().count();
    if chars > MAX_QUERY_CHARS {
        return Err(SearchError::InvalidQuery(format!(
            "query must be at most {} characters, got {}",
            MAX_QUERY_CHARS, chars
        )));
    }
    Ok(trimmed)
}

pub struct SearchService {
    pipeline: TranslationPipeline,
    repository: Arc<dyn PropertyRepository>,
}

impl SearchService {
    pub fn new(pipeline: TranslationPipeline, repository: Arc<dyn PropertyRepository>) -> Self {
        Self {
            pipeline,
            repository,
        }
    }

    pub fn pipeline(&self) -> &TranslationPipeline {
        &self.pipeline
    }

    pub async fn search(&self, query: &str) -> Result<SearchResponse, SearchError> {
        let span = tracing::info_span!("search", request_id = %Uuid::new_v4());
        self.run(query).instrument(span).await
    }

    async fn run(&self, query: &str) -> Result<SearchResponse, SearchError> {
        let query = validate_query(query)?;
        tracing::info!(chars = query.chars().count(), "search request");

        let translation = self.pipeline.translate(query).await?;
        let results = self
            .repository
            .search(&translation.template, &translation.params)
            .await?;

        tracing::info!(
            results = results.len(),
            repairs = translation.attempts.len(),
            "search completed"
        );

        Ok(SearchResponse {
            sql: translation.template.sql,
            results,
        })
    }

    pub async fn health_check(&self) -> bool {
        self.repository.health_check().await
    }
}
