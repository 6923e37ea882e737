//! Natural-language query → safe `(template, params)`.
//!
//! [`TranslationPipeline`] is the composition root of the translation core:
//!
//! ```text
//! query ─▶ generator ─▶ raw text ─▶ extract ─▶ classify ─▶ params + WHERE
//!                                                            │
//!                                              assemble ◀────┘
//!                                                  │
//!                                     validate ◀───┴──── repair loop
//! ```
//!
//! A pipeline holds only immutable configuration and shared handles, so one
//! instance serves concurrent requests without coordination.

use std::sync::Arc;
use std::time::Duration;

use crate::assemble::TemplateAssembler;
use crate::config::Config;
use crate::error::{Rejection, TranslationError};
use crate::extract::ResponseExtractor;
use crate::generator::{generate_with_timeout, Generator};
use crate::models::{Candidate, ParsedParameters, Translation};
use crate::prompts::PromptBook;
use crate::repair::{RepairLoop, RepairOutcome};
use crate::validate::{SafetyValidator, Verdict};

/// Raw model text → assembled candidate, without validation.
#[derive(Debug, Clone)]
pub struct CandidateBuilder {
    extractor: ResponseExtractor,
    assembler: TemplateAssembler,
}

impl CandidateBuilder {
    pub fn new(extractor: ResponseExtractor, assembler: TemplateAssembler) -> Self {
        Self {
            extractor,
            assembler,
        }
    }

    pub fn build(&self, raw: &str) -> Result<Candidate, Rejection> {
        let blocks = self.extractor.extract(raw)?;
        let blocks = self.extractor.classify(blocks);
        let (params_idx, params) = self.extractor.resolve_params(&blocks)?;
        let fragment = self.extractor.resolve_where(&blocks, Some(params_idx))?;
        Ok(self.assembler.assemble(&fragment, params))
    }
}

pub struct TranslationPipeline {
    builder: CandidateBuilder,
    validator: SafetyValidator,
    generator: Arc<dyn Generator>,
    prompts: Arc<PromptBook>,
    max_retries: u32,
    call_timeout: Duration,
}

impl TranslationPipeline {
    pub fn new(config: &Config, generator: Arc<dyn Generator>, prompts: Arc<PromptBook>) -> Self {
        let placeholder = config.pipeline.placeholder.as_str();
        Self {
            builder: CandidateBuilder::new(
                ResponseExtractor::new(&config.extractor, placeholder),
                TemplateAssembler::new(&config.skeleton),
            ),
            validator: SafetyValidator::new(placeholder),
            generator,
            prompts,
            max_retries: config.pipeline.max_retries,
            call_timeout: Duration::from_secs(config.generator.timeout_secs),
        }
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn validator(&self) -> &SafetyValidator {
        &self.validator
    }

    pub fn builder(&self) -> &CandidateBuilder {
        &self.builder
    }

    /// Asks the generator for a first answer, then hands it to
    /// [`translate_response`](Self::translate_response).
    pub async fn translate(&self, query: &str) -> Result<Translation, TranslationError> {
        let prompt = self.prompts.generation_prompt(query);
        tracing::debug!(model = self.generator.model_name(), "requesting SQL generation");
        let raw = generate_with_timeout(self.generator.as_ref(), &prompt, self.call_timeout)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "generation call failed");
                TranslationError::from(e)
            })?;
        self.translate_response(query, &raw).await
    }

    /// Parses an already obtained first answer and repairs it if needed.
    ///
    /// A first answer that cannot be parsed fails straight away: there is
    /// no template to send back for repair.
    pub async fn translate_response(
        &self,
        query: &str,
        raw: &str,
    ) -> Result<Translation, TranslationError> {
        let initial = self.builder.build(raw).map_err(|rejection| {
            tracing::warn!(reason = %rejection, "model output unparseable");
            TranslationError::Unparseable(rejection)
        })?;

        tracing::debug!(
            sql = %initial.template.sql,
            params = %initial.params.to_json_string(),
            "assembled template"
        );

        let repair = RepairLoop {
            validator: &self.validator,
            builder: &self.builder,
            generator: self.generator.as_ref(),
            prompts: self.prompts.as_ref(),
            max_retries: self.max_retries,
            call_timeout: self.call_timeout,
        };

        match repair.run(query, initial).await {
            RepairOutcome::Succeeded {
                candidate,
                attempts,
            } => Ok(Translation {
                template: candidate.template,
                params: candidate.params,
                attempts,
            }),
            RepairOutcome::Exhausted {
                last_reason,
                attempts,
            } => Err(TranslationError::RepairExhausted {
                attempts: attempts.len() as u32,
                last_reason,
            }),
        }
    }

    pub fn validate(&self, sql: &str, params: &ParsedParameters) -> Verdict {
        self.validator.validate(sql, params)
    }
}
