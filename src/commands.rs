//! Implementations of the `nlq` subcommands that print to stdout.
//!
//! `parse` and `check` work offline: they need neither the model nor the
//! database and are meant for inspecting saved model answers and
//! hand-written templates.

use anyhow::{bail, Context, Result};
use std::path::Path;
use std::sync::Arc;

use crate::assemble::TemplateAssembler;
use crate::config::Config;
use crate::db;
use crate::extract::ResponseExtractor;
use crate::generator::OllamaGenerator;
use crate::models::{BlockKind, ParsedParameters};
use crate::pipeline::{CandidateBuilder, TranslationPipeline};
use crate::prompts::PromptBook;
use crate::repository::MySqlPropertyRepository;
use crate::search::SearchService;
use crate::validate::{SafetyValidator, Verdict};

fn production_pipeline(config: &Config) -> Result<TranslationPipeline> {
    let prompts = Arc::new(PromptBook::load(&config.prompts)?);
    let generator = Arc::new(OllamaGenerator::new(&config.generator)?);
    Ok(TranslationPipeline::new(config, generator, prompts))
}

/// `nlq search`: translate, execute, print the response as JSON.
pub async fn run_search(config: &Config, query: &str) -> Result<()> {
    let pipeline = production_pipeline(config)?;
    let pool = db::connect(config)?;
    let repository = Arc::new(MySqlPropertyRepository::new(
        pool.clone(),
        &config.pipeline.placeholder,
    ));
    let service = SearchService::new(pipeline, repository);

    let result = service.search(query).await;
    pool.close().await;

    let response = result?;
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

/// `nlq translate`: print the accepted template without executing it.
pub async fn run_translate(config: &Config, query: &str) -> Result<()> {
    let pipeline = production_pipeline(config)?;
    let translation = pipeline.translate(query.trim()).await?;

    for attempt in &translation.attempts {
        println!("attempt {}: {}", attempt.number, attempt.reason);
    }
    println!("sql:    {}", translation.template.sql);
    println!("params: {}", translation.params.to_json_string());
    Ok(())
}

/// `nlq parse`: run a saved model answer through extraction, assembly and
/// validation. With `query`, an unsafe template also prints the repair
/// prompt that would be sent.
pub fn run_parse(config: &Config, path: &Path, query: Option<&str>) -> Result<()> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read model output: {}", path.display()))?;

    let placeholder = config.pipeline.placeholder.as_str();
    let extractor = ResponseExtractor::new(&config.extractor, placeholder);

    if let Ok(blocks) = extractor.extract(&raw) {
        println!("blocks: {}", blocks.len());
        for classified in extractor.classify(blocks) {
            let kind = match classified.kind {
                BlockKind::Json(_) => "json",
                BlockKind::FullStatement => "statement",
                BlockKind::WhereOnly => "conditions",
                BlockKind::Ambiguous => "ambiguous",
            };
            println!(
                "  [{}..{}] {}",
                classified.block.start_offset, classified.block.end_offset, kind
            );
        }
    }

    let builder = CandidateBuilder::new(extractor, TemplateAssembler::new(&config.skeleton));
    let candidate = match builder.build(&raw) {
        Ok(candidate) => candidate,
        Err(rejection) => bail!("model output could not be parsed: {}", rejection),
    };

    println!("sql:    {}", candidate.template.sql);
    println!("params: {}", candidate.params.to_json_string());

    match SafetyValidator::new(placeholder).validate_candidate(&candidate) {
        Verdict::Safe => {
            println!("verdict: safe");
            Ok(())
        }
        Verdict::Unsafe(reason) => {
            println!("verdict: unsafe ({})", reason);
            if let Some(query) = query {
                let prompt = PromptBook::load(&config.prompts)?.repair_prompt(
                    query,
                    candidate.template.as_str(),
                    &candidate.params,
                    &reason.to_string(),
                );
                println!("\n{}", prompt);
            }
            bail!("template rejected: {}", reason)
        }
    }
}

/// `nlq check`: validate a hand-written template against a JSON array of
/// parameters.
pub fn run_check(config: &Config, sql: &str, params: &str) -> Result<()> {
    let json: serde_json::Value =
        serde_json::from_str(params).with_context(|| "--params must be valid JSON")?;
    let params = ParsedParameters::from_json(&json)?;

    match SafetyValidator::new(&config.pipeline.placeholder).validate(sql, &params) {
        Verdict::Safe => {
            println!("safe");
            Ok(())
        }
        Verdict::Unsafe(reason) => bail!("unsafe: {}", reason),
    }
}
