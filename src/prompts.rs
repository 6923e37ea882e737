//! Prompt templates for SQL generation and repair.
//!
//! Templates are markdown files with `{name}` slots. They are read once at
//! startup into an immutable [`PromptBook`] that is shared by every request.
//! When no directory is configured the copies compiled into the binary are
//! used.

use anyhow::{Context, Result};
use std::path::Path;

use crate::config::PromptsConfig;
use crate::models::ParsedParameters;

pub const GENERATION_FILE: &str = "sql_generation.md";
pub const REPAIR_FILE: &str = "fix_sql_parameters.md";

const BUILTIN_GENERATION: &str = include_str!("../prompts/sql_generation.md");
const BUILTIN_REPAIR: &str = include_str!("../prompts/fix_sql_parameters.md");

#[derive(Debug, Clone)]
pub struct PromptBook {
    generation: String,
    repair: String,
}

impl PromptBook {
    pub fn builtin() -> Self {
        Self {
            generation: BUILTIN_GENERATION.to_string(),
            repair: BUILTIN_REPAIR.to_string(),
        }
    }

    pub fn new(generation: impl Into<String>, repair: impl Into<String>) -> Self {
        Self {
            generation: generation.into(),
            repair: repair.into(),
        }
    }

    pub fn load(config: &PromptsConfig) -> Result<Self> {
        match &config.dir {
            Some(dir) => Self::from_dir(dir),
            None => Ok(Self::builtin()),
        }
    }

    pub fn from_dir(dir: &Path) -> Result<Self> {
        let read = |name: &str| {
            let path = dir.join(name);
            std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read prompt file: {}", path.display()))
        };
        let book = Self {
            generation: read(GENERATION_FILE)?,
            repair: read(REPAIR_FILE)?,
        };
        tracing::info!(dir = %dir.display(), "loaded prompt templates");
        Ok(book)
    }

    pub fn generation_prompt(&self, query: &str) -> String {
        render(&self.generation, &[("query", query)])
    }

    pub fn repair_prompt(
        &self,
        query: &str,
        sql: &str,
        params: &ParsedParameters,
        error: &str,
    ) -> String {
        let params = params.to_json_string();
        render(
            &self.repair,
            &[
                ("query", query),
                ("sql", sql),
                ("params", &params),
                ("error", error),
            ],
        )
    }
}

/// Single-pass `{name}` substitution. Values are inserted verbatim and never
/// rescanned, so a query containing `{sql}` stays as typed. Unknown slots
/// are left in place.
fn render(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let matched = after.find('}').and_then(|close| {
            let name = &after[..close];
            vars.iter()
                .find(|(key, _)| *key == name)
                .map(|(_, value)| (close, *value))
        });
        match matched {
            Some((close, value)) => {
                out.push_str(value);
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
