//! Splices the model's WHERE conditions into the fixed query skeleton.
//!
//! The skeleton comes from configuration and is the only source of
//! projection, joins, grouping and ordering. A request can influence the
//! WHERE clause and nothing else, provided the fragment is a single
//! balanced expression (checked by [`crate::validate::SafetyValidator`]).

use sqlparser::dialect::MySqlDialect;
use sqlparser::tokenizer::{Token, Tokenizer, TokenizerError};

use crate::config::SkeletonConfig;
use crate::models::{Candidate, ParsedParameters, SqlTemplate};

/// Slot in the skeleton replaced by the WHERE fragment.
pub const WHERE_SLOT: &str = "{where}";

#[derive(Debug, Clone)]
pub struct TemplateAssembler {
    skeleton: String,
    max_rows: u32,
}

impl TemplateAssembler {
    pub fn new(config: &SkeletonConfig) -> Self {
        Self {
            skeleton: config.template.trim().to_string(),
            max_rows: config.max_rows,
        }
    }

    /// Builds the final template. The fragment is wrapped in parentheses so
    /// a top-level `OR` binds inside the slot. The parentheses alone do not
    /// contain a fragment carrying its own `)`; the validator rejects those.
    pub fn assemble(&self, fragment: &str, params: ParsedParameters) -> Candidate {
        let fragment = fragment.trim().to_string();
        let sql = format!(
            "{} LIMIT {}",
            self.skeleton
                .replacen(WHERE_SLOT, &format!("({})", fragment), 1),
            self.max_rows
        );
        Candidate {
            template: SqlTemplate { sql, fragment },
            params,
        }
    }
}

/// A template as the MySQL driver sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverSql {
    pub sql: String,
    /// `?` bind slots outside quoted literals and identifiers.
    pub slots: usize,
}

/// Rewrites `placeholder` to `?` wherever it appears outside quoted strings
/// and quoted identifiers, then counts the bind slots the result holds.
pub fn to_driver_sql(template: &str, placeholder: &str) -> Result<DriverSql, TokenizerError> {
    let dialect = MySqlDialect {};
    let tokens = Tokenizer::new(&dialect, template)
        .with_unescape(false)
        .tokenize()?;

    let mut sql = String::with_capacity(template.len());
    let mut run = String::new();
    for token in &tokens {
        if is_quoted(token) {
            push_run(&mut sql, &run, placeholder);
            run.clear();
            sql.push_str(&token.to_string());
        } else {
            run.push_str(&token.to_string());
        }
    }
    push_run(&mut sql, &run, placeholder);

    let slots = Tokenizer::new(&dialect, &sql)
        .with_unescape(false)
        .tokenize()?
        .iter()
        .filter(|token| matches!(token, Token::Placeholder(_)))
        .count();

    Ok(DriverSql { sql, slots })
}

fn push_run(out: &mut String, run: &str, placeholder: &str) {
    if placeholder.is_empty() || placeholder == "?" {
        out.push_str(run);
    } else {
        out.push_str(&run.replace(placeholder, "?"));
    }
}

fn is_quoted(token: &Token) -> bool {
    match token {
        Token::SingleQuotedString(_)
        | Token::DoubleQuotedString(_)
        | Token::NationalStringLiteral(_)
        | Token::HexStringLiteral(_) => true,
        Token::Word(word) => word.quote_style.is_some(),
        _ => false,
    }
}
