//! Safety classification of assembled templates.
//!
//! Rules run in a fixed order and stop at the first violation:
//!
//! | # | Rule | Failure |
//! |---|------|---------|
//! | 1 | bind slot count equals parameter count | `PlaceholderParamMismatch` |
//! | 2 | statement starts with `SELECT` | `NotASelect` |
//! | 3 | no `;` anywhere | `MultipleStatements` |
//! | 4 | no write/DDL keyword as a whole word | `ForbiddenKeyword` |
//! | 5 | no `--`, `/*`, `*/` | `CommentInjection` |
//! | 6 | parses as exactly one plain `SELECT` (MySQL grammar) | `SyntaxError` |
//!
//! Placeholders inside quoted literals are not bind slots and do not count
//! towards rule 1. A `UNION` or a `WITH` clause fails rule 6 as `NotASelect`.
//!
//! [`SafetyValidator::validate_candidate`] adds one more check for assembled
//! templates: the WHERE fragment on its own must be a single complete
//! expression, so it cannot close the slot's parentheses.
//!
//! The separator rule runs before the keyword rule so that a stacked
//! statement (`...; DROP TABLE x`) is reported as what it is.
//!
//! Validation is a pure function of its inputs.

use regex::Regex;
use sqlparser::ast::{SetExpr, Statement};
use sqlparser::dialect::MySqlDialect;
use sqlparser::parser::Parser;
use sqlparser::tokenizer::Token;
use std::sync::LazyLock;

use crate::assemble::to_driver_sql;
use crate::error::ValidationError;
use crate::models::{Candidate, ParsedParameters};

pub const FORBIDDEN_KEYWORDS: &[&str] = &[
    "DROP", "DELETE", "UPDATE", "INSERT", "CREATE", "ALTER", "TRUNCATE", "EXEC", "EXECUTE",
];

static FORBIDDEN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(DROP|DELETE|UPDATE|INSERT|CREATE|ALTER|TRUNCATE|EXECUTE|EXEC)\b")
        .expect("valid regex")
});

const COMMENT_MARKERS: &[&str] = &["--", "/*", "*/"];

/// Outcome of [`SafetyValidator::validate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Safe,
    Unsafe(ValidationError),
}

impl Verdict {
    pub fn is_safe(&self) -> bool {
        matches!(self, Verdict::Safe)
    }

    pub fn reason(&self) -> Option<&ValidationError> {
        match self {
            Verdict::Safe => None,
            Verdict::Unsafe(reason) => Some(reason),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SafetyValidator {
    placeholder: String,
}

impl SafetyValidator {
    pub fn new(placeholder: &str) -> Self {
        Self {
            placeholder: placeholder.to_string(),
        }
    }

    pub fn validate(&self, template: &str, params: &ParsedParameters) -> Verdict {
        match self.check(template, params) {
            Ok(()) => Verdict::Safe,
            Err(reason) => Verdict::Unsafe(reason),
        }
    }

    /// [`validate`](Self::validate) for an assembled candidate, plus the
    /// fragment check.
    pub fn validate_candidate(&self, candidate: &Candidate) -> Verdict {
        let checked = self
            .check(candidate.template.as_str(), &candidate.params)
            .and_then(|()| self.check_fragment(&candidate.template.fragment));
        match checked {
            Ok(()) => Verdict::Safe,
            Err(reason) => Verdict::Unsafe(reason),
        }
    }

    fn check(&self, template: &str, params: &ParsedParameters) -> Result<(), ValidationError> {
        let driver = to_driver_sql(template, &self.placeholder)
            .map_err(|e| ValidationError::SyntaxError(e.to_string()))?;
        if driver.slots != params.len() {
            return Err(ValidationError::PlaceholderParamMismatch {
                placeholders: driver.slots,
                params: params.len(),
            });
        }

        let head = template.trim_start();
        let starts_with_select = head
            .get(..6)
            .is_some_and(|kw| kw.eq_ignore_ascii_case("SELECT"));
        if !starts_with_select {
            return Err(ValidationError::NotASelect);
        }

        if template.contains(';') {
            return Err(ValidationError::MultipleStatements);
        }

        if let Some(m) = FORBIDDEN_RE.find(template) {
            return Err(ValidationError::ForbiddenKeyword(m.as_str().to_uppercase()));
        }

        if COMMENT_MARKERS.iter().any(|marker| template.contains(marker)) {
            return Err(ValidationError::CommentInjection);
        }

        check_syntax(&driver.sql)
    }

    fn check_fragment(&self, fragment: &str) -> Result<(), ValidationError> {
        let driver = to_driver_sql(fragment, &self.placeholder)
            .map_err(|e| ValidationError::SyntaxError(e.to_string()))?;
        let dialect = MySqlDialect {};
        let mut parser = Parser::new(&dialect)
            .try_with_sql(&driver.sql)
            .map_err(|e| ValidationError::SyntaxError(e.to_string()))?;
        parser
            .parse_expr()
            .map_err(|e| ValidationError::SyntaxError(e.to_string()))?;

        match parser.peek_token().token {
            Token::EOF => Ok(()),
            trailing => Err(ValidationError::SyntaxError(format!(
                "WHERE conditions must be a single expression, found trailing {}",
                trailing
            ))),
        }
    }
}

fn check_syntax(sql: &str) -> Result<(), ValidationError> {
    let statements = Parser::parse_sql(&MySqlDialect {}, sql)
        .map_err(|e| ValidationError::SyntaxError(e.to_string()))?;

    match statements.as_slice() {
        [Statement::Query(query)] => {
            if query.with.is_some() || !matches!(*query.body, SetExpr::Select(_)) {
                return Err(ValidationError::NotASelect);
            }
            Ok(())
        }
        [] => Err(ValidationError::SyntaxError("empty statement".to_string())),
        [_] => Err(ValidationError::NotASelect),
        _ => Err(ValidationError::MultipleStatements),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ParamValue;

    fn validator() -> SafetyValidator {
        SafetyValidator::new("%s")
    }

    fn params(n: usize) -> ParsedParameters {
        ParsedParameters((0..n as i64).map(ParamValue::Int).collect())
    }

    fn reason(sql: &str, n: usize) -> Option<ValidationError> {
        validator().validate(sql, &params(n)).reason().cloned()
    }

    #[test]
    fn test_simple_select_is_safe() {
        assert!(validator()
            .validate("SELECT * FROM propiedades WHERE precio < %s", &params(1))
            .is_safe());
    }

    #[test]
    fn test_default_skeleton_parses() {
        let asm = crate::assemble::TemplateAssembler::new(&Default::default());
        let candidate = asm.assemble("precio < %s AND tipo = %s", params(2));
        assert_eq!(
            validator().validate(candidate.template.as_str(), &candidate.params),
            Verdict::Safe
        );
    }

    #[test]
    fn test_arity_mismatch() {
        assert_eq!(
            reason("SELECT * FROM propiedades WHERE precio < %s AND banos = %s", 1),
            Some(ValidationError::PlaceholderParamMismatch {
                placeholders: 2,
                params: 1
            })
        );
    }

    #[test]
    fn test_arity_checked_first() {
        assert!(matches!(
            reason("DELETE FROM propiedades WHERE id = %s", 0),
            Some(ValidationError::PlaceholderParamMismatch { .. })
        ));
    }

    #[test]
    fn test_not_a_select() {
        assert_eq!(
            reason("  update propiedades SET precio = %s", 1),
            Some(ValidationError::NotASelect)
        );
        assert_eq!(
            reason("WITH x AS (SELECT 1) SELECT * FROM x", 0),
            Some(ValidationError::NotASelect)
        );
    }

    #[test]
    fn test_lowercase_select_accepted() {
        assert_eq!(reason("  select id from propiedades where banos = %s", 1), None);
    }

    #[test]
    fn test_stacked_statement_reported_as_multiple_statements() {
        assert_eq!(
            reason(
                "SELECT * FROM propiedades WHERE precio < %s; DROP TABLE propiedades;",
                1
            ),
            Some(ValidationError::MultipleStatements)
        );
    }

    #[test]
    fn test_forbidden_keywords_whole_token() {
        for kw in FORBIDDEN_KEYWORDS {
            let sql = format!(
                "SELECT * FROM propiedades WHERE id IN (SELECT id FROM t) {} x",
                kw.to_lowercase()
            );
            assert_eq!(
                reason(&sql, 0),
                Some(ValidationError::ForbiddenKeyword(kw.to_string())),
                "keyword {}",
                kw
            );
        }
    }

    #[test]
    fn test_keyword_inside_identifier_allowed() {
        assert_eq!(
            reason(
                "SELECT updated_at, created_by, dropdown FROM propiedades WHERE executor_id = %s",
                1
            ),
            None
        );
    }

    #[test]
    fn test_comment_injection() {
        assert_eq!(
            reason("SELECT * FROM propiedades WHERE precio < %s -- AND estado = 1", 1),
            Some(ValidationError::CommentInjection)
        );
        assert_eq!(
            reason("SELECT * FROM propiedades /* x */ WHERE precio < %s", 1),
            Some(ValidationError::CommentInjection)
        );
    }

    #[test]
    fn test_syntax_error() {
        assert!(matches!(
            reason("SELECT * FROM propiedades WHERE precio < %s AND", 1),
            Some(ValidationError::SyntaxError(_))
        ));
        assert!(matches!(
            reason("SELECT * FROM propiedades WHERE (precio < %s", 1),
            Some(ValidationError::SyntaxError(_))
        ));
    }

    #[test]
    fn test_union_rejected() {
        assert_eq!(
            reason(
                "SELECT * FROM propiedades WHERE (precio < %s) UNION SELECT id, password FROM usuarios WHERE (1 = 1)",
                1
            ),
            Some(ValidationError::NotASelect)
        );
    }

    #[test]
    fn test_fragment_closing_the_slot_rejected() {
        let asm = crate::assemble::TemplateAssembler::new(&Default::default());
        let candidate = asm.assemble("precio < %s) OR (1 = 1", params(1));
        // The assembled statement is a valid SELECT on its own
        assert!(validator()
            .validate(candidate.template.as_str(), &candidate.params)
            .is_safe());
        assert!(matches!(
            validator().validate_candidate(&candidate),
            Verdict::Unsafe(ValidationError::SyntaxError(_))
        ));
    }

    #[test]
    fn test_union_fragment_rejected_as_candidate() {
        let asm = crate::assemble::TemplateAssembler::new(&Default::default());
        let candidate = asm.assemble(
            "precio < %s) UNION SELECT id, password FROM usuarios WHERE (1 = 1",
            params(1),
        );
        assert!(!validator().validate_candidate(&candidate).is_safe());
    }

    #[test]
    fn test_balanced_fragment_accepted_as_candidate() {
        let asm = crate::assemble::TemplateAssembler::new(&Default::default());
        let candidate = asm.assemble(
            "(precio < %s OR precio IS NULL) AND id IN (SELECT propiedad_id FROM propiedades_amenidades)",
            params(1),
        );
        assert_eq!(validator().validate_candidate(&candidate), Verdict::Safe);
    }

    #[test]
    fn test_placeholder_inside_literal_does_not_count() {
        assert_eq!(
            reason("SELECT * FROM propiedades WHERE ubicacion LIKE '%santa%'", 1),
            Some(ValidationError::PlaceholderParamMismatch {
                placeholders: 0,
                params: 1
            })
        );
        assert_eq!(
            reason(
                "SELECT * FROM propiedades WHERE ubicacion LIKE '%santa%' AND precio < %s",
                1
            ),
            None
        );
    }

    #[test]
    fn test_question_mark_placeholder() {
        let v = SafetyValidator::new("?");
        assert!(v
            .validate("SELECT * FROM propiedades WHERE tipo = ? AND precio < ?", &params(2))
            .is_safe());
    }

    #[test]
    fn test_validation_is_idempotent() {
        let v = validator();
        let cases = [
            ("SELECT * FROM propiedades WHERE precio < %s", 1),
            ("SELECT * FROM propiedades WHERE precio < %s; DROP TABLE x", 1),
            ("SELECT * FROM propiedades WHERE", 0),
            ("SELECT * FROM propiedades WHERE a = %s", 3),
        ];
        for (sql, n) in cases {
            let p = params(n);
            assert_eq!(v.validate(sql, &p), v.validate(sql, &p));
        }
    }
}
