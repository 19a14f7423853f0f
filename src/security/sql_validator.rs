//! SQL Validator
//!
//! Static read-only check, fail closed. A statement passes only if it
//! tokenizes, is a single statement, contains none of the write/DDL
//! keywords anywhere in its text, and parses to a plain query.

use crate::error::Rejection;
use regex::Regex;
use sqlparser::ast::{Query, SetExpr, Statement};
use sqlparser::dialect::SQLiteDialect;
use sqlparser::parser::Parser;
use sqlparser::tokenizer::{Token, Tokenizer};
use std::sync::OnceLock;

/// Matched as whole words, case-insensitively, anywhere in the text,
/// string literals and comments included.
pub const FORBIDDEN_KEYWORDS: &[&str] = &[
    "INSERT", "UPDATE", "DELETE", "DROP", "ALTER", "CREATE", "ATTACH", "DETACH", "COPY", "PRAGMA",
    "VACUUM", "REINDEX", "TRUNCATE",
];

fn forbidden_keyword_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        let pattern = format!(r"(?i)\b({})\b", FORBIDDEN_KEYWORDS.join("|"));
        Regex::new(&pattern).unwrap_or_else(|e| panic!("invalid keyword pattern: {}", e))
    })
}

/// A statement that passed every static check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedQuery {
    sql: String,
    kind: String,
}

impl ValidatedQuery {
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Leading keyword, upper-cased (`SELECT`, `WITH`, ...).
    pub fn kind(&self) -> &str {
        &self.kind
    }
}

pub struct SqlValidator;

impl SqlValidator {
    pub fn validate(sql: &str) -> Result<ValidatedQuery, Rejection> {
        let dialect = SQLiteDialect {};

        let tokens = Tokenizer::new(&dialect, sql)
            .tokenize()
            .map_err(|e| Rejection::Malformed(e.to_string()))?;
        let mut significant: Vec<&Token> = tokens
            .iter()
            .filter(|t| !matches!(t, Token::Whitespace(_) | Token::EOF))
            .collect();

        while matches!(significant.last(), Some(Token::SemiColon)) {
            significant.pop();
        }
        if significant.is_empty() {
            return Err(Rejection::Empty);
        }
        if significant.iter().any(|t| matches!(t, Token::SemiColon)) {
            return Err(Rejection::MultipleStatements);
        }

        if let Some(found) = forbidden_keyword_regex().find(sql) {
            return Err(Rejection::ForbiddenKeyword(found.as_str().to_uppercase()));
        }

        let kind = match significant.first() {
            Some(Token::Word(word)) => word.value.to_uppercase(),
            Some(other) => other.to_string(),
            None => String::new(),
        };

        let statements =
            Parser::parse_sql(&dialect, sql).map_err(|e| Rejection::Malformed(e.to_string()))?;
        match statements.as_slice() {
            [] => Err(Rejection::Empty),
            [Statement::Query(query)] if is_read_only_query(query) => Ok(ValidatedQuery {
                sql: sql.trim().to_string(),
                kind,
            }),
            [_] => Err(Rejection::NotReadOnly(kind)),
            _ => Err(Rejection::MultipleStatements),
        }
    }
}

fn is_read_only_query(query: &Query) -> bool {
    let ctes_ok = query
        .with
        .as_ref()
        .map_or(true, |with| with.cte_tables.iter().all(|cte| is_read_only_query(&cte.query)));
    ctes_ok && is_read_only_set_expr(&query.body)
}

fn is_read_only_set_expr(expr: &SetExpr) -> bool {
    match expr {
        SetExpr::Select(select) => select.into.is_none(),
        SetExpr::Query(query) => is_read_only_query(query),
        SetExpr::SetOperation { left, right, .. } => {
            is_read_only_set_expr(left) && is_read_only_set_expr(right)
        }
        SetExpr::Values(_) | SetExpr::Table(_) => true,
        _ => false,
    }
}
