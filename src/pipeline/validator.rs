//! Allow-list validation for model generated SQL.
//!
//! Anything not explicitly permitted is rejected. A candidate must parse to a
//! single query statement, and every token must be of a recognized kind with
//! keywords, operators and punctuation drawn from fixed allow-lists.

use std::fmt;

use sqlparser::ast::Statement;
use sqlparser::dialect::GenericDialect;
use sqlparser::keywords::Keyword;
use sqlparser::parser::Parser;
use sqlparser::tokenizer::{Token, Tokenizer, Whitespace};
use tracing::debug;

use crate::error::{PipelineError, PipelineResult};

/// Deepest parenthesis nesting a query may reach.
pub const MAX_NESTING_DEPTH: usize = 3;

pub const ALLOWED_KEYWORDS: &[&str] = &[
    "SELECT", "FROM", "WHERE", "GROUP", "BY", "ORDER", "HAVING", "LIMIT", "OFFSET", "JOIN",
    "LEFT", "RIGHT", "INNER", "OUTER", "ON", "AS", "AND", "OR", "NOT", "IN", "LIKE", "IS",
    "NULL", "ASC", "DESC",
];

/// Clause and statement words that stay keywords even when written like a
/// call, as in `EXISTS(...)` or `EXCLUDE (id)`. Includes DuckDB statements the
/// generic tokenizer does not mark as keywords.
const CLAUSE_KEYWORDS: &[&str] = &[
    "ALL", "ALTER", "ANALYZE", "ANY", "ATTACH", "BEGIN", "BETWEEN", "CALL", "CASE", "CHECKPOINT",
    "COMMIT", "COPY", "CREATE", "CROSS", "DATABASE", "DEALLOCATE", "DECLARE", "DELETE",
    "DESCRIBE", "DETACH", "DISTINCT", "DROP", "ELSE", "END", "ESCAPE", "EXCEPT", "EXCLUDE",
    "EXEC", "EXECUTE", "EXISTS", "EXPLAIN", "EXPORT", "FETCH", "FOR", "FULL", "FUNCTION", "GLOB",
    "GRANT", "ILIKE", "IMPORT", "INDEX", "INSERT", "INSTALL", "INTERSECT", "INTO", "LATERAL",
    "LOAD", "MERGE", "NATURAL", "OVER", "PARTITION", "PIVOT", "PRAGMA", "PREPARE", "PROCEDURE",
    "QUALIFY", "RECURSIVE", "RENAME", "RESET", "RETURNING", "REVOKE", "ROLLBACK", "SAMPLE",
    "SAVEPOINT", "SCHEMA", "SEQUENCE", "SET", "SHOW", "SIMILAR", "SUMMARIZE", "TABLE", "THEN",
    "TOP", "TRANSACTION", "TRIGGER", "TRUNCATE", "UNION", "UNPIVOT", "UPDATE", "USE", "USING",
    "VACUUM", "VALUES", "VIEW", "WHEN", "WINDOW", "WITH",
];

/// Keywords that double as column names in the analytical schema.
const BUILTIN_COLUMN_NAMES: &[&str] = &["DATE", "NAME", "VALUE"];

/// Raw SQL text returned by the model. Untrusted until validated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateSql(String);

impl CandidateSql {
    pub fn new(sql: impl Into<String>) -> Self {
        Self(sql.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A single SELECT statement that passed [`SqlSafetyValidator::validate`].
///
/// Only the validator constructs this type. The text is trimmed and carries no
/// trailing semicolon so it can be embedded as a sub-query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedSql(String);

impl ValidatedSql {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ValidatedSql {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TokenKind {
    Keyword,
    Operator,
    Punctuation,
    Whitespace,
    Identifier,
    Number,
    StringLiteral,
    Unrecognized,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SqlSafetyValidator;

impl SqlSafetyValidator {
    pub fn new() -> Self {
        Self
    }

    pub fn validate(&self, sql: &CandidateSql) -> PipelineResult<ValidatedSql> {
        let text = sql.as_str();
        let dialect = GenericDialect {};

        let statements = Parser::parse_sql(&dialect, text)
            .map_err(|e| unsafe_query(format!("unparseable SQL: {}", e)))?;
        match statements.as_slice() {
            [] => return Err(unsafe_query("no SQL statement found")),
            [Statement::Query(_)] => {}
            [_] => return Err(unsafe_query("only SELECT statements are allowed")),
            _ => {
                return Err(unsafe_query(format!(
                    "expected a single statement, found {}",
                    statements.len()
                )));
            }
        }

        let tokens = Tokenizer::new(&dialect, text)
            .tokenize()
            .map_err(|e| unsafe_query(format!("untokenizable SQL: {}", e)))?;

        let mut depth = 0usize;
        for (index, token) in tokens.iter().enumerate() {
            let next = tokens[index + 1..]
                .iter()
                .find(|t| !matches!(t, Token::Whitespace(_)));
            match classify(token, next) {
                TokenKind::Keyword => {
                    if let Token::Word(word) = token {
                        let upper = word.value.to_ascii_uppercase();
                        if !ALLOWED_KEYWORDS.contains(&upper.as_str()) {
                            return Err(unsafe_query(format!("keyword {} is not allowed", upper)));
                        }
                    }
                }
                TokenKind::Operator | TokenKind::Punctuation => {
                    if !is_allowed_symbol(token) {
                        return Err(unsafe_query(format!("symbol '{}' is not allowed", token)));
                    }
                }
                TokenKind::Whitespace
                | TokenKind::Identifier
                | TokenKind::Number
                | TokenKind::StringLiteral => {}
                TokenKind::Unrecognized => {
                    return Err(unsafe_query(format!("unrecognized token '{}'", token)));
                }
            }

            match token {
                Token::LParen => {
                    depth += 1;
                    if depth > MAX_NESTING_DEPTH {
                        return Err(unsafe_query(format!(
                            "nesting depth exceeds {}",
                            MAX_NESTING_DEPTH
                        )));
                    }
                }
                Token::RParen => depth = depth.saturating_sub(1),
                _ => {}
            }
        }

        let normalized = text.trim().trim_end_matches(|c: char| c == ';' || c.is_whitespace());
        debug!("SQL passed safety validation: {}", normalized);
        Ok(ValidatedSql(normalized.to_string()))
    }
}

/// Classifies `token`. `next` is the following non-whitespace token, used to
/// tell function calls such as `SUM(amount)` apart from keywords.
fn classify(token: &Token, next: Option<&Token>) -> TokenKind {
    match token {
        Token::Word(word) => {
            if word.quote_style.is_some() {
                return TokenKind::Identifier;
            }
            let upper = word.value.to_ascii_uppercase();
            let upper = upper.as_str();
            if ALLOWED_KEYWORDS.contains(&upper) || CLAUSE_KEYWORDS.contains(&upper) {
                return TokenKind::Keyword;
            }
            let function_call = matches!(next, Some(Token::LParen));
            if word.keyword == Keyword::NoKeyword
                || function_call
                || BUILTIN_COLUMN_NAMES.contains(&upper)
            {
                TokenKind::Identifier
            } else {
                TokenKind::Keyword
            }
        }
        Token::Number(_, _) => TokenKind::Number,
        Token::SingleQuotedString(_) => TokenKind::StringLiteral,
        Token::Whitespace(Whitespace::Space | Whitespace::Newline | Whitespace::Tab) => {
            TokenKind::Whitespace
        }
        Token::EOF => TokenKind::Whitespace,
        Token::Eq
        | Token::DoubleEq
        | Token::Neq
        | Token::Lt
        | Token::Gt
        | Token::LtEq
        | Token::GtEq
        | Token::Plus
        | Token::Minus
        | Token::Mul
        | Token::Div
        | Token::Mod
        | Token::StringConcat => TokenKind::Operator,
        Token::Comma
        | Token::Period
        | Token::LParen
        | Token::RParen
        | Token::SemiColon
        | Token::Colon
        | Token::DoubleColon
        | Token::LBracket
        | Token::RBracket => TokenKind::Punctuation,
        _ => TokenKind::Unrecognized,
    }
}

/// `=, >, <, >=, <=, <>, !=, +, -, *, /` and `, . ( ) ;`
fn is_allowed_symbol(token: &Token) -> bool {
    matches!(
        token,
        Token::Eq
            | Token::Neq
            | Token::Lt
            | Token::Gt
            | Token::LtEq
            | Token::GtEq
            | Token::Plus
            | Token::Minus
            | Token::Mul
            | Token::Div
            | Token::Comma
            | Token::Period
            | Token::LParen
            | Token::RParen
            | Token::SemiColon
    )
}

fn unsafe_query(reason: impl Into<String>) -> PipelineError {
    PipelineError::UnsafeQuery(reason.into())
}
