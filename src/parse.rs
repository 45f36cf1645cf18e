//! SQL front end: turns input text into [`Command`]s and holds the small
//! AST helpers shared by the planner and the executor.
//!
//! Most statements go straight to `sqlparser` with the MySQL dialect. Two
//! forms it does not accept are recognized by a token pre-pass first:
//! `SHOW INDEX FROM t` and `DROP INDEX ix FROM t` (or `ON t`).

use crate::error::ExecError;
use crate::model::{Identifier, Value};
use sqlparser::ast::{self, Expr, ObjectName, ObjectNamePart, Statement, UnaryOperator};
use sqlparser::dialect::MySqlDialect;
use sqlparser::parser::Parser;
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Statement(Box<Statement>),
    ShowIndex { table: Identifier },
    DropIndex { table: Identifier, index: Identifier },
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Statement(stmt) => write!(f, "{stmt}"),
            Command::ShowIndex { table } => write!(f, "SHOW INDEX FROM {table}"),
            Command::DropIndex { table, index } => write!(f, "DROP INDEX {index} FROM {table}"),
        }
    }
}

/// Parses every `;`-separated statement in `sql`.
pub fn parse(sql: &str) -> Result<Vec<Command>, ExecError> {
    let mut commands = Vec::new();
    for piece in split_statements(sql) {
        let piece = strip_leading_comments(piece);
        if piece.is_empty() {
            continue;
        }
        if let Some(command) = try_parse_index_command(piece) {
            commands.push(command?);
            continue;
        }
        let statements = Parser::parse_sql(&MySqlDialect {}, piece)
            .map_err(|e| ExecError::Parse(e.to_string()))?;
        commands.extend(statements.into_iter().map(|s| Command::Statement(Box::new(s))));
    }
    Ok(commands)
}

fn split_statements(sql: &str) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut start = 0;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for (i, ch) in sql.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match (quote, ch) {
            (Some('\'' | '"'), '\\') => escaped = true,
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'' | '"' | '`') => quote = Some(ch),
            (None, ';') => {
                pieces.push(sql[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    pieces.push(sql[start..].trim());
    pieces
}

fn strip_leading_comments(mut s: &str) -> &str {
    loop {
        let t = s.trim_start();
        if let Some(rest) = t.strip_prefix("/*") {
            if let Some(end) = rest.find("*/") {
                s = &rest[end + 2..];
                continue;
            }
        }
        if let Some(rest) = t.strip_prefix("--") {
            s = rest.find('\n').map_or("", |end| &rest[end + 1..]);
            continue;
        }
        return t.trim_end();
    }
}

fn split_sql_tokens(query: &str) -> Vec<&str> {
    let mut tokens = Vec::new();
    let mut start: Option<usize> = None;
    let mut quote: Option<char> = None;

    for (i, ch) in query.char_indices() {
        match (quote, ch) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'' | '"' | '`') => {
                start.get_or_insert(i);
                quote = Some(ch);
            }
            (None, w) if w.is_whitespace() => {
                if let Some(s) = start.take() {
                    tokens.push(&query[s..i]);
                }
            }
            _ => {
                start.get_or_insert(i);
            }
        }
    }
    if let Some(s) = start {
        tokens.push(&query[s..]);
    }
    tokens
}

fn unquote_identifier(token: &str) -> String {
    let t = token.trim();
    if let Some(stripped) = t.strip_prefix('`').and_then(|s| s.strip_suffix('`')) {
        stripped.replace("``", "`")
    } else if let Some(stripped) = t.strip_prefix('"').and_then(|s| s.strip_suffix('"')) {
        stripped.replace("\"\"", "\"")
    } else {
        t.to_string()
    }
}

/// Recognizes `SHOW INDEX|INDEXES|KEYS FROM|IN t` and
/// `DROP INDEX ix FROM|ON t`. Returns `None` for anything else.
fn try_parse_index_command(query: &str) -> Option<Result<Command, ExecError>> {
    let tokens = split_sql_tokens(query);
    if tokens.len() < 2 {
        return None;
    }
    let verb = tokens[0].to_ascii_lowercase();
    let kind = tokens[1].to_ascii_lowercase();
    let is_from = |t: &str| t.eq_ignore_ascii_case("from") || t.eq_ignore_ascii_case("in");

    match (verb.as_str(), kind.as_str()) {
        ("show", "index" | "indexes" | "keys") => Some(match tokens.as_slice() {
            [_, _, from, table] if is_from(from) => Ok(Command::ShowIndex {
                table: unquote_identifier(table),
            }),
            _ => Err(ExecError::Parse("SHOW INDEX requires FROM <table>".into())),
        }),
        ("drop", "index") => Some(match tokens.as_slice() {
            [_, _, index, on, table] if is_from(on) || on.eq_ignore_ascii_case("on") => {
                Ok(Command::DropIndex {
                    table: unquote_identifier(table),
                    index: unquote_identifier(index),
                })
            }
            _ => Err(ExecError::Parse(
                "DROP INDEX requires <index> FROM <table>".into(),
            )),
        }),
        _ => None,
    }
}

/// The single unqualified name in `name`.
pub(crate) fn object_name(name: &ObjectName) -> Result<Identifier, ExecError> {
    match name.0.as_slice() {
        [ObjectNamePart::Identifier(ident)] => Ok(ident.value.clone()),
        _ => Err(ExecError::NotSupported(format!("qualified name {name}"))),
    }
}

/// Column referenced by a bare (or table-qualified) identifier expression.
pub(crate) fn column_name(expr: &Expr) -> Option<Identifier> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.clone()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|ident| ident.value.clone()),
        Expr::Nested(inner) => column_name(inner),
        _ => None,
    }
}

/// Integer or string literal, with an optional leading minus on integers.
/// Anything else, `NULL` and non-integral numbers included, yields `None`.
pub(crate) fn literal(expr: &Expr) -> Option<Value> {
    match expr {
        Expr::Value(v) => match &v.value {
            ast::Value::Number(n, _) => n.parse::<i64>().ok().map(Value::Int),
            ast::Value::SingleQuotedString(s) | ast::Value::DoubleQuotedString(s) => {
                Some(Value::Text(s.clone()))
            }
            _ => None,
        },
        Expr::UnaryOp {
            op: UnaryOperator::Minus,
            expr,
        } => match literal(expr)? {
            Value::Int(i) => i.checked_neg().map(Value::Int),
            _ => None,
        },
        Expr::Nested(inner) => literal(inner),
        _ => None,
    }
}
