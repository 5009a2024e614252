/// Named query parameters in the ClickHouse `{name:Type}` placeholder style.
use std::collections::BTreeMap;
use std::ops::Range;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::debug;

use super::functions::unwrap_type;
use super::scanner::{is_ident_byte, next_significant, prev_significant, quote_literal, CodeBytes};
use crate::error::{Error, Result};

/// Parameter values keyed by placeholder name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueryParams(BTreeMap<String, JsonValue>);

impl QueryParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<JsonValue>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&JsonValue> {
        self.0.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &JsonValue)> {
        self.0.iter()
    }
}

impl TryFrom<JsonValue> for QueryParams {
    type Error = Error;

    fn try_from(value: JsonValue) -> Result<Self> {
        match value {
            JsonValue::Object(map) => Ok(map.into_iter().collect()),
            JsonValue::Null => Ok(Self::new()),
            other => Err(Error::InvalidParameter {
                name: "query_params".to_string(),
                reason: format!("expected an object, got {}", json_kind(&other)),
            }),
        }
    }
}

impl<K: Into<String>> FromIterator<(K, JsonValue)> for QueryParams {
    fn from_iter<I: IntoIterator<Item = (K, JsonValue)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

/// Scalar families that change how a value is rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarKind {
    Numeric,
    Boolean,
    DateTime,
    Text,
}

impl ScalarKind {
    fn of(name: &str) -> Self {
        let base = name.split('(').next().unwrap_or(name).trim();
        if base.starts_with("Int")
            || base.starts_with("UInt")
            || base.starts_with("Float")
            || base.starts_with("Decimal")
        {
            ScalarKind::Numeric
        } else if base == "Bool" || base == "Boolean" {
            ScalarKind::Boolean
        } else if base.starts_with("DateTime") {
            ScalarKind::DateTime
        } else {
            ScalarKind::Text
        }
    }
}

/// The declared type of a placeholder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamType {
    Scalar { name: String, kind: ScalarKind },
    Array(Box<ParamType>),
    Nullable(Box<ParamType>),
}

impl ParamType {
    /// Parse a ClickHouse type expression. Unknown names are text scalars.
    pub fn parse(text: &str) -> Self {
        let text = text.trim();
        if let Some(inner) = unwrap_type(text, "Array") {
            return ParamType::Array(Box::new(Self::parse(inner)));
        }
        if let Some(inner) = unwrap_type(text, "Nullable") {
            return ParamType::Nullable(Box::new(Self::parse(inner)));
        }
        if let Some(inner) = unwrap_type(text, "LowCardinality") {
            return Self::parse(inner);
        }
        ParamType::Scalar {
            name: text.to_string(),
            kind: ScalarKind::of(text),
        }
    }

    #[cfg(test)]
    fn is_array(&self) -> bool {
        match self {
            ParamType::Array(_) => true,
            ParamType::Nullable(inner) => inner.is_array(),
            ParamType::Scalar { .. } => false,
        }
    }
}

/// A `{name:Type}` occurrence in statement text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placeholder {
    pub range: Range<usize>,
    pub name: String,
    pub ty: ParamType,
}

/// Locate every placeholder outside literals and comments.
pub fn placeholders(sql: &str) -> Vec<Placeholder> {
    let mut found = Vec::new();
    let mut pos = 0;
    while let Some((open, b)) = CodeBytes::new(sql, pos).next() {
        pos = open + 1;
        if b != b'{' {
            continue;
        }
        let close = CodeBytes::new(sql, open + 1).find(|&(_, b)| b == b'{' || b == b'}');
        let Some((close, b'}')) = close else {
            continue;
        };
        if let Some((name, ty)) = parse_placeholder(&sql[open + 1..close]) {
            found.push(Placeholder {
                range: open..close + 1,
                name,
                ty,
            });
            pos = close + 1;
        }
    }
    found
}

fn parse_placeholder(body: &str) -> Option<(String, ParamType)> {
    let (name, ty) = body.split_once(':')?;
    let name = name.trim();
    let ty = ty.trim();
    let valid_name = name
        .bytes()
        .next()
        .map_or(false, |b| b.is_ascii_alphabetic() || b == b'_')
        && name.bytes().all(is_ident_byte);
    if !valid_name || ty.is_empty() || ty.contains('\'') {
        return None;
    }
    Some((name.to_string(), ParamType::parse(ty)))
}

/// Substitute every placeholder with an escaped literal.
///
/// All names are resolved before anything is substituted; a missing name
/// fails the whole statement.
pub fn bind(sql: &str, params: Option<&QueryParams>) -> Result<String> {
    let found = placeholders(sql);
    if found.is_empty() {
        return Ok(sql.to_string());
    }

    let empty = QueryParams::new();
    let params = params.unwrap_or(&empty);
    if let Some(missing) = found.iter().find(|p| !params.contains(&p.name)) {
        return Err(Error::MissingParameter(missing.name.clone()));
    }

    let mut out = String::with_capacity(sql.len());
    let mut cursor = 0;
    for placeholder in &found {
        let value = params
            .get(&placeholder.name)
            .ok_or_else(|| Error::MissingParameter(placeholder.name.clone()))?;
        let site = array_site(sql, &placeholder.range);
        out.push_str(&sql[cursor..placeholder.range.start]);
        out.push_str(&render(&placeholder.name, &placeholder.ty, value, site)?);
        cursor = placeholder.range.end;
    }
    out.push_str(&sql[cursor..]);

    debug!(placeholders = found.len(), "bound query parameters");
    Ok(out)
}

/// Where an `Array(T)` placeholder sits, which decides how it is bracketed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArraySite {
    /// Bare operand: `x IN {ids:Array(UInt32)}` binds `(1, 2)`.
    Operand,
    /// Sole content of parens the author wrote: `x IN ({ids:Array(UInt32)})`.
    Parenthesized,
    /// Function argument: `has({ids:Array(UInt32)}, x)` binds a list `[1, 2]`.
    CallArgument,
}

/// Words that can precede `(` without making it a call.
const NON_CALL_WORDS: &[&str] = &[
    "IN", "VALUES", "AND", "OR", "NOT", "WHERE", "ON", "HAVING", "SELECT", "WHEN", "THEN",
    "ELSE", "AS",
];

fn array_site(sql: &str, range: &Range<usize>) -> ArraySite {
    let before = prev_significant(sql, range.start).map(|(_, b)| b);
    let after = next_significant(sql, range.end).map(|(_, b)| b);
    let is_call = enclosing_paren(sql, range.start).is_some_and(|open| called_before(sql, open));
    if is_call && matches!(before, Some(b'(' | b',')) && matches!(after, Some(b')' | b',')) {
        ArraySite::CallArgument
    } else if before == Some(b'(') && after == Some(b')') {
        ArraySite::Parenthesized
    } else {
        ArraySite::Operand
    }
}

/// Innermost unclosed `(` before `at`.
fn enclosing_paren(sql: &str, at: usize) -> Option<usize> {
    let mut open = Vec::new();
    for (i, b) in CodeBytes::bounded(sql, 0, at) {
        match b {
            b'(' => open.push(i),
            b')' => {
                open.pop();
            }
            _ => {}
        }
    }
    open.last().copied()
}

/// Whether the paren at `open` follows a function name.
fn called_before(sql: &str, open: usize) -> bool {
    let Some((end, b)) = prev_significant(sql, open) else {
        return false;
    };
    if !is_ident_byte(b) {
        return false;
    }
    let bytes = sql.as_bytes();
    let mut start = end;
    while start > 0 && is_ident_byte(bytes[start - 1]) {
        start -= 1;
    }
    let word = &sql[start..=end];
    !word.as_bytes()[0].is_ascii_digit()
        && !NON_CALL_WORDS.iter().any(|w| word.eq_ignore_ascii_case(w))
}

fn render(name: &str, ty: &ParamType, value: &JsonValue, site: ArraySite) -> Result<String> {
    match ty {
        ParamType::Nullable(inner) => render(name, inner, value, site),
        ParamType::Array(element) => {
            let items = match value {
                JsonValue::Array(items) => items,
                JsonValue::Null => return Ok("NULL".to_string()),
                other => {
                    return Err(Error::InvalidParameter {
                        name: name.to_string(),
                        reason: format!("expected an array, got {}", json_kind(other)),
                    })
                }
            };
            let rendered = items
                .iter()
                .map(|item| render_element(name, element, item))
                .collect::<Result<Vec<_>>>()?
                .join(", ");
            Ok(match site {
                ArraySite::CallArgument => format!("[{}]", rendered),
                ArraySite::Parenthesized if items.is_empty() => "NULL".to_string(),
                ArraySite::Parenthesized => rendered,
                ArraySite::Operand if items.is_empty() => "(NULL)".to_string(),
                ArraySite::Operand => format!("({})", rendered),
            })
        }
        ParamType::Scalar { name: ty_name, kind } => render_scalar(name, ty_name, *kind, value),
    }
}

/// An element of an `Array(T)` value. Nested arrays become list literals.
fn render_element(name: &str, ty: &ParamType, value: &JsonValue) -> Result<String> {
    match (ty, value) {
        (ParamType::Nullable(inner), _) => render_element(name, inner, value),
        (ParamType::Array(element), JsonValue::Array(items)) => {
            let rendered = items
                .iter()
                .map(|item| render_element(name, element, item))
                .collect::<Result<Vec<_>>>()?;
            Ok(format!("[{}]", rendered.join(", ")))
        }
        (ParamType::Array(_), other) => Err(Error::InvalidParameter {
            name: name.to_string(),
            reason: format!("expected a nested array, got {}", json_kind(other)),
        }),
        (ParamType::Scalar { name: ty_name, kind }, _) => {
            render_scalar(name, ty_name, *kind, value)
        }
    }
}

fn render_scalar(name: &str, ty_name: &str, kind: ScalarKind, value: &JsonValue) -> Result<String> {
    match value {
        JsonValue::Null => Ok("NULL".to_string()),
        JsonValue::Bool(b) => Ok(if *b { "TRUE" } else { "FALSE" }.to_string()),
        JsonValue::Number(n) => match kind {
            ScalarKind::DateTime => Ok(format!("to_timestamp({})", n)),
            _ => Ok(n.to_string()),
        },
        JsonValue::String(s) => match kind {
            ScalarKind::Numeric if is_numeric_text(s) => Ok(s.trim().to_string()),
            _ => Ok(quote_literal(s)),
        },
        JsonValue::Object(_) => Ok(quote_literal(&value.to_string())),
        JsonValue::Array(_) => Err(Error::InvalidParameter {
            name: name.to_string(),
            reason: format!("array value for scalar type {}", ty_name),
        }),
    }
}

/// Plain decimal or scientific notation, nothing an engine could read as an
/// identifier.
fn is_numeric_text(s: &str) -> bool {
    let s = s.trim();
    !s.is_empty()
        && s.bytes()
            .all(|b| b.is_ascii_digit() || matches!(b, b'.' | b'-' | b'+' | b'e' | b'E'))
        && s.parse::<f64>().is_ok()
}

fn json_kind(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "a boolean",
        JsonValue::Number(_) => "a number",
        JsonValue::String(_) => "a string",
        JsonValue::Array(_) => "an array",
        JsonValue::Object(_) => "an object",
    }
}
