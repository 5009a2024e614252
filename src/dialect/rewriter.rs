/// ClickHouse -> DuckDB statement rewriting.
///
/// The rewriter is an ordered pipeline of textual passes. Each pass sees the
/// whole statement produced by the previous one, finds the constructs it owns
/// with the lexical scanner, and splices in DuckDB text. Nothing inside string
/// literals, quoted identifiers or comments is ever touched.
use std::collections::BTreeMap;
use std::fmt;
use std::ops::Range;

use once_cell::sync::Lazy;
use regex::{Captures, NoExpand, Regex};
use tracing::{debug, warn};

use super::functions::{duckdb_type, json_path, FunctionRule, FUNCTION_RULES};
use super::scanner::{
    find_call, is_ident_byte, keyword_at, map_code, matching_paren, next_significant,
    prev_significant, split_args, unquote_literal, CallSearch, CodeBytes,
};

/// Something the rewriter could not translate faithfully.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RewriteWarning {
    /// A recognized call never closes; the pass left the rest untouched.
    Unbalanced { function: String, offset: usize },
    /// A clause with no DuckDB equivalent was removed.
    Dropped { clause: String },
}

impl fmt::Display for RewriteWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RewriteWarning::Unbalanced { function, offset } => write!(
                f,
                "unbalanced parentheses after {} at offset {}",
                function, offset
            ),
            RewriteWarning::Dropped { clause } => write!(f, "dropped unsupported {} clause", clause),
        }
    }
}

/// Output of [`Rewriter::rewrite`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rewritten {
    pub sql: String,
    pub warnings: Vec<RewriteWarning>,
}

impl Rewritten {
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }
}

/// A single textual pass over a statement.
///
/// Passes are pure: the same input always yields the same output, and a pass
/// must return its input unchanged when nothing applies.
pub trait RewritePass: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    fn rewrite(&self, sql: &str, warnings: &mut Vec<RewriteWarning>) -> String;
}

/// Runs rewrite passes in registration order.
#[derive(Default)]
pub struct Rewriter {
    passes: Vec<Box<dyn RewritePass>>,
}

impl Rewriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// The standard pipeline with the default table aliases.
    pub fn with_defaults() -> Self {
        let mut aliases = BTreeMap::new();
        aliases.insert(
            "monitor_events".to_string(),
            "uptime_monitor_events".to_string(),
        );
        Self::with_aliases(&aliases)
    }

    /// The standard pipeline renaming `aliases` keys to their values.
    pub fn with_aliases(aliases: &BTreeMap<String, String>) -> Self {
        let mut rewriter = Self::new();
        rewriter.add_pass(Box::new(StripModifiers));
        rewriter.add_pass(Box::new(RenameTables::new(aliases)));
        rewriter.add_pass(Box::new(ExpandArrays));
        rewriter.add_pass(Box::new(ParametricAggregates));
        rewriter.add_pass(Box::new(MapIndexing));
        rewriter.add_pass(Box::new(BuiltinFunctions::new(FUNCTION_RULES)));
        rewriter
    }

    pub fn add_pass(&mut self, pass: Box<dyn RewritePass>) {
        self.passes.push(pass);
    }

    pub fn rewrite(&self, sql: &str) -> Rewritten {
        let mut warnings = Vec::new();
        let mut current = sql.to_string();
        for pass in &self.passes {
            current = pass.rewrite(&current, &mut warnings);
        }
        debug!(source = sql, rewritten = %current, "rewrote statement");
        Rewritten {
            sql: current,
            warnings,
        }
    }

    pub fn pass_names(&self) -> Vec<&str> {
        self.passes.iter().map(|p| p.name()).collect()
    }
}

static DEFAULT_REWRITER: Lazy<Rewriter> = Lazy::new(Rewriter::with_defaults);

/// Rewrite with the default pipeline, discarding warnings.
pub fn rewrite(sql: &str) -> String {
    DEFAULT_REWRITER.rewrite(sql).sql
}

/// Replace every call to `name` with `replace(args)`.
///
/// Arguments are rewritten first, so nested calls to the same function are
/// handled inside-out. On unbalanced parentheses the remainder of the
/// statement is left as is and a warning is recorded.
pub(crate) fn replace_calls<F>(
    sql: &str,
    name: &str,
    case_insensitive: bool,
    warnings: &mut Vec<RewriteWarning>,
    replace: &F,
) -> String
where
    F: Fn(&[String]) -> String,
{
    let mut out = String::with_capacity(sql.len());
    let mut cursor = 0;
    loop {
        match find_call(sql, name, cursor, case_insensitive) {
            CallSearch::Found(site) => {
                out.push_str(&sql[cursor..site.start]);
                let args: Vec<String> = split_args(sql, site.args_range())
                    .iter()
                    .map(|arg| replace_calls(arg, name, case_insensitive, warnings, replace))
                    .collect();
                out.push_str(&replace(&args));
                cursor = site.end();
            }
            CallSearch::Unbalanced(offset) => {
                record_unbalanced(name, offset, warnings);
                break;
            }
            CallSearch::NotFound => break,
        }
    }
    out.push_str(&sql[cursor..]);
    out
}

fn record_unbalanced(function: &str, offset: usize, warnings: &mut Vec<RewriteWarning>) {
    warn!(function, offset, "unbalanced parentheses, leaving remainder untouched");
    warnings.push(RewriteWarning::Unbalanced {
        function: function.to_string(),
        offset,
    });
}

/// Remove `cuts` (sorted, non-overlapping) from `sql`.
fn splice(sql: &str, cuts: &[(Range<usize>, String)]) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut cursor = 0;
    for (range, replacement) in cuts {
        out.push_str(&sql[cursor..range.start]);
        out.push_str(replacement);
        cursor = range.end;
    }
    out.push_str(&sql[cursor..]);
    out
}

/// Whether a word may start at `i`.
fn word_start(bytes: &[u8], i: usize) -> bool {
    bytes[i].is_ascii_alphabetic() && (i == 0 || !is_ident_byte(bytes[i - 1]))
}

fn ident_end(sql: &str, from: usize) -> usize {
    let bytes = sql.as_bytes();
    let mut end = from;
    while end < bytes.len() && is_ident_byte(bytes[end]) {
        end += 1;
    }
    end
}

/// Offset where the clause starting at `from` ends: a top-level stop keyword,
/// `;`, an unmatched closer, optionally a top-level comma, or end of input.
fn clause_end(sql: &str, from: usize, stops: &[&str], comma_ends: bool) -> usize {
    let bytes = sql.as_bytes();
    let mut depth = 0usize;
    for (i, b) in CodeBytes::new(sql, from) {
        match b {
            b'(' | b'[' | b'{' => depth += 1,
            b')' | b']' | b'}' => match depth.checked_sub(1) {
                Some(d) => depth = d,
                None => return i,
            },
            b',' if depth == 0 && comma_ends => return i,
            b';' if depth == 0 => return i,
            _ if depth == 0 && word_start(bytes, i) => {
                if stops.iter().any(|w| keyword_at(sql, i, w)) {
                    return i;
                }
            }
            _ => {}
        }
    }
    sql.len()
}

/// Widen `start` left over whitespace and pull `end` back over it, so
/// removing the range leaves single spacing behind.
fn trimmed_cut(sql: &str, start: usize, end: usize) -> Range<usize> {
    let bytes = sql.as_bytes();
    let mut start = start;
    while start > 0 && bytes[start - 1].is_ascii_whitespace() {
        start -= 1;
    }
    let mut end = end;
    while end > start && bytes[end - 1].is_ascii_whitespace() {
        end -= 1;
    }
    start..end
}

const FILL_STOPS: &[&str] = &[
    "LIMIT",
    "OFFSET",
    "SETTINGS",
    "FORMAT",
    "UNION",
    "EXCEPT",
    "INTERSECT",
    "INTERPOLATE",
];

/// Keywords that open an expression; a word right after one is an operand,
/// never a modifier.
const EXPRESSION_KEYWORDS: &[&str] = &[
    "SELECT", "DISTINCT", "WHERE", "PREWHERE", "AND", "OR", "NOT", "ON", "HAVING", "BY", "WHEN",
    "THEN", "ELSE", "AS", "FROM", "JOIN", "SET", "IN", "IS", "LIKE", "BETWEEN", "CASE", "USING",
];

/// Tokens that may follow `FROM t FINAL`.
const FINAL_FOLLOWERS: &[&str] = &[
    "WHERE", "PREWHERE", "GROUP", "ORDER", "LIMIT", "OFFSET", "SETTINGS", "FORMAT", "JOIN",
    "LEFT", "RIGHT", "INNER", "FULL", "CROSS", "ARRAY", "UNION", "EXCEPT", "INTERSECT", "HAVING",
    "SAMPLE", "WINDOW", "QUALIFY", "GLOBAL", "ANY", "ALL",
];

/// Whether the token before `at` can end a table reference or an expression:
/// a name, a number, a closing bracket or a quoted token.
fn follows_operand(sql: &str, at: usize) -> bool {
    let Some((end, b)) = prev_significant(sql, at) else {
        return false;
    };
    if matches!(b, b')' | b']' | b'}' | b'\'' | b'"' | b'`') {
        return true;
    }
    if !is_ident_byte(b) {
        return false;
    }
    let bytes = sql.as_bytes();
    let mut start = end;
    while start > 0 && is_ident_byte(bytes[start - 1]) {
        start -= 1;
    }
    !EXPRESSION_KEYWORDS.iter().any(|k| keyword_at(sql, start, k))
}

/// Removes `FINAL`, `WITH FILL`, `INTERPOLATE`, `SETTINGS` and `FORMAT`.
///
/// `FINAL`, `SETTINGS` and `FORMAT` are also valid column names, so each is
/// only removed in the position its clause occupies.
struct StripModifiers;

impl RewritePass for StripModifiers {
    fn name(&self) -> &str {
        "strip_modifiers"
    }

    fn description(&self) -> &str {
        "Removes ClickHouse-only modifiers and trailing clauses"
    }

    fn rewrite(&self, sql: &str, warnings: &mut Vec<RewriteWarning>) -> String {
        let bytes = sql.as_bytes();
        let mut cuts: Vec<(Range<usize>, String)> = Vec::new();
        let mut depth = 0usize;
        let mut pos = 0;

        while let Some((i, b)) = CodeBytes::new(sql, pos).next() {
            pos = i + 1;
            match b {
                b'(' => depth += 1,
                b')' => depth = depth.saturating_sub(1),
                _ if word_start(bytes, i) => {
                    let Some((end, dropped)) = self.modifier_at(sql, i, depth) else {
                        continue;
                    };
                    if let Some(clause) = dropped {
                        warn!(clause = %clause, "dropping clause with no DuckDB equivalent");
                        warnings.push(RewriteWarning::Dropped { clause });
                    }
                    cuts.push((trimmed_cut(sql, i, end), String::new()));
                    pos = end;
                }
                _ => {}
            }
        }

        if cuts.is_empty() {
            return sql.to_string();
        }
        splice(sql, &cuts)
    }
}

impl StripModifiers {
    /// If a removable modifier starts at `i`, return where it ends and, for
    /// clauses that change results, the name to report.
    fn modifier_at(&self, sql: &str, i: usize, depth: usize) -> Option<(usize, Option<String>)> {
        if keyword_at(sql, i, "FINAL") {
            let end = i + "FINAL".len();
            let closes_reference = match next_significant(sql, end) {
                None | Some((_, b')' | b';')) => true,
                Some((j, _)) => FINAL_FOLLOWERS.iter().any(|k| keyword_at(sql, j, k)),
            };
            return (closes_reference && follows_operand(sql, i)).then_some((end, None));
        }
        if keyword_at(sql, i, "WITH") {
            let (j, _) = next_significant(sql, i + "WITH".len())?;
            if !keyword_at(sql, j, "FILL") {
                return None;
            }
            let end = clause_end(sql, j + "FILL".len(), FILL_STOPS, true);
            return Some((end, Some("WITH FILL".to_string())));
        }
        if keyword_at(sql, i, "INTERPOLATE") {
            let after = i + "INTERPOLATE".len();
            let end = match next_significant(sql, after) {
                Some((j, b'(')) => matching_paren(sql, j).map_or(sql.len(), |close| close + 1),
                _ => after,
            };
            return Some((end, Some("INTERPOLATE".to_string())));
        }
        if depth == 0 && keyword_at(sql, i, "SETTINGS") {
            let after = i + "SETTINGS".len();
            let (j, b) = next_significant(sql, after)?;
            if !b.is_ascii_alphabetic() || !follows_operand(sql, i) {
                return None;
            }
            let name_end = ident_end(sql, j);
            if !matches!(next_significant(sql, name_end), Some((_, b'='))) {
                return None;
            }
            let end = clause_end(sql, after, &["FORMAT"], false);
            debug!("removing SETTINGS clause");
            return Some((end, None));
        }
        if depth == 0 && keyword_at(sql, i, "FORMAT") {
            let (j, b) = next_significant(sql, i + "FORMAT".len())?;
            if !b.is_ascii_alphabetic() || !follows_operand(sql, i) {
                return None;
            }
            // The format name ends the statement, give or take SETTINGS.
            let end = ident_end(sql, j);
            let last = match next_significant(sql, end) {
                None | Some((_, b';')) => true,
                Some((k, _)) => keyword_at(sql, k, "SETTINGS"),
            };
            return last.then_some((end, None));
        }
        None
    }
}

/// Renames logical table names to physical ones.
struct RenameTables {
    aliases: Vec<(Regex, String)>,
}

impl RenameTables {
    fn new(aliases: &BTreeMap<String, String>) -> Self {
        let aliases = aliases
            .iter()
            .filter_map(|(from, to)| {
                let pattern = format!(r"\b{}\b", regex::escape(from));
                Regex::new(&pattern).ok().map(|re| (re, to.clone()))
            })
            .collect();
        Self { aliases }
    }
}

impl RewritePass for RenameTables {
    fn name(&self) -> &str {
        "rename_tables"
    }

    fn description(&self) -> &str {
        "Maps logical table names to physical tables"
    }

    fn rewrite(&self, sql: &str, _warnings: &mut Vec<RewriteWarning>) -> String {
        if self.aliases.is_empty() {
            return sql.to_string();
        }
        map_code(sql, |code| {
            let mut code = code.to_string();
            for (re, to) in &self.aliases {
                code = re.replace_all(&code, NoExpand(to)).into_owned();
            }
            code
        })
    }
}

static TUPLE_POSITION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b([A-Za-z_][A-Za-z0-9_]*)\.([12])\b").expect("tuple accessor pattern is valid")
});

const ARRAY_JOIN_STOPS: &[&str] = &[
    "WHERE",
    "PREWHERE",
    "GROUP",
    "ORDER",
    "HAVING",
    "LIMIT",
    "OFFSET",
    "SETTINGS",
    "FORMAT",
    "UNION",
    "EXCEPT",
    "INTERSECT",
    "WINDOW",
    "QUALIFY",
    "ARRAY",
    "LEFT",
    "INNER",
    "CROSS",
    "JOIN",
];

/// `arrayJoin`, `ARRAY JOIN`, `JSONExtractKeysAndValues` and tuple access.
struct ExpandArrays;

impl RewritePass for ExpandArrays {
    fn name(&self) -> &str {
        "expand_arrays"
    }

    fn description(&self) -> &str {
        "Rewrites array joins and key/value tuple access"
    }

    fn rewrite(&self, sql: &str, warnings: &mut Vec<RewriteWarning>) -> String {
        let sql = replace_calls(sql, "arrayJoin", false, warnings, &|args: &[String]| {
            format!("unnest({})", args.join(", "))
        });
        let key_values = |args: &[String]| {
            let json = args.first().map(String::as_str).unwrap_or("NULL");
            let value_type = args
                .get(1)
                .and_then(|t| unquote_literal(t))
                .map(|t| duckdb_type(&t))
                .unwrap_or_else(|| "VARCHAR".to_string());
            format!(
                "map_entries(CAST(CAST({} AS JSON) AS MAP(VARCHAR, {})))",
                json, value_type
            )
        };
        let sql = replace_calls(&sql, "JSONExtractKeysAndValues", false, warnings, &key_values);
        let sql = replace_calls(&sql, "tupleElement", false, warnings, &|args: &[String]| {
            let tuple = args.first().map(String::as_str).unwrap_or("NULL");
            match args.get(1).map(|n| n.trim()) {
                Some("1") => format!("({}).key", tuple),
                Some("2") => format!("({}).value", tuple),
                Some(n) => format!("struct_extract({}, {})", tuple, n),
                None => "NULL".to_string(),
            }
        });
        let sql = expand_array_join_clauses(&sql);
        map_code(&sql, |code| {
            TUPLE_POSITION
                .replace_all(code, |caps: &Captures| {
                    let field = if &caps[2] == "1" { "key" } else { "value" };
                    format!("{}.{}", &caps[1], field)
                })
                .into_owned()
        })
    }
}

/// `[LEFT] ARRAY JOIN expr [AS alias], ...` -> lateral `unnest` joins.
fn expand_array_join_clauses(sql: &str) -> String {
    let bytes = sql.as_bytes();
    let mut cuts: Vec<(Range<usize>, String)> = Vec::new();
    let mut pos = 0;

    while let Some((i, _)) = CodeBytes::new(sql, pos).next() {
        pos = i + 1;
        if !word_start(bytes, i) || !keyword_at(sql, i, "ARRAY") {
            continue;
        }
        let Some((j, _)) = next_significant(sql, i + "ARRAY".len()) else {
            break;
        };
        if !keyword_at(sql, j, "JOIN") {
            continue;
        }

        let mut start = i;
        let mut left = false;
        if let Some(word) = previous_word(sql, i) {
            if keyword_at(sql, word, "LEFT") {
                start = word;
                left = true;
            }
        }

        let body_start = j + "JOIN".len();
        let end = array_join_end(sql, body_start);
        let items = split_args(sql, body_start..end);
        let replacement = array_join_replacement(&items, left);
        cuts.push((trimmed_cut(sql, start, end), format!(" {}", replacement)));
        pos = end;
    }

    if cuts.is_empty() {
        return sql.to_string();
    }
    splice(sql, &cuts)
}

/// Like `clause_end`, but commas separate items instead of ending the clause.
fn array_join_end(sql: &str, from: usize) -> usize {
    let mut cursor = from;
    loop {
        let end = clause_end(sql, cursor, ARRAY_JOIN_STOPS, true);
        if sql.as_bytes().get(end) == Some(&b',') {
            cursor = end + 1;
        } else {
            return end;
        }
    }
}

fn previous_word(sql: &str, at: usize) -> Option<usize> {
    let (last, b) = prev_significant(sql, at)?;
    if !is_ident_byte(b) {
        return None;
    }
    let bytes = sql.as_bytes();
    let mut start = last;
    while start > 0 && is_ident_byte(bytes[start - 1]) {
        start -= 1;
    }
    Some(start)
}

fn array_join_replacement(items: &[String], left: bool) -> String {
    let join = if left { "LEFT JOIN" } else { "CROSS JOIN" };
    let on = if left { " ON true" } else { "" };

    let pairs: Vec<(&str, String)> = items
        .iter()
        .map(|item| {
            let (expr, alias) = split_alias(item);
            let alias = alias.unwrap_or_else(|| default_alias(expr));
            (expr, alias)
        })
        .collect();

    match pairs.as_slice() {
        [(expr, alias)] => format!("{} unnest({}) AS _array_join({}){}", join, expr, alias, on),
        _ => {
            let columns: Vec<String> = pairs
                .iter()
                .map(|(expr, alias)| format!("unnest({}) AS {}", expr, alias))
                .collect();
            format!("{} (SELECT {}) AS _array_join{}", join, columns.join(", "), on)
        }
    }
}

/// Split `expr AS alias` at the last top-level `AS`.
fn split_alias(item: &str) -> (&str, Option<String>) {
    let bytes = item.as_bytes();
    let mut depth = 0usize;
    let mut found = None;
    for (i, b) in CodeBytes::new(item, 0) {
        match b {
            b'(' | b'[' => depth += 1,
            b')' | b']' => depth = depth.saturating_sub(1),
            _ if depth == 0 && word_start(bytes, i) && keyword_at(item, i, "AS") => found = Some(i),
            _ => {}
        }
    }
    match found {
        Some(i) => (
            item[..i].trim(),
            Some(item[i + "AS".len()..].trim().to_string()),
        ),
        None => (item.trim(), None),
    }
}

fn default_alias(expr: &str) -> String {
    let last = expr.rsplit('.').next().unwrap_or(expr);
    if !last.is_empty() && last.bytes().all(is_ident_byte) {
        last.to_string()
    } else {
        "value".to_string()
    }
}

/// `quantile(p)(x)`-style parameterized aggregates.
struct ParametricAggregates;

const PARAMETRIC: &[&str] = &["quantile", "quantileExact", "quantileTDigest", "quantiles", "topK"];

impl RewritePass for ParametricAggregates {
    fn name(&self) -> &str {
        "parametric_aggregates"
    }

    fn description(&self) -> &str {
        "Moves aggregate parameters into the argument list"
    }

    fn rewrite(&self, sql: &str, warnings: &mut Vec<RewriteWarning>) -> String {
        PARAMETRIC.iter().fold(sql.to_string(), |current, name| {
            rewrite_parametric(&current, name, warnings)
        })
    }
}

fn rewrite_parametric(sql: &str, name: &str, warnings: &mut Vec<RewriteWarning>) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut cursor = 0;
    loop {
        let site = match find_call(sql, name, cursor, false) {
            CallSearch::Found(site) => site,
            CallSearch::Unbalanced(offset) => {
                record_unbalanced(name, offset, warnings);
                break;
            }
            CallSearch::NotFound => break,
        };
        let first = split_args(sql, site.args_range());

        // `name(params)(args)` or the bare `name(args)` form.
        let (params, args, end) = match sql.as_bytes().get(site.end()) {
            Some(b'(') => match matching_paren(sql, site.end()) {
                Some(close) => (first, split_args(sql, site.end() + 1..close), close + 1),
                None => {
                    record_unbalanced(name, site.start, warnings);
                    break;
                }
            },
            _ => (Vec::new(), first, site.end()),
        };

        let args: Vec<String> = args
            .iter()
            .map(|a| rewrite_parametric(a, name, warnings))
            .collect();
        out.push_str(&sql[cursor..site.start]);
        out.push_str(&parametric_replacement(name, &params, &args));
        cursor = end;
    }
    out.push_str(&sql[cursor..]);
    out
}

fn parametric_replacement(name: &str, params: &[String], args: &[String]) -> String {
    let value = args.first().map(String::as_str).unwrap_or("NULL");
    let param = params.first().map(String::as_str);
    match name {
        "quantile" => format!("quantile_cont({}, {})", value, param.unwrap_or("0.5")),
        "quantileExact" => format!("quantile_disc({}, {})", value, param.unwrap_or("0.5")),
        "quantileTDigest" => format!("approx_quantile({}, {})", value, param.unwrap_or("0.5")),
        "quantiles" => format!("quantile_cont({}, [{}])", value, params.join(", ")),
        "topK" => format!("approx_top_k({}, {})", value, param.unwrap_or("10")),
        _ => format!("{}({})", name, args.join(", ")),
    }
}

/// `props['key']` -> `json_extract_string(props, '$.key')`.
struct MapIndexing;

impl RewritePass for MapIndexing {
    fn name(&self) -> &str {
        "map_indexing"
    }

    fn description(&self) -> &str {
        "Rewrites string-keyed subscripts into JSON extraction"
    }

    fn rewrite(&self, sql: &str, _warnings: &mut Vec<RewriteWarning>) -> String {
        let bytes = sql.as_bytes();
        let mut cuts: Vec<(Range<usize>, String)> = Vec::new();
        let mut pos = 0;

        while let Some((i, b)) = CodeBytes::new(sql, pos).next() {
            pos = i + 1;
            if b != b'[' || i == 0 || !is_ident_byte(bytes[i - 1]) {
                continue;
            }
            let start = subject_start(bytes, i);
            if bytes[start].is_ascii_digit() {
                continue;
            }

            let mut keys = Vec::new();
            let mut end = i;
            while bytes.get(end) == Some(&b'[') {
                let Some(close) = matching_bracket(sql, end) else {
                    break;
                };
                let key = &sql[end + 1..close];
                if unquote_literal(key).is_none() {
                    break;
                }
                keys.push(key.trim().to_string());
                end = close + 1;
            }
            if keys.is_empty() {
                continue;
            }

            let subject = &sql[start..i];
            cuts.push((
                start..end,
                format!("json_extract_string({}, {})", subject, json_path(&keys)),
            ));
            pos = end;
        }

        if cuts.is_empty() {
            return sql.to_string();
        }
        splice(sql, &cuts)
    }
}

/// Start of the (possibly qualified) identifier ending just before `at`.
fn subject_start(bytes: &[u8], at: usize) -> usize {
    let mut start = at;
    while start > 0 && (is_ident_byte(bytes[start - 1]) || bytes[start - 1] == b'.') {
        start -= 1;
    }
    start
}

fn matching_bracket(sql: &str, open: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (i, b) in CodeBytes::new(sql, open) {
        match b {
            b'[' => depth += 1,
            b']' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Applies the builtin replacement table, one rule at a time.
struct BuiltinFunctions {
    rules: &'static [FunctionRule],
}

impl BuiltinFunctions {
    fn new(rules: &'static [FunctionRule]) -> Self {
        Self { rules }
    }
}

impl RewritePass for BuiltinFunctions {
    fn name(&self) -> &str {
        "builtin_functions"
    }

    fn description(&self) -> &str {
        "Replaces ClickHouse builtins with DuckDB expressions"
    }

    fn rewrite(&self, sql: &str, warnings: &mut Vec<RewriteWarning>) -> String {
        self.rules.iter().fold(sql.to_string(), |current, rule| {
            let apply = |args: &[String]| rule.apply(args);
            replace_calls(&current, rule.name, rule.case_insensitive, warnings, &apply)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rw(sql: &str) -> String {
        Rewriter::with_defaults().rewrite(sql).sql
    }

    #[test]
    fn test_pass_names() {
        let rewriter = Rewriter::with_defaults();
        assert_eq!(
            rewriter.pass_names(),
            vec![
                "strip_modifiers",
                "rename_tables",
                "expand_arrays",
                "parametric_aggregates",
                "map_indexing",
                "builtin_functions",
            ]
        );
        assert!(Rewriter::new().pass_names().is_empty());
    }

    #[test]
    fn test_count_if_distinct() {
        assert_eq!(
            rw("SELECT countIf(DISTINCT user_id, type = 'pageview') FROM events"),
            "SELECT COUNT(DISTINCT CASE WHEN type = 'pageview' THEN user_id END) FROM events"
        );
    }

    #[test]
    fn test_start_of_hour() {
        assert_eq!(
            rw("SELECT toStartOfHour(timestamp) AS hour FROM events"),
            "SELECT date_trunc('hour', timestamp) AS hour FROM events"
        );
    }

    #[test]
    fn test_nested_calls() {
        assert_eq!(
            rw("SELECT toString(toStartOfDay(toDateTime(ts)))"),
            "SELECT CAST(date_trunc('day', CAST(ts AS TIMESTAMP)) AS VARCHAR)"
        );
        assert_eq!(
            rw("SELECT if(a, if(b, 1, 2), 3)"),
            "SELECT CASE WHEN a THEN CASE WHEN b THEN 1 ELSE 2 END ELSE 3 END"
        );
    }

    #[test]
    fn test_literals_and_comments_are_untouched() {
        let sql = "SELECT 'countIf(x)' AS label -- uniq(y)\nFROM events";
        assert_eq!(rw(sql), sql);
        let sql = "SELECT \"toString(x)\" FROM t /* FINAL */";
        assert_eq!(rw(sql), sql);
    }

    #[test]
    fn test_comma_inside_literal_argument() {
        assert_eq!(
            rw("SELECT countIf(pathname = '/a,b')"),
            "SELECT COUNT(*) FILTER (WHERE pathname = '/a,b')"
        );
    }

    #[test]
    fn test_final_settings_format_removed() {
        assert_eq!(
            rw("SELECT * FROM uptime_monitor_status FINAL WHERE monitor_id = 1 SETTINGS max_threads = 2, use_uncompressed_cache = 0 FORMAT JSONEachRow"),
            "SELECT * FROM uptime_monitor_status WHERE monitor_id = 1"
        );
        let out = Rewriter::with_defaults().rewrite("SELECT 1 FORMAT JSON");
        assert_eq!(out.sql, "SELECT 1");
        assert!(out.is_clean());
    }

    #[test]
    fn test_modifier_words_as_identifiers_are_kept() {
        for sql in [
            "SELECT final FROM (SELECT 1 AS final)",
            "SELECT settings FROM (SELECT 1 AS settings)",
            "SELECT format FROM (SELECT 'x' AS format)",
            "SELECT a AS final, b FROM t WHERE settings = 1",
            "SELECT t.final FROM t ORDER BY format",
        ] {
            let out = Rewriter::with_defaults().rewrite(sql);
            assert_eq!(out.sql, sql);
            assert!(out.is_clean());
        }
    }

    #[test]
    fn test_modifiers_in_clause_position_are_removed() {
        assert_eq!(
            rw("SELECT n FROM (SELECT count() AS n FROM events FINAL) WHERE n > {min:UInt32} SETTINGS max_threads = 1"),
            "SELECT n FROM (SELECT count() AS n FROM events) WHERE n > {min:UInt32}"
        );
        assert_eq!(
            rw("SELECT x FROM t AS a FINAL LEFT JOIN u ON a.id = u.id FORMAT JSON SETTINGS a = 1;"),
            "SELECT x FROM t AS a LEFT JOIN u ON a.id = u.id;"
        );
    }

    #[test]
    fn test_format_function_is_kept() {
        assert_eq!(rw("SELECT format('{}', x)"), "SELECT format('{}', x)");
    }

    #[test]
    fn test_with_fill_dropped_with_warning() {
        let out = Rewriter::with_defaults().rewrite(
            "SELECT day, c FROM t ORDER BY day WITH FILL FROM toDate('2024-01-01') TO today() STEP 1 LIMIT 10",
        );
        assert_eq!(out.sql, "SELECT day, c FROM t ORDER BY day LIMIT 10");
        assert_eq!(
            out.warnings,
            vec![RewriteWarning::Dropped {
                clause: "WITH FILL".to_string()
            }]
        );
    }

    #[test]
    fn test_with_fill_in_order_list() {
        let out = Rewriter::with_defaults()
            .rewrite("SELECT a, b FROM t ORDER BY a WITH FILL STEP 1, b INTERPOLATE (b AS b + 1)");
        assert_eq!(out.sql, "SELECT a, b FROM t ORDER BY a, b");
        assert_eq!(out.warnings.len(), 2);
    }

    #[test]
    fn test_cte_with_is_kept() {
        let sql = "WITH x AS (SELECT 1) SELECT * FROM x";
        assert_eq!(rw(sql), sql);
    }

    #[test]
    fn test_table_alias_rename() {
        assert_eq!(
            rw("SELECT count() FROM monitor_events WHERE monitor_id = 3"),
            "SELECT count() FROM uptime_monitor_events WHERE monitor_id = 3"
        );
        let sql = "SELECT * FROM uptime_monitor_events WHERE note = 'monitor_events'";
        assert_eq!(rw(sql), sql);
    }

    #[test]
    fn test_custom_aliases() {
        let mut aliases = BTreeMap::new();
        aliases.insert("pageviews".to_string(), "events".to_string());
        let rewriter = Rewriter::with_aliases(&aliases);
        assert_eq!(
            rewriter.rewrite("SELECT * FROM pageviews").sql,
            "SELECT * FROM events"
        );
        assert_eq!(
            rewriter.rewrite("SELECT * FROM monitor_events").sql,
            "SELECT * FROM monitor_events"
        );
    }

    #[test]
    fn test_array_join_function() {
        assert_eq!(
            rw("SELECT arrayJoin(tags) AS tag FROM t"),
            "SELECT unnest(tags) AS tag FROM t"
        );
    }

    #[test]
    fn test_json_keys_and_values() {
        assert_eq!(
            rw("SELECT kv.1 AS key, kv.2 AS value FROM events ARRAY JOIN JSONExtractKeysAndValues(props, 'String') AS kv"),
            "SELECT kv.key AS key, kv.value AS value FROM events CROSS JOIN unnest(map_entries(CAST(CAST(props AS JSON) AS MAP(VARCHAR, VARCHAR)))) AS _array_join(kv)"
        );
    }

    #[test]
    fn test_left_array_join_with_where() {
        assert_eq!(
            rw("SELECT t FROM events LEFT ARRAY JOIN tags AS t WHERE site_id = 1"),
            "SELECT t FROM events LEFT JOIN unnest(tags) AS _array_join(t) ON true WHERE site_id = 1"
        );
    }

    #[test]
    fn test_tuple_element() {
        assert_eq!(
            rw("SELECT tupleElement(kv, 1), tupleElement(kv, 2)"),
            "SELECT (kv).key, (kv).value"
        );
    }

    #[test]
    fn test_tuple_position_ignores_numbers() {
        assert_eq!(rw("SELECT 1.1, x.10"), "SELECT 1.1, x.10");
    }

    #[test]
    fn test_parametric_aggregates() {
        assert_eq!(
            rw("SELECT quantile(0.9)(duration) FROM t"),
            "SELECT quantile_cont(duration, 0.9) FROM t"
        );
        assert_eq!(
            rw("SELECT quantileExact(0.5)(x), quantileTDigest(0.99)(x)"),
            "SELECT quantile_disc(x, 0.5), approx_quantile(x, 0.99)"
        );
        assert_eq!(
            rw("SELECT quantiles(0.5, 0.9)(x)"),
            "SELECT quantile_cont(x, [0.5, 0.9])"
        );
        assert_eq!(
            rw("SELECT topK(5)(pathname)"),
            "SELECT approx_top_k(pathname, 5)"
        );
        assert_eq!(rw("SELECT quantile(x)"), "SELECT quantile_cont(x, 0.5)");
    }

    #[test]
    fn test_parametric_with_nested_builtin() {
        assert_eq!(
            rw("SELECT quantile(0.5)(toFloat64(d))"),
            "SELECT quantile_cont(CAST(d AS DOUBLE), 0.5)"
        );
    }

    #[test]
    fn test_map_indexing() {
        assert_eq!(
            rw("SELECT props['plan'] FROM events"),
            "SELECT json_extract_string(props, '$.plan') FROM events"
        );
        assert_eq!(
            rw("SELECT e.props['a']['b c'] FROM events e"),
            "SELECT json_extract_string(e.props, '$.a.\"b c\"') FROM events e"
        );
        assert_eq!(rw("SELECT arr[1] FROM t"), "SELECT arr[1] FROM t");
    }

    #[test]
    fn test_unbalanced_is_reported_not_panicking() {
        let out = Rewriter::with_defaults().rewrite("SELECT countIf(x = 1 FROM t");
        assert_eq!(out.sql, "SELECT countIf(x = 1 FROM t");
        assert_eq!(
            out.warnings,
            vec![RewriteWarning::Unbalanced {
                function: "countIf".to_string(),
                offset: 7
            }]
        );
    }

    #[test]
    fn test_unbalanced_keeps_earlier_rewrites() {
        let out = Rewriter::with_defaults().rewrite("SELECT uniq(a), uniq(b");
        assert_eq!(out.sql, "SELECT COUNT(DISTINCT a), uniq(b");
        assert_eq!(out.warnings.len(), 1);
    }

    #[test]
    fn test_supported_builtins_leave_no_call() {
        for rule in FUNCTION_RULES {
            let sql = format!("SELECT {}(a, b, c) FROM t", rule.name);
            let out = rw(&sql);
            let call = format!("{}(", rule.name);
            assert!(
                find_call(&out, rule.name, 0, rule.case_insensitive) == CallSearch::NotFound,
                "{} survived: {}",
                call,
                out
            );
        }
    }

    #[test]
    fn test_idempotent_on_duckdb_output() {
        let inputs = [
            "SELECT countIf(type = 'pageview'), uniq(user_id) FROM events FINAL",
            "SELECT toStartOfDay(timestamp) AS d, sumIf(x, y) FROM monitor_events GROUP BY d",
            "SELECT JSONExtractString(props, 'plan'), domainWithoutWWW(referrer) FROM events",
            "SELECT arrayCompact(arr), multiIf(a, 1, b, 2, 3), empty(referrer)",
            "SELECT kv.1 FROM events ARRAY JOIN JSONExtractKeysAndValues(props, 'String') AS kv",
        ];
        for sql in inputs {
            let once = rw(sql);
            assert_eq!(rw(&once), once, "not idempotent for {}", sql);
        }
    }

    #[test]
    fn test_convenience_rewrite() {
        assert_eq!(
            rewrite("SELECT today()"),
            "SELECT CAST(CAST(get_current_timestamp() AS TIMESTAMP) AS DATE)"
        );
    }

    #[test]
    fn test_warning_display() {
        assert_eq!(
            RewriteWarning::Dropped {
                clause: "INTERPOLATE".into()
            }
            .to_string(),
            "dropped unsupported INTERPOLATE clause"
        );
    }
}
