/// Minimal lexical scanner for ClickHouse SQL text.
///
/// The rewriter and the parameter binder never parse SQL into a tree. They
/// only need to know which bytes are "code" (as opposed to string literals,
/// quoted identifiers and comments), where a call's argument list ends, and
/// where its top-level commas are. Everything here works on byte offsets into
/// the original `&str`; all structural characters are ASCII, so every offset
/// produced is a valid char boundary.
use std::ops::Range;

/// Iterator over `(offset, byte)` pairs that lie outside literals and comments.
///
/// Quote characters themselves are not yielded. Doubled quotes inside a
/// literal (`'it''s'`) are treated as an escaped quote, not a terminator.
pub struct CodeBytes<'a> {
    bytes: &'a [u8],
    pos: usize,
    end: usize,
}

impl<'a> CodeBytes<'a> {
    pub fn new(sql: &'a str, from: usize) -> Self {
        Self::bounded(sql, from, sql.len())
    }

    /// Scan `from..end` only.
    pub fn bounded(sql: &'a str, from: usize, end: usize) -> Self {
        let end = end.min(sql.len());
        Self {
            bytes: sql.as_bytes(),
            pos: from.min(end),
            end,
        }
    }
}

impl Iterator for CodeBytes<'_> {
    type Item = (usize, u8);

    fn next(&mut self) -> Option<(usize, u8)> {
        while self.pos < self.end {
            let i = self.pos;
            let b = self.bytes[i];
            match b {
                b'\'' | b'"' | b'`' => self.pos = skip_quoted(self.bytes, i),
                b'-' if self.bytes.get(i + 1) == Some(&b'-') => {
                    self.pos = skip_line_comment(self.bytes, i)
                }
                b'/' if self.bytes.get(i + 1) == Some(&b'*') => {
                    self.pos = skip_block_comment(self.bytes, i)
                }
                _ => {
                    self.pos += 1;
                    return Some((i, b));
                }
            }
        }
        None
    }
}

/// Offset just past the quoted run opened at `open`. Unterminated runs
/// extend to the end of input.
pub fn skip_quoted(bytes: &[u8], open: usize) -> usize {
    let quote = bytes[open];
    let mut i = open + 1;
    while i < bytes.len() {
        if bytes[i] == quote {
            if bytes.get(i + 1) == Some(&quote) {
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    bytes.len()
}

fn skip_line_comment(bytes: &[u8], start: usize) -> usize {
    bytes[start..]
        .iter()
        .position(|&b| b == b'\n')
        .map(|p| start + p + 1)
        .unwrap_or(bytes.len())
}

fn skip_block_comment(bytes: &[u8], start: usize) -> usize {
    let mut i = start + 2;
    while i + 1 < bytes.len() {
        if bytes[i] == b'*' && bytes[i + 1] == b'/' {
            return i + 2;
        }
        i += 1;
    }
    bytes.len()
}

pub fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// Check `name` at `at`, comparing case-insensitively when asked.
fn name_at(sql: &str, at: usize, name: &str, case_insensitive: bool) -> bool {
    let Some(candidate) = sql.as_bytes().get(at..at + name.len()) else {
        return false;
    };
    if case_insensitive {
        candidate.eq_ignore_ascii_case(name.as_bytes())
    } else {
        candidate == name.as_bytes()
    }
}

/// Whether a standalone word `word` starts at `at` (case-insensitive).
pub fn keyword_at(sql: &str, at: usize, word: &str) -> bool {
    let bytes = sql.as_bytes();
    if !name_at(sql, at, word, true) {
        return false;
    }
    let before_ok = at == 0 || !is_ident_byte(bytes[at - 1]);
    let after_ok = bytes
        .get(at + word.len())
        .map_or(true, |&b| !is_ident_byte(b));
    before_ok && after_ok
}

/// A located `name(...)` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallSite {
    /// Offset of the first byte of the function name.
    pub start: usize,
    /// Offset of the opening paren.
    pub open: usize,
    /// Offset of the matching closing paren.
    pub close: usize,
}

impl CallSite {
    /// Offset just past the closing paren.
    pub fn end(&self) -> usize {
        self.close + 1
    }

    pub fn args_range(&self) -> Range<usize> {
        self.open + 1..self.close
    }
}

/// Outcome of searching for the next call to a function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallSearch {
    Found(CallSite),
    /// The name was found at this offset but its parentheses never close.
    Unbalanced(usize),
    NotFound,
}

/// Find the next call `name(` at or after `from`.
///
/// The name must start at a non-identifier boundary, be immediately followed
/// by `(`, and lie outside literals and comments.
pub fn find_call(sql: &str, name: &str, from: usize, case_insensitive: bool) -> CallSearch {
    let bytes = sql.as_bytes();
    let Some(&first) = name.as_bytes().first() else {
        return CallSearch::NotFound;
    };

    for (i, b) in CodeBytes::new(sql, from) {
        if !b.eq_ignore_ascii_case(&first) {
            continue;
        }
        if i > 0 && is_ident_byte(bytes[i - 1]) {
            continue;
        }
        if !name_at(sql, i, name, case_insensitive) {
            continue;
        }
        let open = i + name.len();
        if bytes.get(open) != Some(&b'(') {
            continue;
        }
        return match matching_paren(sql, open) {
            Some(close) => CallSearch::Found(CallSite {
                start: i,
                open,
                close,
            }),
            None => CallSearch::Unbalanced(i),
        };
    }
    CallSearch::NotFound
}

/// Offset of the paren closing the one at `open`, or `None` if unbalanced.
pub fn matching_paren(sql: &str, open: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (i, b) in CodeBytes::new(sql, open) {
        match b {
            b'(' => depth += 1,
            b')' => {
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

/// Split `sql[range]` at top-level commas. Commas nested in parens,
/// brackets, braces or literals are not separators. Arguments are trimmed;
/// an all-whitespace span yields no arguments.
pub fn split_args(sql: &str, range: Range<usize>) -> Vec<String> {
    if sql[range.clone()].trim().is_empty() {
        return Vec::new();
    }

    let mut args = Vec::new();
    let mut depth = 0i32;
    let mut start = range.start;
    for (i, b) in CodeBytes::bounded(sql, range.start, range.end) {
        match b {
            b'(' | b'[' | b'{' => depth += 1,
            b')' | b']' | b'}' => depth -= 1,
            b',' if depth == 0 => {
                args.push(sql[start..i].trim().to_string());
                start = i + 1;
            }
            _ => {}
        }
    }
    args.push(sql[start..range.end].trim().to_string());
    args
}

/// Split a SQL string into `(range, is_code)` runs so callers can apply
/// token-level regexes to code only.
pub fn code_runs(sql: &str) -> Vec<(Range<usize>, bool)> {
    let mut runs: Vec<(Range<usize>, bool)> = Vec::new();
    let mut push = |range: Range<usize>, code: bool| {
        if range.is_empty() {
            return;
        }
        match runs.last_mut() {
            Some((last, last_code)) if *last_code == code && last.end == range.start => {
                last.end = range.end;
            }
            _ => runs.push((range, code)),
        }
    };

    let mut cursor = 0;
    for (i, _) in CodeBytes::new(sql, 0) {
        if i > cursor {
            push(cursor..i, false);
        }
        push(i..i + 1, true);
        cursor = i + 1;
    }
    if cursor < sql.len() {
        push(cursor..sql.len(), false);
    }
    runs
}

/// Apply `f` to every code run, leaving literals and comments untouched.
pub fn map_code(sql: &str, mut f: impl FnMut(&str) -> String) -> String {
    let mut out = String::with_capacity(sql.len());
    for (range, is_code) in code_runs(sql) {
        if is_code {
            out.push_str(&f(&sql[range]));
        } else {
            out.push_str(&sql[range]);
        }
    }
    out
}

/// If `text` is a single-quoted literal, return its unescaped content.
pub fn unquote_literal(text: &str) -> Option<String> {
    let text = text.trim();
    let inner = text.strip_prefix('\'')?.strip_suffix('\'')?;
    if text.len() < 2 || skip_quoted(text.as_bytes(), 0) != text.len() {
        return None;
    }
    Some(inner.replace("''", "'"))
}

/// Quote a string as a SQL literal, doubling embedded single quotes.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Last non-whitespace byte before `at`.
pub fn prev_significant(sql: &str, at: usize) -> Option<(usize, u8)> {
    sql.as_bytes()[..at]
        .iter()
        .enumerate()
        .rev()
        .find(|(_, b)| !b.is_ascii_whitespace())
        .map(|(i, &b)| (i, b))
}

/// First non-whitespace byte at or after `at`.
pub fn next_significant(sql: &str, at: usize) -> Option<(usize, u8)> {
    sql.as_bytes()
        .iter()
        .enumerate()
        .skip(at)
        .find(|(_, b)| !b.is_ascii_whitespace())
        .map(|(i, &b)| (i, b))
}
