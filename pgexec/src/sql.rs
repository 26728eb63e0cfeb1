//! Sql string operation.
//!
//! This is a scanner, not a parser: it only knows enough of the lexical structure to find
//! placeholders, statement boundaries, and the leading keyword of each statement.
use std::ops::Range;

/// Type that represent sql string.
pub trait Sql {
    /// Returns sql string.
    fn sql(&self) -> &str;

    /// Return `true` if current statement should be cached.
    fn persistent(&self) -> bool;
}

impl Sql for &str {
    fn sql(&self) -> &str {
        self
    }

    fn persistent(&self) -> bool {
        true
    }
}

impl Sql for String {
    fn sql(&self) -> &str {
        self
    }

    fn persistent(&self) -> bool {
        true
    }
}

/// Non persistent query string.
#[derive(Debug)]
pub struct SqlOnce<'sql>(&'sql str);

impl Sql for SqlOnce<'_> {
    fn sql(&self) -> &str {
        self.0
    }

    fn persistent(&self) -> bool {
        false
    }
}

/// Extension trait for easier query persistence config.
pub trait SqlExt<'a> {
    /// Disable statement caching.
    fn once(self) -> SqlOnce<'a>;
}

impl<'a> SqlExt<'a> for &'a str {
    fn once(self) -> SqlOnce<'a> {
        SqlOnce(self)
    }
}

impl<'a> SqlExt<'a> for SqlOnce<'a> {
    fn once(self) -> SqlOnce<'a> {
        self
    }
}

/// Leading keyword of a statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Begin,
    Commit,
    Rollback,
    Copy,
    Select,
    Insert,
    Update,
    Delete,
    Merge,
    With,
    Values,
    Show,
    Explain,
    Fetch,
    /// Statement with no tokens.
    Empty,
    Other,
}

impl Command {
    fn classify(keyword: &str) -> Command {
        macro_rules! is {
            ($lit:literal) => { keyword.eq_ignore_ascii_case($lit) };
        }

        if keyword.is_empty() {
            Command::Empty
        } else if is!("begin") || is!("start") {
            Command::Begin
        } else if is!("commit") || is!("end") {
            Command::Commit
        } else if is!("rollback") || is!("abort") {
            Command::Rollback
        } else if is!("copy") {
            Command::Copy
        } else if is!("select") || is!("table") {
            Command::Select
        } else if is!("insert") {
            Command::Insert
        } else if is!("update") {
            Command::Update
        } else if is!("delete") {
            Command::Delete
        } else if is!("merge") {
            Command::Merge
        } else if is!("with") {
            Command::With
        } else if is!("values") {
            Command::Values
        } else if is!("show") {
            Command::Show
        } else if is!("explain") {
            Command::Explain
        } else if is!("fetch") {
            Command::Fetch
        } else {
            Command::Other
        }
    }

    /// Returns `true` for statements ending or starting a transaction.
    pub fn is_transaction_control(&self) -> bool {
        matches!(self, Command::Begin | Command::Commit | Command::Rollback)
    }
}

/// A `$n` occurence in the sql text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placeholder {
    /// Byte range in the whole sql text.
    pub range: Range<usize>,
    /// Zero based parameter index.
    pub index: usize,
}

/// One statement of a possibly multi statement sql text.
#[derive(Debug, Clone)]
pub struct ParsedStatement {
    /// Byte range in the whole sql text, excluding the `;`.
    pub range: Range<usize>,
    pub placeholders: Vec<Placeholder>,
    pub command: Command,
    /// The statement has a top level `RETURNING` clause.
    pub returning: bool,
}

impl ParsedStatement {
    /// Returns `true` if the statement is expected to produce rows.
    pub fn returns_rows(&self) -> bool {
        self.returning
            || matches!(
                self.command,
                Command::Select | Command::With | Command::Values | Command::Show
                    | Command::Explain | Command::Fetch
            )
    }
}

/// Result of scanning a sql text.
#[derive(Debug, Clone)]
pub struct ParsedSql {
    /// Non empty statements, a text without any is a single [`Command::Empty`] statement.
    pub statements: Vec<ParsedStatement>,
    /// Highest placeholder number.
    pub param_count: usize,
}

impl ParsedSql {
    pub fn is_multi_statement(&self) -> bool {
        self.statements.len() > 1
    }

    /// Text and parameter mapping to send statement `i` on its own.
    ///
    /// A single statement keeps its text and every parameter. In a multi statement text each
    /// statement has its placeholders renumbered in order of first appearance, the returned
    /// list maps the new numbers to the original zero based indices.
    pub fn statement_sql(&self, sql: &str, i: usize) -> (String, Vec<usize>) {
        let stmt = &self.statements[i];
        if !self.is_multi_statement() {
            return (sql[stmt.range.clone()].to_owned(), (0..self.param_count).collect());
        }

        let mut params: Vec<usize> = vec![];
        let mut out = String::with_capacity(stmt.range.len());
        let mut at = stmt.range.start;
        for ph in &stmt.placeholders {
            out.push_str(&sql[at..ph.range.start]);
            let local = match params.iter().position(|&e| e == ph.index) {
                Some(local) => local,
                None => {
                    params.push(ph.index);
                    params.len() - 1
                },
            };
            out.push('$');
            out.push_str(itoa::Buffer::new().format(local + 1));
            at = ph.range.end;
        }
        out.push_str(&sql[at..stmt.range.end]);
        (out, params)
    }

    /// Replace every placeholder with the matching literal.
    pub fn inline(&self, sql: &str, literals: &[String]) -> String {
        let extra: usize = literals.iter().map(String::len).sum();
        let mut out = String::with_capacity(sql.len() + extra);
        let mut at = 0;
        for ph in self.statements.iter().flat_map(|e| &e.placeholders) {
            out.push_str(&sql[at..ph.range.start]);
            out.push_str(&literals[ph.index]);
            at = ph.range.end;
        }
        out.push_str(&sql[at..]);
        out
    }
}

fn is_ident(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b >= 0x80
}

/// Scan sql text.
pub fn parse(sql: &str) -> ParsedSql {
    let bytes = sql.as_bytes();
    let len = bytes.len();

    let mut statements = vec![];
    let mut param_count = 0;

    let mut start = 0;
    let mut placeholders = vec![];
    let mut keyword: Option<Range<usize>> = None;
    let mut returning = false;
    let mut depth = 0u32;

    let mut i = 0;
    while i < len {
        let b = bytes[i];
        let prev_ident = i > 0 && is_ident(bytes[i - 1]);
        match b {
            b'\'' => {
                let escaped = i > 0 && matches!(bytes[i - 1], b'e' | b'E')
                    && !(i > 1 && is_ident(bytes[i - 2]));
                i = skip_literal(bytes, i + 1, escaped);
                continue;
            },
            b'"' => {
                i = skip_quoted_ident(bytes, i + 1);
                continue;
            },
            b'-' if bytes.get(i + 1) == Some(&b'-') => {
                i = match bytes[i..].iter().position(|&e| e == b'\n') {
                    Some(nl) => i + nl + 1,
                    None => len,
                };
                continue;
            },
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i = skip_block_comment(bytes, i + 2);
                continue;
            },
            b'$' if !prev_ident => {
                if let Some(end) = digits_end(bytes, i + 1) {
                    if let Ok(n) = sql[i + 1..end].parse::<usize>() {
                        if n > 0 {
                            placeholders.push(Placeholder { range: i..end, index: n - 1 });
                            param_count = param_count.max(n);
                        }
                    }
                    i = end;
                    continue;
                }
                if let Some(tag_end) = dollar_tag_end(bytes, i + 1) {
                    let tag = &bytes[i..=tag_end];
                    i = match find(bytes, tag_end + 1, tag) {
                        Some(close) => close + tag.len(),
                        None => len,
                    };
                    continue;
                }
            },
            b'(' => depth += 1,
            b')' => depth = depth.saturating_sub(1),
            b';' => {
                push_statement(
                    sql, &mut statements, start..i,
                    std::mem::take(&mut placeholders), keyword.take(), returning,
                );
                returning = false;
                depth = 0;
                start = i + 1;
            },
            b if is_ident(b) && !prev_ident => {
                let end = bytes[i..].iter().position(|&e| !is_ident(e)).map_or(len, |e| i + e);
                if keyword.is_none() {
                    keyword = Some(i..end);
                } else if depth == 0 && sql[i..end].eq_ignore_ascii_case("returning") {
                    returning = true;
                }
                i = end;
                continue;
            },
            _ => { },
        }
        i += 1;
    }

    push_statement(sql, &mut statements, start..len, placeholders, keyword, returning);

    if statements.is_empty() {
        statements.push(ParsedStatement {
            range: 0..0,
            placeholders: vec![],
            command: Command::Empty,
            returning: false,
        });
    }

    ParsedSql { statements, param_count }
}

fn push_statement(
    sql: &str,
    statements: &mut Vec<ParsedStatement>,
    range: Range<usize>,
    placeholders: Vec<Placeholder>,
    keyword: Option<Range<usize>>,
    returning: bool,
) {
    let Some(keyword) = keyword else {
        // whitespace and comments only
        return;
    };
    statements.push(ParsedStatement {
        range,
        placeholders,
        command: Command::classify(&sql[keyword]),
        returning,
    });
}

fn skip_literal(bytes: &[u8], mut i: usize, escaped: bool) -> usize {
    while i < bytes.len() {
        match bytes[i] {
            b'\\' if escaped => i += 2,
            b'\'' if bytes.get(i + 1) == Some(&b'\'') => i += 2,
            b'\'' => return i + 1,
            _ => i += 1,
        }
    }
    bytes.len()
}

fn skip_quoted_ident(bytes: &[u8], mut i: usize) -> usize {
    while i < bytes.len() {
        match bytes[i] {
            b'"' if bytes.get(i + 1) == Some(&b'"') => i += 2,
            b'"' => return i + 1,
            _ => i += 1,
        }
    }
    bytes.len()
}

fn skip_block_comment(bytes: &[u8], mut i: usize) -> usize {
    // block comments nest
    let mut level = 1;
    while i < bytes.len() {
        if bytes[i] == b'/' && bytes.get(i + 1) == Some(&b'*') {
            level += 1;
            i += 2;
        } else if bytes[i] == b'*' && bytes.get(i + 1) == Some(&b'/') {
            level -= 1;
            i += 2;
            if level == 0 {
                return i;
            }
        } else {
            i += 1;
        }
    }
    bytes.len()
}

fn digits_end(bytes: &[u8], i: usize) -> Option<usize> {
    let n = bytes[i..].iter().take_while(|e| e.is_ascii_digit()).count();
    (n > 0).then_some(i + n)
}

/// Position of the closing `$` of a dollar quote tag starting after `$`.
fn dollar_tag_end(bytes: &[u8], i: usize) -> Option<usize> {
    let mut j = i;
    while j < bytes.len() {
        match bytes[j] {
            b'$' => return Some(j),
            b if j == i && b.is_ascii_digit() => return None,
            b if is_ident(b) => j += 1,
            _ => return None,
        }
    }
    None
}

fn find(bytes: &[u8], from: usize, needle: &[u8]) -> Option<usize> {
    bytes[from..].windows(needle.len()).position(|e| e == needle).map(|e| from + e)
}

/// Quote `value` as a sql string literal.
///
/// With `standard_conforming_strings` on, backslash is an ordinary character in `'...'`.
/// Otherwise a value containing one is written as `E'...'` with the backslash doubled.
pub fn quote_literal(value: &str, standard_conforming_strings: bool) -> String {
    let escape = !standard_conforming_strings && value.contains('\\');
    let mut out = String::with_capacity(value.len() + 3);
    if escape {
        out.push('E');
    }
    out.push('\'');
    for c in value.chars() {
        match c {
            '\'' => out.push_str("''"),
            '\\' if escape => out.push_str("\\\\"),
            c => out.push(c),
        }
    }
    out.push('\'');
    out
}
