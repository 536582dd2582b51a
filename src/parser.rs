//! Tree Reader: turns raw source text into a [`Module`].
//!
//! Two layers. The lexer folds physical lines into logical lines (bracket
//! nesting, triple-quoted strings, and backslash continuations join lines;
//! comments are stripped outside strings; indentation is measured with tabs
//! expanded to the next multiple of 8). The parser then classifies each
//! logical line and builds nested blocks from indentation. Expressions stay
//! as source text; only the statement shapes the rewriter cares about are
//! given structure.

use std::path::Path;

use crate::ast::{Clause, ExprText, FunctionDef, Module, Param, Stmt, StmtKind};
use crate::error::Error;

const KEYWORDS: &[&str] = &[
    "False", "None", "True", "and", "as", "assert", "async", "await", "break", "class",
    "continue", "def", "del", "elif", "else", "except", "finally", "for", "from", "global", "if",
    "import", "in", "is", "lambda", "nonlocal", "not", "or", "pass", "raise", "return", "try",
    "while", "with", "yield",
];

const COMPOUND_LEADERS: &[&str] = &[
    "if", "elif", "else", "for", "while", "with", "try", "except", "finally", "class",
];

const CLAUSE_CONTINUATIONS: &[&str] = &["elif", "else", "except", "finally"];

pub fn parse_module(source: &str, path: &Path) -> Result<Module, Error> {
    let lines = logical_lines(source, path)?;
    let mut pos = 0;
    let body = parse_block(&lines, &mut pos, 0, path)?;
    if pos < lines.len() {
        return Err(parse_error(path, lines[pos].line, "unexpected indent"));
    }
    Ok(Module { body })
}

fn parse_error(path: &Path, line: u32, message: impl Into<String>) -> Error {
    Error::Parse {
        path: path.to_path_buf(),
        line,
        message: message.into(),
    }
}

// ---------------------------------------------------------------------------
// Lexer
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct LogicalLine {
    /// 1-based physical line the statement starts on.
    line: u32,
    /// Indentation of the first physical line, tabs expanded to 8.
    indent: u32,
    /// Statement text; continuation lines are joined with their original
    /// newlines and leading whitespace so opaque statements render verbatim.
    text: String,
}

struct StrState {
    quote: char,
    triple: bool,
    raw: bool,
}

/// Tracks bracket depth and string state across the characters of a logical
/// line, one physical line at a time.
#[derive(Default)]
struct Scanner {
    depth: i32,
    string: Option<StrState>,
}

impl Scanner {
    fn default_state(&self) -> bool {
        self.depth == 0 && self.string.is_none()
    }

    /// Process one physical line. `on_code` fires for every character outside
    /// a string literal, with its byte offset and the bracket depth after the
    /// character is accounted for. Returns the line truncated at a comment.
    fn feed<'a>(&mut self, line: &'a str, mut on_code: impl FnMut(usize, char, i32)) -> &'a str {
        let chars: Vec<(usize, char)> = line.char_indices().collect();
        let mut end = line.len();
        let mut i = 0;
        while i < chars.len() {
            let (pos, c) = chars[i];
            if let Some(state) = &self.string {
                if !state.raw && c == '\\' {
                    i += 2;
                    continue;
                }
                if c == state.quote {
                    if !state.triple {
                        self.string = None;
                        i += 1;
                        continue;
                    }
                    if i + 2 < chars.len() && chars[i + 1].1 == c && chars[i + 2].1 == c {
                        self.string = None;
                        i += 3;
                        continue;
                    }
                }
                i += 1;
                continue;
            }
            match c {
                '#' => {
                    end = pos;
                    break;
                }
                '\'' | '"' => {
                    let triple = i + 2 < chars.len() && chars[i + 1].1 == c && chars[i + 2].1 == c;
                    let raw = raw_prefix(&chars, i);
                    self.string = Some(StrState {
                        quote: c,
                        triple,
                        raw,
                    });
                    i += if triple { 3 } else { 1 };
                    continue;
                }
                '(' | '[' | '{' => {
                    self.depth += 1;
                    on_code(pos, c, self.depth);
                }
                ')' | ']' | '}' => {
                    self.depth -= 1;
                    on_code(pos, c, self.depth);
                }
                _ => on_code(pos, c, self.depth),
            }
            i += 1;
        }
        &line[..end]
    }
}

/// A quote is a raw-string opener when the identifier characters immediately
/// before it are string-prefix letters containing `r`.
fn raw_prefix(chars: &[(usize, char)], quote_at: usize) -> bool {
    let mut j = quote_at;
    let mut saw_r = false;
    while j > 0 {
        let c = chars[j - 1].1;
        if matches!(c, 'r' | 'R') {
            saw_r = true;
        } else if !matches!(c, 'b' | 'B' | 'u' | 'U' | 'f' | 'F') {
            break;
        }
        if quote_at - j >= 2 {
            break;
        }
        j -= 1;
    }
    if j > 0 {
        let before = chars[j - 1].1;
        if before.is_alphanumeric() || before == '_' {
            return false;
        }
    }
    saw_r
}

fn measure_indent(line: &str) -> (u32, &str) {
    let mut indent = 0u32;
    for (pos, c) in line.char_indices() {
        match c {
            ' ' => indent += 1,
            '\t' => indent = indent / 8 * 8 + 8,
            _ => return (indent, &line[pos..]),
        }
    }
    (indent, "")
}

fn logical_lines(source: &str, path: &Path) -> Result<Vec<LogicalLine>, Error> {
    let mut out = Vec::new();
    let mut scanner = Scanner::default();
    let mut acc: Option<LogicalLine> = None;

    for (idx, raw_line) in source.lines().enumerate() {
        let lineno = idx as u32 + 1;
        let (content, indent) = if acc.is_some() {
            (raw_line, 0)
        } else {
            let (indent, rest) = measure_indent(raw_line);
            if rest.is_empty() || rest.starts_with('#') {
                continue;
            }
            (rest, indent)
        };

        let kept = scanner.feed(content, |_, _, _| {});
        if scanner.depth < 0 {
            return Err(parse_error(path, lineno, "unmatched closing bracket"));
        }

        let piece = kept.to_string();
        let continue_next = match &scanner.string {
            Some(state) if state.triple => true,
            Some(_) => {
                if piece.ends_with('\\') {
                    true
                } else {
                    return Err(parse_error(path, lineno, "unterminated string literal"));
                }
            }
            // an explicit backslash continuation keeps its backslash so the
            // joined text still renders as valid source
            None => scanner.depth > 0 || piece.ends_with('\\'),
        };

        match acc.as_mut() {
            Some(line) => {
                line.text.push('\n');
                line.text.push_str(&piece);
            }
            None => {
                acc = Some(LogicalLine {
                    line: lineno,
                    indent,
                    text: piece,
                });
            }
        }

        if !continue_next {
            if let Some(mut line) = acc.take() {
                line.text.truncate(line.text.trim_end().len());
                if !line.text.is_empty() {
                    out.push(line);
                }
            }
        }
    }

    if acc.is_some() || !scanner.default_state() {
        let last = source.lines().count() as u32;
        return Err(parse_error(path, last.max(1), "unexpected end of file"));
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Text helpers shared with the rewriter
// ---------------------------------------------------------------------------

/// Characters of `text` outside string literals, with bracket depth.
fn code_chars(text: &str) -> Vec<(usize, char, i32)> {
    let mut scanner = Scanner::default();
    let mut out = Vec::new();
    let mut offset = 0;
    for part in text.split('\n') {
        scanner.feed(part, |pos, c, depth| out.push((offset + pos, c, depth)));
        offset += part.len() + 1;
    }
    out
}

fn find_top(text: &str, target: char) -> Option<usize> {
    code_chars(text)
        .into_iter()
        .find(|&(_, c, depth)| c == target && depth == 0)
        .map(|(pos, _, _)| pos)
}

fn split_top_level(text: &str, sep: char) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut start = 0;
    for (pos, c, depth) in code_chars(text) {
        if c == sep && depth == 0 {
            pieces.push(&text[start..pos]);
            start = pos + sep.len_utf8();
        }
    }
    pieces.push(&text[start..]);
    pieces
}

/// Byte offset of a top-level `=` that is an assignment (not `==`, `<=`,
/// an augmented assignment, or a walrus).
fn find_assign_eq(text: &str) -> Option<usize> {
    let bytes = text.as_bytes();
    for (pos, c, depth) in code_chars(text) {
        if c != '=' || depth != 0 {
            continue;
        }
        if bytes.get(pos + 1) == Some(&b'=') {
            continue;
        }
        if pos > 0 && matches!(bytes[pos - 1], b'=' | b'!' | b'<' | b'>' | b'+' | b'-' | b'*'
            | b'/' | b'%' | b'&' | b'|' | b'^' | b'@' | b':' | b'~')
        {
            continue;
        }
        return Some(pos);
    }
    None
}

/// True when `text` contains `word` as a standalone token outside strings.
pub fn contains_token(text: &str, word: &str) -> bool {
    let mut mask = vec![b' '; text.len()];
    for (pos, c, _) in code_chars(text) {
        if c.is_ascii() {
            mask[pos] = c as u8;
        }
    }
    let needle = word.as_bytes();
    let is_ident = |b: u8| b.is_ascii_alphanumeric() || b == b'_';
    let mut i = 0;
    while i + needle.len() <= mask.len() {
        if &mask[i..i + needle.len()] == needle
            && (i == 0 || !is_ident(mask[i - 1]))
            && (i + needle.len() == mask.len() || !is_ident(mask[i + needle.len()]))
        {
            return true;
        }
        i += 1;
    }
    false
}

/// True when `text` is nothing but one or more adjacent string literals,
/// i.e. a docstring-shaped expression statement.
pub fn is_string_literal(text: &str) -> bool {
    let mut rest = text.trim();
    let mut seen = false;
    while !rest.is_empty() {
        match consume_string_literal(rest) {
            Some(after) => {
                seen = true;
                rest = after.trim_start();
            }
            None => return false,
        }
    }
    seen
}

fn consume_string_literal(s: &str) -> Option<&str> {
    let chars: Vec<(usize, char)> = s.char_indices().collect();
    let mut quote_at = None;
    for (k, (_, c)) in chars.iter().enumerate().take(3) {
        if matches!(c, '\'' | '"') {
            quote_at = Some(k);
            break;
        }
        if !matches!(c, 'r' | 'R' | 'b' | 'B' | 'u' | 'U' | 'f' | 'F') {
            return None;
        }
    }
    let quote_at = quote_at?;
    let quote = chars[quote_at].1;
    let raw = chars[..quote_at].iter().any(|(_, c)| matches!(c, 'r' | 'R'));
    let triple =
        quote_at + 2 < chars.len() && chars[quote_at + 1].1 == quote && chars[quote_at + 2].1 == quote;
    let after = |i: usize| chars[i].0 + chars[i].1.len_utf8();

    let mut i = quote_at + if triple { 3 } else { 1 };
    while i < chars.len() {
        let c = chars[i].1;
        if !raw && c == '\\' {
            i += 2;
            continue;
        }
        if c == quote {
            if !triple {
                return Some(&s[after(i)..]);
            }
            if i + 2 < chars.len() && chars[i + 1].1 == quote && chars[i + 2].1 == quote {
                return Some(&s[after(i + 2)..]);
            }
        }
        i += 1;
    }
    None
}

/// True when the statement's last code character is a top-level `:`, i.e. a
/// block header the parser has no keyword for (`match`/`case` and other
/// soft-keyword forms).
fn opens_block(text: &str) -> bool {
    code_chars(text)
        .last()
        .is_some_and(|&(pos, c, depth)| {
            c == ':' && depth == 0 && text[pos + 1..].trim().is_empty()
        })
}

fn leading_word(text: &str) -> &str {
    let end = text
        .char_indices()
        .find(|(_, c)| !(c.is_alphanumeric() || *c == '_'))
        .map(|(pos, _)| pos)
        .unwrap_or(text.len());
    &text[..end]
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

fn parse_block(
    lines: &[LogicalLine],
    pos: &mut usize,
    indent: u32,
    path: &Path,
) -> Result<Vec<Stmt>, Error> {
    let mut body = Vec::new();
    // decorator lines held until the `def` they belong to; anything else
    // (class decorators included) passes through verbatim
    let mut pending: Vec<(u32, String)> = Vec::new();

    while *pos < lines.len() {
        let ln = &lines[*pos];
        if ln.indent < indent {
            break;
        }
        if ln.indent > indent {
            return Err(parse_error(path, ln.line, "unexpected indent"));
        }

        if ln.text.starts_with('@') {
            pending.push((ln.line, ln.text.clone()));
            *pos += 1;
            continue;
        }

        let word = leading_word(&ln.text);
        match word {
            "def" => {
                let decorators = take_decorators(&mut pending);
                body.push(parse_def(lines, pos, indent, decorators, false, path)?);
            }
            "async" => {
                let rest = ln.text["async".len()..].trim_start();
                if leading_word(rest) == "def" {
                    let decorators = take_decorators(&mut pending);
                    body.push(parse_def(lines, pos, indent, decorators, true, path)?);
                } else {
                    flush_decorators(&mut body, &mut pending);
                    body.push(parse_compound(lines, pos, indent, path)?);
                }
            }
            _ if COMPOUND_LEADERS.contains(&word) => {
                flush_decorators(&mut body, &mut pending);
                body.push(parse_compound(lines, pos, indent, path)?);
            }
            "import" | "from" => {
                flush_decorators(&mut body, &mut pending);
                body.push(Stmt {
                    line: ln.line,
                    kind: StmtKind::Import(ln.text.clone()),
                });
                *pos += 1;
            }
            // a colon-terminated header with an indented suite is a block
            // form the keyword table does not know (match/case); parse it as
            // a generic compound rather than an opaque statement
            _ if opens_block(&ln.text)
                && lines.get(*pos + 1).is_some_and(|next| next.indent > indent) =>
            {
                flush_decorators(&mut body, &mut pending);
                body.push(parse_compound(lines, pos, indent, path)?);
            }
            _ => {
                flush_decorators(&mut body, &mut pending);
                body.push(Stmt {
                    line: ln.line,
                    kind: classify_simple(&ln.text, ln.line),
                });
                *pos += 1;
            }
        }
    }

    flush_decorators(&mut body, &mut pending);
    Ok(body)
}

fn take_decorators(pending: &mut Vec<(u32, String)>) -> Vec<ExprText> {
    pending
        .drain(..)
        .map(|(line, raw)| ExprText::new(line, raw[1..].trim().to_string()))
        .collect()
}

fn flush_decorators(body: &mut Vec<Stmt>, pending: &mut Vec<(u32, String)>) {
    for (line, raw) in pending.drain(..) {
        body.push(Stmt {
            line,
            kind: StmtKind::Other(raw),
        });
    }
}

fn classify_simple(text: &str, line: u32) -> StmtKind {
    let word = leading_word(text);
    match word {
        "return" => {
            let rest = text["return".len()..].trim();
            if rest.is_empty() {
                StmtKind::Return(None)
            } else {
                StmtKind::Return(Some(ExprText::new(line, rest.to_string())))
            }
        }
        "import" | "from" => StmtKind::Import(text.to_string()),
        _ => match split_ann_assign(text) {
            Some((target, annotation, value)) => StmtKind::AnnAssign {
                target,
                annotation: ExprText::new(line, annotation),
                value: value.map(|v| ExprText::new(line, v)),
            },
            None => StmtKind::Other(text.to_string()),
        },
    }
}

fn split_ann_assign(text: &str) -> Option<(String, String, Option<String>)> {
    let first = text.chars().next()?;
    if !(first.is_alphabetic() || first == '_') {
        return None;
    }
    if KEYWORDS.contains(&leading_word(text)) {
        return None;
    }
    let colon = find_top(text, ':')?;
    let target = text[..colon].trim();
    if target.is_empty()
        || find_top(target, '=').is_some()
        || find_top(target, ',').is_some()
        || target.contains('\n')
    {
        return None;
    }
    let rest = &text[colon + 1..];
    match find_assign_eq(rest) {
        Some(eq) => {
            let annotation = rest[..eq].trim();
            let value = rest[eq + 1..].trim();
            if annotation.is_empty() || value.is_empty() {
                return None;
            }
            Some((
                target.to_string(),
                annotation.to_string(),
                Some(value.to_string()),
            ))
        }
        None => {
            let annotation = rest.trim();
            if annotation.is_empty() {
                None
            } else {
                Some((target.to_string(), annotation.to_string(), None))
            }
        }
    }
}

fn parse_def(
    lines: &[LogicalLine],
    pos: &mut usize,
    indent: u32,
    decorators: Vec<ExprText>,
    is_async: bool,
    path: &Path,
) -> Result<Stmt, Error> {
    let ln = &lines[*pos];
    let line = ln.line;
    let mut text = ln.text.as_str();
    if is_async {
        text = text["async".len()..].trim_start();
    }
    let after_def = text["def".len()..].trim_start();

    let name_end = after_def
        .char_indices()
        .find(|(_, c)| !(c.is_alphanumeric() || *c == '_'))
        .map(|(p, _)| p)
        .unwrap_or(after_def.len());
    let name = &after_def[..name_end];
    if name.is_empty() {
        return Err(parse_error(path, line, "expected function name after 'def'"));
    }

    let rest = after_def[name_end..].trim_start();
    if !rest.starts_with('(') {
        return Err(parse_error(path, line, "expected parameter list"));
    }
    let close = code_chars(rest)
        .into_iter()
        .find(|&(_, c, depth)| c == ')' && depth == 0)
        .map(|(p, _, _)| p)
        .ok_or_else(|| parse_error(path, line, "unterminated parameter list"))?;
    let params = parse_params(&rest[1..close], line, path)?;

    let tail = rest[close + 1..].trim_start();
    let (returns, after_colon) = if let Some(t) = tail.strip_prefix("->") {
        let colon = find_top(t, ':')
            .ok_or_else(|| parse_error(path, line, "expected ':' after return annotation"))?;
        (
            Some(ExprText::new(line, t[..colon].trim().to_string())),
            &t[colon + 1..],
        )
    } else if let Some(t) = tail.strip_prefix(':') {
        (None, t)
    } else {
        return Err(parse_error(path, line, "expected ':' in function header"));
    };

    *pos += 1;
    let inline = after_colon.trim();
    let body = if inline.is_empty() {
        parse_suite(lines, pos, indent, line, path)?
    } else {
        vec![Stmt {
            line,
            kind: classify_simple(inline, line),
        }]
    };

    Ok(Stmt {
        line,
        kind: StmtKind::FunctionDef(FunctionDef {
            name: name.to_string(),
            decorators,
            params,
            returns,
            is_async,
            body,
        }),
    })
}

fn parse_params(text: &str, line: u32, path: &Path) -> Result<Vec<Param>, Error> {
    let mut params = Vec::new();
    for piece in split_top_level(text, ',') {
        let piece = piece.trim();
        if piece.is_empty() {
            continue;
        }
        // split off the default first: a lambda default carries its own
        // top-level colon, so the annotation colon is only looked for in
        // the head left of the `=`
        let (head, default) = match find_assign_eq(piece) {
            Some(eq) => (&piece[..eq], Some(piece[eq + 1..].trim())),
            None => (piece, None),
        };
        let (head, annotation) = match find_top(head, ':') {
            Some(colon) => (&head[..colon], Some(head[colon + 1..].trim())),
            None => (head, None),
        };
        let name = head.trim();
        let valid = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_alphanumeric() || c == '_' || c == '*' || c == '/');
        if !valid {
            return Err(parse_error(path, line, format!("invalid parameter {name:?}")));
        }
        if let Some(a) = annotation {
            if a.is_empty() {
                return Err(parse_error(path, line, "empty parameter annotation"));
            }
        }
        params.push(Param {
            name: name.to_string(),
            annotation: annotation.map(|a| ExprText::new(line, a.to_string())),
            default: default.map(|d| ExprText::new(line, d.to_string())),
        });
    }
    Ok(params)
}

fn parse_compound(
    lines: &[LogicalLine],
    pos: &mut usize,
    indent: u32,
    path: &Path,
) -> Result<Stmt, Error> {
    let first_line = lines[*pos].line;
    let mut clauses = Vec::new();
    loop {
        let ln = &lines[*pos];
        let colon = find_top(&ln.text, ':')
            .ok_or_else(|| parse_error(path, ln.line, "expected ':' in compound statement"))?;
        let header = ln.text[..colon].trim_end().to_string();
        let inline = ln.text[colon + 1..].trim().to_string();
        *pos += 1;

        let body = if inline.is_empty() {
            parse_suite(lines, pos, indent, ln.line, path)?
        } else {
            vec![Stmt {
                line: ln.line,
                kind: classify_simple(&inline, ln.line),
            }]
        };
        clauses.push(Clause {
            line: ln.line,
            header,
            body,
        });

        match lines.get(*pos) {
            Some(next)
                if next.indent == indent
                    && CLAUSE_CONTINUATIONS.contains(&leading_word(&next.text)) => {}
            _ => break,
        }
    }
    Ok(Stmt {
        line: first_line,
        kind: StmtKind::Compound(clauses),
    })
}

fn parse_suite(
    lines: &[LogicalLine],
    pos: &mut usize,
    parent_indent: u32,
    header_line: u32,
    path: &Path,
) -> Result<Vec<Stmt>, Error> {
    match lines.get(*pos) {
        Some(next) if next.indent > parent_indent => {
            let child_indent = lines[*pos].indent;
            parse_block(lines, pos, child_indent, path)
        }
        _ => Err(parse_error(path, header_line, "expected an indented block")),
    }
}
