//! Lexer: UTF-8 source text to an indentation-aware token tree.
//!
//! The lexer normalizes line endings, strips comments, tokenizes each
//! physical line, and reconstructs the block structure from leading
//! whitespace. Lines left unbalanced by an open bracket are appended to the
//! previous logical statement instead of starting a new one. The original
//! source is kept, split into lines, so tracebacks can quote it.

use std::fmt;

/// A position in the source text, zero-based.
///
/// `line == usize::MAX` means the position is unknown (used for diagnostics
/// raised before any source location is established).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourcePos {
    pub line: usize,
    pub column: usize,
}

impl Default for SourcePos {
    fn default() -> Self {
        Self {
            line: usize::MAX,
            column: usize::MAX,
        }
    }
}

impl SourcePos {
    #[must_use]
    pub fn known(&self) -> bool {
        self.line != usize::MAX
    }
}

/// A diagnostic produced by the lexer, parser, or compiler.
///
/// Converted into a script-level `SyntaxError` at the compile boundary.
#[derive(Debug, Clone)]
pub struct CodeError {
    pub message: String,
    pub pos: SourcePos,
}

impl CodeError {
    pub(crate) fn new(message: impl Into<String>, pos: SourcePos) -> Self {
        Self {
            message: message.into(),
            pos,
        }
    }

    pub(crate) fn at_unknown(message: impl Into<String>) -> Self {
        Self::new(message, SourcePos::default())
    }
}

impl fmt::Display for CodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.pos.known() {
            write!(
                f,
                "({},{}) {}",
                self.pos.line + 1,
                self.pos.column + 1,
                self.message
            )
        } else {
            f.write_str(&self.message)
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum TokenKind {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Symbol,
    Word,
    Keyword,
}

#[derive(Debug, Clone)]
pub(crate) struct Token {
    pub text: String,
    pub kind: TokenKind,
    pub pos: SourcePos,
}

/// One logical statement (a flat token list) plus its indented block.
#[derive(Debug, Default)]
pub(crate) struct LexTree {
    pub tokens: Vec<Token>,
    pub children: Vec<LexTree>,
}

/// Lexer output: the original source lines, the statement tree (the root
/// carries no tokens), and the first diagnostic if any.
#[derive(Debug)]
pub(crate) struct LexOutput {
    pub lines: Vec<String>,
    pub root: LexTree,
    pub error: Option<CodeError>,
}

const SYMBOLS: &[&str] = &[
    "(", ")", "[", "]", "{", "}", ":", ".", ",", "+", "-", "*", "**", "/", "//", "%", "<", ">",
    "<=", ">=", "==", "!=", "!", "&&", "||", "^", "&", "|", "~", "<<", ">>", "=", ":=", "+=",
    "-=", "*=", "**=", "%=", "/=", "//=", ">>=", "<<=", "|=", "&=", "^=", ";", "--", "++",
];

const RESERVED: &[&str] = &[
    "True", "False", "None", "and", "or", "not", "if", "else", "elif", "while", "for", "class",
    "def", "try", "except", "finally", "raise", "with", "assert", "return", "break", "continue",
    "pass", "global", "nonlocal", "del", "from", "import", "lambda", "in", "as", "is", "await",
    "async", "yield",
];

pub(crate) fn is_keyword(s: &str) -> bool {
    RESERVED.contains(&s)
}

/// Checks that a name is usable as an identifier (and is not reserved).
pub(crate) fn is_valid_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    is_alpha(first) && chars.all(is_alphanumeric) && !is_keyword(s)
}

fn is_alpha(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_alphanumeric(c: char) -> bool {
    is_alpha(c) || c.is_ascii_digit()
}

fn digit_value(c: char, base: u32) -> Option<u64> {
    c.to_digit(base).map(u64::from)
}

fn is_possible_symbol_prefix(s: &str) -> bool {
    SYMBOLS.iter().any(|sym| sym.starts_with(s))
}

fn normalize_line_endings(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n")
}

fn strip_comment(line: &str) -> &str {
    match line.find('#') {
        Some(i) => &line[..i],
        None => line,
    }
}

fn is_blank(line: &str) -> bool {
    line.chars().all(|c| c == ' ' || c == '\t')
}

/// Measures the indentation level of a line against the inferred indent unit.
///
/// The first indented line fixes the unit; every later indentation must be a
/// whole multiple of it and consist of the same character.
fn indent_of(line: &str, indent_unit: &mut Option<String>) -> Result<usize, ()> {
    let mut i = 0;
    for c in line.chars() {
        if c == '#' {
            return Ok(0);
        }
        if c != ' ' && c != '\t' {
            break;
        }
        i += 1;
    }
    if i == 0 || i >= line.len() {
        return Ok(0);
    }

    let prefix = &line[..i];
    let first = prefix.chars().next().ok_or(())?;
    if !prefix.chars().all(|c| c == first) {
        return Err(());
    }

    match indent_unit {
        None => {
            *indent_unit = Some(prefix.to_string());
            Ok(1)
        }
        Some(unit) => {
            if i % unit.len() != 0 || !unit.starts_with(first) {
                Err(())
            } else {
                Ok(i / unit.len())
            }
        }
    }
}

struct Cursor<'a> {
    chars: Vec<char>,
    index: usize,
    line: &'a str,
}

impl<'a> Cursor<'a> {
    fn new(line: &'a str) -> Self {
        Self {
            chars: line.chars().collect(),
            index: 0,
            line,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.index).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.index + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek();
        if c.is_some() {
            self.index += 1;
        }
        c
    }
}

fn consume_word(p: &mut Cursor) -> Token {
    let mut text = String::new();
    while let Some(c) = p.peek() {
        if !is_alphanumeric(c) {
            break;
        }
        text.push(c);
        p.bump();
    }
    let kind = match text.as_str() {
        "None" => TokenKind::Null,
        "True" => TokenKind::Bool(true),
        "False" => TokenKind::Bool(false),
        _ if is_keyword(&text) => TokenKind::Keyword,
        _ => TokenKind::Word,
    };
    Token {
        text,
        kind,
        pos: SourcePos::default(),
    }
}

fn consume_number(p: &mut Cursor) -> Result<Token, String> {
    let start = p.index;

    let mut base = 10u32;
    if p.peek() == Some('0') {
        base = match p.peek_at(1) {
            Some('b' | 'B') => 2,
            Some('o' | 'O') => 8,
            Some('x' | 'X') => 16,
            _ => 10,
        };
    }
    if base != 10 {
        p.bump();
        p.bump();
        let next_is_digit = p.peek().is_some_and(|c| digit_value(c, base).is_some());
        if !next_is_digit && p.peek() != Some('.') {
            return Err(match base {
                2 => "Invalid binary string".to_string(),
                8 => "Invalid octal string".to_string(),
                _ => "Invalid hexadecimal string".to_string(),
            });
        }
    }

    let mut value: u128 = 0;
    let mut overflow = false;
    while let Some(d) = p.peek().and_then(|c| digit_value(c, base)) {
        value = value * u128::from(base) + u128::from(d);
        if value > u128::from(u64::MAX) {
            overflow = true;
            value %= u128::from(u64::MAX) + 1;
        }
        p.bump();
    }

    let kind = if p.peek() == Some('.') {
        // Fractional part, interpreted positionally in the literal's base.
        p.bump();
        let mut fvalue = value as f64;
        let mut exp = 1i32;
        while let Some(d) = p.peek().and_then(|c| digit_value(c, base)) {
            fvalue += d as f64 * f64::from(base).powi(-exp);
            exp += 1;
            p.bump();
        }
        TokenKind::Float(fvalue)
    } else {
        if overflow {
            return Err("Integer literal is too large".to_string());
        }
        TokenKind::Int(value as u64 as i64)
    };

    if p.peek().is_some_and(is_alphanumeric) {
        return Err("Invalid numerical literal".to_string());
    }

    Ok(Token {
        text: p.chars[start..p.index].iter().collect(),
        kind,
        pos: SourcePos::default(),
    })
}

fn consume_string(p: &mut Cursor) -> Result<Token, String> {
    let quote = p.bump().ok_or("Missing closing quote")?;

    let start = p.index;
    let mut value = String::new();
    loop {
        let Some(c) = p.peek() else {
            return Err("Missing closing quote".to_string());
        };
        if c == quote {
            break;
        }
        p.bump();
        if c == '\\' {
            let Some(esc) = p.bump() else {
                return Err("Missing closing quote".to_string());
            };
            if esc == 'x' {
                let d1 = p.bump().and_then(|c| c.to_digit(16));
                let d2 = p.bump().and_then(|c| c.to_digit(16));
                match (d1, d2) {
                    (Some(hi), Some(lo)) => value.push(char::from((hi << 4 | lo) as u8)),
                    _ => return Err("Invalid hex escape sequence".to_string()),
                }
            } else {
                value.push(match esc {
                    '0' => '\0',
                    'n' => '\n',
                    'r' => '\r',
                    't' => '\t',
                    'v' => '\x0b',
                    'b' => '\x08',
                    'f' => '\x0c',
                    '"' => '"',
                    '\'' => '\'',
                    '\\' => '\\',
                    _ => return Err("Invalid escape sequence".to_string()),
                });
            }
        } else {
            value.push(c);
        }
    }
    // Skip the closing quote.
    p.bump();

    let raw: String = p.chars[start..p.index - 1].iter().collect();
    Ok(Token {
        text: format!("{quote}{raw}{quote}"),
        kind: TokenKind::Str(value),
        pos: SourcePos::default(),
    })
}

/// Greedily matches the longest prefix that starts some known symbol.
fn consume_symbol(p: &mut Cursor) -> Result<Token, String> {
    let mut text = String::new();
    while let Some(c) = p.peek() {
        let mut candidate = text.clone();
        candidate.push(c);
        if !is_possible_symbol_prefix(&candidate) {
            break;
        }
        text = candidate;
        p.bump();
    }
    if SYMBOLS.contains(&text.as_str()) {
        Ok(Token {
            text,
            kind: TokenKind::Symbol,
            pos: SourcePos::default(),
        })
    } else {
        Err(format!("Unrecognised symbol {text}"))
    }
}

fn tokenize_line(line: &str) -> Result<Vec<Token>, CodeError> {
    let mut tokens = Vec::new();
    let mut p = Cursor::new(line);
    while let Some(c) = p.peek() {
        let column = p.index;
        if is_alpha(c) {
            tokens.push(consume_word(&mut p));
        } else if c.is_ascii_digit() {
            match consume_number(&mut p) {
                Ok(t) => tokens.push(t),
                Err(message) => {
                    return Err(CodeError::new(message, SourcePos { line: 0, column }));
                }
            }
        } else if c == '\'' || c == '"' {
            match consume_string(&mut p) {
                Ok(t) => tokens.push(t),
                Err(message) => {
                    return Err(CodeError::new(message, SourcePos { line: 0, column }));
                }
            }
        } else if c == ' ' || c == '\t' {
            p.bump();
            continue;
        } else if is_possible_symbol_prefix(&c.to_string()) {
            match consume_symbol(&mut p) {
                Ok(t) => tokens.push(t),
                Err(message) => {
                    return Err(CodeError::new(message, SourcePos { line: 0, column }));
                }
            }
        } else {
            return Err(CodeError::new(
                format!("Unrecognised character {c}"),
                SourcePos { line: 0, column },
            ));
        }
        if let Some(t) = tokens.last_mut() {
            t.pos.column = column;
        }
    }
    Ok(tokens)
}

/// Net bracket balance of a token run: `( [ {` count +1, `) ] }` count -1.
fn bracket_balance(tokens: &[Token]) -> i64 {
    let mut balance = 0;
    for t in tokens {
        match t.text.as_str() {
            "(" | "[" | "{" => balance += 1,
            ")" | "]" | "}" => balance -= 1,
            _ => {}
        }
    }
    balance
}

pub(crate) fn lex(code: &str) -> LexOutput {
    let code = normalize_line_endings(code);
    let lines: Vec<String> = code.split('\n').map(str::to_string).collect();

    let mut error = None;
    let mut indent_unit: Option<String> = None;
    let mut bracket_depth: i64 = 0;

    let mut root = LexTree::default();
    // Path of child indices from the root to the current parent block.
    let mut parents: Vec<usize> = Vec::new();

    'lines: for (line_no, raw_line) in lines.iter().enumerate() {
        let line = strip_comment(raw_line);
        if is_blank(line) {
            continue;
        }

        let mut tokens = match tokenize_line(line) {
            Ok(tokens) => tokens,
            Err(mut e) => {
                e.pos.line = line_no;
                error = Some(e);
                break;
            }
        };
        for t in &mut tokens {
            t.pos.line = line_no;
        }

        let continue_prev_line = bracket_depth > 0;
        bracket_depth = (bracket_depth + bracket_balance(&tokens)).max(0);
        if continue_prev_line {
            // Indentation is meaningless inside brackets; extend the
            // previous logical statement.
            let parent = resolve_mut(&mut root, &parents);
            if let Some(prev) = parent.children.last_mut() {
                prev.tokens.append(&mut tokens);
            }
            continue;
        }

        let parent_indent = parents.len();
        let current_indent = match indent_of(line, &mut indent_unit) {
            Ok(n) => n,
            Err(()) => {
                error = Some(CodeError::new(
                    "Invalid indentation",
                    SourcePos { line: line_no, column: 0 },
                ));
                break;
            }
        };

        if current_indent > parent_indent + 1 {
            error = Some(CodeError::new(
                "Indentation level increased by more than 1",
                SourcePos { line: line_no, column: 0 },
            ));
            break;
        } else if current_indent == parent_indent + 1 {
            // Make the last statement of the current block the new parent.
            let parent = resolve_mut(&mut root, &parents);
            if parent.children.is_empty() {
                error = Some(CodeError::new(
                    "Indentation not expected",
                    SourcePos { line: line_no, column: 0 },
                ));
                break 'lines;
            }
            parents.push(parent.children.len() - 1);
        } else if current_indent < parent_indent {
            parents.truncate(current_indent);
        }

        let parent = resolve_mut(&mut root, &parents);
        parent.children.push(LexTree {
            tokens,
            children: Vec::new(),
        });
    }

    LexOutput { lines, root, error }
}

fn resolve_mut<'a>(root: &'a mut LexTree, path: &[usize]) -> &'a mut LexTree {
    let mut node = root;
    for &i in path {
        node = &mut node.children[i];
    }
    node
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex_ok(code: &str) -> LexOutput {
        let out = lex(code);
        assert!(out.error.is_none(), "unexpected lex error: {:?}", out.error);
        out
    }

    #[test]
    fn preserves_original_source_lines() {
        let code = "x = 1\n  # comment\ny = [\n  2,\n]";
        let out = lex_ok(code);
        assert_eq!(out.lines.join("\n"), code);
    }

    #[test]
    fn normalizes_line_endings() {
        let out = lex_ok("a = 1\r\nb = 2\rc = 3\n");
        assert_eq!(out.lines.len(), 4);
        assert_eq!(out.root.children.len(), 3);
    }

    #[test]
    fn splits_statements_and_blocks() {
        let out = lex_ok("if x:\n    y = 1\n    z = 2\nw = 3");
        assert_eq!(out.root.children.len(), 2);
        assert_eq!(out.root.children[0].children.len(), 2);
    }

    #[test]
    fn bracket_continuation_joins_lines() {
        let out = lex_ok("a = [1,\n     2,\n     3]\nb = 4");
        assert_eq!(out.root.children.len(), 2);
        let first = &out.root.children[0];
        assert!(first.tokens.iter().any(|t| t.text == "3"));
    }

    #[test]
    fn numeric_bases_and_fractions() {
        let out = lex_ok("0x10 0b101 0o17 2.5 0x1.8");
        let toks = &out.root.children[0].tokens;
        assert_eq!(toks[0].kind, TokenKind::Int(16));
        assert_eq!(toks[1].kind, TokenKind::Int(5));
        assert_eq!(toks[2].kind, TokenKind::Int(15));
        assert_eq!(toks[3].kind, TokenKind::Float(2.5));
        assert_eq!(toks[4].kind, TokenKind::Float(1.5));
    }

    #[test]
    fn integer_literal_overflow_is_diagnosed() {
        let out = lex("x = 99999999999999999999999999");
        let err = out.error.expect("overflow should be reported");
        assert!(err.message.contains("too large"));
    }

    #[test]
    fn max_u64_literal_fits() {
        let out = lex_ok("18446744073709551615");
        let toks = &out.root.children[0].tokens;
        assert_eq!(toks[0].kind, TokenKind::Int(u64::MAX as i64));
    }

    #[test]
    fn string_escapes() {
        let out = lex_ok(r#"s = 'a\n\t\x41\\'"#);
        let toks = &out.root.children[0].tokens;
        assert_eq!(toks[2].kind, TokenKind::Str("a\n\tA\\".to_string()));
    }

    #[test]
    fn unterminated_string_is_diagnosed() {
        let out = lex("s = 'abc");
        assert!(out.error.is_some());
    }

    #[test]
    fn invalid_escape_is_diagnosed() {
        let out = lex(r"s = '\q'");
        let err = out.error.expect("invalid escape should be reported");
        assert!(err.message.contains("escape"));
    }

    #[test]
    fn indent_must_be_consistent() {
        let out = lex("if x:\n    a = 1\n  b = 2");
        assert!(out.error.is_some());
    }

    #[test]
    fn over_indent_is_diagnosed() {
        let out = lex("if x:\n        a = 1");
        // Depends on the first indented line fixing the unit: a single jump
        // of one level is fine, so force a two-level jump.
        assert!(out.error.is_none());
        let out = lex("a = 1\nif x:\n  b = 1\nif y:\n    c = 1");
        let err = out.error.expect("two-level jump should be reported");
        assert!(err.message.contains("more than 1"));
    }

    #[test]
    fn dedent_pops_multiple_levels() {
        let out = lex_ok("if a:\n  if b:\n    c = 1\nd = 2");
        assert_eq!(out.root.children.len(), 2);
    }

    #[test]
    fn blank_lines_carry_no_indentation() {
        let out = lex_ok("if a:\n  b = 1\n\n  c = 2");
        assert_eq!(out.root.children[0].children.len(), 2);
    }
}
