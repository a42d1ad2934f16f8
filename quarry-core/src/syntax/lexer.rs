//! Indentation-aware tokenizer for the snippet language.
//!
//! Produces `Newline`, `Indent` and `Dedent` tokens the way an interactive
//! notebook cell is read: newlines inside brackets are ignored, blank and
//! comment-only lines never change the indentation level.

use crate::error::CoreError;

use super::token::{Keyword, Punct, RawFStringPart, Token, TokenKind};

/// Upper bound on nested indentation levels accepted by the lexer.
const MAX_INDENT_DEPTH: usize = 64;

/// Tokenize `source` into a flat token stream terminated by [`TokenKind::Eof`].
///
/// # Errors
/// Returns [`CoreError::Syntax`] for malformed literals, stray characters and
/// inconsistent indentation.
pub fn tokenize(source: &str) -> Result<Vec<Token>, CoreError> {
    Lexer::new(source).run()
}

struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    column: usize,
    indents: Vec<usize>,
    bracket_depth: usize,
    at_line_start: bool,
    tokens: Vec<Token>,
}

impl Lexer {
    fn new(source: &str) -> Self {
        Self {
            chars: source.chars().collect(),
            pos: 0,
            line: 1,
            column: 1,
            indents: vec![0],
            bracket_depth: 0,
            at_line_start: true,
            tokens: Vec::new(),
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.chars.get(self.pos).copied()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn error(&self, message: impl Into<String>) -> CoreError {
        CoreError::syntax(self.line, self.column, message)
    }

    fn push(&mut self, kind: TokenKind, line: usize, column: usize) {
        self.tokens.push(Token { kind, line, column });
    }

    fn last_is_newline(&self) -> bool {
        matches!(
            self.tokens.last().map(|t| &t.kind),
            None | Some(TokenKind::Newline | TokenKind::Indent | TokenKind::Dedent)
        )
    }

    fn run(mut self) -> Result<Vec<Token>, CoreError> {
        loop {
            if self.at_line_start && self.bracket_depth == 0 {
                if !self.handle_indentation()? {
                    break;
                }
                continue;
            }

            let Some(c) = self.peek() else { break };
            match c {
                ' ' | '\t' | '\r' | '\x0c' => {
                    self.bump();
                }
                '#' => self.skip_comment(),
                '\n' => {
                    let (line, column) = (self.line, self.column);
                    self.bump();
                    if self.bracket_depth == 0 {
                        if !self.last_is_newline() {
                            self.push(TokenKind::Newline, line, column);
                        }
                        self.at_line_start = true;
                    }
                }
                '\\' => {
                    self.bump();
                    if self.peek() == Some('\r') {
                        self.bump();
                    }
                    if self.bump() != Some('\n') {
                        return Err(self.error("unexpected character after line continuation"));
                    }
                }
                '0'..='9' => self.lex_number()?,
                '.' if self.peek_at(1).is_some_and(|n| n.is_ascii_digit()) => self.lex_number()?,
                '"' | '\'' => {
                    let (line, column) = (self.line, self.column);
                    let kind = self.lex_string(StringPrefix::default())?;
                    self.push(kind, line, column);
                }
                c if c == '_' || c.is_alphabetic() => self.lex_word()?,
                _ => self.lex_punct()?,
            }
        }

        let (line, column) = (self.line, self.column);
        if !self.last_is_newline() {
            self.push(TokenKind::Newline, line, column);
        }
        while self.indents.len() > 1 {
            self.indents.pop();
            self.push(TokenKind::Dedent, line, column);
        }
        self.push(TokenKind::Eof, line, column);
        Ok(self.tokens)
    }

    /// Measure the indentation of a new logical line. Returns `false` at end of input.
    fn handle_indentation(&mut self) -> Result<bool, CoreError> {
        let mut width = 0usize;
        while let Some(c) = self.peek() {
            match c {
                ' ' => width += 1,
                '\t' => width = (width / 8 + 1) * 8,
                '\x0c' => width = 0,
                _ => break,
            }
            self.bump();
        }

        match self.peek() {
            None => return Ok(false),
            Some('#') => {
                self.skip_comment();
                return Ok(true);
            }
            Some('\r' | '\n') => {
                if self.peek() == Some('\r') {
                    self.bump();
                }
                if self.peek() == Some('\n') {
                    self.bump();
                }
                return Ok(true);
            }
            Some(_) => {}
        }

        let current = self.indents.last().copied().unwrap_or(0);
        let (line, column) = (self.line, self.column);
        if width > current {
            if self.indents.len() >= MAX_INDENT_DEPTH {
                return Err(self.error("too many levels of indentation"));
            }
            self.indents.push(width);
            self.push(TokenKind::Indent, line, column);
        } else {
            while width < self.indents.last().copied().unwrap_or(0) {
                self.indents.pop();
                self.push(TokenKind::Dedent, line, column);
            }
            if width != self.indents.last().copied().unwrap_or(0) {
                return Err(self.error("unindent does not match any outer indentation level"));
            }
        }
        self.at_line_start = false;
        Ok(true)
    }

    fn skip_comment(&mut self) {
        while let Some(c) = self.peek() {
            if c == '\n' {
                break;
            }
            self.bump();
        }
    }

    fn lex_word(&mut self) -> Result<(), CoreError> {
        let (line, column) = (self.line, self.column);
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c == '_' || c.is_alphanumeric() {
                self.bump();
            } else {
                break;
            }
        }
        let word: String = self.chars[start..self.pos].iter().collect();

        if matches!(self.peek(), Some('"' | '\'')) {
            if let Some(prefix) = StringPrefix::parse(&word) {
                if prefix.bytes {
                    return Err(CoreError::syntax(line, column, "bytes literals are not supported"));
                }
                let kind = self.lex_string(prefix)?;
                self.push(kind, line, column);
                return Ok(());
            }
        }

        let kind = match Keyword::from_word(&word) {
            Some(kw) => TokenKind::Keyword(kw),
            None => TokenKind::Name(word),
        };
        self.push(kind, line, column);
        Ok(())
    }

    fn lex_number(&mut self) -> Result<(), CoreError> {
        let (line, column) = (self.line, self.column);

        if self.peek() == Some('0') && matches!(self.peek_at(1), Some('x' | 'X')) {
            self.bump();
            self.bump();
            let mut digits = String::new();
            while let Some(c) = self.peek() {
                if c.is_ascii_hexdigit() {
                    digits.push(c);
                } else if c != '_' {
                    break;
                }
                self.bump();
            }
            let value = i64::from_str_radix(&digits, 16)
                .map_err(|_| CoreError::syntax(line, column, "invalid hexadecimal literal"))?;
            self.push(TokenKind::Int(value), line, column);
            return Ok(());
        }

        let mut text = String::new();
        let mut is_float = false;
        self.take_digits(&mut text);
        if self.peek() == Some('.') && !self.peek_at(1).is_some_and(|c| c == '_' || c.is_alphabetic()) {
            is_float = true;
            text.push('.');
            self.bump();
            self.take_digits(&mut text);
        }
        if matches!(self.peek(), Some('e' | 'E')) {
            let sign_offset = usize::from(matches!(self.peek_at(1), Some('+' | '-')));
            if self.peek_at(1 + sign_offset).is_some_and(|c| c.is_ascii_digit()) {
                is_float = true;
                text.push('e');
                self.bump();
                if sign_offset == 1 {
                    if let Some(sign) = self.bump() {
                        text.push(sign);
                    }
                }
                self.take_digits(&mut text);
            }
        }
        if self.peek().is_some_and(|c| c == '_' || c.is_alphabetic()) {
            return Err(self.error("invalid numeric literal"));
        }

        let kind = if is_float {
            let value: f64 = text
                .parse()
                .map_err(|_| CoreError::syntax(line, column, "invalid float literal"))?;
            TokenKind::Float(value)
        } else {
            let value: i64 = text
                .parse()
                .map_err(|_| CoreError::syntax(line, column, "integer literal too large"))?;
            TokenKind::Int(value)
        };
        self.push(kind, line, column);
        Ok(())
    }

    fn take_digits(&mut self, out: &mut String) {
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                out.push(c);
            } else if c != '_' {
                break;
            }
            self.bump();
        }
    }

    fn lex_string(&mut self, prefix: StringPrefix) -> Result<TokenKind, CoreError> {
        let (line, column) = (self.line, self.column);
        let Some(quote) = self.bump() else {
            return Err(self.error("expected string literal"));
        };
        let triple = self.peek() == Some(quote) && self.peek_at(1) == Some(quote);
        if triple {
            self.bump();
            self.bump();
        }

        let mut body = Vec::new();
        loop {
            let Some(c) = self.bump() else {
                return Err(CoreError::syntax(line, column, "unterminated string literal"));
            };
            if c == '\\' {
                let Some(next) = self.bump() else {
                    return Err(CoreError::syntax(line, column, "unterminated string literal"));
                };
                body.push(c);
                body.push(next);
                continue;
            }
            if c == quote {
                if !triple {
                    break;
                }
                if self.peek() == Some(quote) && self.peek_at(1) == Some(quote) {
                    self.bump();
                    self.bump();
                    break;
                }
            }
            if c == '\n' && !triple {
                return Err(CoreError::syntax(line, column, "unterminated string literal"));
            }
            body.push(c);
        }

        if prefix.format {
            let parts = split_fstring(&body, prefix.raw)
                .map_err(|message| CoreError::syntax(line, column, message))?;
            Ok(TokenKind::FString(parts))
        } else if prefix.raw {
            Ok(TokenKind::Str(body.into_iter().collect()))
        } else {
            let text = unescape(&body).map_err(|message| CoreError::syntax(line, column, message))?;
            Ok(TokenKind::Str(text))
        }
    }

    fn lex_punct(&mut self) -> Result<(), CoreError> {
        const THREE: &[(&str, Punct)] = &[("//=", Punct::DoubleSlashEq)];
        const TWO: &[(&str, Punct)] = &[
            ("**", Punct::DoubleStar),
            ("//", Punct::DoubleSlash),
            ("->", Punct::Arrow),
            ("<=", Punct::Le),
            (">=", Punct::Ge),
            ("==", Punct::EqEq),
            ("!=", Punct::NotEq),
            ("+=", Punct::PlusEq),
            ("-=", Punct::MinusEq),
            ("*=", Punct::StarEq),
            ("/=", Punct::SlashEq),
            ("%=", Punct::PercentEq),
        ];

        let (line, column) = (self.line, self.column);
        let ahead: String = self.chars[self.pos..].iter().take(3).collect();

        for (table, len) in [(THREE, 3usize), (TWO, 2usize)] {
            if let Some((_, punct)) = table.iter().find(|(text, _)| ahead.starts_with(text)) {
                for _ in 0..len {
                    self.bump();
                }
                self.push(TokenKind::Punct(*punct), line, column);
                return Ok(());
            }
        }

        let Some(c) = self.peek() else {
            return Err(self.error("unexpected end of input"));
        };
        let punct = match c {
            '(' => Punct::LParen,
            ')' => Punct::RParen,
            '[' => Punct::LBracket,
            ']' => Punct::RBracket,
            '{' => Punct::LBrace,
            '}' => Punct::RBrace,
            ',' => Punct::Comma,
            ':' => Punct::Colon,
            '.' => Punct::Dot,
            ';' => Punct::Semicolon,
            '=' => Punct::Assign,
            '+' => Punct::Plus,
            '-' => Punct::Minus,
            '*' => Punct::Star,
            '/' => Punct::Slash,
            '%' => Punct::Percent,
            '&' => Punct::Amp,
            '|' => Punct::Pipe,
            '^' => Punct::Caret,
            '~' => Punct::Tilde,
            '<' => Punct::Lt,
            '>' => Punct::Gt,
            '@' => Punct::At,
            other => return Err(self.error(format!("unexpected character {other:?}"))),
        };
        match punct {
            Punct::LParen | Punct::LBracket | Punct::LBrace => self.bracket_depth += 1,
            Punct::RParen | Punct::RBracket | Punct::RBrace => {
                self.bracket_depth = self.bracket_depth.saturating_sub(1);
            }
            _ => {}
        }
        self.bump();
        self.push(TokenKind::Punct(punct), line, column);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct StringPrefix {
    raw: bool,
    format: bool,
    bytes: bool,
}

impl StringPrefix {
    fn parse(word: &str) -> Option<Self> {
        if word.len() > 2 {
            return None;
        }
        let mut prefix = Self::default();
        for c in word.chars() {
            match c.to_ascii_lowercase() {
                'r' if !prefix.raw => prefix.raw = true,
                'f' if !prefix.format => prefix.format = true,
                'b' if !prefix.bytes => prefix.bytes = true,
                'u' if word.len() == 1 => {}
                _ => return None,
            }
        }
        Some(prefix)
    }
}

/// Resolve backslash escapes in a non-raw string body.
fn unescape(body: &[char]) -> Result<String, String> {
    let mut out = String::with_capacity(body.len());
    let mut iter = body.iter().copied().peekable();
    while let Some(c) = iter.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        let Some(next) = iter.next() else {
            out.push('\\');
            break;
        };
        match next {
            'n' => out.push('\n'),
            't' => out.push('\t'),
            'r' => out.push('\r'),
            '0' => out.push('\0'),
            '\\' => out.push('\\'),
            '\'' => out.push('\''),
            '"' => out.push('"'),
            '\n' => {}
            'x' | 'u' => {
                let width = if next == 'x' { 2 } else { 4 };
                let digits: String = (0..width).filter_map(|_| iter.next()).collect();
                let code = u32::from_str_radix(&digits, 16)
                    .ok()
                    .filter(|_| digits.len() == width)
                    .and_then(char::from_u32)
                    .ok_or_else(|| format!("invalid \\{next} escape"))?;
                out.push(code);
            }
            other => {
                out.push('\\');
                out.push(other);
            }
        }
    }
    Ok(out)
}

/// Split an f-string body into literal text and `{field[:spec]}` segments.
fn split_fstring(body: &[char], raw: bool) -> Result<Vec<RawFStringPart>, String> {
    let mut parts = Vec::new();
    let mut text: Vec<char> = Vec::new();
    let mut i = 0;

    let flush = |text: &mut Vec<char>, parts: &mut Vec<RawFStringPart>| -> Result<(), String> {
        if !text.is_empty() {
            let literal = if raw { text.iter().collect() } else { unescape(text)? };
            parts.push(RawFStringPart::Text(literal));
            text.clear();
        }
        Ok(())
    };

    while i < body.len() {
        let c = body[i];
        match c {
            '{' if body.get(i + 1) == Some(&'{') => {
                text.push('{');
                i += 2;
            }
            '}' if body.get(i + 1) == Some(&'}') => {
                text.push('}');
                i += 2;
            }
            '}' => return Err("single '}' is not allowed in f-string".to_owned()),
            '{' => {
                flush(&mut text, &mut parts)?;
                let (source, spec, next) = read_fstring_field(body, i + 1)?;
                if source.trim().is_empty() {
                    return Err("f-string: empty expression not allowed".to_owned());
                }
                parts.push(RawFStringPart::Field { source, spec });
                i = next;
            }
            _ => {
                text.push(c);
                i += 1;
            }
        }
    }
    flush(&mut text, &mut parts)?;
    Ok(parts)
}

/// Read a replacement field starting just after `{`. Returns the expression
/// source, the optional format spec, and the index after the closing `}`.
fn read_fstring_field(body: &[char], start: usize) -> Result<(String, Option<String>, usize), String> {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut i = start;
    let mut expr_end = None;

    while i < body.len() {
        let c = body[i];
        if let Some(q) = quote {
            if c == q {
                quote = None;
            }
            i += 1;
            continue;
        }
        match c {
            '\'' | '"' => quote = Some(c),
            '(' | '[' | '{' => depth += 1,
            ')' | ']' => depth = depth.saturating_sub(1),
            '}' if depth > 0 => depth -= 1,
            '}' => {
                let end = expr_end.unwrap_or(i);
                let source: String = body[start..end].iter().collect();
                let spec = expr_end.map(|e| body[e + 1..i].iter().collect::<String>());
                return Ok((strip_conversion(&source), spec, i + 1));
            }
            ':' if depth == 0 && expr_end.is_none() => expr_end = Some(i),
            _ => {}
        }
        i += 1;
    }
    Err("f-string: expecting '}'".to_owned())
}

/// Drop a trailing `!r` / `!s` / `!a` conversion; values are always rendered with `str`.
fn strip_conversion(source: &str) -> String {
    for suffix in ["!r", "!s", "!a"] {
        if let Some(stripped) = source.trim_end().strip_suffix(suffix) {
            return stripped.to_owned();
        }
    }
    source.to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        match tokenize(source) {
            Ok(tokens) => tokens.into_iter().map(|t| t.kind).collect(),
            Err(e) => panic!("tokenize failed: {e}"),
        }
    }

    #[test]
    fn simple_assignment_tokens() {
        assert_eq!(
            kinds("x = 1\n"),
            vec![
                TokenKind::Name("x".to_owned()),
                TokenKind::Punct(Punct::Assign),
                TokenKind::Int(1),
                TokenKind::Newline,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn indentation_produces_indent_and_dedent() {
        let toks = kinds("if x:\n    y\nz");
        assert!(toks.contains(&TokenKind::Indent));
        assert!(toks.contains(&TokenKind::Dedent));
    }

    #[test]
    fn newlines_inside_brackets_are_ignored() {
        let toks = kinds("f(1,\n  2)\n");
        let newlines = toks.iter().filter(|t| **t == TokenKind::Newline).count();
        assert_eq!(newlines, 1, "only the closing line ends the statement");
    }

    #[test]
    fn blank_and_comment_lines_do_not_indent() {
        let toks = kinds("a = 1\n\n    # comment\nb = 2\n");
        assert!(!toks.contains(&TokenKind::Indent));
    }

    #[test]
    fn string_escapes_are_resolved() {
        assert_eq!(kinds(r#""a\tb\n""#)[0], TokenKind::Str("a\tb\n".to_owned()));
        assert_eq!(kinds(r#"r"a\tb""#)[0], TokenKind::Str("a\\tb".to_owned()));
        assert_eq!(kinds("'''x\ny'''")[0], TokenKind::Str("x\ny".to_owned()));
    }

    #[test]
    fn fstring_fields_are_split() {
        let toks = kinds(r#"f"total={t:.2f} {{x}}""#);
        assert_eq!(
            toks[0],
            TokenKind::FString(vec![
                RawFStringPart::Text("total=".to_owned()),
                RawFStringPart::Field {
                    source: "t".to_owned(),
                    spec: Some(".2f".to_owned())
                },
                RawFStringPart::Text(" {x}".to_owned()),
            ])
        );
    }

    #[test]
    fn numbers_parse_as_int_or_float() {
        assert_eq!(kinds("1_000")[0], TokenKind::Int(1000));
        assert_eq!(kinds("2.5")[0], TokenKind::Float(2.5));
        assert_eq!(kinds("1e3")[0], TokenKind::Float(1000.0));
        assert_eq!(kinds("0xff")[0], TokenKind::Int(255));
    }

    #[test]
    fn oversized_integer_is_a_syntax_error() {
        assert!(tokenize("99999999999999999999999").is_err());
    }

    #[test]
    fn unterminated_string_is_a_syntax_error() {
        assert!(tokenize("'abc").is_err());
        assert!(tokenize("\"abc\ndef\"").is_err());
    }

    #[test]
    fn inconsistent_dedent_is_rejected() {
        assert!(tokenize("if x:\n    a\n  b\n").is_err());
    }

    #[test]
    fn bytes_literals_are_rejected() {
        assert!(tokenize("b'abc'").is_err());
    }
}
