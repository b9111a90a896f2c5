//! JavaScript tokenizer.
//!
//! Produces just enough structure to find module syntax: identifiers,
//! punctuation, and opaque string, template, regex and number literals.
//! Comments and whitespace are skipped, but every token remembers whether a
//! line break preceded it so callers can reason about statement boundaries.

use std::fmt;

/// Token category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// Identifier or keyword (including `#private` names)
    Ident,
    /// Operator or delimiter
    Punct,
    /// Single- or double-quoted string literal
    Str,
    /// Template literal, including any `${}` substitutions
    Template,
    /// Regular expression literal
    Regex,
    /// Numeric literal
    Number,
}

/// A token with its byte range in the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub start: usize,
    pub end: usize,
    /// A line terminator appeared between the previous token and this one.
    pub newline_before: bool,
}

impl Token {
    /// The token's source text.
    pub fn text<'a>(&self, source: &'a str) -> &'a str {
        &source[self.start..self.end]
    }

    /// Whether this token is the given punctuator.
    pub fn is_punct(&self, source: &str, punct: &str) -> bool {
        self.kind == TokenKind::Punct && self.text(source) == punct
    }

    /// Whether this token is the given identifier or keyword.
    pub fn is_ident(&self, source: &str, ident: &str) -> bool {
        self.kind == TokenKind::Ident && self.text(source) == ident
    }
}

/// Tokenizer failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{line}:{column}: {kind}")]
pub struct LexError {
    pub kind: LexErrorKind,
    pub line: usize,
    pub column: usize,
}

/// What went wrong while tokenizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LexErrorKind {
    UnterminatedString,
    UnterminatedTemplate,
    UnterminatedComment,
    UnterminatedRegex,
}

impl fmt::Display for LexErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            LexErrorKind::UnterminatedString => "unterminated string literal",
            LexErrorKind::UnterminatedTemplate => "unterminated template literal",
            LexErrorKind::UnterminatedComment => "unterminated block comment",
            LexErrorKind::UnterminatedRegex => "unterminated regular expression",
        };
        f.write_str(msg)
    }
}

/// Keywords after which a `/` starts a regular expression.
const REGEX_PREFIX_KEYWORDS: &[&str] = &[
    "return", "typeof", "instanceof", "in", "of", "new", "delete", "void", "throw", "case", "do",
    "else", "yield", "await",
];

/// Tokenize JavaScript source.
pub fn tokenize(source: &str) -> Result<Vec<Token>, LexError> {
    let mut lexer = Lexer { src: source.as_bytes(), pos: 0, tokens: Vec::new() };
    lexer.skip_hashbang();
    while let Some(token) = lexer.next_token()? {
        lexer.tokens.push(token);
    }
    Ok(lexer.tokens)
}

/// Decode the value of a string literal token's text (quotes included).
///
/// Handles the common escapes; specifiers rarely contain anything else.
pub fn string_value(literal: &str) -> String {
    let inner = literal.get(1..literal.len().saturating_sub(1)).unwrap_or("");
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('0') => out.push('\0'),
            Some('x') => {
                let hex: String = chars.by_ref().take(2).collect();
                if let Some(c) = u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32) {
                    out.push(c);
                }
            }
            Some('u') => {
                let rest = chars.as_str();
                let (hex, consumed) = if let Some(braced) = rest.strip_prefix('{') {
                    let end = braced.find('}').unwrap_or(braced.len());
                    (&braced[..end], end + 2)
                } else {
                    (rest.get(..4).unwrap_or(rest), 4)
                };
                if let Some(c) = u32::from_str_radix(hex, 16).ok().and_then(char::from_u32) {
                    out.push(c);
                }
                chars = rest.get(consumed.min(rest.len())..).unwrap_or("").chars();
            }
            Some('\n') | None => {}
            Some(other) => out.push(other),
        }
    }
    out
}

/// Convert a byte offset into a 1-based line and column.
pub fn line_column(source: &str, offset: usize) -> (usize, usize) {
    let before = &source.as_bytes()[..offset.min(source.len())];
    let line = before.iter().filter(|&&b| b == b'\n').count() + 1;
    let line_start = before.iter().rposition(|&b| b == b'\n').map_or(0, |p| p + 1);
    (line, offset.min(source.len()) - line_start + 1)
}

struct Lexer<'a> {
    src: &'a [u8],
    pos: usize,
    tokens: Vec<Token>,
}

fn is_ident_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_' || b == b'$' || b == b'#' || b >= 0x80
}

fn is_ident_part(b: u8) -> bool {
    is_ident_start(b) || b.is_ascii_digit() || b == b'\\'
}

impl<'a> Lexer<'a> {
    fn peek(&self, offset: usize) -> Option<u8> {
        self.src.get(self.pos + offset).copied()
    }

    fn error(&self, kind: LexErrorKind, at: usize) -> LexError {
        // The source is valid UTF-8 and `at` always sits on an ASCII byte.
        let text = std::str::from_utf8(self.src).unwrap_or("");
        let (line, column) = line_column(text, at);
        LexError { kind, line, column }
    }

    fn skip_hashbang(&mut self) {
        if self.src.starts_with(b"#!") {
            while let Some(b) = self.peek(0) {
                if b == b'\n' {
                    break;
                }
                self.pos += 1;
            }
        }
    }

    /// Skip whitespace and comments; report whether a line break was crossed.
    fn skip_trivia(&mut self) -> Result<bool, LexError> {
        let mut newline = false;
        while let Some(b) = self.peek(0) {
            match b {
                b'\n' | b'\r' => {
                    newline = true;
                    self.pos += 1;
                }
                b' ' | b'\t' | 0x0b | 0x0c => self.pos += 1,
                b'/' if self.peek(1) == Some(b'/') => self.skip_line(),
                b'/' if self.peek(1) == Some(b'*') => {
                    let start = self.pos;
                    self.pos += 2;
                    loop {
                        match self.peek(0) {
                            None => return Err(self.error(LexErrorKind::UnterminatedComment, start)),
                            Some(b'*') if self.peek(1) == Some(b'/') => {
                                self.pos += 2;
                                break;
                            }
                            Some(b'\n') => {
                                newline = true;
                                self.pos += 1;
                            }
                            Some(_) => self.pos += 1,
                        }
                    }
                }
                b'<' if self.src[self.pos..].starts_with(b"<!--") => self.skip_line(),
                0xC2 if self.peek(1) == Some(0xA0) => self.pos += 2,
                0xE2 if self.peek(1) == Some(0x80) && matches!(self.peek(2), Some(0xA8 | 0xA9)) => {
                    newline = true;
                    self.pos += 3;
                }
                0xEF if self.peek(1) == Some(0xBB) && self.peek(2) == Some(0xBF) => self.pos += 3,
                _ => break,
            }
        }
        Ok(newline)
    }

    fn skip_line(&mut self) {
        while let Some(b) = self.peek(0) {
            if b == b'\n' {
                break;
            }
            self.pos += 1;
        }
    }

    fn regex_allowed(&self) -> bool {
        let Some(prev) = self.tokens.last() else {
            return true;
        };
        let text = &self.src[prev.start..prev.end];
        match prev.kind {
            TokenKind::Punct => !matches!(text, b")" | b"]" | b"}" | b"++" | b"--"),
            TokenKind::Ident => REGEX_PREFIX_KEYWORDS.iter().any(|k| k.as_bytes() == text),
            _ => false,
        }
    }

    fn next_token(&mut self) -> Result<Option<Token>, LexError> {
        let newline_before = self.skip_trivia()?;
        let Some(b) = self.peek(0) else {
            return Ok(None);
        };
        let start = self.pos;
        let kind = match b {
            b'"' | b'\'' => {
                self.scan_string(b)?;
                TokenKind::Str
            }
            b'`' => {
                self.scan_template()?;
                TokenKind::Template
            }
            b'0'..=b'9' => {
                self.scan_number();
                TokenKind::Number
            }
            b'.' if matches!(self.peek(1), Some(b'0'..=b'9')) => {
                self.scan_number();
                TokenKind::Number
            }
            b'/' if self.regex_allowed() => {
                self.scan_regex()?;
                TokenKind::Regex
            }
            b if is_ident_start(b) => {
                self.pos += 1;
                while self.peek(0).is_some_and(is_ident_part) {
                    self.pos += 1;
                }
                TokenKind::Ident
            }
            _ => {
                self.scan_punct();
                TokenKind::Punct
            }
        };
        Ok(Some(Token { kind, start, end: self.pos, newline_before }))
    }

    fn scan_string(&mut self, quote: u8) -> Result<(), LexError> {
        let start = self.pos;
        self.pos += 1;
        loop {
            match self.peek(0) {
                None | Some(b'\n') => {
                    return Err(self.error(LexErrorKind::UnterminatedString, start));
                }
                Some(b'\\') => self.pos += 2,
                Some(b) if b == quote => {
                    self.pos += 1;
                    return Ok(());
                }
                Some(_) => self.pos += 1,
            }
        }
    }

    fn scan_template(&mut self) -> Result<(), LexError> {
        let start = self.pos;
        self.pos += 1;
        loop {
            match self.peek(0) {
                None => return Err(self.error(LexErrorKind::UnterminatedTemplate, start)),
                Some(b'\\') => self.pos += 2,
                Some(b'`') => {
                    self.pos += 1;
                    return Ok(());
                }
                Some(b'$') if self.peek(1) == Some(b'{') => {
                    self.pos += 2;
                    self.skip_substitution(start)?;
                }
                Some(_) => self.pos += 1,
            }
        }
    }

    /// Skip a `${ ... }` body, tokenizing it so nested braces, strings and
    /// templates are balanced. The tokens themselves are discarded.
    fn skip_substitution(&mut self, template_start: usize) -> Result<(), LexError> {
        let saved = self.tokens.len();
        let mut depth = 0usize;
        loop {
            let Some(token) = self.next_token()? else {
                return Err(self.error(LexErrorKind::UnterminatedTemplate, template_start));
            };
            let text = &self.src[token.start..token.end];
            if token.kind == TokenKind::Punct {
                match text {
                    b"{" => depth += 1,
                    b"}" if depth == 0 => break,
                    b"}" => depth -= 1,
                    _ => {}
                }
            }
            self.tokens.push(token);
        }
        self.tokens.truncate(saved);
        Ok(())
    }

    fn scan_number(&mut self) {
        let hex = self.peek(0) == Some(b'0') && matches!(self.peek(1), Some(b'x' | b'X'));
        let mut prev = 0u8;
        while let Some(b) = self.peek(0) {
            let exponent_sign = !hex && matches!(b, b'+' | b'-') && matches!(prev, b'e' | b'E');
            if b.is_ascii_alphanumeric() || b == b'_' || b == b'.' || exponent_sign {
                prev = b;
                self.pos += 1;
            } else {
                break;
            }
        }
    }

    fn scan_regex(&mut self) -> Result<(), LexError> {
        let start = self.pos;
        self.pos += 1;
        let mut in_class = false;
        loop {
            match self.peek(0) {
                None | Some(b'\n') => {
                    return Err(self.error(LexErrorKind::UnterminatedRegex, start));
                }
                Some(b'\\') => self.pos += 2,
                Some(b'[') => {
                    in_class = true;
                    self.pos += 1;
                }
                Some(b']') => {
                    in_class = false;
                    self.pos += 1;
                }
                Some(b'/') if !in_class => {
                    self.pos += 1;
                    break;
                }
                Some(_) => self.pos += 1,
            }
        }
        while self.peek(0).is_some_and(is_ident_part) {
            self.pos += 1;
        }
        Ok(())
    }

    fn scan_punct(&mut self) {
        const MULTI: &[&[u8]] = &[b"...", b"=>", b"?.", b"++", b"--"];
        let rest = &self.src[self.pos..];
        if let Some(op) = MULTI.iter().find(|op| rest.starts_with(op)) {
            // `?.` followed by a digit is a conditional, not optional chaining
            let optional_digit = *op == b"?." && rest.get(2).is_some_and(u8::is_ascii_digit);
            if !optional_digit {
                self.pos += op.len();
                return;
            }
        }
        self.pos += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(src: &str) -> Vec<&str> {
        tokenize(src).unwrap().iter().map(|t| t.text(src)).collect()
    }

    #[test]
    fn test_import_statement_tokens() {
        let src = "import { a, b as c } from './util.js';";
        assert_eq!(
            texts(src),
            vec!["import", "{", "a", ",", "b", "as", "c", "}", "from", "'./util.js'", ";"]
        );
    }

    #[test]
    fn test_comments_are_skipped() {
        let src = "// import 'nope'\n/* import 'no' */ a /* x */ b";
        assert_eq!(texts(src), vec!["a", "b"]);
    }

    #[test]
    fn test_newline_before_tracks_comments() {
        let src = "a /* \n */ b\nc";
        let tokens = tokenize(src).unwrap();
        assert!(!tokens[0].newline_before);
        assert!(tokens[1].newline_before);
        assert!(tokens[2].newline_before);
    }

    #[test]
    fn test_regex_versus_division() {
        let src = "x = a / b / c; y = /import 'x'/g.test(s); z = (1) / 2";
        let tokens = tokenize(src).unwrap();
        let regexes: Vec<_> =
            tokens.iter().filter(|t| t.kind == TokenKind::Regex).map(|t| t.text(src)).collect();
        assert_eq!(regexes, vec!["/import 'x'/g"]);
    }

    #[test]
    fn test_regex_with_slash_in_class() {
        let src = "return /[/]+/.source";
        let tokens = tokenize(src).unwrap();
        assert_eq!(tokens[1].kind, TokenKind::Regex);
        assert_eq!(tokens[1].text(src), "/[/]+/");
    }

    #[test]
    fn test_template_with_nested_substitution() {
        let src = "const s = `a ${ {b: `c ${d}`}.b } e`; next";
        let t = texts(src);
        assert_eq!(t[3], "`a ${ {b: `c ${d}`}.b } e`");
        assert_eq!(t[5], "next");
    }

    #[test]
    fn test_strings_hide_keywords() {
        let src = r#"log("import x from 'y'", 'it\'s')"#;
        let tokens = tokenize(src).unwrap();
        let kinds: Vec<_> = tokens.iter().map(|t| t.kind).collect();
        assert_eq!(
            kinds,
            vec![
                TokenKind::Ident,
                TokenKind::Punct,
                TokenKind::Str,
                TokenKind::Punct,
                TokenKind::Str,
                TokenKind::Punct
            ]
        );
    }

    #[test]
    fn test_numbers_and_spread() {
        assert_eq!(texts("f(...xs, 1e-3, .5, 0x1F)"), vec![
            "f", "(", "...", "xs", ",", "1e-3", ",", ".5", ",", "0x1F", ")"
        ]);
    }

    #[test]
    fn test_hashbang_skipped() {
        assert_eq!(texts("#!/usr/bin/env node\nrun()"), vec!["run", "(", ")"]);
    }

    #[test]
    fn test_unterminated_string_reports_position() {
        let err = tokenize("a\n  'oops").unwrap_err();
        assert_eq!(err.kind, LexErrorKind::UnterminatedString);
        assert_eq!((err.line, err.column), (2, 3));
        assert_eq!(err.to_string(), "2:3: unterminated string literal");
    }

    #[test]
    fn test_unterminated_comment_and_template() {
        assert_eq!(tokenize("/* open").unwrap_err().kind, LexErrorKind::UnterminatedComment);
        assert_eq!(tokenize("`open ${a}").unwrap_err().kind, LexErrorKind::UnterminatedTemplate);
    }

    #[test]
    fn test_string_value_escapes() {
        assert_eq!(string_value(r#""./a.js""#), "./a.js");
        assert_eq!(string_value(r"'it\'s'"), "it's");
        assert_eq!(string_value(r#""\x41B\u{43}""#), "ABC");
    }
}
