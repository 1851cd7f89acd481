//! Byte-oriented scanner producing a [`Token`] stream.
//!
//! The lexer is UTF-8-agnostic: it scans raw bytes and only interprets ASCII structure (digits,
//! letters, punctuation); any other byte is treated as part of an identifier or string body. This
//! mirrors `original_source/src/lexer.c`, which indexes `const char*` directly.

use crate::token::{Token, TokenKind};

/// Scans a source buffer into [`Token`]s on demand.
///
/// Whitespace (space, tab, carriage return) and `#` line comments are skipped; line feeds are
/// emitted as explicit [`TokenKind::Newline`] tokens so statement boundaries exist at the token
/// level even though the parser treats newlines as optional separators.
pub struct Lexer<'src> {
    src: &'src str,
    bytes: &'src [u8],
    pos: usize,
    line: u32,
    col: u32,
}

impl<'src> Lexer<'src> {
    #[must_use]
    pub fn new(src: &'src str) -> Self {
        Self { src, bytes: src.as_bytes(), pos: 0, line: 1, col: 1 }
    }

    /// Scans and returns the next token, consuming it.
    pub fn next_token(&mut self) -> Token<'src> {
        self.skip_trivia();

        let start = self.pos;
        let line = self.line;
        let col = self.col;

        let Some(c) = self.peek() else {
            return Token::new(TokenKind::Eof, "", line, col);
        };

        if c == b'\n' {
            self.advance();
            return self.make(TokenKind::Newline, start, line, col);
        }
        if c.is_ascii_digit() {
            return self.number(start, line, col);
        }
        if is_ident_start(c) {
            return self.identifier(start, line, col);
        }
        if c == b'"' {
            return self.string(start, line, col);
        }

        self.advance();
        let kind = match c {
            b'+' => TokenKind::Plus,
            b'-' => {
                if self.matches(b'>') {
                    TokenKind::Arrow
                } else {
                    TokenKind::Minus
                }
            }
            b'*' => TokenKind::Star,
            b'/' => TokenKind::Slash,
            b'%' => TokenKind::Percent,
            b'=' => {
                if self.matches(b'=') {
                    TokenKind::EqEq
                } else if self.matches(b'>') {
                    TokenKind::FatArrow
                } else {
                    TokenKind::Eq
                }
            }
            b'!' => {
                if self.matches(b'=') {
                    TokenKind::NotEq
                } else {
                    return self.error_token(start, line, col);
                }
            }
            b'<' => {
                if self.matches(b'=') {
                    TokenKind::LtEq
                } else {
                    TokenKind::Lt
                }
            }
            b'>' => {
                if self.matches(b'=') {
                    TokenKind::GtEq
                } else {
                    TokenKind::Gt
                }
            }
            b'&' => TokenKind::Amp,
            b'.' => {
                if self.matches(b'.') {
                    TokenKind::DotDot
                } else {
                    TokenKind::Dot
                }
            }
            b'(' => TokenKind::LParen,
            b')' => TokenKind::RParen,
            b'{' => TokenKind::LBrace,
            b'}' => TokenKind::RBrace,
            b'[' => TokenKind::LBracket,
            b']' => TokenKind::RBracket,
            b',' => TokenKind::Comma,
            b':' => {
                if self.matches(b':') {
                    TokenKind::ColonColon
                } else if self.matches(b'=') {
                    TokenKind::ColonEq
                } else {
                    TokenKind::Colon
                }
            }
            b';' => TokenKind::Semicolon,
            b'@' => TokenKind::At,
            b'_' if !self.peek().is_some_and(is_ident_continue) => TokenKind::Underscore,
            _ => return self.error_token(start, line, col),
        };
        self.make(kind, start, line, col)
    }

    /// Returns the next token without consuming it.
    #[must_use]
    pub fn peek_token(&self) -> Token<'src> {
        let mut clone = Self { src: self.src, bytes: self.bytes, pos: self.pos, line: self.line, col: self.col };
        clone.next_token()
    }

    fn skip_trivia(&mut self) {
        loop {
            match self.peek() {
                Some(b' ' | b'\t' | b'\r') => {
                    self.advance();
                }
                Some(b'#') => {
                    while self.peek().is_some_and(|c| c != b'\n') {
                        self.advance();
                    }
                }
                _ => break,
            }
        }
    }

    fn number(&mut self, start: usize, line: u32, col: u32) -> Token<'src> {
        if self.peek() == Some(b'0') && matches!(self.peek_at(1), Some(b'x' | b'X')) {
            self.advance();
            self.advance();
            while self.peek().is_some_and(|c| c.is_ascii_hexdigit() || c == b'_') {
                self.advance();
            }
            return self.make(TokenKind::Int, start, line, col);
        }

        while self.peek().is_some_and(|c| c.is_ascii_digit() || c == b'_') {
            self.advance();
        }

        let mut is_float = false;
        if self.peek() == Some(b'.') && self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) {
            is_float = true;
            self.advance();
            while self.peek().is_some_and(|c| c.is_ascii_digit() || c == b'_') {
                self.advance();
            }
        }

        self.make(if is_float { TokenKind::Float } else { TokenKind::Int }, start, line, col)
    }

    fn identifier(&mut self, start: usize, line: u32, col: u32) -> Token<'src> {
        while self.peek().is_some_and(is_ident_continue) {
            self.advance();
        }
        let text = &self.src[start..self.pos];
        let kind = keyword_kind(text).unwrap_or(TokenKind::Identifier);
        Token::new(kind, text, line, col)
    }

    fn string(&mut self, start: usize, line: u32, col: u32) -> Token<'src> {
        self.advance(); // opening quote
        loop {
            match self.peek() {
                None | Some(b'\n') => {
                    return self.error_token(start, line, col);
                }
                Some(b'"') => {
                    self.advance();
                    break;
                }
                Some(b'\\') => {
                    self.advance();
                    if self.peek().is_some() {
                        self.advance();
                    }
                }
                Some(_) => {
                    self.advance();
                }
            }
        }
        self.make(TokenKind::Str, start, line, col)
    }

    /// Produces an error token; the parser turns this into a [`crate::error::Diagnostic`] once it
    /// knows what context the error occurred in.
    fn error_token(&self, start: usize, line: u32, col: u32) -> Token<'src> {
        let end = self.pos.max(start + 1).min(self.src.len());
        Token::new(TokenKind::Error, &self.src[start..end], line, col)
    }

    fn make(&self, kind: TokenKind, start: usize, line: u32, col: u32) -> Token<'src> {
        Token::new(kind, &self.src[start..self.pos], line, col)
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.bytes.get(self.pos + offset).copied()
    }

    fn advance(&mut self) -> Option<u8> {
        let c = self.peek()?;
        self.pos += 1;
        if c == b'\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(c)
    }

    fn matches(&mut self, expected: u8) -> bool {
        if self.peek() == Some(expected) {
            self.advance();
            true
        } else {
            false
        }
    }
}

fn is_ident_start(c: u8) -> bool {
    c.is_ascii_alphabetic() || c == b'_'
}

fn is_ident_continue(c: u8) -> bool {
    c.is_ascii_alphanumeric() || c == b'_'
}

fn keyword_kind(text: &str) -> Option<TokenKind> {
    Some(match text {
        "and" => TokenKind::And,
        "break" => TokenKind::Break,
        "continue" => TokenKind::Continue,
        "defer" => TokenKind::Defer,
        "elif" => TokenKind::Elif,
        "else" => TokenKind::Else,
        "false" => TokenKind::False,
        "fn" => TokenKind::Fn,
        "for" => TokenKind::For,
        "if" => TokenKind::If,
        "in" => TokenKind::In,
        "match" => TokenKind::Match,
        "nil" => TokenKind::Nil,
        "not" => TokenKind::Not,
        "or" => TokenKind::Or,
        "return" => TokenKind::Return,
        "true" => TokenKind::True,
        "while" => TokenKind::While,
        _ => return None,
    })
}

/// Decodes the escape sequences accepted by string literals (`\n \t \r \\ \" \0`); any other
/// backslash-letter pair passes both bytes through unchanged.
#[must_use]
pub fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('\\') => out.push('\\'),
            Some('"') => out.push('"'),
            Some('0') => out.push('\0'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        let mut lexer = Lexer::new(src);
        let mut out = Vec::new();
        loop {
            let tok = lexer.next_token();
            if tok.kind == TokenKind::Eof {
                out.push(TokenKind::Eof);
                break;
            }
            out.push(tok.kind);
        }
        out
    }

    #[test]
    fn scans_punctuation_preferring_two_char_forms() {
        assert_eq!(
            kinds("== != <= >= :: := .. => ->"),
            vec![
                TokenKind::EqEq,
                TokenKind::NotEq,
                TokenKind::LtEq,
                TokenKind::GtEq,
                TokenKind::ColonColon,
                TokenKind::ColonEq,
                TokenKind::DotDot,
                TokenKind::FatArrow,
                TokenKind::Arrow,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn scans_hex_and_underscored_integers() {
        let mut lexer = Lexer::new("0xFF_00 1_000");
        let a = lexer.next_token();
        assert_eq!(a.kind, TokenKind::Int);
        assert_eq!(a.text, "0xFF_00");
        let b = lexer.next_token();
        assert_eq!(b.kind, TokenKind::Int);
        assert_eq!(b.text, "1_000");
    }

    #[test]
    fn reports_unterminated_string_as_error_token() {
        let mut lexer = Lexer::new("\"abc");
        assert_eq!(lexer.next_token().kind, TokenKind::Error);
    }

    #[test]
    fn keywords_are_not_identifiers() {
        assert_eq!(kinds("if elif else while for in fn return break continue match defer and or not"), vec![
            TokenKind::If,
            TokenKind::Elif,
            TokenKind::Else,
            TokenKind::While,
            TokenKind::For,
            TokenKind::In,
            TokenKind::Fn,
            TokenKind::Return,
            TokenKind::Break,
            TokenKind::Continue,
            TokenKind::Match,
            TokenKind::Defer,
            TokenKind::And,
            TokenKind::Or,
            TokenKind::Not,
            TokenKind::Eof,
        ]);
    }

    #[test]
    fn round_trips_source_modulo_trivia() {
        let src = "x := 1 + 2\n";
        let mut lexer = Lexer::new(src);
        let mut reconstructed = String::new();
        loop {
            let tok = lexer.next_token();
            if tok.kind == TokenKind::Eof {
                break;
            }
            if tok.kind == TokenKind::Newline {
                reconstructed.push('\n');
            } else {
                reconstructed.push_str(tok.text);
                reconstructed.push(' ');
            }
        }
        assert_eq!(reconstructed.trim(), "x := 1 + 2");
    }

    #[test]
    fn unescape_passes_through_unknown_sequences() {
        assert_eq!(unescape("a\\nb\\tc\\\\d"), "a\nb\tc\\d");
        assert_eq!(unescape("x\\qy"), "x\\qy");
    }
}
