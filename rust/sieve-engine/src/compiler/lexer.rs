//! Lexer for RFC 5228 script syntax.

use crate::compiler::tokens::{Span, Token, TokenKind};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LexError {
    #[error("unexpected character '{ch}' at line {line}, col {col}")]
    UnexpectedChar { ch: char, line: usize, col: usize },
    #[error("unterminated string at line {line}, col {col}")]
    UnterminatedString { line: usize, col: usize },
    #[error("unterminated comment at line {line}, col {col}")]
    UnterminatedComment { line: usize, col: usize },
    #[error("invalid number at line {line}, col {col}")]
    InvalidNumber { line: usize, col: usize },
}

impl LexError {
    pub fn location(&self) -> (usize, usize) {
        match *self {
            LexError::UnexpectedChar { line, col, .. }
            | LexError::UnterminatedString { line, col }
            | LexError::UnterminatedComment { line, col }
            | LexError::InvalidNumber { line, col } => (line, col),
        }
    }
}

pub struct Lexer {
    source: Vec<char>,
    pos: usize,
    line: usize,
    col: usize,
    byte_offset: usize,
}

impl Lexer {
    pub fn new(source: &str) -> Self {
        Self { source: source.chars().collect(), pos: 0, line: 1, col: 1, byte_offset: 0 }
    }

    fn current(&self) -> Option<char> {
        self.source.get(self.pos).copied()
    }

    fn peek(&self) -> Option<char> {
        self.source.get(self.pos + 1).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.source.get(self.pos).copied()?;
        self.pos += 1;
        self.byte_offset += ch.len_utf8();
        if ch == '\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(ch)
    }

    fn span_here(&self) -> Span {
        Span::new(self.byte_offset, self.line, self.col)
    }

    pub fn tokenize(&mut self) -> Result<Vec<Token>, LexError> {
        let mut tokens = Vec::new();
        loop {
            self.skip_trivia()?;
            let span = self.span_here();
            let Some(ch) = self.current() else {
                tokens.push(Token::new(TokenKind::Eof, span));
                return Ok(tokens);
            };
            let kind = match ch {
                '[' => self.single(TokenKind::LBracket),
                ']' => self.single(TokenKind::RBracket),
                '(' => self.single(TokenKind::LParen),
                ')' => self.single(TokenKind::RParen),
                '{' => self.single(TokenKind::LBrace),
                '}' => self.single(TokenKind::RBrace),
                ',' => self.single(TokenKind::Comma),
                ';' => self.single(TokenKind::Semicolon),
                '"' => TokenKind::String(self.quoted_string(span)?),
                ':' => {
                    self.advance();
                    match self.current() {
                        Some(c) if is_identifier_start(c) => TokenKind::Tag(self.identifier()),
                        Some(c) => {
                            return Err(LexError::UnexpectedChar { ch: c, line: self.line, col: self.col })
                        }
                        None => {
                            return Err(LexError::UnexpectedChar { ch: ':', line: span.line, col: span.col })
                        }
                    }
                }
                c if c.is_ascii_digit() => TokenKind::Number(self.number(span)?),
                c if is_identifier_start(c) => {
                    let ident = self.identifier();
                    if ident.eq_ignore_ascii_case("text") && self.current() == Some(':') {
                        self.advance();
                        TokenKind::String(self.multiline_string(span)?)
                    } else {
                        TokenKind::Identifier(ident)
                    }
                }
                c => return Err(LexError::UnexpectedChar { ch: c, line: span.line, col: span.col }),
            };
            tokens.push(Token::new(kind, span));
        }
    }

    fn single(&mut self, kind: TokenKind) -> TokenKind {
        self.advance();
        kind
    }

    fn skip_trivia(&mut self) -> Result<(), LexError> {
        while let Some(ch) = self.current() {
            match ch {
                ' ' | '\t' | '\r' | '\n' => {
                    self.advance();
                }
                '#' => self.skip_line(),
                '/' if self.peek() == Some('*') => {
                    let (line, col) = (self.line, self.col);
                    self.advance();
                    self.advance();
                    loop {
                        match self.current() {
                            None => return Err(LexError::UnterminatedComment { line, col }),
                            Some('*') if self.peek() == Some('/') => {
                                self.advance();
                                self.advance();
                                break;
                            }
                            Some(_) => {
                                self.advance();
                            }
                        }
                    }
                }
                _ => break,
            }
        }
        Ok(())
    }

    fn skip_line(&mut self) {
        while let Some(ch) = self.current() {
            if ch == '\n' {
                break;
            }
            self.advance();
        }
    }

    fn identifier(&mut self) -> String {
        let mut out = String::new();
        while let Some(c) = self.current() {
            if c.is_ascii_alphanumeric() || c == '_' {
                out.push(c);
                self.advance();
            } else {
                break;
            }
        }
        out
    }

    /// Digits with an optional `K`, `M` or `G` quantifier.
    fn number(&mut self, start: Span) -> Result<u64, LexError> {
        let invalid = LexError::InvalidNumber { line: start.line, col: start.col };
        let mut value: u64 = 0;
        while let Some(c) = self.current() {
            let Some(digit) = c.to_digit(10) else { break };
            value = value
                .checked_mul(10)
                .and_then(|v| v.checked_add(digit as u64))
                .ok_or_else(|| invalid.clone())?;
            self.advance();
        }
        let shift = match self.current() {
            Some('K' | 'k') => 10,
            Some('M' | 'm') => 20,
            Some('G' | 'g') => 30,
            _ => return Ok(value),
        };
        self.advance();
        value.checked_mul(1u64 << shift).ok_or(invalid)
    }

    /// `"..."`; a backslash takes the next character literally.
    fn quoted_string(&mut self, start: Span) -> Result<String, LexError> {
        let unterminated = LexError::UnterminatedString { line: start.line, col: start.col };
        self.advance();
        let mut out = String::new();
        loop {
            match self.advance() {
                None => return Err(unterminated),
                Some('"') => return Ok(out),
                Some('\\') => match self.advance() {
                    Some(c) => out.push(c),
                    None => return Err(unterminated),
                },
                Some(c) => out.push(c),
            }
        }
    }

    /// `text:` up to a line holding a single dot. A leading `..` is
    /// unstuffed to `.`.
    fn multiline_string(&mut self, start: Span) -> Result<String, LexError> {
        while matches!(self.current(), Some(' ' | '\t')) {
            self.advance();
        }
        if self.current() == Some('#') {
            self.skip_line();
        }
        if self.current() == Some('\r') {
            self.advance();
        }
        match self.current() {
            Some('\n') => {
                self.advance();
            }
            Some(c) => return Err(LexError::UnexpectedChar { ch: c, line: self.line, col: self.col }),
            None => return Err(LexError::UnterminatedString { line: start.line, col: start.col }),
        }

        let mut out = String::new();
        loop {
            if self.current().is_none() {
                return Err(LexError::UnterminatedString { line: start.line, col: start.col });
            }
            let mut line = String::new();
            while let Some(c) = self.current() {
                self.advance();
                if c == '\n' {
                    break;
                }
                line.push(c);
            }
            if line.ends_with('\r') {
                line.pop();
            }
            if line == "." {
                return Ok(out);
            }
            if line.starts_with("..") {
                line.remove(0);
            }
            out.push_str(&line);
            out.push('\n');
        }
    }
}

fn is_identifier_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}
