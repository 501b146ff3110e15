//! Lexer: tokenizes expression-dialect source
//!
//! Expression source is the text between `{%` and `%}` delimiters.
//! Produces a stream of tokens the parser consumes. String literals
//! accept exactly the JSON escape set (`\"` `\\` `\/` `\b` `\f` `\n`
//! `\r` `\t` `\uXXXX`); any other escape is a creation-time error, which
//! is what lets invalid escapes be rejected before an execution exists.

use crate::errors::{DslError, DslResult};

/// A token produced by the lexer
#[derive(Clone, Debug, PartialEq)]
pub struct Token {
    /// The kind of token
    pub kind: TokenKind,
    /// The raw text of the token (decoded text for string literals)
    pub text: String,
    /// Line number (1-based)
    pub line: usize,
    /// Column number (1-based)
    pub col: usize,
}

impl Token {
    pub fn new(kind: TokenKind, text: impl Into<String>, line: usize, col: usize) -> Self {
        Self {
            kind,
            text: text.into(),
            line,
            col,
        }
    }
}

/// Token types
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenKind {
    // Keywords
    And,
    Or,
    Function,
    True,
    False,
    Null,

    // Identifiers and literals
    Identifier,
    StringLiteral,
    NumberLiteral,
    Variable, // $name (text carries the name)

    // Roots
    Dollar,       // $
    DollarDollar, // $$

    // Structural
    OpenParen,
    CloseParen,
    OpenBracket,
    CloseBracket,
    OpenBrace,
    CloseBrace,
    Comma,
    Dot,
    Colon,
    Question,

    // Operators
    Plus,
    Minus,
    Star,
    Slash,
    Ampersand,
    Equals,
    NotEquals,
    LessThan,
    LessThanEquals,
    GreaterThan,
    GreaterThanEquals,

    // End of input
    Eof,
}

impl std::fmt::Display for TokenKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::And => write!(f, "and"),
            Self::Or => write!(f, "or"),
            Self::Function => write!(f, "function"),
            Self::True => write!(f, "true"),
            Self::False => write!(f, "false"),
            Self::Null => write!(f, "null"),
            Self::Identifier => write!(f, "identifier"),
            Self::StringLiteral => write!(f, "string literal"),
            Self::NumberLiteral => write!(f, "number"),
            Self::Variable => write!(f, "variable"),
            Self::Dollar => write!(f, "$"),
            Self::DollarDollar => write!(f, "$$"),
            Self::OpenParen => write!(f, "("),
            Self::CloseParen => write!(f, ")"),
            Self::OpenBracket => write!(f, "["),
            Self::CloseBracket => write!(f, "]"),
            Self::OpenBrace => write!(f, "{{"),
            Self::CloseBrace => write!(f, "}}"),
            Self::Comma => write!(f, ","),
            Self::Dot => write!(f, "."),
            Self::Colon => write!(f, ":"),
            Self::Question => write!(f, "?"),
            Self::Plus => write!(f, "+"),
            Self::Minus => write!(f, "-"),
            Self::Star => write!(f, "*"),
            Self::Slash => write!(f, "/"),
            Self::Ampersand => write!(f, "&"),
            Self::Equals => write!(f, "="),
            Self::NotEquals => write!(f, "!="),
            Self::LessThan => write!(f, "<"),
            Self::LessThanEquals => write!(f, "<="),
            Self::GreaterThan => write!(f, ">"),
            Self::GreaterThanEquals => write!(f, ">="),
            Self::Eof => write!(f, "end of input"),
        }
    }
}

/// Lexer for expression source
pub struct Lexer {
    input: Vec<char>,
    pos: usize,
    line: usize,
    col: usize,
}

impl Lexer {
    /// Create a new lexer from input text
    pub fn new(input: &str) -> Self {
        Self {
            input: input.chars().collect(),
            pos: 0,
            line: 1,
            col: 1,
        }
    }

    /// Tokenize the entire input
    pub fn tokenize(&mut self) -> DslResult<Vec<Token>> {
        let mut tokens = Vec::new();

        loop {
            self.skip_whitespace();

            if self.pos >= self.input.len() {
                tokens.push(Token::new(TokenKind::Eof, "", self.line, self.col));
                break;
            }

            let token = self.next_token()?;
            tokens.push(token);
        }

        Ok(tokens)
    }

    fn next_token(&mut self) -> DslResult<Token> {
        let ch = self.input[self.pos];
        let line = self.line;
        let col = self.col;

        let simple = |kind, text: &str| Token::new(kind, text, line, col);

        match ch {
            '(' => {
                self.advance();
                Ok(simple(TokenKind::OpenParen, "("))
            }
            ')' => {
                self.advance();
                Ok(simple(TokenKind::CloseParen, ")"))
            }
            '[' => {
                self.advance();
                Ok(simple(TokenKind::OpenBracket, "["))
            }
            ']' => {
                self.advance();
                Ok(simple(TokenKind::CloseBracket, "]"))
            }
            '{' => {
                self.advance();
                Ok(simple(TokenKind::OpenBrace, "{"))
            }
            '}' => {
                self.advance();
                Ok(simple(TokenKind::CloseBrace, "}"))
            }
            ',' => {
                self.advance();
                Ok(simple(TokenKind::Comma, ","))
            }
            '.' => {
                self.advance();
                Ok(simple(TokenKind::Dot, "."))
            }
            ':' => {
                self.advance();
                Ok(simple(TokenKind::Colon, ":"))
            }
            '?' => {
                self.advance();
                Ok(simple(TokenKind::Question, "?"))
            }
            '+' => {
                self.advance();
                Ok(simple(TokenKind::Plus, "+"))
            }
            '-' => {
                self.advance();
                Ok(simple(TokenKind::Minus, "-"))
            }
            '*' => {
                self.advance();
                Ok(simple(TokenKind::Star, "*"))
            }
            '/' => {
                self.advance();
                Ok(simple(TokenKind::Slash, "/"))
            }
            '&' => {
                self.advance();
                Ok(simple(TokenKind::Ampersand, "&"))
            }
            '=' => {
                self.advance();
                Ok(simple(TokenKind::Equals, "="))
            }
            '!' if self.peek_at(1) == Some('=') => {
                self.advance();
                self.advance();
                Ok(simple(TokenKind::NotEquals, "!="))
            }
            '<' => {
                self.advance();
                if self.current() == Some('=') {
                    self.advance();
                    Ok(simple(TokenKind::LessThanEquals, "<="))
                } else {
                    Ok(simple(TokenKind::LessThan, "<"))
                }
            }
            '>' => {
                self.advance();
                if self.current() == Some('=') {
                    self.advance();
                    Ok(simple(TokenKind::GreaterThanEquals, ">="))
                } else {
                    Ok(simple(TokenKind::GreaterThan, ">"))
                }
            }
            '$' => self.read_variable(),
            '"' | '\'' => self.read_string_literal(),
            c if c.is_ascii_digit() => self.read_number(),
            c if c.is_ascii_alphabetic() || c == '_' => self.read_identifier_or_keyword(),
            _ => Err(DslError::ParseError {
                line,
                col,
                message: format!("Unexpected character: '{}'", ch),
            }),
        }
    }

    fn read_variable(&mut self) -> DslResult<Token> {
        let line = self.line;
        let col = self.col;
        self.advance(); // skip '$'

        if self.current() == Some('$') {
            self.advance();
            return Ok(Token::new(TokenKind::DollarDollar, "$$", line, col));
        }

        let mut name = String::new();
        while let Some(c) = self.current() {
            if c.is_ascii_alphanumeric() || c == '_' {
                name.push(c);
                self.advance();
            } else {
                break;
            }
        }

        if name.is_empty() {
            Ok(Token::new(TokenKind::Dollar, "$", line, col))
        } else {
            Ok(Token::new(TokenKind::Variable, name, line, col))
        }
    }

    fn read_string_literal(&mut self) -> DslResult<Token> {
        let line = self.line;
        let col = self.col;
        let quote = self.input[self.pos];
        self.advance(); // skip opening quote

        let mut text = String::new();
        loop {
            let Some(c) = self.current() else {
                return Err(DslError::ParseError {
                    line,
                    col,
                    message: "Unterminated string literal".into(),
                });
            };
            if c == quote {
                self.advance();
                return Ok(Token::new(TokenKind::StringLiteral, text, line, col));
            }
            if c == '\\' {
                let esc_line = self.line;
                let esc_col = self.col;
                self.advance();
                match self.current() {
                    Some('"') => text.push('"'),
                    Some('\\') => text.push('\\'),
                    Some('/') => text.push('/'),
                    Some('b') => text.push('\u{0008}'),
                    Some('f') => text.push('\u{000C}'),
                    Some('n') => text.push('\n'),
                    Some('r') => text.push('\r'),
                    Some('t') => text.push('\t'),
                    Some('u') => {
                        self.advance();
                        text.push(self.read_unicode_escape(esc_line, esc_col)?);
                        continue;
                    }
                    other => {
                        return Err(DslError::ParseError {
                            line: esc_line,
                            col: esc_col,
                            message: match other {
                                Some(c) => format!("Invalid escape sequence: '\\{}'", c),
                                None => "Unterminated escape sequence".into(),
                            },
                        });
                    }
                }
                self.advance();
            } else {
                text.push(c);
                self.advance();
            }
        }
    }

    fn read_unicode_escape(&mut self, line: usize, col: usize) -> DslResult<char> {
        let mut code = 0u32;
        for _ in 0..4 {
            let digit = self
                .current()
                .and_then(|c| c.to_digit(16))
                .ok_or_else(|| DslError::ParseError {
                    line,
                    col,
                    message: "Invalid escape sequence: '\\u' requires four hex digits".into(),
                })?;
            code = code * 16 + digit;
            self.advance();
        }
        char::from_u32(code).ok_or(DslError::ParseError {
            line,
            col,
            message: "Invalid unicode escape".into(),
        })
    }

    fn read_number(&mut self) -> DslResult<Token> {
        let line = self.line;
        let col = self.col;
        let mut text = String::new();

        while matches!(self.current(), Some(c) if c.is_ascii_digit()) {
            text.push(self.input[self.pos]);
            self.advance();
        }
        // A '.' is part of the number only when a digit follows; otherwise
        // it is field navigation.
        if self.current() == Some('.') && matches!(self.peek_at(1), Some(c) if c.is_ascii_digit()) {
            text.push('.');
            self.advance();
            while matches!(self.current(), Some(c) if c.is_ascii_digit()) {
                text.push(self.input[self.pos]);
                self.advance();
            }
        }
        if matches!(self.current(), Some('e' | 'E')) {
            text.push('e');
            self.advance();
            if matches!(self.current(), Some('+' | '-')) {
                text.push(self.input[self.pos]);
                self.advance();
            }
            if !matches!(self.current(), Some(c) if c.is_ascii_digit()) {
                return Err(DslError::ParseError {
                    line,
                    col,
                    message: "Malformed number: exponent has no digits".into(),
                });
            }
            while matches!(self.current(), Some(c) if c.is_ascii_digit()) {
                text.push(self.input[self.pos]);
                self.advance();
            }
        }

        Ok(Token::new(TokenKind::NumberLiteral, text, line, col))
    }

    fn read_identifier_or_keyword(&mut self) -> DslResult<Token> {
        let line = self.line;
        let col = self.col;
        let mut text = String::new();

        while matches!(self.current(), Some(c) if c.is_ascii_alphanumeric() || c == '_') {
            text.push(self.input[self.pos]);
            self.advance();
        }

        let kind = match text.as_str() {
            "and" => TokenKind::And,
            "or" => TokenKind::Or,
            "function" => TokenKind::Function,
            "true" => TokenKind::True,
            "false" => TokenKind::False,
            "null" => TokenKind::Null,
            _ => TokenKind::Identifier,
        };

        Ok(Token::new(kind, text, line, col))
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.current(), Some(c) if c.is_whitespace()) {
            self.advance();
        }
    }

    fn advance(&mut self) {
        if self.pos < self.input.len() {
            if self.input[self.pos] == '\n' {
                self.line += 1;
                self.col = 1;
            } else {
                self.col += 1;
            }
            self.pos += 1;
        }
    }

    fn current(&self) -> Option<char> {
        self.input.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.input.get(self.pos + offset).copied()
    }
}
