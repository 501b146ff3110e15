//! Parser: recursive descent over the expression token stream
//!
//! Grammar, loosest first: conditional `? :`, `or`, `and`, comparisons,
//! concatenation `&`, additive, multiplicative, unary minus, postfix
//! navigation/application, primaries. Parsing happens at definition
//! build time, so every syntax error here (including a bad string
//! escape) is a creation-time rejection.

use crate::ast::{BinOp, Expr};
use crate::errors::{DslError, DslResult};
use crate::lexer::{Lexer, Token, TokenKind};

/// Whether a JSON string carries an embedded expression (`{% ... %}`).
pub fn is_expression(text: &str) -> bool {
    expression_body(text).is_some()
}

/// The source between the `{%`/`%}` delimiters, if `text` carries them.
pub fn expression_body(text: &str) -> Option<&str> {
    let trimmed = text.trim();
    trimmed
        .strip_prefix("{%")
        .and_then(|rest| rest.strip_suffix("%}"))
}

/// Parse expression source (the text between the delimiters).
pub fn parse_expression(input: &str) -> DslResult<Expr> {
    let mut lexer = Lexer::new(input);
    let tokens = lexer.tokenize()?;
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.parse_conditional()?;
    parser.expect(TokenKind::Eof)?;
    Ok(expr)
}

/// Parse a JSON string that must be a delimited expression.
pub fn parse_delimited(text: &str) -> DslResult<Expr> {
    let body = expression_body(text).ok_or_else(|| DslError::InvalidValue {
        field: "expression".into(),
        message: format!("'{}' is not wrapped in {{% ... %}}", text),
    })?;
    parse_expression(body)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn parse_conditional(&mut self) -> DslResult<Expr> {
        let cond = self.parse_or()?;
        if self.eat(TokenKind::Question) {
            let then = self.parse_conditional()?;
            self.expect(TokenKind::Colon)?;
            let otherwise = self.parse_conditional()?;
            return Ok(Expr::Conditional {
                cond: Box::new(cond),
                then: Box::new(then),
                otherwise: Box::new(otherwise),
            });
        }
        Ok(cond)
    }

    fn parse_or(&mut self) -> DslResult<Expr> {
        let mut lhs = self.parse_and()?;
        while self.eat(TokenKind::Or) {
            let rhs = self.parse_and()?;
            lhs = Expr::binary(BinOp::Or, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> DslResult<Expr> {
        let mut lhs = self.parse_comparison()?;
        while self.eat(TokenKind::And) {
            let rhs = self.parse_comparison()?;
            lhs = Expr::binary(BinOp::And, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_comparison(&mut self) -> DslResult<Expr> {
        let lhs = self.parse_concat()?;
        let op = match self.current().kind {
            TokenKind::Equals => BinOp::Eq,
            TokenKind::NotEquals => BinOp::Ne,
            TokenKind::LessThan => BinOp::Lt,
            TokenKind::LessThanEquals => BinOp::Le,
            TokenKind::GreaterThan => BinOp::Gt,
            TokenKind::GreaterThanEquals => BinOp::Ge,
            _ => return Ok(lhs),
        };
        self.pos += 1;
        let rhs = self.parse_concat()?;
        Ok(Expr::binary(op, lhs, rhs))
    }

    fn parse_concat(&mut self) -> DslResult<Expr> {
        let mut lhs = self.parse_additive()?;
        while self.eat(TokenKind::Ampersand) {
            let rhs = self.parse_additive()?;
            lhs = Expr::binary(BinOp::Concat, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_additive(&mut self) -> DslResult<Expr> {
        let mut lhs = self.parse_multiplicative()?;
        loop {
            let op = match self.current().kind {
                TokenKind::Plus => BinOp::Add,
                TokenKind::Minus => BinOp::Sub,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.parse_multiplicative()?;
            lhs = Expr::binary(op, lhs, rhs);
        }
    }

    fn parse_multiplicative(&mut self) -> DslResult<Expr> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.current().kind {
                TokenKind::Star => BinOp::Mul,
                TokenKind::Slash => BinOp::Div,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.parse_unary()?;
            lhs = Expr::binary(op, lhs, rhs);
        }
    }

    fn parse_unary(&mut self) -> DslResult<Expr> {
        if self.eat(TokenKind::Minus) {
            let inner = self.parse_unary()?;
            return Ok(Expr::Neg(Box::new(inner)));
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> DslResult<Expr> {
        let mut expr = self.parse_primary()?;
        loop {
            match self.current().kind {
                TokenKind::Dot => {
                    self.pos += 1;
                    let name = self.expect_name()?;
                    expr = Expr::Field(Box::new(expr), name);
                }
                TokenKind::OpenBracket => {
                    self.pos += 1;
                    let index = self.parse_conditional()?;
                    self.expect(TokenKind::CloseBracket)?;
                    expr = Expr::Index(Box::new(expr), Box::new(index));
                }
                TokenKind::OpenParen => {
                    self.pos += 1;
                    let mut args = Vec::new();
                    if self.current().kind != TokenKind::CloseParen {
                        loop {
                            args.push(self.parse_conditional()?);
                            if !self.eat(TokenKind::Comma) {
                                break;
                            }
                        }
                    }
                    self.expect(TokenKind::CloseParen)?;
                    expr = Expr::Call {
                        callee: Box::new(expr),
                        args,
                    };
                }
                _ => return Ok(expr),
            }
        }
    }

    fn parse_primary(&mut self) -> DslResult<Expr> {
        let token = self.current().clone();
        match token.kind {
            TokenKind::Null => {
                self.pos += 1;
                Ok(Expr::Null)
            }
            TokenKind::True => {
                self.pos += 1;
                Ok(Expr::Bool(true))
            }
            TokenKind::False => {
                self.pos += 1;
                Ok(Expr::Bool(false))
            }
            TokenKind::NumberLiteral => {
                self.pos += 1;
                let value = token.text.parse::<f64>().map_err(|_| DslError::ParseError {
                    line: token.line,
                    col: token.col,
                    message: format!("Malformed number: '{}'", token.text),
                })?;
                Ok(Expr::Number(value))
            }
            TokenKind::StringLiteral => {
                self.pos += 1;
                Ok(Expr::Str(token.text))
            }
            TokenKind::Dollar => {
                self.pos += 1;
                Ok(Expr::Input)
            }
            TokenKind::DollarDollar => {
                self.pos += 1;
                Ok(Expr::Context)
            }
            TokenKind::Variable => {
                self.pos += 1;
                Ok(Expr::Var(token.text))
            }
            // A bare identifier navigates the current value.
            TokenKind::Identifier => {
                self.pos += 1;
                Ok(Expr::Field(Box::new(Expr::Input), token.text))
            }
            TokenKind::Function => self.parse_function(),
            TokenKind::OpenParen => {
                self.pos += 1;
                let inner = self.parse_conditional()?;
                self.expect(TokenKind::CloseParen)?;
                Ok(inner)
            }
            TokenKind::OpenBracket => self.parse_array(),
            TokenKind::OpenBrace => self.parse_object(),
            TokenKind::Eof => Err(DslError::UnexpectedEof("an expression".into())),
            _ => Err(DslError::UnexpectedToken {
                expected: "an expression".into(),
                found: token.text,
            }),
        }
    }

    fn parse_function(&mut self) -> DslResult<Expr> {
        self.expect(TokenKind::Function)?;
        self.expect(TokenKind::OpenParen)?;
        let mut params = Vec::new();
        if self.current().kind != TokenKind::CloseParen {
            loop {
                let token = self.current().clone();
                if token.kind != TokenKind::Variable {
                    return Err(DslError::UnexpectedToken {
                        expected: "parameter name like $x".into(),
                        found: token.text,
                    });
                }
                self.pos += 1;
                params.push(token.text);
                if !self.eat(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(TokenKind::CloseParen)?;
        self.expect(TokenKind::OpenBrace)?;
        let body = self.parse_conditional()?;
        self.expect(TokenKind::CloseBrace)?;
        Ok(Expr::Function {
            params,
            body: Box::new(body),
        })
    }

    fn parse_array(&mut self) -> DslResult<Expr> {
        self.expect(TokenKind::OpenBracket)?;
        let mut items = Vec::new();
        if self.current().kind != TokenKind::CloseBracket {
            loop {
                items.push(self.parse_conditional()?);
                if !self.eat(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(TokenKind::CloseBracket)?;
        Ok(Expr::Array(items))
    }

    fn parse_object(&mut self) -> DslResult<Expr> {
        self.expect(TokenKind::OpenBrace)?;
        let mut fields = Vec::new();
        if self.current().kind != TokenKind::CloseBrace {
            loop {
                let token = self.current().clone();
                let key = match token.kind {
                    TokenKind::StringLiteral | TokenKind::Identifier => {
                        self.pos += 1;
                        token.text
                    }
                    _ => {
                        return Err(DslError::UnexpectedToken {
                            expected: "object key".into(),
                            found: token.text,
                        });
                    }
                };
                self.expect(TokenKind::Colon)?;
                let value = self.parse_conditional()?;
                fields.push((key, value));
                if !self.eat(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(TokenKind::CloseBrace)?;
        Ok(Expr::Object(fields))
    }

    fn current(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn eat(&mut self, kind: TokenKind) -> bool {
        if self.current().kind == kind {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind) -> DslResult<()> {
        let token = self.current();
        if token.kind == kind {
            self.pos += 1;
            Ok(())
        } else if token.kind == TokenKind::Eof {
            Err(DslError::UnexpectedEof(kind.to_string()))
        } else {
            Err(DslError::UnexpectedToken {
                expected: kind.to_string(),
                found: token.text.clone(),
            })
        }
    }

    /// Field names after '.' may collide with keywords (`input.and` is a
    /// legal navigation), so anything word-shaped is accepted.
    fn expect_name(&mut self) -> DslResult<String> {
        let token = self.current().clone();
        match token.kind {
            TokenKind::Identifier
            | TokenKind::And
            | TokenKind::Or
            | TokenKind::Function
            | TokenKind::True
            | TokenKind::False
            | TokenKind::Null => {
                self.pos += 1;
                Ok(token.text)
            }
            TokenKind::Eof => Err(DslError::UnexpectedEof("field name".into())),
            _ => Err(DslError::UnexpectedToken {
                expected: "field name".into(),
                found: token.text,
            }),
        }
    }
}
