use thiserror::Error;

use crate::ast::{BinaryOperator, Expression, Program, Statement};
use crate::token::{Token, TokenKind};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("Expected {expected}, got {found} at line {line}, column {column}")]
    UnexpectedToken {
        expected: &'static str,
        found: String,
        line: usize,
        column: usize,
    },
    #[error("Expected an expression, got {found} at line {line}, column {column}")]
    ExpectedExpression {
        found: String,
        line: usize,
        column: usize,
    },
}

pub type ParseResult<T> = Result<T, ParseError>;

/// Recursive-descent parser over a lexed token vec, addressed by an index
/// cursor. The stream is expected to end with [`TokenKind::Eof`], which is
/// never consumed.
pub struct Parser<'a> {
    tokens: Vec<Token<'a>>,
    current: usize,
}

impl<'a> Parser<'a> {
    pub fn new(tokens: Vec<Token<'a>>) -> Self {
        Self { tokens, current: 0 }
    }

    pub fn parse_program(mut self) -> ParseResult<Program> {
        let mut statements = Vec::new();
        while !matches!(self.peek().kind, TokenKind::Eof) {
            statements.push(self.parse_statement()?);
        }
        Ok(Program { statements })
    }

    fn parse_statement(&mut self) -> ParseResult<Statement> {
        match self.peek().kind {
            TokenKind::Func => self.parse_function_def(),
            TokenKind::If => self.parse_if(),
            TokenKind::While => self.parse_while(),
            TokenKind::Return => self.parse_return(),
            TokenKind::Identifier(_)
                if matches!(self.peek_ahead(), Some(TokenKind::Equal)) =>
            {
                self.parse_assignment()
            }
            _ => {
                let expr = self.parse_expression()?;
                self.expect(TokenKind::Semicolon)?;
                Ok(Statement::Expr(expr))
            }
        }
    }

    fn parse_function_def(&mut self) -> ParseResult<Statement> {
        self.expect(TokenKind::Func)?;
        let name = self.expect_identifier()?;
        self.expect(TokenKind::LParen)?;

        let mut params = Vec::new();
        if !matches!(self.peek().kind, TokenKind::RParen) {
            loop {
                params.push(self.expect_identifier()?);
                if !self.matches(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(TokenKind::RParen)?;

        let body = self.parse_block()?;
        Ok(Statement::FunctionDef { name, params, body })
    }

    fn parse_if(&mut self) -> ParseResult<Statement> {
        self.expect(TokenKind::If)?;
        self.expect(TokenKind::LParen)?;
        let condition = self.parse_expression()?;
        self.expect(TokenKind::RParen)?;
        let then_body = self.parse_block()?;

        let else_body = if self.matches(&TokenKind::Else) {
            self.parse_block()?
        } else {
            Vec::new()
        };

        Ok(Statement::If {
            condition,
            then_body,
            else_body,
        })
    }

    fn parse_while(&mut self) -> ParseResult<Statement> {
        self.expect(TokenKind::While)?;
        self.expect(TokenKind::LParen)?;
        let condition = self.parse_expression()?;
        self.expect(TokenKind::RParen)?;
        let body = self.parse_block()?;
        Ok(Statement::While { condition, body })
    }

    fn parse_return(&mut self) -> ParseResult<Statement> {
        self.expect(TokenKind::Return)?;
        let value = self.parse_expression()?;
        self.expect(TokenKind::Semicolon)?;
        Ok(Statement::Return(value))
    }

    fn parse_assignment(&mut self) -> ParseResult<Statement> {
        let name = self.expect_identifier()?;
        self.expect(TokenKind::Equal)?;
        let value = self.parse_expression()?;
        self.expect(TokenKind::Semicolon)?;
        Ok(Statement::Assign { name, value })
    }

    fn parse_block(&mut self) -> ParseResult<Vec<Statement>> {
        self.expect(TokenKind::LBrace)?;
        let mut statements = Vec::new();
        while !matches!(self.peek().kind, TokenKind::RBrace | TokenKind::Eof) {
            statements.push(self.parse_statement()?);
        }
        self.expect(TokenKind::RBrace)?;
        Ok(statements)
    }

    /// `expression := primary (binop primary)*`, a single left-associative
    /// precedence level. `1 + 2 * 3` parses as `(1 + 2) * 3`.
    fn parse_expression(&mut self) -> ParseResult<Expression> {
        let mut expr = self.parse_primary()?;
        while let Some(op) = binary_operator(&self.peek().kind) {
            self.advance();
            let right = self.parse_primary()?;
            expr = Expression::BinaryOp {
                left: Box::new(expr),
                op,
                right: Box::new(right),
            };
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> ParseResult<Expression> {
        let token = self.peek().clone();
        match token.kind {
            TokenKind::Integer(value) => {
                self.advance();
                Ok(Expression::Integer(value))
            }
            TokenKind::Str(value) => {
                self.advance();
                Ok(Expression::Str(value))
            }
            TokenKind::Identifier(name) => {
                self.advance();
                if self.matches(&TokenKind::LParen) {
                    let mut args = Vec::new();
                    if !matches!(self.peek().kind, TokenKind::RParen) {
                        loop {
                            args.push(self.parse_expression()?);
                            if !self.matches(&TokenKind::Comma) {
                                break;
                            }
                        }
                    }
                    self.expect(TokenKind::RParen)?;
                    Ok(Expression::Call {
                        name: name.to_string(),
                        args,
                    })
                } else {
                    Ok(Expression::Identifier(name.to_string()))
                }
            }
            other => Err(ParseError::ExpectedExpression {
                found: other.to_string(),
                line: token.span.line,
                column: token.span.column,
            }),
        }
    }

    fn peek(&self) -> &Token<'a> {
        &self.tokens[self.current.min(self.tokens.len() - 1)]
    }

    fn peek_ahead(&self) -> Option<&TokenKind<'a>> {
        self.tokens.get(self.current + 1).map(|token| &token.kind)
    }

    fn advance(&mut self) {
        if self.current < self.tokens.len() - 1 {
            self.current += 1;
        }
    }

    fn matches(&mut self, kind: &TokenKind<'a>) -> bool {
        if &self.peek().kind == kind {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind<'a>) -> ParseResult<()> {
        if self.matches(&kind) {
            Ok(())
        } else {
            Err(self.error(kind.name()))
        }
    }

    fn expect_identifier(&mut self) -> ParseResult<String> {
        if let TokenKind::Identifier(name) = self.peek().kind {
            self.advance();
            Ok(name.to_string())
        } else {
            Err(self.error("identifier"))
        }
    }

    fn error(&self, expected: &'static str) -> ParseError {
        let token = self.peek();
        ParseError::UnexpectedToken {
            expected,
            found: token.kind.to_string(),
            line: token.span.line,
            column: token.span.column,
        }
    }
}

fn binary_operator(kind: &TokenKind) -> Option<BinaryOperator> {
    Some(match kind {
        TokenKind::Plus => BinaryOperator::Add,
        TokenKind::Minus => BinaryOperator::Sub,
        TokenKind::Star => BinaryOperator::Mul,
        TokenKind::Slash => BinaryOperator::Div,
        TokenKind::Greater => BinaryOperator::Greater,
        TokenKind::Less => BinaryOperator::Less,
        TokenKind::GreaterEqual => BinaryOperator::GreaterEqual,
        TokenKind::LessEqual => BinaryOperator::LessEqual,
        TokenKind::EqualEqual => BinaryOperator::Equal,
        TokenKind::NotEqual => BinaryOperator::NotEqual,
        _ => return None,
    })
}

/// Parses a lexed token stream into a [`Program`], consuming everything up to
/// the end-of-stream marker. Any mismatch aborts with no partial tree.
pub fn parse_tokens(tokens: Vec<Token>) -> ParseResult<Program> {
    Parser::new(tokens).parse_program()
}
