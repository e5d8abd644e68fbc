use std::iter::Peekable;
use std::str::CharIndices;

use thiserror::Error;

use crate::token::{Span, Token, TokenKind};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LexError {
    #[error("Unexpected character '{character}' at line {line}, column {column}")]
    UnexpectedCharacter {
        character: char,
        line: usize,
        column: usize,
    },
    #[error("Unterminated string literal at line {line}, column {column}")]
    UnterminatedString { line: usize, column: usize },
    #[error("Invalid integer literal '{literal}' at line {line}, column {column}")]
    InvalidIntegerLiteral {
        literal: String,
        line: usize,
        column: usize,
    },
}

pub type LexResult<T> = Result<T, LexError>;

pub struct Lexer<'a> {
    input: &'a str,
    chars: Peekable<CharIndices<'a>>,
    line: usize,
    column: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self {
            input,
            chars: input.char_indices().peekable(),
            line: 1,
            column: 1,
        }
    }

    pub fn next_token(&mut self) -> LexResult<Token<'a>> {
        self.skip_whitespace();

        let (start_idx, ch) = match self.chars.peek() {
            Some(&(idx, c)) => (idx, c),
            None => {
                return Ok(Token::new(
                    TokenKind::Eof,
                    Span {
                        start: self.input.len(),
                        end: self.input.len(),
                        line: self.line,
                        column: self.column,
                    },
                ));
            }
        };

        let start_line = self.line;
        let start_column = self.column;
        match ch {
            c if c.is_ascii_digit() => self.read_integer(start_idx, start_line, start_column),
            c if c.is_ascii_alphabetic() => {
                Ok(self.read_identifier(start_idx, start_line, start_column))
            }
            '"' | '\'' => self.read_string(start_idx, start_line, start_column),
            '>' => Ok(self.one_or_two(start_idx, TokenKind::Greater, TokenKind::GreaterEqual)),
            '<' => Ok(self.one_or_two(start_idx, TokenKind::Less, TokenKind::LessEqual)),
            '=' => Ok(self.one_or_two(start_idx, TokenKind::Equal, TokenKind::EqualEqual)),
            '!' => {
                self.advance_char();
                if matches!(self.chars.peek(), Some(&(_, '='))) {
                    self.advance_char();
                    Ok(self.token_at(TokenKind::NotEqual, start_idx, start_line, start_column))
                } else {
                    // A bare '!' is not an operator in this language.
                    Err(LexError::UnexpectedCharacter {
                        character: '!',
                        line: start_line,
                        column: start_column,
                    })
                }
            }
            '+' => Ok(self.single(TokenKind::Plus, start_idx)),
            '-' => Ok(self.single(TokenKind::Minus, start_idx)),
            '*' => Ok(self.single(TokenKind::Star, start_idx)),
            '/' => Ok(self.single(TokenKind::Slash, start_idx)),
            '(' => Ok(self.single(TokenKind::LParen, start_idx)),
            ')' => Ok(self.single(TokenKind::RParen, start_idx)),
            '{' => Ok(self.single(TokenKind::LBrace, start_idx)),
            '}' => Ok(self.single(TokenKind::RBrace, start_idx)),
            ',' => Ok(self.single(TokenKind::Comma, start_idx)),
            ';' => Ok(self.single(TokenKind::Semicolon, start_idx)),
            other => Err(LexError::UnexpectedCharacter {
                character: other,
                line: start_line,
                column: start_column,
            }),
        }
    }

    fn skip_whitespace(&mut self) {
        while let Some(&(_, c)) = self.chars.peek() {
            if c.is_whitespace() {
                self.advance_char();
            } else {
                break;
            }
        }
    }

    fn single(&mut self, kind: TokenKind<'a>, start: usize) -> Token<'a> {
        let line = self.line;
        let column = self.column;
        self.advance_char();
        self.token_at(kind, start, line, column)
    }

    fn one_or_two(
        &mut self,
        start: usize,
        single: TokenKind<'a>,
        with_equal: TokenKind<'a>,
    ) -> Token<'a> {
        let line = self.line;
        let column = self.column;
        self.advance_char();
        if matches!(self.chars.peek(), Some(&(_, '='))) {
            self.advance_char();
            self.token_at(with_equal, start, line, column)
        } else {
            self.token_at(single, start, line, column)
        }
    }

    fn read_identifier(&mut self, start: usize, line: usize, column: usize) -> Token<'a> {
        self.advance_char();
        while let Some(&(_, c)) = self.chars.peek() {
            if c.is_ascii_alphanumeric() {
                self.advance_char();
            } else {
                break;
            }
        }

        let end_idx = self.current_index();
        let ident = &self.input[start..end_idx];
        let kind = match ident {
            "if" => TokenKind::If,
            "else" => TokenKind::Else,
            "while" => TokenKind::While,
            "func" => TokenKind::Func,
            "return" => TokenKind::Return,
            _ => TokenKind::Identifier(ident),
        };
        self.token_at(kind, start, line, column)
    }

    fn read_integer(&mut self, start: usize, line: usize, column: usize) -> LexResult<Token<'a>> {
        self.advance_char();
        while let Some(&(_, c)) = self.chars.peek() {
            if c.is_ascii_digit() {
                self.advance_char();
            } else {
                break;
            }
        }

        let end_idx = self.current_index();
        let literal = &self.input[start..end_idx];
        let value = literal
            .parse::<i64>()
            .map_err(|_| LexError::InvalidIntegerLiteral {
                literal: literal.to_string(),
                line,
                column,
            })?;
        Ok(self.token_at(TokenKind::Integer(value), start, line, column))
    }

    fn read_string(&mut self, start: usize, line: usize, column: usize) -> LexResult<Token<'a>> {
        let (_, quote) = self.advance_char().expect("string opener peeked");
        let mut value = String::new();

        while let Some(&(_, c)) = self.chars.peek() {
            if c == quote {
                self.advance_char();
                return Ok(self.token_at(TokenKind::Str(value), start, line, column));
            }
            if c == '\\' {
                self.advance_char();
                let escaped = match self.chars.peek() {
                    Some(&(_, e)) => e,
                    None => break,
                };
                self.advance_char();
                value.push(match escaped {
                    'n' => '\n',
                    't' => '\t',
                    '\\' => '\\',
                    '"' => '"',
                    '\'' => '\'',
                    other => other,
                });
                continue;
            }
            self.advance_char();
            value.push(c);
        }

        Err(LexError::UnterminatedString { line, column })
    }

    fn advance_char(&mut self) -> Option<(usize, char)> {
        let next = self.chars.next();
        if let Some((_, c)) = next {
            if c == '\n' {
                self.line += 1;
                self.column = 1;
            } else {
                self.column += 1;
            }
        }
        next
    }

    fn current_index(&mut self) -> usize {
        self.chars
            .peek()
            .map(|&(idx, _)| idx)
            .unwrap_or(self.input.len())
    }

    fn token_at(
        &mut self,
        kind: TokenKind<'a>,
        start: usize,
        line: usize,
        column: usize,
    ) -> Token<'a> {
        let end = self.current_index();
        Token::new(
            kind,
            Span {
                start,
                end,
                line,
                column,
            },
        )
    }
}

/// Scans the whole input; the returned stream always ends with exactly one
/// [`TokenKind::Eof`]. Any lexical error aborts the scan with no partial
/// stream.
pub fn tokenize(input: &str) -> LexResult<Vec<Token<'_>>> {
    let mut lexer = Lexer::new(input);
    let mut tokens = Vec::new();
    loop {
        let token = lexer.next_token()?;
        let is_eof = matches!(token.kind, TokenKind::Eof);
        tokens.push(token);
        if is_eof {
            break;
        }
    }
    Ok(tokens)
}
