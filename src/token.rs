use std::fmt;

/// Byte range plus 1-based line/column of a token in the source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub start: usize,
    pub end: usize,
    pub line: usize,
    pub column: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind<'a> {
    Integer(i64),
    Identifier(&'a str),
    /// Escape-processed string contents, so owned rather than borrowed.
    Str(String),

    // Keywords
    If,
    Else,
    While,
    Func,
    Return,

    // Operators
    Plus,         // +
    Minus,        // -
    Star,         // *
    Slash,        // /
    Greater,      // >
    Less,         // <
    GreaterEqual, // >=
    LessEqual,    // <=
    EqualEqual,   // ==
    NotEqual,     // !=
    Equal,        // =

    // Delimiters
    LParen,    // (
    RParen,    // )
    LBrace,    // {
    RBrace,    // }
    Comma,     // ,
    Semicolon, // ;

    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token<'a> {
    pub kind: TokenKind<'a>,
    pub span: Span,
}

impl<'a> Token<'a> {
    pub fn new(kind: TokenKind<'a>, span: Span) -> Self {
        Self { kind, span }
    }

    /// The source substring this token was derived from.
    pub fn lexeme(&self, source: &'a str) -> &'a str {
        &source[self.span.start..self.span.end]
    }
}

impl<'a> TokenKind<'a> {
    /// Human-readable kind name used in diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            TokenKind::Integer(_) => "number",
            TokenKind::Identifier(_) => "identifier",
            TokenKind::Str(_) => "string",
            TokenKind::If => "'if'",
            TokenKind::Else => "'else'",
            TokenKind::While => "'while'",
            TokenKind::Func => "'func'",
            TokenKind::Return => "'return'",
            TokenKind::Plus => "'+'",
            TokenKind::Minus => "'-'",
            TokenKind::Star => "'*'",
            TokenKind::Slash => "'/'",
            TokenKind::Greater => "'>'",
            TokenKind::Less => "'<'",
            TokenKind::GreaterEqual => "'>='",
            TokenKind::LessEqual => "'<='",
            TokenKind::EqualEqual => "'=='",
            TokenKind::NotEqual => "'!='",
            TokenKind::Equal => "'='",
            TokenKind::LParen => "'('",
            TokenKind::RParen => "')'",
            TokenKind::LBrace => "'{'",
            TokenKind::RBrace => "'}'",
            TokenKind::Comma => "','",
            TokenKind::Semicolon => "';'",
            TokenKind::Eof => "end of input",
        }
    }
}

impl<'a> fmt::Display for TokenKind<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::Integer(value) => write!(f, "number {value}"),
            TokenKind::Identifier(name) => write!(f, "identifier '{name}'"),
            TokenKind::Str(value) => write!(f, "string {value:?}"),
            other => f.write_str(other.name()),
        }
    }
}

/// Renders a token stream as one `line:column kind` entry per line.
///
/// Debug surface only; never consulted by the pipeline itself.
pub fn dump_tokens(tokens: &[Token]) -> String {
    use std::fmt::Write;

    let mut out = String::new();
    for token in tokens {
        let _ = writeln!(
            out,
            "{}:{} {}",
            token.span.line, token.span.column, token.kind
        );
    }
    out
}
