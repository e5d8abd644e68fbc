//! Syntax tree produced by the parser and consumed by the bytecode emitter.
//!
//! Nodes own their children exclusively; the tree has no sharing and no
//! cycles. Blocks are plain statement vectors, so an empty block is an empty
//! vec.

use std::fmt;

#[derive(Debug, PartialEq, Clone)]
pub enum Expression {
    Integer(i64),
    Str(String),
    Identifier(String),
    BinaryOp {
        left: Box<Expression>,
        op: BinaryOperator,
        right: Box<Expression>,
    },
    Call {
        name: String,
        args: Vec<Expression>,
    },
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum BinaryOperator {
    Add,
    Sub,
    Mul,
    Div,
    Greater,
    Less,
    GreaterEqual,
    LessEqual,
    Equal,
    NotEqual,
}

impl BinaryOperator {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOperator::Add => "+",
            BinaryOperator::Sub => "-",
            BinaryOperator::Mul => "*",
            BinaryOperator::Div => "/",
            BinaryOperator::Greater => ">",
            BinaryOperator::Less => "<",
            BinaryOperator::GreaterEqual => ">=",
            BinaryOperator::LessEqual => "<=",
            BinaryOperator::Equal => "==",
            BinaryOperator::NotEqual => "!=",
        }
    }
}

#[derive(Debug, PartialEq, Clone)]
pub enum Statement {
    FunctionDef {
        name: String,
        /// Parameter names are parsed and kept for inspection, but the
        /// emitter and VM do not bind them; the calling convention only
        /// pushes argument values.
        params: Vec<String>,
        body: Vec<Statement>,
    },
    Assign {
        name: String,
        value: Expression,
    },
    If {
        condition: Expression,
        then_body: Vec<Statement>,
        else_body: Vec<Statement>,
    },
    While {
        condition: Expression,
        body: Vec<Statement>,
    },
    Return(Expression),
    Expr(Expression),
}

#[derive(Debug, PartialEq, Clone)]
pub struct Program {
    pub statements: Vec<Statement>,
}

// The Display impls render parseable source text, so an AST can be inspected
// and fed back through the parser. The grammar is a single left-associative
// precedence level with no grouping parentheses, which is why none are
// printed: a parsed tree is always left-leaning and re-parses to itself.

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expression::Integer(value) => write!(f, "{value}"),
            Expression::Str(value) => write_string_literal(f, value),
            Expression::Identifier(name) => f.write_str(name),
            Expression::BinaryOp { left, op, right } => {
                write!(f, "{left} {} {right}", op.symbol())
            }
            Expression::Call { name, args } => {
                write!(f, "{name}(")?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                f.write_str(")")
            }
        }
    }
}

fn write_string_literal(f: &mut fmt::Formatter<'_>, value: &str) -> fmt::Result {
    f.write_str("\"")?;
    for c in value.chars() {
        match c {
            '\n' => f.write_str("\\n")?,
            '\t' => f.write_str("\\t")?,
            '\\' => f.write_str("\\\\")?,
            '"' => f.write_str("\\\"")?,
            other => write!(f, "{other}")?,
        }
    }
    f.write_str("\"")
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_statement(f, self, 0)
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for statement in &self.statements {
            write_statement(f, statement, 0)?;
        }
        Ok(())
    }
}

fn write_statement(f: &mut fmt::Formatter<'_>, statement: &Statement, indent: usize) -> fmt::Result {
    let pad = "    ".repeat(indent);
    match statement {
        Statement::FunctionDef { name, params, body } => {
            write!(f, "{pad}func {name}({})", params.join(", "))?;
            f.write_str(" ")?;
            write_block(f, body, indent)?;
            f.write_str("\n")
        }
        Statement::Assign { name, value } => writeln!(f, "{pad}{name} = {value};"),
        Statement::If {
            condition,
            then_body,
            else_body,
        } => {
            write!(f, "{pad}if ({condition}) ")?;
            write_block(f, then_body, indent)?;
            if !else_body.is_empty() {
                f.write_str(" else ")?;
                write_block(f, else_body, indent)?;
            }
            f.write_str("\n")
        }
        Statement::While { condition, body } => {
            write!(f, "{pad}while ({condition}) ")?;
            write_block(f, body, indent)?;
            f.write_str("\n")
        }
        Statement::Return(value) => writeln!(f, "{pad}return {value};"),
        Statement::Expr(expr) => writeln!(f, "{pad}{expr};"),
    }
}

fn write_block(f: &mut fmt::Formatter<'_>, body: &[Statement], indent: usize) -> fmt::Result {
    if body.is_empty() {
        return f.write_str("{}");
    }
    f.write_str("{\n")?;
    for statement in body {
        write_statement(f, statement, indent + 1)?;
    }
    write!(f, "{}}}", "    ".repeat(indent))
}
