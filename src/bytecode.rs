//! Lowers the AST into a flat instruction array. An instruction's index in
//! `code` is its address; every jump operand is an absolute address resolved
//! by backpatching before the program is handed to the VM.

use std::fmt::Write;

use rustc_hash::FxHashMap;
use thiserror::Error;

use crate::ast::{BinaryOperator, Expression, Program, Statement};

#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    PushInt(i64),
    PushStr(String),
    LoadName(String),
    StoreName(String),
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
    Jump(usize),
    JumpIfFalse(usize),
    Call { name: String, argc: usize },
    Return,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompiledProgram {
    pub code: Vec<Instruction>,
    /// Function name -> entry address, recorded while emitting definitions.
    pub functions: FxHashMap<String, usize>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CompileError {
    #[error("Duplicate function definition '{name}'")]
    DuplicateFunction { name: String },
    #[error("Unresolved jump target at address {address}")]
    UnresolvedJump { address: usize },
}

pub type CompileResult<T> = Result<T, CompileError>;

/// Placeholder operand for a jump whose target is not known yet. Any
/// placeholder surviving to the end of compilation is a [`CompileError`].
const UNRESOLVED: usize = usize::MAX;

struct Emitter {
    code: Vec<Instruction>,
    functions: FxHashMap<String, usize>,
}

impl Emitter {
    fn new() -> Self {
        Self {
            code: Vec::new(),
            functions: FxHashMap::default(),
        }
    }

    /// Appends an instruction and returns its address.
    fn emit(&mut self, instruction: Instruction) -> usize {
        self.code.push(instruction);
        self.code.len() - 1
    }

    /// Rewrites the jump at `at` to target the next emitted address.
    fn patch_to_here(&mut self, at: usize) {
        let target = self.code.len();
        if let Instruction::Jump(operand) | Instruction::JumpIfFalse(operand) = &mut self.code[at]
        {
            *operand = target;
        }
    }

    fn emit_statement(&mut self, statement: &Statement) -> CompileResult<()> {
        match statement {
            Statement::Assign { name, value } => {
                self.emit_expression(value);
                self.emit(Instruction::StoreName(name.clone()));
            }
            Statement::If {
                condition,
                then_body,
                else_body,
            } => {
                self.emit_expression(condition);
                let to_else = self.emit(Instruction::JumpIfFalse(UNRESOLVED));
                self.emit_block(then_body)?;
                if else_body.is_empty() {
                    self.patch_to_here(to_else);
                } else {
                    let to_end = self.emit(Instruction::Jump(UNRESOLVED));
                    self.patch_to_here(to_else);
                    self.emit_block(else_body)?;
                    self.patch_to_here(to_end);
                }
            }
            Statement::While { condition, body } => {
                let loop_start = self.code.len();
                self.emit_expression(condition);
                let to_end = self.emit(Instruction::JumpIfFalse(UNRESOLVED));
                self.emit_block(body)?;
                self.emit(Instruction::Jump(loop_start));
                self.patch_to_here(to_end);
            }
            Statement::FunctionDef { name, body, .. } => {
                // Straight-line execution jumps over the body; calls enter at
                // the recorded address. Parameters are not bound (see ast.rs).
                let skip = self.emit(Instruction::Jump(UNRESOLVED));
                let entry = self.code.len();
                if self.functions.contains_key(name) {
                    return Err(CompileError::DuplicateFunction { name: name.clone() });
                }
                self.functions.insert(name.clone(), entry);
                self.emit_block(body)?;
                // Bodies that fall off the end still return to the caller.
                self.emit(Instruction::Return);
                self.patch_to_here(skip);
            }
            Statement::Return(value) => {
                self.emit_expression(value);
                self.emit(Instruction::Return);
            }
            Statement::Expr(expr) => {
                self.emit_expression(expr);
            }
        }
        Ok(())
    }

    fn emit_block(&mut self, statements: &[Statement]) -> CompileResult<()> {
        for statement in statements {
            self.emit_statement(statement)?;
        }
        Ok(())
    }

    fn emit_expression(&mut self, expr: &Expression) {
        match expr {
            Expression::Integer(value) => {
                self.emit(Instruction::PushInt(*value));
            }
            Expression::Str(value) => {
                self.emit(Instruction::PushStr(value.clone()));
            }
            Expression::Identifier(name) => {
                self.emit(Instruction::LoadName(name.clone()));
            }
            Expression::BinaryOp { left, op, right } => {
                self.emit_expression(left);
                self.emit_expression(right);
                self.emit(match op {
                    BinaryOperator::Add => Instruction::Add,
                    BinaryOperator::Sub => Instruction::Sub,
                    BinaryOperator::Mul => Instruction::Mul,
                    BinaryOperator::Div => Instruction::Div,
                    BinaryOperator::Greater => Instruction::Greater,
                    BinaryOperator::Less => Instruction::Less,
                    BinaryOperator::GreaterEqual => Instruction::GreaterEqual,
                    BinaryOperator::LessEqual => Instruction::LessEqual,
                    BinaryOperator::Equal => Instruction::Equal,
                    BinaryOperator::NotEqual => Instruction::NotEqual,
                });
            }
            Expression::Call { name, args } => {
                for arg in args {
                    self.emit_expression(arg);
                }
                self.emit(Instruction::Call {
                    name: name.clone(),
                    argc: args.len(),
                });
            }
        }
    }

    fn finish(self) -> CompileResult<CompiledProgram> {
        // A jump may target one past the last instruction (fall off the end),
        // never further.
        for (address, instruction) in self.code.iter().enumerate() {
            if let Instruction::Jump(target) | Instruction::JumpIfFalse(target) = instruction {
                if *target > self.code.len() {
                    return Err(CompileError::UnresolvedJump { address });
                }
            }
        }
        Ok(CompiledProgram {
            code: self.code,
            functions: self.functions,
        })
    }
}

pub fn compile(program: &Program) -> CompileResult<CompiledProgram> {
    let mut emitter = Emitter::new();
    emitter.emit_block(&program.statements)?;
    emitter.finish()
}

/// Renders a compiled program as a human-readable listing. Debug surface
/// only; execution never consults it.
pub fn disassemble(program: &CompiledProgram) -> String {
    let mut out = String::new();
    for (address, instruction) in program.code.iter().enumerate() {
        let _ = write!(out, "{address:04}: ");
        let _ = match instruction {
            Instruction::PushInt(value) => writeln!(out, "PUSH_INT {value}"),
            Instruction::PushStr(value) => writeln!(out, "PUSH_STR {value:?}"),
            Instruction::LoadName(name) => writeln!(out, "LOAD_NAME {name}"),
            Instruction::StoreName(name) => writeln!(out, "STORE_NAME {name}"),
            Instruction::Add => writeln!(out, "ADD"),
            Instruction::Sub => writeln!(out, "SUB"),
            Instruction::Mul => writeln!(out, "MUL"),
            Instruction::Div => writeln!(out, "DIV"),
            Instruction::Greater => writeln!(out, "GT"),
            Instruction::Less => writeln!(out, "LT"),
            Instruction::GreaterEqual => writeln!(out, "GTE"),
            Instruction::LessEqual => writeln!(out, "LTE"),
            Instruction::Equal => writeln!(out, "EQ"),
            Instruction::NotEqual => writeln!(out, "NEQ"),
            Instruction::Jump(target) => writeln!(out, "JMP {target}"),
            Instruction::JumpIfFalse(target) => writeln!(out, "JMP_IF_FALSE {target}"),
            Instruction::Call { name, argc } => writeln!(out, "CALL {name} {argc}"),
            Instruction::Return => writeln!(out, "RET"),
        };
    }

    let mut entries: Vec<_> = program.functions.iter().collect();
    entries.sort_by_key(|(_, address)| **address);
    for (name, address) in entries {
        let _ = writeln!(out, "func {name} @ {address:04}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::tokenize;
    use crate::parser::parse_tokens;

    fn compile_source(input: &str) -> CompiledProgram {
        let tokens = tokenize(input).expect("tokenize should succeed");
        let program = parse_tokens(tokens).expect("parse should succeed");
        compile(&program).expect("compile should succeed")
    }

    #[test]
    fn lowers_assignment_post_order() {
        let compiled = compile_source("x = 5 + 3;");
        assert_eq!(
            compiled.code,
            vec![
                Instruction::PushInt(5),
                Instruction::PushInt(3),
                Instruction::Add,
                Instruction::StoreName("x".to_string()),
            ]
        );
        assert!(compiled.functions.is_empty());
    }

    #[test]
    fn if_else_jumps_target_real_addresses() {
        let compiled = compile_source("if (1 < 2) { print(1); } else { print(2); }");
        assert_eq!(
            compiled.code,
            vec![
                Instruction::PushInt(1),
                Instruction::PushInt(2),
                Instruction::Less,
                Instruction::JumpIfFalse(7),
                Instruction::PushInt(1),
                Instruction::Call {
                    name: "print".to_string(),
                    argc: 1,
                },
                Instruction::Jump(9),
                Instruction::PushInt(2),
                Instruction::Call {
                    name: "print".to_string(),
                    argc: 1,
                },
            ]
        );
    }

    #[test]
    fn while_loop_jumps_back_to_condition() {
        let compiled = compile_source("i = 0; while (i < 3) { i = i + 1; }");
        assert_eq!(
            compiled.code,
            vec![
                Instruction::PushInt(0),
                Instruction::StoreName("i".to_string()),
                Instruction::LoadName("i".to_string()),
                Instruction::PushInt(3),
                Instruction::Less,
                Instruction::JumpIfFalse(11),
                Instruction::LoadName("i".to_string()),
                Instruction::PushInt(1),
                Instruction::Add,
                Instruction::StoreName("i".to_string()),
                Instruction::Jump(2),
            ]
        );
    }

    #[test]
    fn nested_control_flow_backpatches_each_branch() {
        // Inner and outer jumps must resolve independently.
        let compiled = compile_source("while (1) { if (2) {} }");
        assert_eq!(
            compiled.code,
            vec![
                Instruction::PushInt(1),
                Instruction::JumpIfFalse(5),
                Instruction::PushInt(2),
                Instruction::JumpIfFalse(4),
                Instruction::Jump(0),
            ]
        );
    }

    #[test]
    fn function_definition_registers_entry_and_skips_body() {
        let compiled = compile_source("func seven() { return 7; } seven();");
        assert_eq!(
            compiled.code,
            vec![
                Instruction::Jump(4),
                Instruction::PushInt(7),
                Instruction::Return,
                Instruction::Return,
                Instruction::Call {
                    name: "seven".to_string(),
                    argc: 0,
                },
            ]
        );
        assert_eq!(compiled.functions.get("seven"), Some(&1));
    }

    #[test]
    fn call_arguments_emit_in_order_with_argc() {
        let compiled = compile_source("print(1, 2 + 3);");
        assert_eq!(
            compiled.code,
            vec![
                Instruction::PushInt(1),
                Instruction::PushInt(2),
                Instruction::PushInt(3),
                Instruction::Add,
                Instruction::Call {
                    name: "print".to_string(),
                    argc: 2,
                },
            ]
        );
    }

    #[test]
    fn empty_program_emits_no_instructions() {
        let compiled = compile_source("");
        assert!(compiled.code.is_empty());
    }

    #[test]
    fn empty_function_body_is_a_lone_return() {
        let compiled = compile_source("func nop() {}");
        assert_eq!(
            compiled.code,
            vec![Instruction::Jump(2), Instruction::Return]
        );
        assert_eq!(compiled.functions.get("nop"), Some(&1));
    }

    #[test]
    fn duplicate_function_names_are_rejected() {
        let tokens = tokenize("func f() {} func f() {}").expect("tokenize");
        let program = parse_tokens(tokens).expect("parse");
        assert_eq!(
            compile(&program).expect_err("expected compile failure"),
            CompileError::DuplicateFunction {
                name: "f".to_string()
            }
        );
    }

    #[test]
    fn compiling_twice_yields_identical_code() {
        let tokens = tokenize("i = 0; while (i < 3) { print(i); i = i + 1; }").expect("tokenize");
        let program = parse_tokens(tokens).expect("parse");
        assert_eq!(
            compile(&program).expect("first"),
            compile(&program).expect("second")
        );
    }

    #[test]
    fn disassembly_lists_addresses_and_functions() {
        let compiled = compile_source("func seven() { return 7; } seven();");
        let listing = disassemble(&compiled);
        assert!(listing.contains("0000: JMP 4"));
        assert!(listing.contains("0001: PUSH_INT 7"));
        assert!(listing.contains("0004: CALL seven 0"));
        assert!(listing.contains("func seven @ 0001"));
    }
}
