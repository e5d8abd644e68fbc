use rustc_hash::FxHashMap;
use thiserror::Error;

use crate::bytecode::{CompiledProgram, Instruction};

pub type VmResult<T> = Result<T, VmError>;

/// Caps for the growable runtime stacks. Exceeding one is a resource error,
/// not undefined behavior.
const OPERAND_STACK_LIMIT: usize = 4096;
const CALL_STACK_LIMIT: usize = 256;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VmError {
    #[error("Undefined variable '{name}'")]
    UndefinedVariable { name: String },
    #[error("Unknown function '{name}'")]
    UndefinedFunction { name: String },
    #[error("Division by zero")]
    DivisionByZero,
    #[error("Expected integer, got {got}")]
    ExpectedIntegerType { got: String },
    #[error("Stack underflow")]
    StackUnderflow,
    #[error("Stack overflow: more than {limit} operands")]
    StackOverflow { limit: usize },
    #[error("Call stack underflow")]
    CallStackUnderflow,
    #[error("Call stack overflow: more than {limit} frames")]
    CallStackOverflow { limit: usize },
    #[error("Invalid jump target {target}")]
    InvalidJumpTarget { target: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Integer(i64),
    Str(String),
}

impl Value {
    fn as_int(&self) -> VmResult<i64> {
        match self {
            Value::Integer(value) => Ok(*value),
            Value::Str(_) => Err(VmError::ExpectedIntegerType {
                got: format!("{self:?}"),
            }),
        }
    }

    fn to_output(&self) -> String {
        match self {
            Value::Integer(value) => value.to_string(),
            Value::Str(value) => value.clone(),
        }
    }
}

/// Stack machine executing one compiled program. All state is owned by the
/// instance, so independent programs run on independent VMs with no sharing.
pub struct VM {
    stack: Vec<Value>,
    globals: FxHashMap<String, Value>,
    call_stack: Vec<usize>,
    output: String,
}

impl VM {
    pub fn new() -> Self {
        Self {
            stack: Vec::new(),
            globals: FxHashMap::default(),
            call_stack: Vec::new(),
            output: String::new(),
        }
    }

    /// Fetch-decode-execute from address 0 until the counter passes the last
    /// instruction. Returns everything `print` produced.
    pub fn run(&mut self, program: &CompiledProgram) -> VmResult<String> {
        let code = &program.code;
        let mut ip = 0;
        while ip < code.len() {
            let instruction = &code[ip];
            ip += 1;
            match instruction {
                Instruction::PushInt(value) => self.push(Value::Integer(*value))?,
                Instruction::PushStr(value) => self.push(Value::Str(value.clone()))?,
                Instruction::LoadName(name) => {
                    let value = self
                        .globals
                        .get(name)
                        .cloned()
                        .ok_or_else(|| VmError::UndefinedVariable { name: name.clone() })?;
                    self.push(value)?;
                }
                Instruction::StoreName(name) => {
                    let value = self.pop()?;
                    self.globals.insert(name.clone(), value);
                }
                Instruction::Add => {
                    let (left, right) = self.pop_ints()?;
                    self.push(Value::Integer(left.wrapping_add(right)))?;
                }
                Instruction::Sub => {
                    let (left, right) = self.pop_ints()?;
                    self.push(Value::Integer(left.wrapping_sub(right)))?;
                }
                Instruction::Mul => {
                    let (left, right) = self.pop_ints()?;
                    self.push(Value::Integer(left.wrapping_mul(right)))?;
                }
                Instruction::Div => {
                    let (left, right) = self.pop_ints()?;
                    if right == 0 {
                        return Err(VmError::DivisionByZero);
                    }
                    self.push(Value::Integer(left.wrapping_div(right)))?;
                }
                Instruction::Greater => self.compare(|left, right| left > right)?,
                Instruction::Less => self.compare(|left, right| left < right)?,
                Instruction::GreaterEqual => self.compare(|left, right| left >= right)?,
                Instruction::LessEqual => self.compare(|left, right| left <= right)?,
                Instruction::Equal => self.compare(|left, right| left == right)?,
                Instruction::NotEqual => self.compare(|left, right| left != right)?,
                Instruction::Jump(target) => {
                    ip = checked_target(*target, code.len())?;
                }
                Instruction::JumpIfFalse(target) => {
                    let condition = self.pop()?.as_int()?;
                    if condition == 0 {
                        ip = checked_target(*target, code.len())?;
                    }
                }
                Instruction::Call { name, argc } => {
                    if name == "print" {
                        self.print(*argc)?;
                    } else {
                        let entry = *program
                            .functions
                            .get(name)
                            .ok_or_else(|| VmError::UndefinedFunction { name: name.clone() })?;
                        if self.call_stack.len() >= CALL_STACK_LIMIT {
                            return Err(VmError::CallStackOverflow {
                                limit: CALL_STACK_LIMIT,
                            });
                        }
                        self.call_stack.push(ip);
                        ip = checked_target(entry, code.len())?;
                    }
                }
                Instruction::Return => {
                    ip = self.call_stack.pop().ok_or(VmError::CallStackUnderflow)?;
                }
            }
        }
        Ok(std::mem::take(&mut self.output))
    }

    /// Final value of a global, for inspection after a run.
    pub fn global(&self, name: &str) -> Option<&Value> {
        self.globals.get(name)
    }

    fn print(&mut self, argc: usize) -> VmResult<()> {
        let mut values = Vec::with_capacity(argc);
        for _ in 0..argc {
            values.push(self.pop()?);
        }
        values.reverse();
        let rendered: Vec<_> = values.iter().map(Value::to_output).collect();
        self.output.push_str(&rendered.join(" "));
        self.output.push('\n');
        Ok(())
    }

    fn compare(&mut self, op: impl Fn(i64, i64) -> bool) -> VmResult<()> {
        let (left, right) = self.pop_ints()?;
        self.push(Value::Integer(op(left, right) as i64))
    }

    fn push(&mut self, value: Value) -> VmResult<()> {
        if self.stack.len() >= OPERAND_STACK_LIMIT {
            return Err(VmError::StackOverflow {
                limit: OPERAND_STACK_LIMIT,
            });
        }
        self.stack.push(value);
        Ok(())
    }

    fn pop(&mut self) -> VmResult<Value> {
        self.stack.pop().ok_or(VmError::StackUnderflow)
    }

    /// Pops the right operand first, then the left: operands were pushed in
    /// source order.
    fn pop_ints(&mut self) -> VmResult<(i64, i64)> {
        let right = self.pop()?.as_int()?;
        let left = self.pop()?.as_int()?;
        Ok((left, right))
    }
}

impl Default for VM {
    fn default() -> Self {
        Self::new()
    }
}

fn checked_target(target: usize, len: usize) -> VmResult<usize> {
    // compile() never produces an out-of-range target, but hand-built
    // programs can.
    if target > len {
        Err(VmError::InvalidJumpTarget { target })
    } else {
        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::compile;
    use crate::lexer::tokenize;
    use crate::parser::parse_tokens;
    use indoc::indoc;

    fn run(input: &str) -> (VmResult<String>, VM) {
        let tokens = tokenize(input).expect("tokenize should succeed");
        let program = parse_tokens(tokens).expect("parse should succeed");
        let compiled = compile(&program).expect("compile should succeed");
        let mut vm = VM::new();
        let result = vm.run(&compiled);
        (result, vm)
    }

    fn run_ok(input: &str) -> String {
        let (result, _) = run(input);
        result.expect("run should succeed")
    }

    fn run_err(input: &str) -> VmError {
        let (result, _) = run(input);
        result.expect_err("expected runtime failure")
    }

    #[test]
    fn assignment_updates_global_without_output() {
        let (result, vm) = run("x = 5 + 3;");
        assert_eq!(result.expect("run should succeed"), "");
        assert_eq!(vm.global("x"), Some(&Value::Integer(8)));
    }

    #[test]
    fn print_writes_value_and_newline() {
        assert_eq!(run_ok("print(7);"), "7\n");
    }

    #[test]
    fn print_separates_arguments_with_spaces() {
        assert_eq!(run_ok("print(1, 2 + 3, 4);"), "1 5 4\n");
    }

    #[test]
    fn print_renders_strings() {
        assert_eq!(run_ok(r#"print("penguin");"#), "penguin\n");
        assert_eq!(run_ok(r#"s = "hi"; print(s, 1);"#), "hi 1\n");
    }

    #[test]
    fn if_takes_then_branch_on_true() {
        assert_eq!(
            run_ok("if (1 < 2) { print(1); } else { print(2); }"),
            "1\n"
        );
    }

    #[test]
    fn if_takes_else_branch_on_false() {
        assert_eq!(
            run_ok("if (2 < 1) { print(1); } else { print(2); }"),
            "2\n"
        );
    }

    #[test]
    fn nonzero_condition_is_truthy() {
        assert_eq!(run_ok("if (0 - 1) { print(1); }"), "1\n");
        assert_eq!(run_ok("if (0) { print(1); }"), "");
    }

    #[test]
    fn while_loop_counts() {
        assert_eq!(
            run_ok("i = 0; while (i < 3) { print(i); i = i + 1; }"),
            "0\n1\n2\n"
        );
    }

    #[test]
    fn function_call_returns_value_to_caller() {
        let (result, vm) = run("func seven() { return 7; } x = seven();");
        assert_eq!(result.expect("run should succeed"), "");
        assert_eq!(vm.global("x"), Some(&Value::Integer(7)));
    }

    #[test]
    fn functions_share_the_global_table() {
        let input = indoc! {"
            func bump() {
                total = total + 1;
            }
            total = 0;
            bump();
            bump();
            print(total);
        "};
        assert_eq!(run_ok(input), "2\n");
    }

    #[test]
    fn function_body_is_skipped_until_called() {
        assert_eq!(run_ok("func shout() { print(9); } print(1);"), "1\n");
    }

    #[test]
    fn division_by_zero_halts_with_no_output() {
        assert_eq!(run_err("x = 1 / 0; print(1);"), VmError::DivisionByZero);
    }

    #[test]
    fn undefined_variable_is_reported_by_name() {
        assert_eq!(
            run_err("x = y + 1;"),
            VmError::UndefinedVariable {
                name: "y".to_string()
            }
        );
    }

    #[test]
    fn undefined_function_is_reported_by_name() {
        assert_eq!(
            run_err("missing();"),
            VmError::UndefinedFunction {
                name: "missing".to_string()
            }
        );
    }

    #[test]
    fn top_level_return_underflows_the_call_stack() {
        assert_eq!(run_err("return 1;"), VmError::CallStackUnderflow);
    }

    #[test]
    fn string_operand_in_arithmetic_is_a_type_error() {
        assert!(matches!(
            run_err(r#"x = "a" + 1;"#),
            VmError::ExpectedIntegerType { .. }
        ));
    }

    #[test]
    fn runaway_recursion_overflows_the_call_stack() {
        assert_eq!(
            run_err("func f() { f(); } f();"),
            VmError::CallStackOverflow { limit: 256 }
        );
    }

    #[test]
    fn repeated_runs_are_deterministic() {
        let input = "i = 0; while (i < 5) { i = i + 2; print(i); }";
        let (first_out, first_vm) = run(input);
        let (second_out, second_vm) = run(input);
        assert_eq!(
            first_out.expect("first run"),
            second_out.expect("second run")
        );
        assert_eq!(first_vm.global("i"), second_vm.global("i"));
    }

    #[test]
    fn out_of_range_jump_is_rejected() {
        let program = CompiledProgram {
            code: vec![Instruction::Jump(9)],
            functions: Default::default(),
        };
        assert_eq!(
            VM::new().run(&program).expect_err("expected failure"),
            VmError::InvalidJumpTarget { target: 9 }
        );
    }
}
