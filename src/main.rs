use std::fs;
use std::io::{self, Read};

use anyhow::{Context, Result, bail};

use tinylang::{bytecode, lexer, parser, token, vm};

fn main() -> Result<()> {
    let mut args = std::env::args().skip(1);
    let mut show_tokens = false;
    let mut show_ast = false;
    let mut show_asm = false;
    let mut input_path: Option<String> = None;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--tokens" => show_tokens = true,
            "--ast" => show_ast = true,
            "--asm" => show_asm = true,
            _ => {
                input_path = Some(arg);
                if args.next().is_some() {
                    bail!("Only one input file is supported");
                }
                break;
            }
        }
    }

    let source = if let Some(path) = input_path {
        fs::read_to_string(&path).with_context(|| format!("Reading {path}"))?
    } else {
        let mut buffer = String::new();
        io::stdin()
            .read_to_string(&mut buffer)
            .context("Reading stdin")?;
        buffer
    };

    let tokens = lexer::tokenize(&source)?;
    if show_tokens {
        print!("{}", token::dump_tokens(&tokens));
        return Ok(());
    }

    let program = parser::parse_tokens(tokens)?;
    if show_ast {
        print!("{program}");
        return Ok(());
    }

    let compiled = bytecode::compile(&program)?;
    if show_asm {
        print!("{}", bytecode::disassemble(&compiled));
        return Ok(());
    }

    let mut vm = vm::VM::new();
    let output = vm.run(&compiled)?;
    if !output.is_empty() {
        print!("{output}");
    }
    Ok(())
}
