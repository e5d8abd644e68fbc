use std::fs;
use std::path::Path;

use anyhow::{Context, Result, ensure};

use tinylang::bytecode::compile;
use tinylang::lexer::tokenize;
use tinylang::parser::parse_tokens;
use tinylang::vm::VM;

fn run_pipeline(source: &str) -> Result<String> {
    let tokens = tokenize(source)?;
    let program = parse_tokens(tokens)?;
    let compiled = compile(&program)?;
    let mut vm = VM::new();
    Ok(vm.run(&compiled)?)
}

fn normalize_output(output: &str) -> String {
    output.replace("\r\n", "\n").trim_end().to_string()
}

/// Runs every `tests/programs/*.tl` fixture through the whole pipeline.
/// A sibling `.out` file holds the expected output; a sibling `.err` file
/// holds a substring the failure message must contain.
#[test]
fn runs_programs_against_expectations() -> Result<()> {
    let programs_dir = Path::new("tests/programs");
    let mut programs = Vec::new();

    for entry in
        fs::read_dir(programs_dir).with_context(|| format!("Reading {}", programs_dir.display()))?
    {
        let path = entry?.path();
        if path.extension().and_then(|ext| ext.to_str()) == Some("tl") {
            programs.push(path);
        }
    }

    ensure!(
        !programs.is_empty(),
        "No .tl programs found in {}",
        programs_dir.display()
    );
    programs.sort();

    for path in programs {
        let source =
            fs::read_to_string(&path).with_context(|| format!("Reading {}", path.display()))?;

        let expected_error_path = path.with_extension("err");
        if expected_error_path.exists() {
            let expected_error = fs::read_to_string(&expected_error_path)
                .with_context(|| format!("Reading {}", expected_error_path.display()))?;
            let expected_error = expected_error.trim();

            let result = run_pipeline(&source);
            ensure!(result.is_err(), "Expected error for {}", path.display());
            let error = result.err().unwrap().to_string();
            ensure!(
                error.contains(expected_error),
                "Expected error containing '{expected_error}' for {}, got '{error}'",
                path.display()
            );
            continue;
        }

        let expected_path = path.with_extension("out");
        let expected = fs::read_to_string(&expected_path)
            .with_context(|| format!("Reading {}", expected_path.display()))?;
        let output = run_pipeline(&source)
            .with_context(|| format!("Pipeline failed for {}", path.display()))?;
        assert_eq!(
            normalize_output(&output),
            normalize_output(&expected),
            "Output mismatch for {}",
            path.display()
        );
    }

    Ok(())
}
