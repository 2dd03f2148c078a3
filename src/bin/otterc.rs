//! Standalone compiler used by the eval fallback tier.
//!
//! `otterc --emit-bytecode <source>` writes the encoded program to stdout.
//! Parse errors are rendered to stderr and exit with status 1; bad arguments
//! exit with status 2.

use std::io::Write;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use otterc_utils::errors::{Diagnostic, emit_diagnostics};
use otterc_utils::logger;
use tracing::debug;

const SOURCE_ID: &str = "<eval>";

#[derive(Parser, Debug)]
#[command(name = "otterc", version, about = "Compile an OtterLang expression to eval bytecode")]
struct OttercCli {
    #[arg(long, required = true)]
    /// Write the encoded bytecode program to stdout.
    emit_bytecode: bool,

    #[arg(allow_hyphen_values = true)]
    /// Expression source text.
    source: String,
}

fn main() -> ExitCode {
    logger::init_logging();
    let cli = OttercCli::parse();

    match compile(&cli.source) {
        Ok(Some(bytes)) => match write_program(&bytes) {
            Ok(()) => ExitCode::SUCCESS,
            Err(err) => {
                eprintln!("{} {err:#}", "error:".red().bold());
                ExitCode::FAILURE
            }
        },
        Ok(None) => ExitCode::FAILURE,
        Err(err) => {
            eprintln!("{} {err:#}", "error:".red().bold());
            ExitCode::FAILURE
        }
    }
}

/// `Ok(None)` means the source did not parse and diagnostics were emitted.
fn compile(source: &str) -> Result<Option<Vec<u8>>> {
    let expr = match otterc_parser::parse(source) {
        Ok(expr) => expr,
        Err(errors) => {
            let diagnostics: Vec<Diagnostic> = errors
                .iter()
                .map(|error| error.to_diagnostic(SOURCE_ID))
                .collect();
            emit_diagnostics(&diagnostics, source);
            return Ok(None);
        }
    };

    let program = otterc_bytecode::compile(&expr);
    debug!(
        constants = program.constants.len(),
        instructions = program.code.len(),
        "compiled expression"
    );
    let bytes = otterc_bytecode::encode(&program).context("failed to encode program")?;
    Ok(Some(bytes))
}

fn write_program(bytes: &[u8]) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(bytes).context("failed to write program")?;
    stdout.flush().context("failed to flush stdout")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_literal_is_a_source_not_a_flag() {
        let cli = OttercCli::parse_from(["otterc", "--emit-bytecode", "-1"]);
        assert!(cli.emit_bytecode);
        assert_eq!(cli.source, "-1");
    }

    #[test]
    fn flag_is_required() {
        assert!(OttercCli::try_parse_from(["otterc", "1 + 2"]).is_err());
    }

    #[test]
    fn compiled_bytes_decode_back() {
        let bytes = compile("(1 + 2) * 3").unwrap().unwrap();
        let program = otterc_bytecode::decode(&bytes).unwrap();
        let value = otterc_bytecode::Vm::new().run(&program).unwrap();
        assert_eq!(value, otterc_bytecode::Value::Int(9));
    }

    #[test]
    fn parse_error_yields_no_program() {
        assert!(compile("1 +").unwrap().is_none());
    }
}
