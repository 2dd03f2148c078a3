//! Two-tier compilation: a fixed table of recognised sources compiled in
//! process, then the external `otterc` compiler for everything else.

use std::collections::HashMap;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use ahash::RandomState;
use duct::ReaderHandle;
use otterc_ast::{BinaryOp, CompareOp, Expr, UnaryOp};
use otterc_bytecode::DecodeError;
use thiserror::Error;
use tracing::{debug, warn};

use super::artifact::{CompileTier, CompiledProgram};
use super::config::CompilerConfig;

/// Flag that asks the compiler to write an encoded program to stdout.
pub const EMIT_BYTECODE_FLAG: &str = "--emit-bytecode";

/// Most compiler output accepted from one run.
pub const MAX_COMPILER_OUTPUT: usize = 1024 * 1024;

/// The fast tier does not know this source. Always recovered by falling back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("source is not supported by the in-process tier")]
pub struct NotSupportedLocally;

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("failed to run compiler `{}`: {source}", .tool.display())]
    SubprocessSpawnFailure {
        tool: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(
        "compiler `{}` exited with {}{}",
        .tool.display(),
        describe_code(.code),
        describe_stderr(.stderr)
    )]
    SubprocessNonZeroExit {
        tool: PathBuf,
        code: Option<i32>,
        stderr: String,
    },
    #[error("compiler `{}` did not finish within {timeout:?}", .tool.display())]
    SubprocessTimeout { tool: PathBuf, timeout: Duration },
    #[error("compiler output exceeds {limit} bytes")]
    OutputTooLarge { limit: usize },
    #[error("failed to decode compiler output: {0}")]
    ArtifactDecodeFailure(#[from] DecodeError),
}

fn describe_code(code: &Option<i32>) -> String {
    match *code {
        Some(code) => format!("status {code}"),
        None => "no status (terminated by signal)".to_string(),
    }
}

fn describe_stderr(stderr: &str) -> String {
    if stderr.is_empty() {
        String::new()
    } else {
        format!(": {stderr}")
    }
}

type Builder = fn() -> Expr;

/// In-process tier: exact-match lookup of a handful of common sources.
#[derive(Debug, Clone)]
pub struct FastTier {
    patterns: HashMap<&'static str, Builder, RandomState>,
}

impl FastTier {
    pub fn builtin() -> Self {
        let mut patterns = HashMap::with_hasher(RandomState::new());
        for &(source, build) in BUILTIN_PATTERNS {
            patterns.insert(source, build);
        }
        Self { patterns }
    }

    pub fn recognizes(&self, source: &str) -> bool {
        self.patterns.contains_key(source)
    }

    /// Recognised sources in sorted order.
    pub fn patterns(&self) -> Vec<&'static str> {
        let mut patterns: Vec<_> = self.patterns.keys().copied().collect();
        patterns.sort_unstable();
        patterns
    }

    /// Drop a pattern so that source takes the fallback route.
    pub fn remove(&mut self, source: &str) -> bool {
        self.patterns.remove(source).is_some()
    }

    pub fn compile(&self, source: &str) -> Result<CompiledProgram, NotSupportedLocally> {
        let started = Instant::now();
        let build = self.patterns.get(source).ok_or(NotSupportedLocally)?;
        let program = otterc_bytecode::compile(&build());
        Ok(CompiledProgram::new(
            program,
            CompileTier::FastTier,
            started.elapsed(),
        ))
    }
}

impl Default for FastTier {
    fn default() -> Self {
        Self::builtin()
    }
}

const BUILTIN_PATTERNS: &[(&str, Builder)] = &[
    ("0", zero),
    ("1", one),
    ("True", true_literal),
    ("False", false_literal),
    ("None", none_literal),
    ("1 + 1", one_plus_one),
    ("1 + 2", one_plus_two),
    ("2 * 3", two_times_three),
    ("1 + 2 * 3", one_plus_two_times_three),
    ("(1 + 2) * 3", parenthesised_sum_times_three),
    ("10 / 2", ten_over_two),
    ("2 ** 10", two_to_the_tenth),
    ("-1", negative_one),
    ("not True", not_true),
    ("1 < 2", one_less_than_two),
];

fn zero() -> Expr {
    Expr::int(0)
}

fn one() -> Expr {
    Expr::int(1)
}

fn true_literal() -> Expr {
    Expr::bool(true)
}

fn false_literal() -> Expr {
    Expr::bool(false)
}

fn none_literal() -> Expr {
    Expr::none()
}

fn one_plus_one() -> Expr {
    Expr::binary(Expr::int(1), BinaryOp::Add, Expr::int(1))
}

fn one_plus_two() -> Expr {
    Expr::binary(Expr::int(1), BinaryOp::Add, Expr::int(2))
}

fn two_times_three() -> Expr {
    Expr::binary(Expr::int(2), BinaryOp::Mul, Expr::int(3))
}

fn one_plus_two_times_three() -> Expr {
    Expr::binary(Expr::int(1), BinaryOp::Add, two_times_three())
}

fn parenthesised_sum_times_three() -> Expr {
    Expr::binary(one_plus_two(), BinaryOp::Mul, Expr::int(3))
}

fn ten_over_two() -> Expr {
    Expr::binary(Expr::int(10), BinaryOp::Div, Expr::int(2))
}

fn two_to_the_tenth() -> Expr {
    Expr::binary(Expr::int(2), BinaryOp::Pow, Expr::int(10))
}

fn negative_one() -> Expr {
    Expr::unary(UnaryOp::Neg, Expr::int(1))
}

fn not_true() -> Expr {
    Expr::unary(UnaryOp::Not, Expr::bool(true))
}

fn one_less_than_two() -> Expr {
    Expr::compare(Expr::int(1), CompareOp::Lt, Expr::int(2))
}

/// Out-of-process tier. Runs `<tool> --emit-bytecode <source>` and decodes
/// whatever the tool writes to stdout.
#[derive(Debug, Clone)]
pub struct FallbackCompiler {
    tool: PathBuf,
    timeout: Option<Duration>,
}

impl FallbackCompiler {
    pub fn new(config: &CompilerConfig) -> Self {
        Self {
            tool: config.tool.clone(),
            timeout: config.timeout(),
        }
    }

    pub fn tool(&self) -> &Path {
        &self.tool
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn compile(&self, source: &str) -> Result<CompiledProgram, CompileError> {
        let started = Instant::now();
        let bytes = self.run(source)?;
        let program = otterc_bytecode::decode(&bytes)?;
        Ok(CompiledProgram::new(
            program,
            CompileTier::Fallback,
            started.elapsed(),
        ))
    }

    fn run(&self, source: &str) -> Result<Vec<u8>, CompileError> {
        debug!(tool = %self.tool.display(), "spawning fallback compiler");
        let reader = duct::cmd(self.tool.as_path(), [EMIT_BYTECODE_FLAG, source])
            .stdin_null()
            .stderr_capture()
            .unchecked()
            .reader()
            .map_err(|err| self.spawn_failure(err))?;
        let reader = Arc::new(reader);

        let read = match self.timeout {
            None => read_capped(&reader),
            Some(timeout) => {
                let (tx, rx) = crossbeam_channel::bounded(1);
                let worker = Arc::clone(&reader);
                thread::Builder::new()
                    .name("otter-eval-compiler".to_string())
                    .spawn(move || {
                        // The caller may have given up already.
                        let _ = tx.send(read_capped(&worker));
                    })
                    .map_err(|err| self.spawn_failure(err))?;

                match rx.recv_timeout(timeout) {
                    Ok(read) => read,
                    Err(_) => {
                        if let Err(err) = reader.kill() {
                            warn!(error = %err, "failed to kill timed out compiler");
                        }
                        return Err(CompileError::SubprocessTimeout {
                            tool: self.tool.clone(),
                            timeout,
                        });
                    }
                }
            }
        };
        let bytes = read.map_err(|err| self.spawn_failure(err))?;

        if bytes.len() > MAX_COMPILER_OUTPUT {
            if let Err(err) = reader.kill() {
                warn!(error = %err, "failed to kill compiler after oversized output");
            }
            return Err(CompileError::OutputTooLarge {
                limit: MAX_COMPILER_OUTPUT,
            });
        }

        // Reaching EOF on the reader waits for the child, so a status is ready.
        let output = reader
            .try_wait()
            .and_then(|output| {
                output.cloned().ok_or_else(|| {
                    io::Error::other("compiler closed stdout without exiting")
                })
            })
            .map_err(|err| self.spawn_failure(err))?;

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if !stderr.is_empty() {
            debug!(tool = %self.tool.display(), %stderr, "compiler stderr");
        }
        if !output.status.success() {
            return Err(CompileError::SubprocessNonZeroExit {
                tool: self.tool.clone(),
                code: output.status.code(),
                stderr,
            });
        }

        Ok(bytes)
    }

    fn spawn_failure(&self, source: io::Error) -> CompileError {
        CompileError::SubprocessSpawnFailure {
            tool: self.tool.clone(),
            source,
        }
    }
}

fn read_capped(reader: &ReaderHandle) -> io::Result<Vec<u8>> {
    let mut bytes = Vec::new();
    Read::take(reader, MAX_COMPILER_OUTPUT as u64 + 1).read_to_end(&mut bytes)?;
    Ok(bytes)
}

/// Fast tier first, fallback compiler for anything it does not recognise.
#[derive(Debug, Clone)]
pub struct Pipeline {
    fast: FastTier,
    fallback: FallbackCompiler,
}

impl Pipeline {
    pub fn new(config: &CompilerConfig) -> Self {
        Self::with_tiers(FastTier::builtin(), FallbackCompiler::new(config))
    }

    pub fn with_tiers(fast: FastTier, fallback: FallbackCompiler) -> Self {
        Self { fast, fallback }
    }

    pub fn fast_tier(&self) -> &FastTier {
        &self.fast
    }

    pub fn fast_tier_mut(&mut self) -> &mut FastTier {
        &mut self.fast
    }

    pub fn fallback(&self) -> &FallbackCompiler {
        &self.fallback
    }

    pub fn compile(&self, source: &str) -> Result<CompiledProgram, CompileError> {
        let compiled = match self.fast.compile(source) {
            Ok(compiled) => compiled,
            Err(NotSupportedLocally) => self.fallback.compile(source).inspect_err(|err| {
                warn!(error = %err, "fallback compilation failed");
            })?,
        };
        debug!(
            tier = %compiled.tier(),
            elapsed = ?compiled.compile_time(),
            "compiled eval source"
        );
        Ok(compiled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use otterc_bytecode::{Value, Vm};

    fn run(compiled: &CompiledProgram) -> Value {
        Vm::new().run(compiled.program()).unwrap()
    }

    #[test]
    fn fast_tier_handles_builtin_patterns() {
        let fast = FastTier::builtin();
        let compiled = fast.compile("1 + 2 * 3").unwrap();
        assert_eq!(compiled.tier(), CompileTier::FastTier);
        assert_eq!(run(&compiled), Value::Int(7));
        assert_eq!(run(&fast.compile("(1 + 2) * 3").unwrap()), Value::Int(9));
        assert_eq!(run(&fast.compile("10 / 2").unwrap()), Value::Float(5.0));
        assert_eq!(run(&fast.compile("not True").unwrap()), Value::Bool(false));
    }

    #[test]
    fn every_builtin_pattern_agrees_with_the_parser() {
        let fast = FastTier::builtin();
        for source in fast.patterns() {
            let parsed = otterc_parser::parse(source).unwrap();
            let expected = Vm::new().run(&otterc_bytecode::compile(&parsed)).unwrap();
            assert_eq!(run(&fast.compile(source).unwrap()), expected, "{source}");
        }
    }

    #[test]
    fn unknown_source_is_not_supported() {
        let fast = FastTier::builtin();
        assert_eq!(fast.compile("1 +  2").unwrap_err(), NotSupportedLocally);
        assert_eq!(fast.compile("").unwrap_err(), NotSupportedLocally);
    }

    #[test]
    fn removed_pattern_is_no_longer_recognised() {
        let mut fast = FastTier::builtin();
        assert!(fast.remove("1 + 2 * 3"));
        assert!(!fast.remove("1 + 2 * 3"));
        assert!(!fast.recognizes("1 + 2 * 3"));
        assert!(fast.recognizes("1 + 2"));
    }

    #[test]
    fn missing_tool_is_a_spawn_failure() {
        let config = CompilerConfig::new("/nonexistent/otterc-missing");
        let pipeline = Pipeline::new(&config);
        let err = pipeline.compile("40 + 2").unwrap_err();
        assert!(
            matches!(err, CompileError::SubprocessSpawnFailure { .. }),
            "{err:?}"
        );
        assert!(pipeline.compile("1 + 2").is_ok());
    }

    #[test]
    fn non_zero_exit_message_carries_stderr() {
        let err = CompileError::SubprocessNonZeroExit {
            tool: PathBuf::from("otterc"),
            code: Some(1),
            stderr: "unexpected token".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "compiler `otterc` exited with status 1: unexpected token"
        );
    }
}
