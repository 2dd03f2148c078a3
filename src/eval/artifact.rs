use std::fmt;
use std::time::Duration;

use otterc_bytecode::Program;

/// Anything the LRU store can hold. The reported size feeds the memory budget
/// and must stay constant while the value is cached.
///
/// Release of the underlying resources happens on `Drop`, once the last
/// `Arc` handed out by the store goes away.
pub trait ProgramArtifact: Send + Sync + 'static {
    fn byte_size(&self) -> usize;
}

/// Which compile tier produced an artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompileTier {
    FastTier,
    Fallback,
}

impl fmt::Display for CompileTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FastTier => f.write_str("fast-tier"),
            Self::Fallback => f.write_str("fallback"),
        }
    }
}

/// A validated bytecode program ready for dispatch.
#[derive(Debug, Clone)]
pub struct CompiledProgram {
    program: Program,
    tier: CompileTier,
    compile_time: Duration,
    size: usize,
}

impl CompiledProgram {
    pub fn new(program: Program, tier: CompileTier, compile_time: Duration) -> Self {
        let size = program.byte_size();
        Self {
            program,
            tier,
            compile_time,
            size,
        }
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    pub fn tier(&self) -> CompileTier {
        self.tier
    }

    pub fn compile_time(&self) -> Duration {
        self.compile_time
    }
}

impl ProgramArtifact for CompiledProgram {
    fn byte_size(&self) -> usize {
        self.size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use otterc_ast::Expr;

    #[test]
    fn size_is_captured_at_construction() {
        let program = otterc_bytecode::compile(&Expr::int(4));
        let expected = program.byte_size();
        let compiled = CompiledProgram::new(program, CompileTier::FastTier, Duration::ZERO);
        assert_eq!(compiled.byte_size(), expected);
        assert!(compiled.byte_size() > 0);
        assert_eq!(compiled.tier().to_string(), "fast-tier");
    }
}
