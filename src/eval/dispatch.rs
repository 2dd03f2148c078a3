use std::fmt;

use otterc_bytecode::{Value, Vm, VmError};

use super::artifact::CompiledProgram;

/// Where a compiled program runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecutionTarget {
    /// Sandboxed builds such as wasm.
    Portable,
    Native,
}

impl ExecutionTarget {
    pub const fn current() -> Self {
        if cfg!(target_arch = "wasm32") {
            Self::Portable
        } else {
            Self::Native
        }
    }
}

impl Default for ExecutionTarget {
    fn default() -> Self {
        Self::current()
    }
}

impl fmt::Display for ExecutionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Portable => f.write_str("portable"),
            Self::Native => f.write_str("native"),
        }
    }
}

/// Run `compiled` to completion on a fresh VM.
pub fn dispatch(target: ExecutionTarget, compiled: &CompiledProgram) -> Result<Value, VmError> {
    match target {
        ExecutionTarget::Portable => Vm::new().run(compiled.program()),
        // Native programs share the bytecode VM until a native backend exists.
        ExecutionTarget::Native => Vm::new().run(compiled.program()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::artifact::CompileTier;
    use otterc_ast::{BinaryOp, Expr};
    use std::time::Duration;

    fn compiled(expr: &Expr) -> CompiledProgram {
        CompiledProgram::new(
            otterc_bytecode::compile(expr),
            CompileTier::FastTier,
            Duration::ZERO,
        )
    }

    #[test]
    fn both_targets_agree() {
        let program = compiled(&Expr::binary(
            Expr::string("ab"),
            BinaryOp::Mul,
            Expr::int(3),
        ));
        let portable = dispatch(ExecutionTarget::Portable, &program).unwrap();
        let native = dispatch(ExecutionTarget::Native, &program).unwrap();
        assert_eq!(portable, native);
        assert_eq!(portable.as_str(), Some("ababab"));
    }

    #[test]
    fn runtime_errors_propagate() {
        let program = compiled(&Expr::binary(Expr::int(1), BinaryOp::Div, Expr::int(0)));
        let err = dispatch(ExecutionTarget::current(), &program).unwrap_err();
        assert!(matches!(err, VmError::ZeroDivision(_)));
    }

    #[test]
    fn host_target_is_native() {
        #[cfg(not(target_arch = "wasm32"))]
        assert_eq!(ExecutionTarget::current(), ExecutionTarget::Native);
        assert_eq!(ExecutionTarget::default(), ExecutionTarget::current());
    }
}
