use std::fmt;

use otterc_bytecode::VmError;
use thiserror::Error;

use super::pipeline::CompileError;

#[derive(Debug, Error)]
pub enum EvalError {
    #[error(transparent)]
    Compile(#[from] CompileError),
    #[error("compiled program for `{source_text}` vanished from the cache before it could run")]
    CacheRetrievalFailure { source_text: String },
    #[error("execution failed: {0}")]
    ExecutionFailure(#[from] VmError),
}

/// Flat classification of [`EvalError`], for callers that only branch on the
/// failure category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    SubprocessSpawnFailure,
    SubprocessNonZeroExit,
    SubprocessTimeout,
    ArtifactDecodeFailure,
    CacheRetrievalFailure,
    ExecutionFailure,
}

impl EvalError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Compile(err) => match err {
                CompileError::SubprocessSpawnFailure { .. } => ErrorKind::SubprocessSpawnFailure,
                CompileError::SubprocessNonZeroExit { .. } => ErrorKind::SubprocessNonZeroExit,
                CompileError::SubprocessTimeout { .. } => ErrorKind::SubprocessTimeout,
                // A truncated program is as undecodable as a corrupt one.
                CompileError::OutputTooLarge { .. } | CompileError::ArtifactDecodeFailure(_) => {
                    ErrorKind::ArtifactDecodeFailure
                }
            },
            Self::CacheRetrievalFailure { .. } => ErrorKind::CacheRetrievalFailure,
            Self::ExecutionFailure(_) => ErrorKind::ExecutionFailure,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::SubprocessSpawnFailure => "subprocess spawn failure",
            Self::SubprocessNonZeroExit => "subprocess non-zero exit",
            Self::SubprocessTimeout => "subprocess timeout",
            Self::ArtifactDecodeFailure => "artifact decode failure",
            Self::CacheRetrievalFailure => "cache retrieval failure",
            Self::ExecutionFailure => "execution failure",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use otterc_bytecode::DecodeError;

    #[test]
    fn oversized_output_counts_as_decode_failure() {
        let err = EvalError::from(CompileError::OutputTooLarge { limit: 1 });
        assert_eq!(err.kind(), ErrorKind::ArtifactDecodeFailure);

        let err = EvalError::from(CompileError::from(DecodeError::Truncated(2)));
        assert_eq!(err.kind(), ErrorKind::ArtifactDecodeFailure);
    }

    #[test]
    fn execution_errors_keep_their_message() {
        let err = EvalError::from(VmError::ZeroDivision("division by zero"));
        assert_eq!(err.kind(), ErrorKind::ExecutionFailure);
        assert_eq!(err.to_string(), "execution failed: division by zero");
    }
}
