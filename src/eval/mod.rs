//! Runtime evaluation of source text.
//!
//! [`EvalCache`] maps source strings to compiled bytecode programs. A miss
//! compiles through the [`Pipeline`] (in-process table first, then the
//! external compiler), stores the result in a bounded LRU, and runs it through
//! the [`dispatch`] layer. The free functions at the bottom of [`cache`] drive a
//! lazily created process-wide instance.

pub mod artifact;
pub mod cache;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod metrics;
pub mod pipeline;
pub mod store;

pub use artifact::{CompileTier, CompiledProgram, ProgramArtifact};
pub use cache::{
    CacheStats, EvalCache, clear, evaluate, global, init, init_with, is_initialized, shutdown,
    stats,
};
pub use config::{CacheConfig, CompilerConfig, ConfigError, EvalConfig};
pub use dispatch::{ExecutionTarget, dispatch};
pub use error::{ErrorKind, EvalError};
pub use metrics::{CompileCounters, EvalMetricsSnapshot};
pub use pipeline::{CompileError, FallbackCompiler, FastTier, NotSupportedLocally, Pipeline};
pub use store::{EmptyStore, LruStore};
