//! Configuration for the eval cache and its fallback compiler.
//!
//! Values come from defaults, then the environment (`OTTER_EVAL_*`), and
//! optionally a TOML file when the `toml-config` feature is enabled.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

pub const DEFAULT_MAX_ENTRIES: usize = 1024;
pub const DEFAULT_MAX_MEMORY_BYTES: usize = 10 * 1024 * 1024;
pub const DEFAULT_COMPILER: &str = "otterc";

pub const ENV_MAX_ENTRIES: &str = "OTTER_EVAL_MAX_ENTRIES";
pub const ENV_MAX_MEMORY: &str = "OTTER_EVAL_MAX_MEMORY";
pub const ENV_COMPILER: &str = "OTTER_EVAL_COMPILER";
pub const ENV_TIMEOUT_MS: &str = "OTTER_EVAL_TIMEOUT_MS";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("max_entries must be greater than zero")]
    ZeroEntries,
    #[error("max_memory_bytes must be greater than zero")]
    ZeroMemory,
}

/// Entry-count and byte ceilings for the program cache. Both are non-zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "CacheConfigFile", into = "CacheConfigFile")]
pub struct CacheConfig {
    max_entries: usize,
    max_memory_bytes: usize,
}

impl CacheConfig {
    pub fn new(max_entries: usize, max_memory_bytes: usize) -> Result<Self, ConfigError> {
        if max_entries == 0 {
            return Err(ConfigError::ZeroEntries);
        }
        if max_memory_bytes == 0 {
            return Err(ConfigError::ZeroMemory);
        }
        Ok(Self {
            max_entries,
            max_memory_bytes,
        })
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    pub fn max_memory_bytes(&self) -> usize {
        self.max_memory_bytes
    }

    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(entries) = env_usize(ENV_MAX_ENTRIES) {
            config.max_entries = entries;
        }
        if let Some(bytes) = env_usize(ENV_MAX_MEMORY) {
            config.max_memory_bytes = bytes;
        }
        config
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: DEFAULT_MAX_ENTRIES,
            max_memory_bytes: DEFAULT_MAX_MEMORY_BYTES,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct CacheConfigFile {
    #[serde(default = "default_max_entries")]
    max_entries: usize,
    #[serde(default = "default_max_memory_bytes")]
    max_memory_bytes: usize,
}

fn default_max_entries() -> usize {
    DEFAULT_MAX_ENTRIES
}

fn default_max_memory_bytes() -> usize {
    DEFAULT_MAX_MEMORY_BYTES
}

impl TryFrom<CacheConfigFile> for CacheConfig {
    type Error = ConfigError;

    fn try_from(file: CacheConfigFile) -> Result<Self, Self::Error> {
        Self::new(file.max_entries, file.max_memory_bytes)
    }
}

impl From<CacheConfig> for CacheConfigFile {
    fn from(config: CacheConfig) -> Self {
        Self {
            max_entries: config.max_entries,
            max_memory_bytes: config.max_memory_bytes,
        }
    }
}

/// How to reach the out-of-process compiler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilerConfig {
    /// Executable invoked as `<tool> --emit-bytecode <source>`.
    pub tool: PathBuf,
    /// Deadline for one compiler run. `None` waits for the process indefinitely.
    pub timeout_ms: Option<u64>,
}

impl CompilerConfig {
    pub fn new(tool: impl Into<PathBuf>) -> Self {
        Self {
            tool: tool.into(),
            timeout_ms: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(tool) = std::env::var(ENV_COMPILER) {
            if !tool.trim().is_empty() {
                config.tool = PathBuf::from(tool);
            }
        }
        if let Some(ms) = env_u64(ENV_TIMEOUT_MS) {
            config.timeout_ms = Some(ms);
        }
        config
    }
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self::new(DEFAULT_COMPILER)
    }
}

/// Complete eval subsystem configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvalConfig {
    pub cache: CacheConfig,
    pub compiler: CompilerConfig,
}

impl EvalConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self {
            cache: CacheConfig::from_env(),
            compiler: CompilerConfig::from_env(),
        }
    }

    /// Load configuration from TOML file
    #[cfg(feature = "toml-config")]
    pub fn from_file(path: &std::path::Path) -> anyhow::Result<Self> {
        use anyhow::Context;

        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let config: EvalConfig = toml::from_str(&contents)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        Ok(config)
    }

    /// Load configuration from TOML file (stub when toml feature is disabled)
    #[cfg(not(feature = "toml-config"))]
    pub fn from_file(_path: &std::path::Path) -> anyhow::Result<Self> {
        anyhow::bail!("TOML support not enabled. Enable the 'toml-config' feature.")
    }

    /// Merge with environment variables (env vars take precedence)
    pub fn merge_with_env(mut self) -> Self {
        let env_config = Self::from_env();

        if std::env::var(ENV_MAX_ENTRIES).is_ok() || std::env::var(ENV_MAX_MEMORY).is_ok() {
            self.cache = env_config.cache;
        }
        if std::env::var(ENV_COMPILER).is_ok() {
            self.compiler.tool = env_config.compiler.tool;
        }
        if std::env::var(ENV_TIMEOUT_MS).is_ok() {
            self.compiler.timeout_ms = env_config.compiler.timeout_ms;
        }

        self
    }
}

fn env_u64(name: &str) -> Option<u64> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse::<u64>() {
        Ok(0) | Err(_) => {
            warn!(variable = name, value = %raw, "ignoring invalid eval setting");
            None
        }
        Ok(value) => Some(value),
    }
}

fn env_usize(name: &str) -> Option<usize> {
    env_u64(name).and_then(|value| usize::try_from(value).ok())
}
