//! The eval cache facade and its process-wide instance.

use std::sync::Arc;

use once_cell::sync::Lazy;
use otterc_bytecode::Value;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info};

use super::artifact::{CompiledProgram, ProgramArtifact};
use super::config::{CacheConfig, EvalConfig};
use super::dispatch::{ExecutionTarget, dispatch};
use super::error::EvalError;
use super::metrics::{CompileCounters, EvalMetrics, EvalMetricsSnapshot};
use super::pipeline::Pipeline;
use super::store::{LruStore, PutOutcome};

/// Point-in-time view of the cache. Counters cover successful work only, so a
/// failed compilation leaves the snapshot unchanged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub memory_bytes: usize,
    pub max_entries: usize,
    pub max_memory_bytes: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub fast_tier_compiles: u64,
    pub fallback_compiles: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64 * 100.0
        }
    }
}

/// Everything [`EvalCache::stats`] reports, guarded by one lock.
struct CacheState {
    store: LruStore<CompiledProgram>,
    compiles: CompileCounters,
}

/// Source-keyed cache of compiled programs.
///
/// The state lock is only held for lookups and insertions. Compilation and
/// execution run unlocked, so two threads missing on the same source may both
/// compile it; the later insert replaces the earlier one.
pub struct EvalCache {
    state: Mutex<CacheState>,
    pipeline: Pipeline,
    target: ExecutionTarget,
    metrics: EvalMetrics,
}

impl EvalCache {
    pub fn new(config: &EvalConfig) -> Self {
        Self::with_pipeline(config.cache, Pipeline::new(&config.compiler))
    }

    pub fn with_pipeline(config: CacheConfig, pipeline: Pipeline) -> Self {
        Self {
            state: Mutex::new(CacheState {
                store: LruStore::new(config),
                compiles: CompileCounters::default(),
            }),
            pipeline,
            target: ExecutionTarget::current(),
            metrics: EvalMetrics::new(),
        }
    }

    #[must_use]
    pub fn with_target(mut self, target: ExecutionTarget) -> Self {
        self.target = target;
        self
    }

    pub fn target(&self) -> ExecutionTarget {
        self.target
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Compile `source` if needed, then run it.
    pub fn evaluate(&self, source: &str) -> Result<Value, EvalError> {
        let cached = self.state.lock().store.get(source);
        let compiled = match cached {
            Some(compiled) => {
                debug!(source, "eval cache hit");
                compiled
            }
            None => self.compile_and_store(source)?,
        };

        dispatch(self.target, &compiled).map_err(|err| {
            self.metrics.record_execution_failure();
            EvalError::from(err)
        })
    }

    fn compile_and_store(&self, source: &str) -> Result<Arc<CompiledProgram>, EvalError> {
        debug!(source, "eval cache miss");
        let compiled = self.pipeline.compile(source).map_err(|err| {
            self.metrics.record_failed_compile();
            EvalError::from(err)
        })?;
        let tier = compiled.tier();
        let size = compiled.byte_size();

        let outcome = {
            let mut state = self.state.lock();
            let outcome = state.store.put(source, Arc::new(compiled));
            state.compiles.record(tier);
            outcome
        };
        if let PutOutcome::Replaced { .. } = outcome {
            debug!(source, "replaced program compiled by a concurrent miss");
        }
        debug!(
            source,
            bytes = size,
            evicted = outcome.evicted().len(),
            "stored compiled program"
        );
        // Evicted and replaced artifacts drop here, outside the lock.
        drop(outcome);

        self.fetch_stored(source)
    }

    /// Re-read an entry that was just stored, without counting a hit. Fails when
    /// a concurrent eviction or clear removed it in between.
    fn fetch_stored(&self, source: &str) -> Result<Arc<CompiledProgram>, EvalError> {
        self.state.lock().store.peek(source).ok_or_else(|| {
            self.metrics.record_retrieval_failure();
            EvalError::CacheRetrievalFailure {
                source_text: source.to_string(),
            }
        })
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock();
        let counters = state.store.counters();
        let config = state.store.config();
        CacheStats {
            entries: state.store.len(),
            memory_bytes: state.store.memory_bytes(),
            max_entries: config.max_entries(),
            max_memory_bytes: config.max_memory_bytes(),
            hits: counters.hits,
            misses: state.compiles.misses,
            evictions: counters.evictions,
            fast_tier_compiles: state.compiles.fast_tier_compiles,
            fallback_compiles: state.compiles.fallback_compiles,
        }
    }

    pub fn metrics(&self) -> EvalMetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn contains(&self, source: &str) -> bool {
        self.state.lock().store.contains(source)
    }

    /// Sources currently cached, most recently used first.
    pub fn cached_sources(&self) -> Vec<String> {
        self.state
            .lock()
            .store
            .keys_by_recency()
            .iter()
            .map(|key| key.to_string())
            .collect()
    }

    /// Release every cached program and reset the counters.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.store.clear();
        state.compiles = CompileCounters::default();
        self.metrics.reset();
        debug!("eval cache cleared");
    }
}

impl std::fmt::Debug for EvalCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvalCache")
            .field("store", &self.state.lock().store)
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}

static GLOBAL: Lazy<Mutex<Option<Arc<EvalCache>>>> = Lazy::new(|| Mutex::new(None));

/// Install the process-wide cache built from the environment. No-op when one
/// is already installed.
pub fn init() -> Arc<EvalCache> {
    init_with(|| EvalCache::new(&EvalConfig::from_env()))
}

/// Install the process-wide cache with `build`, unless one already exists.
pub fn init_with(build: impl FnOnce() -> EvalCache) -> Arc<EvalCache> {
    let mut slot = GLOBAL.lock();
    if let Some(cache) = slot.as_ref() {
        return Arc::clone(cache);
    }
    let cache = Arc::new(build());
    let stats = cache.stats();
    info!(
        max_entries = stats.max_entries,
        max_memory_bytes = stats.max_memory_bytes,
        "eval cache initialised"
    );
    *slot = Some(Arc::clone(&cache));
    cache
}

/// The process-wide cache, initialised on first use.
pub fn global() -> Arc<EvalCache> {
    init()
}

pub fn is_initialized() -> bool {
    GLOBAL.lock().is_some()
}

pub fn evaluate(source: &str) -> Result<Value, EvalError> {
    global().evaluate(source)
}

pub fn stats() -> CacheStats {
    global().stats()
}

pub fn clear() {
    if let Some(cache) = GLOBAL.lock().as_ref() {
        cache.clear();
    }
}

/// Clear and uninstall the process-wide cache. The next call to [`evaluate`]
/// builds a fresh one.
pub fn shutdown() {
    let cache = GLOBAL.lock().take();
    if let Some(cache) = cache {
        cache.clear();
        info!("eval cache shut down");
    }
}
