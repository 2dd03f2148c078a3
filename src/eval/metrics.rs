use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use super::artifact::CompileTier;

/// Misses that produced a stored program, split by tier.
///
/// Owned by the cache next to its store and updated under the same lock, so a
/// stats snapshot never counts an entry without its miss.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CompileCounters {
    pub misses: u64,
    pub fast_tier_compiles: u64,
    pub fallback_compiles: u64,
}

impl CompileCounters {
    pub fn record(&mut self, tier: CompileTier) {
        self.misses += 1;
        match tier {
            CompileTier::FastTier => self.fast_tier_compiles += 1,
            CompileTier::Fallback => self.fallback_compiles += 1,
        }
    }
}

/// Failure counters, bumped without taking the store lock.
#[derive(Debug, Default)]
pub struct EvalMetrics {
    failed_compiles: AtomicU64,
    retrieval_failures: AtomicU64,
    execution_failures: AtomicU64,
}

impl EvalMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_failed_compile(&self) {
        self.failed_compiles.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retrieval_failure(&self) {
        self.retrieval_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_execution_failure(&self) {
        self.execution_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn reset(&self) {
        for counter in [
            &self.failed_compiles,
            &self.retrieval_failures,
            &self.execution_failures,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> EvalMetricsSnapshot {
        EvalMetricsSnapshot {
            failed_compiles: self.failed_compiles.load(Ordering::Relaxed),
            retrieval_failures: self.retrieval_failures.load(Ordering::Relaxed),
            execution_failures: self.execution_failures.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EvalMetricsSnapshot {
    pub failed_compiles: u64,
    pub retrieval_failures: u64,
    pub execution_failures: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn misses_are_split_by_tier() {
        let mut counters = CompileCounters::default();
        counters.record(CompileTier::FastTier);
        counters.record(CompileTier::Fallback);
        counters.record(CompileTier::Fallback);

        assert_eq!(counters.misses, 3);
        assert_eq!(counters.fast_tier_compiles, 1);
        assert_eq!(counters.fallback_compiles, 2);
    }

    #[test]
    fn failures_reset_to_zero() {
        let metrics = EvalMetrics::new();
        metrics.record_failed_compile();
        metrics.record_execution_failure();
        assert_eq!(metrics.snapshot().failed_compiles, 1);

        metrics.reset();
        assert_eq!(metrics.snapshot(), EvalMetricsSnapshot::default());
    }
}
