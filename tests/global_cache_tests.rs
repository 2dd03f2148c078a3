//! The process-wide cache is shared state, so its lifecycle is checked in a
//! single test.

use otter_eval::eval::{self, CacheConfig, CompilerConfig, EvalCache, EvalConfig};
use otterc_bytecode::Value;

#[test]
fn global_cache_lifecycle() {
    assert!(!eval::is_initialized());

    let config = EvalConfig {
        cache: CacheConfig::new(3, 1 << 20).unwrap(),
        compiler: CompilerConfig::new("/nonexistent/otterc-for-tests"),
    };
    let first = eval::init_with(|| EvalCache::new(&config));
    let second = eval::init_with(|| panic!("already initialised"));
    assert!(std::sync::Arc::ptr_eq(&first, &second));
    assert!(eval::is_initialized());

    assert_eq!(eval::evaluate("1 + 2 * 3").unwrap(), Value::Int(7));
    assert_eq!(eval::evaluate("1 + 2 * 3").unwrap(), Value::Int(7));
    let stats = eval::stats();
    assert_eq!(stats.max_entries, 3);
    assert_eq!((stats.entries, stats.hits, stats.misses), (1, 1, 1));

    eval::clear();
    assert_eq!(eval::stats().entries, 0);
    assert!(eval::is_initialized());

    eval::shutdown();
    assert!(!eval::is_initialized());
    eval::shutdown();

    // Lazily rebuilt from the environment on next use.
    assert_eq!(eval::evaluate("True").unwrap(), Value::Bool(true));
    assert!(eval::is_initialized());
    assert_eq!(eval::stats().entries, 1);
    eval::shutdown();
}
