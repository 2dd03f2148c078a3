//! Fallback failures driven by shell scripts standing in for `otterc`.
//!
//! Everything runs from one test so that no other thread forks while a script
//! is still open for writing.
#![cfg(unix)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use otter_eval::eval::{
    CacheConfig, CompileError, CompilerConfig, ErrorKind, EvalCache, EvalError, FallbackCompiler,
    FastTier, Pipeline,
};

fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write script");
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).expect("chmod script");
    path
}

fn cache_for(compiler: CompilerConfig) -> EvalCache {
    let pipeline = Pipeline::with_tiers(FastTier::builtin(), FallbackCompiler::new(&compiler));
    EvalCache::with_pipeline(CacheConfig::default(), pipeline)
}

fn assert_no_trace(cache: &EvalCache, source: &str) -> EvalError {
    cache.evaluate("True").expect("fast-tier source");
    let before = cache.stats();
    let err = cache.evaluate(source).unwrap_err();
    assert_eq!(cache.stats(), before, "stats changed after {err}");
    assert!(!cache.contains(source));
    err
}

#[test]
fn fake_compilers_fail_without_touching_the_cache() {
    let dir = tempfile::Builder::new()
        .prefix("otter-eval-fake-compiler")
        .tempdir()
        .expect("failed to create temp dir");

    let exit_three = write_script(dir.path(), "exit-three", "echo 'boom' >&2\nexit 3");
    let garbage = write_script(dir.path(), "garbage", "printf 'not a program'");
    let flood = write_script(dir.path(), "flood", "exec head -c 2000000 /dev/zero");
    let sleepy = write_script(dir.path(), "sleepy", "exec sleep 5");
    let echo_args = write_script(
        dir.path(),
        "echo-args",
        "printf '%s|%s\\n' \"$1\" \"$2\" >&2\nexit 9",
    );

    let cache = cache_for(CompilerConfig::new(&exit_three));
    match assert_no_trace(&cache, "3 + 4") {
        EvalError::Compile(CompileError::SubprocessNonZeroExit { code, stderr, .. }) => {
            assert_eq!(code, Some(3));
            assert_eq!(stderr, "boom");
        }
        other => panic!("expected non-zero exit, got {other:?}"),
    }

    let cache = cache_for(CompilerConfig::new(&garbage));
    let err = assert_no_trace(&cache, "3 + 4");
    assert_eq!(err.kind(), ErrorKind::ArtifactDecodeFailure);

    let cache = cache_for(CompilerConfig::new(&flood));
    let err = assert_no_trace(&cache, "3 + 4");
    assert!(
        matches!(err, EvalError::Compile(CompileError::OutputTooLarge { .. })),
        "{err:?}"
    );
    assert_eq!(err.kind(), ErrorKind::ArtifactDecodeFailure);

    let cache = cache_for(CompilerConfig::new(&sleepy).with_timeout(Duration::from_millis(200)));
    let started = Instant::now();
    let err = assert_no_trace(&cache, "3 + 4");
    assert_eq!(err.kind(), ErrorKind::SubprocessTimeout);
    assert!(started.elapsed() < Duration::from_secs(4));

    let cache = cache_for(CompilerConfig::new(&echo_args));
    match assert_no_trace(&cache, "-3 + 4") {
        EvalError::Compile(CompileError::SubprocessNonZeroExit { stderr, .. }) => {
            assert_eq!(stderr, "--emit-bytecode|-3 + 4");
        }
        other => panic!("expected non-zero exit, got {other:?}"),
    }

    let missing = dir.path().join("does-not-exist");
    let cache = cache_for(CompilerConfig::new(&missing));
    let err = assert_no_trace(&cache, "3 + 4");
    assert_eq!(err.kind(), ErrorKind::SubprocessSpawnFailure);
}
