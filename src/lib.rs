//! Cached runtime evaluation for OtterLang expressions.
//!
//! See [`eval`] for the cache, compile pipeline and dispatcher, and [`cli`] for
//! the `otter-eval` command-line front end.

pub mod cli;
pub mod eval;
