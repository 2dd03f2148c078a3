use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use serde::Serialize;
use tracing::debug;

use crate::eval::{self, CacheConfig, CacheStats, EvalCache, EvalConfig, FastTier};
use otterc_utils::logger;

#[derive(Parser, Debug)]
#[command(
    name = "otter-eval",
    version,
    about = "Evaluate expressions through the cached eval pipeline"
)]
pub struct OtterEvalCli {
    #[arg(long, global = true)]
    /// Maximum number of cached programs.
    max_entries: Option<usize>,

    #[arg(long, global = true)]
    /// Memory budget for cached programs, in bytes.
    max_memory: Option<usize>,

    #[arg(long, global = true)]
    /// Compiler executable used for sources the in-process tier does not know.
    compiler: Option<PathBuf>,

    #[arg(long, global = true)]
    /// Kill the fallback compiler after this many milliseconds.
    timeout_ms: Option<u64>,

    #[arg(long, global = true)]
    /// Read settings from a TOML file (requires the `toml-config` feature).
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

impl OtterEvalCli {
    pub fn command(&self) -> &Command {
        &self.command
    }

    /// Settings file, then environment, then command-line flags.
    pub fn eval_config(&self) -> Result<EvalConfig> {
        let mut config = match &self.config {
            Some(path) => EvalConfig::from_file(path)?.merge_with_env(),
            None => EvalConfig::from_env(),
        };

        if self.max_entries.is_some() || self.max_memory.is_some() {
            let entries = self.max_entries.unwrap_or(config.cache.max_entries());
            let memory = self.max_memory.unwrap_or(config.cache.max_memory_bytes());
            config.cache = CacheConfig::new(entries, memory).context("invalid cache limits")?;
        }
        if let Some(compiler) = &self.compiler {
            config.compiler.tool = compiler.clone();
        }
        if let Some(timeout_ms) = self.timeout_ms {
            config.compiler.timeout_ms = Some(timeout_ms);
        }

        Ok(config)
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Evaluates each source in order and prints its value.
    Eval {
        #[arg(required = true)]
        sources: Vec<String>,
        #[arg(long)]
        /// Print cache statistics afterwards.
        stats: bool,
        #[arg(long)]
        /// Emit results as JSON instead of text.
        json: bool,
    },
    /// Evaluates sources repeatedly from a thread pool and reports cache behaviour.
    Stress {
        #[arg(required = true)]
        sources: Vec<String>,
        #[arg(long, default_value_t = 10_000)]
        iterations: u64,
        #[arg(long)]
        threads: Option<usize>,
    },
    /// Prints the effective limits of an empty cache.
    Stats,
    /// Lists the sources compiled in process without the external compiler.
    Patterns,
}

pub fn run() -> Result<()> {
    logger::init_logging();
    let cli = OtterEvalCli::parse();
    let config = cli.eval_config()?;
    debug!(?config, "resolved eval configuration");

    let cache = eval::init_with(|| EvalCache::new(&config));
    let result = match &cli.command {
        Command::Eval {
            sources,
            stats,
            json,
        } => handle_eval(&cache, sources, *stats, *json),
        Command::Stress {
            sources,
            iterations,
            threads,
        } => handle_stress(&cache, sources, *iterations, *threads),
        Command::Stats => {
            print_stats(&cache.stats());
            Ok(())
        }
        Command::Patterns => {
            for pattern in FastTier::builtin().patterns() {
                println!("{pattern}");
            }
            Ok(())
        }
    };
    eval::shutdown();
    result
}

#[derive(Serialize)]
struct EvalReport<'a> {
    source: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    kind: Option<String>,
}

#[derive(Serialize)]
struct JsonOutput<'a> {
    results: Vec<EvalReport<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stats: Option<CacheStats>,
}

fn handle_eval(cache: &EvalCache, sources: &[String], show_stats: bool, json: bool) -> Result<()> {
    let mut reports = Vec::with_capacity(sources.len());
    let mut failures = 0usize;

    for source in sources {
        let report = match cache.evaluate(source) {
            Ok(value) => EvalReport {
                source,
                value: Some(value.repr()),
                error: None,
                kind: None,
            },
            Err(err) => {
                failures += 1;
                EvalReport {
                    source,
                    value: None,
                    error: Some(err.to_string()),
                    kind: Some(err.kind().to_string()),
                }
            }
        };
        if !json {
            print_report(&report);
        }
        reports.push(report);
    }

    if json {
        let output = JsonOutput {
            results: reports,
            stats: show_stats.then(|| cache.stats()),
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else if show_stats {
        print_stats(&cache.stats());
    }

    if failures > 0 {
        bail!("{failures} of {} evaluation(s) failed", sources.len());
    }
    Ok(())
}

fn print_report(report: &EvalReport<'_>) {
    match (&report.value, &report.error) {
        (Some(value), _) => println!(
            "{} {} {}",
            report.source.dimmed(),
            "=>".bold(),
            value.green()
        ),
        (None, Some(error)) => println!(
            "{} {} {}",
            report.source.dimmed(),
            "error:".red().bold(),
            error
        ),
        (None, None) => {}
    }
}

fn handle_stress(
    cache: &EvalCache,
    sources: &[String],
    iterations: u64,
    threads: Option<usize>,
) -> Result<()> {
    let mut builder = rayon::ThreadPoolBuilder::new();
    if let Some(threads) = threads {
        builder = builder.num_threads(threads);
    }
    let pool = builder.build().context("failed to build stress thread pool")?;

    let pb = ProgressBar::new(iterations);
    pb.set_style(
        ProgressStyle::with_template("evaluating [{elapsed_precise}] {wide_bar} {pos}/{len}")?
            .progress_chars("=> "),
    );

    let failures = AtomicU64::new(0);
    let started = Instant::now();
    pool.install(|| {
        (0..iterations).into_par_iter().for_each(|i| {
            let source = &sources[(i % sources.len() as u64) as usize];
            if cache.evaluate(source).is_err() {
                failures.fetch_add(1, Ordering::Relaxed);
            }
            pb.inc(1);
        });
    });
    pb.finish_and_clear();

    let elapsed = started.elapsed();
    println!(
        "{} {} evaluations in {:.2?} ({} failed)",
        "done".green().bold(),
        iterations,
        elapsed,
        failures.load(Ordering::Relaxed)
    );
    print_stats(&cache.stats());
    Ok(())
}

fn print_stats(stats: &CacheStats) {
    println!("{}", "== Eval cache ==".bold());
    println!("  entries      {}/{}", stats.entries, stats.max_entries);
    println!("  memory       {}/{} bytes", stats.memory_bytes, stats.max_memory_bytes);
    println!(
        "  hits/misses  {}/{} ({:.1}% hit rate)",
        stats.hits,
        stats.misses,
        stats.hit_rate()
    );
    println!("  evictions    {}", stats.evictions);
    println!(
        "  compiles     {} fast-tier, {} fallback",
        stats.fast_tier_compiles, stats.fallback_compiles
    );
}
