//! Implementations of the `tw` subcommands.
//!
//! Each command has a pure half that returns units (used by tests) and a
//! `run_*` half that prints them as JSON on stdout.

use anyhow::{Context, Result};
use std::path::Path;
use tracing::{info, warn};

use threadwise_core::chunk::ThreadChunker;
use threadwise_core::models::{EmailThread, Unit};
use threadwise_core::summarize::ThreadSummarizer;

use crate::config::Config;
use crate::threads::load_threads;

fn chunker(cfg: &Config) -> Result<ThreadChunker> {
    ThreadChunker::new(cfg.chunking.clone()).context("Failed to build chunker")
}

fn summarizer(cfg: &Config, chunker: &ThreadChunker) -> ThreadSummarizer {
    ThreadSummarizer::new(
        cfg.summarizer.clone(),
        chunker.tokenizer(),
        cfg.chunking.chunk_size,
    )
}

/// Detail units for every thread, each thread's summary first when
/// `with_summary` is set.
pub async fn chunk_threads(
    cfg: &Config,
    threads: &[EmailThread],
    project_id: &str,
    with_summary: bool,
) -> Result<Vec<Unit>> {
    let chunker = chunker(cfg)?;
    let summarizer = summarizer(cfg, &chunker);

    let mut out = Vec::new();
    for thread in threads {
        let units = chunker
            .chunk(thread, project_id)
            .with_context(|| format!("Failed to chunk thread {}", thread.id))?;
        for problem in chunker.audit(&units) {
            warn!(thread_id = %thread.id, "{}", problem);
        }
        info!(thread_id = %thread.id, units = units.len(), "chunked thread");
        if with_summary {
            out.push(summarizer.summarize(thread, project_id).await);
        }
        out.extend(units);
    }
    Ok(out)
}

/// One summary unit per thread.
pub async fn summarize_threads(
    cfg: &Config,
    threads: &[EmailThread],
    project_id: &str,
) -> Result<Vec<Unit>> {
    let chunker = chunker(cfg)?;
    let summarizer = summarizer(cfg, &chunker);

    let mut out = Vec::with_capacity(threads.len());
    for thread in threads {
        let outcome = summarizer.summarize_outcome(thread, project_id).await;
        info!(thread_id = %thread.id, strategy = %outcome.strategy, "summarized thread");
        out.push(outcome.unit);
    }
    Ok(out)
}

pub async fn run_chunk(cfg: &Config, path: &Path, project_id: &str, with_summary: bool) -> Result<()> {
    let threads = load_threads(path)?;
    let units = chunk_threads(cfg, &threads, project_id, with_summary).await?;
    print_json(&units)
}

pub async fn run_summarize(cfg: &Config, path: &Path, project_id: &str) -> Result<()> {
    let threads = load_threads(path)?;
    let units = summarize_threads(cfg, &threads, project_id).await?;
    print_json(&units)
}

pub fn run_config(cfg: &Config) -> Result<()> {
    print!("{}", cfg.to_toml()?);
    Ok(())
}

fn print_json(units: &[Unit]) -> Result<()> {
    let json = serde_json::to_string_pretty(units).context("Failed to serialize units")?;
    println!("{}", json);
    Ok(())
}
