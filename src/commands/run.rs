//! Dispatch producer records through a provider
//!
//! Reads JSON lines of the form `{"type": "...", "metadata": {...}, "timestamp": 1700000000000}`
//! and tracks each one while the provider flushes on its schedule. Whatever is
//! still queued at end of input is flushed before the provider stops.

use beacon::analytics::{
    AnalyticsContext, BuildOptions, Host, HostEnvironment, Metadata, Provider, SharedQueue, TerminalVisibility,
};
use beacon::observability::{BatchSink, DisplayFormat};
use colored::*;
use eyre::{Context, Result};
use serde::Deserialize;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::cli::{OutputFormat, RunArgs};
use crate::config::Config;

/// One line of producer input
#[derive(Debug, Deserialize)]
struct ProducerRecord {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    metadata: Metadata,
    /// Explicit event time in epoch milliseconds
    #[serde(default)]
    timestamp: Option<i64>,
}

#[derive(Debug, Default, PartialEq, Eq)]
struct Summary {
    tracked: usize,
    skipped: usize,
    flushed_at_exit: usize,
    dropped: u64,
}

pub fn run(args: RunArgs, quiet: bool, config: &Config) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;

    let summary = runtime.block_on(dispatch(args, config))?;

    if !quiet {
        eprintln!(
            "{} Tracked {} events ({} skipped, {} flushed at exit, {} dropped)",
            "✓".green(),
            summary.tracked,
            summary.skipped,
            summary.flushed_at_exit,
            summary.dropped
        );
    }

    Ok(())
}

async fn dispatch(args: RunArgs, config: &Config) -> Result<Summary> {
    let queue = match config.queue.capacity {
        Some(capacity) => SharedQueue::bounded(capacity),
        None => SharedQueue::new(),
    };
    let host = Host::new(Arc::new(HostEnvironment::new("beacon run"))).with_visibility(Arc::new(TerminalVisibility));
    let provider = Provider::new(queue, host);

    let overrides = config.analytics.clone().overlay(&args.overrides());
    provider
        .start(provider.resolve(Some(&overrides)))
        .context("Failed to start provider")?;
    let ctx = provider.context()?;

    let format = match OutputFormat::resolve(args.format) {
        OutputFormat::Text => DisplayFormat::Text,
        OutputFormat::Json | OutputFormat::Yaml => DisplayFormat::Json,
    };
    let sink = BatchSink::new(
        config.delivery.sinks.clone(),
        Config::expand_path(&config.delivery.events_dir),
    )
    .with_http_endpoint(config.delivery.http_endpoint.clone())
    .with_http_timeout(Duration::from_millis(config.delivery.http_timeout_ms))
    .with_format(format);
    ctx.set_listener(sink)?;

    // reading stdin and the final delivery both block
    let input = args.input.clone();
    let (tracked, skipped, flushed_at_exit) = tokio::task::spawn_blocking(move || -> Result<_> {
        let (tracked, skipped) = read_records(input.as_deref(), &ctx)?;
        Ok((tracked, skipped, ctx.flush()?))
    })
    .await
    .context("Producer task panicked")??;
    let dropped = provider.queue().dropped();
    provider.stop();

    log::info!(
        "Run finished: {} tracked, {} skipped, {} flushed at exit",
        tracked,
        skipped,
        flushed_at_exit
    );

    Ok(Summary {
        tracked,
        skipped,
        flushed_at_exit,
        dropped,
    })
}

fn open_input(input: Option<&Path>) -> Result<Box<dyn BufRead>> {
    match input {
        Some(path) if path != Path::new("-") => {
            let file = File::open(path).with_context(|| format!("Failed to open input: {}", path.display()))?;
            Ok(Box::new(BufReader::new(file)))
        }
        _ => Ok(Box::new(io::stdin().lock())),
    }
}

/// Track every well-formed record; returns (tracked, skipped)
fn read_records(input: Option<&Path>, ctx: &AnalyticsContext) -> Result<(usize, usize)> {
    let reader = open_input(input)?;
    let mut tracked = 0;
    let mut skipped = 0;

    for (number, line) in reader.lines().enumerate() {
        let line = line.context("Failed to read input")?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let record = match serde_json::from_str::<ProducerRecord>(trimmed) {
            Ok(record) => record,
            Err(e) => {
                log::warn!("Skipping line {}: {}", number + 1, e);
                skipped += 1;
                continue;
            }
        };

        let options = BuildOptions {
            custom_timestamp: record.timestamp,
            ..BuildOptions::default()
        };
        match ctx.track(&record.event_type, Some(&record.metadata), &options, None) {
            Ok(()) => tracked += 1,
            Err(e) => {
                log::warn!("Skipping line {}: {}", number + 1, e);
                skipped += 1;
            }
        }
    }

    Ok((tracked, skipped))
}
