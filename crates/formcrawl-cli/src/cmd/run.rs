//! `formcrawl run` - crawl one partition, resuming from its checkpoints

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;

use formcrawl_core::{
    ConversionQueue, SharedProgress, install_signal_handlers, is_shutdown_requested, shutdown_flag,
};
use formcrawl_engine::{ArtifactDir, Crawl, CrawlPlan, RunContext, Schedule};
use formcrawl_store::CheckpointStore;
use formcrawl_webform::WebForm;

use crate::config::Config;
use crate::convert::ExternalCommand;

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Partition code (e.g. T, H), or ALL for no partition filter
    #[arg(short, long)]
    pub partition: Option<String>,

    /// Number of result pages to crawl
    #[arg(short = 'n', long)]
    pub total_items: Option<u32>,

    /// Number of units the pages are split into
    #[arg(short, long)]
    pub units: Option<u32>,

    /// Concurrent executors (1..=units)
    #[arg(short, long)]
    pub executors: Option<usize>,

    /// Unit scheduling: pool or round-robin
    #[arg(long)]
    pub schedule: Option<Schedule>,

    /// Milliseconds to wait after each page
    #[arg(long)]
    pub item_delay_ms: Option<u64>,

    /// Skip post-download conversion even if configured
    #[arg(long)]
    pub no_convert: bool,
}

pub fn run(args: RunArgs, config: &Config, progress: &SharedProgress) -> Result<ExitCode> {
    install_signal_handlers().context("failed to install signal handlers")?;

    let partition = config.resolve_partition(args.partition.as_deref())?;
    let mut crawl_config = config.crawl.clone();
    if let Some(n) = args.total_items {
        crawl_config.total_items = n;
    }
    if let Some(n) = args.units {
        crawl_config.units = n;
        // Follow the unit count unless executors were pinned explicitly
        if config.crawl.executors.is_none() {
            crawl_config.executors = None;
        }
    }
    if let Some(n) = args.executors {
        crawl_config.executors = Some(n);
    }
    if let Some(schedule) = args.schedule {
        crawl_config.schedule = schedule;
    }
    if let Some(ms) = args.item_delay_ms {
        crawl_config.item_delay_ms = ms;
    }

    let plan = CrawlPlan::split(crawl_config.total_items, crawl_config.units)?;
    let settings = crawl_config.settings();
    settings.validate(&plan)?;

    let store = CheckpointStore::open(&config.output.checkpoint_dir)?;
    let artifacts = ArtifactDir::open(&config.output.dataset_dir).with_context(|| {
        format!(
            "failed to create dataset dir {}",
            config.output.dataset_dir.display()
        )
    })?;
    let upstream = WebForm::new(config.site.clone()).context("invalid [site] URL")?;

    let conversion = if config.conversion.enabled && !args.no_convert {
        let converter = ExternalCommand::new(&config.conversion.command)?;
        Some(
            ConversionQueue::start(
                Arc::new(converter),
                config.conversion.workers,
                config.conversion.queue_capacity,
            )
            .context("failed to start conversion workers")?,
        )
    } else {
        None
    };

    let crawl = Crawl {
        upstream: &upstream,
        store: &store,
        artifacts: &artifacts,
        conversion: conversion.as_ref(),
    };
    let ctx = RunContext {
        shutdown: shutdown_flag(),
        item_delay: Duration::from_millis(crawl_config.item_delay_ms),
        progress: progress.as_ref(),
    };

    let summary = crawl.run(&plan, &partition, &settings, &ctx)?;
    summary.log();

    if let Some(queue) = conversion {
        log::info!("Waiting for conversion queue to drain...");
        let stats = queue.shutdown();
        log::info!(
            "Conversion: {} converted, {} failed, {} skipped (queue full)",
            stats.converted,
            stats.failed,
            stats.dropped
        );
    }

    if is_shutdown_requested() {
        log::warn!("Interrupted; re-run the same command to resume");
        return Ok(ExitCode::from(130));
    }
    if summary.any_failed() {
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}
