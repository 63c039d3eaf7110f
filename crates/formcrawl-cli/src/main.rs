//! formcrawl - resumable, partitioned crawler for paged search forms
//!
//! Splits a range of result pages into units, crawls them on a bounded
//! pool of executors and checkpoints every page, so an interrupted crawl
//! picks up where it stopped.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};

mod cmd;
mod config;
mod convert;

use config::Config;

#[derive(Parser)]
#[command(name = "formcrawl")]
#[command(about = "Resumable, partitioned crawler for paged search forms")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    /// Config file path (default: ./formcrawl.toml or ~/.config/formcrawl/config.toml)
    #[arg(short, long, global = true)]
    config: Option<std::path::PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Crawl a partition, resuming from existing checkpoints
    Run(cmd::run::RunArgs),
    /// Show checkpoint progress
    Status(cmd::status::StatusArgs),
    /// Delete all checkpoints
    Reset(cmd::reset::ResetArgs),
    /// Show current configuration
    Config,
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // Progress context (TTY auto-detect)
    let progress = Arc::new(formcrawl_core::ProgressContext::new());

    // Logging:
    //   TTY:     quiet (warn) unless --debug, progress bars show activity
    //   non-TTY: info unless --debug, logs are the only progress indicator
    let is_tty = progress.is_tty();
    let multi = if is_tty { Some(progress.multi()) } else { None };
    let quiet = if is_tty { !cli.debug } else { false };
    if let Err(e) = formcrawl_core::init_logging(quiet, cli.debug, multi) {
        eprintln!("logger already initialized: {e}");
    }

    let config = if let Some(path) = cli.config {
        Config::from_file(&path)?
    } else {
        Config::load()?
    };

    match cli.command {
        Command::Run(args) => cmd::run::run(args, &config, &progress),
        Command::Status(args) => cmd::status::run(args, &config).map(|()| ExitCode::SUCCESS),
        Command::Reset(args) => cmd::reset::run(args, &config).map(|()| ExitCode::SUCCESS),
        Command::Config => {
            print_config(&config);
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn print_config(config: &Config) {
    use comfy_table::{Cell, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new("Setting").fg(Color::Cyan),
            Cell::new("Value").fg(Color::Cyan),
        ]);

    let crawl = &config.crawl;
    let settings = crawl.settings();
    let partitions = config
        .partitions
        .known
        .iter()
        .map(|(code, name)| format!("{code} ({name})"))
        .collect::<Vec<_>>()
        .join(", ");

    table.add_row(vec!["Search URL", &config.site.base_url]);
    table.add_row(vec!["Detail segment", &config.site.detail_segment]);
    table.add_row(vec![
        "Invalid certs",
        if config.site.accept_invalid_certs {
            "accepted"
        } else {
            "rejected"
        },
    ]);
    table.add_row(vec!["Default partition", &config.partitions.default]);
    table.add_row(vec!["Partitions", &partitions]);
    table.add_row(vec![
        "Items / units",
        &format!("{} / {}", crawl.total_items, crawl.units),
    ]);
    table.add_row(vec![
        "Executors",
        &format!("{} ({})", settings.executors, settings.schedule),
    ]);
    table.add_row(vec![
        "Delays",
        &format!(
            "{}ms per page, {}ms per retry",
            crawl.item_delay_ms, crawl.retry_delay_ms
        ),
    ]);
    table.add_row(vec![
        "Retries",
        &format!(
            "{} attempts per page, {} per session",
            crawl.attempt_budget, crawl.session_retries
        ),
    ]);
    table.add_row(vec![
        "Dataset dir",
        &config.output.dataset_dir.display().to_string(),
    ]);
    table.add_row(vec![
        "Checkpoint dir",
        &config.output.checkpoint_dir.display().to_string(),
    ]);
    table.add_row(vec![
        "Conversion",
        &if config.conversion.enabled {
            format!(
                "{} ({} workers, queue {})",
                config.conversion.command.join(" "),
                config.conversion.workers,
                config.conversion.queue_capacity
            )
        } else {
            "disabled".to_string()
        },
    ]);

    eprintln!("\n{table}");
}
