//! `formcrawl status` - show checkpoint progress per unit

use anyhow::Result;
use clap::Args;
use comfy_table::{
    Cell, CellAlignment, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL,
};

use formcrawl_core::fmt_num;
use formcrawl_store::{Checkpoint, CheckpointStore, UnitState};

use crate::config::Config;

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Only show this partition (ALL for the unpartitioned crawl)
    #[arg(short, long)]
    pub partition: Option<String>,
}

pub fn run(args: StatusArgs, config: &Config) -> Result<()> {
    let dir = &config.output.checkpoint_dir;
    if !dir.exists() {
        eprintln!("No checkpoints in {}.", dir.display());
        return Ok(());
    }
    let store = CheckpointStore::open(dir)?;
    let budget = config.crawl.attempt_budget;

    let mut ids = store.list_all()?;
    if let Some(code) = args.partition.as_deref() {
        let partition = config.resolve_partition(Some(code))?;
        ids.retain(|id| id.partition == partition);
    }
    if ids.is_empty() {
        eprintln!("No checkpoints in {}.", dir.display());
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new("Unit").fg(Color::Cyan),
            Cell::new("Items").fg(Color::Cyan),
            Cell::new("Last").fg(Color::Cyan),
            Cell::new("Done").fg(Color::Cyan),
            Cell::new("Failed").fg(Color::Cyan),
            Cell::new("Links").fg(Color::Cyan),
            Cell::new("PDFs").fg(Color::Cyan),
            Cell::new("State").fg(Color::Cyan),
            Cell::new("Updated").fg(Color::Cyan),
        ]);

    let mut totals = (0u64, 0u64);
    let mut broken = 0;
    for id in &ids {
        match store.load(&id.partition, id.unit) {
            Ok(Some(cp)) => {
                totals.0 += cp.total_links_found;
                totals.1 += cp.total_artifacts_fetched;
                table.add_row(row(&cp, budget));
            }
            Ok(None) => {}
            Err(e) => {
                broken += 1;
                table.add_row(vec![Cell::new(id), Cell::new(e).fg(Color::Red)]);
            }
        }
    }

    eprintln!("\n{table}");
    eprintln!(
        "{} checkpoints, {} links, {} PDFs{}",
        ids.len(),
        fmt_num(totals.0),
        fmt_num(totals.1),
        if broken > 0 {
            format!(", {broken} unreadable")
        } else {
            String::new()
        }
    );
    eprintln!("Checkpoint dir: {}", dir.display());
    Ok(())
}

fn row(cp: &Checkpoint, budget: u32) -> Vec<Cell> {
    let exhausted = cp
        .backlog()
        .iter()
        .filter(|&&item| cp.retries_of(item) >= budget)
        .count();
    let failed = if exhausted > 0 {
        format!("{} ({exhausted} exhausted)", cp.failed_items.len())
    } else {
        cp.failed_items.len().to_string()
    };
    let state = match cp.unit_state() {
        UnitState::Completed if cp.failed_items.is_empty() => {
            Cell::new(UnitState::Completed).fg(Color::Green)
        }
        // Swept to the end with failures still in the backlog
        UnitState::Completed => Cell::new("COMPLETED*").fg(Color::Yellow),
        UnitState::Running => {
            Cell::new(format!("RUNNING {:.0}%", cp.progress_percent())).fg(Color::Blue)
        }
        UnitState::New => Cell::new(UnitState::New).fg(Color::DarkGrey),
    };

    vec![
        Cell::new(cp.id()),
        Cell::new(format!("{}-{}", cp.start_item, cp.end_item)),
        Cell::new(cp.last_processed_item).set_alignment(CellAlignment::Right),
        Cell::new(format!("{}/{}", cp.completed_items.len(), cp.item_count())),
        Cell::new(failed),
        Cell::new(fmt_num(cp.total_links_found)).set_alignment(CellAlignment::Right),
        Cell::new(fmt_num(cp.total_artifacts_fetched)).set_alignment(CellAlignment::Right),
        state,
        Cell::new(cp.last_updated_at.format("%Y-%m-%d %H:%M:%S")),
    ]
}
