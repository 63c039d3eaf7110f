//! `formcrawl reset` - delete every checkpoint so the next run starts over

use anyhow::Result;
use clap::Args;

use formcrawl_store::CheckpointStore;

use crate::config::Config;

#[derive(Args, Debug)]
pub struct ResetArgs {
    /// Actually delete (otherwise dry-run)
    #[arg(long)]
    pub yes: bool,
}

pub fn run(args: ResetArgs, config: &Config) -> Result<()> {
    let dir = &config.output.checkpoint_dir;
    if !dir.exists() {
        eprintln!("No checkpoint directory at {}.", dir.display());
        return Ok(());
    }
    let store = CheckpointStore::open(dir)?;

    if !args.yes {
        let count = store.list_all()?.len();
        if count == 0 {
            eprintln!("No checkpoints to remove.");
        } else {
            eprintln!("Would remove {count} checkpoint(s) from {}.", dir.display());
            eprintln!("Run with --yes to actually delete.");
        }
        return Ok(());
    }

    let removed = store.wipe()?;
    log::info!("Removed {removed} checkpoint file(s) from {}", dir.display());
    eprintln!("Removed {removed} checkpoint file(s).");
    Ok(())
}
