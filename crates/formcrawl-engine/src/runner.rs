//! Drives one unit from its checkpoint to completion
//!
//! A pass has two phases:
//! 1. Backlog: every item that was failed when the pass started gets one
//!    [`retry_item`] call.
//! 2. Sweep: items from [`Checkpoint::resume_from`] to the unit's end,
//!    skipping completed items and items already attempted in phase 1.
//!
//! The checkpoint is saved after every item, so a crash loses at most the
//! item in flight. Items that fail during the sweep wait for the next pass.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use formcrawl_core::ProgressContext;
use formcrawl_store::{Checkpoint, CheckpointId, CheckpointStore, ItemState, StoreError};

use crate::processor::UnitProcessor;
use crate::retry::{RetryDecision, RetryPolicy, retry_item};
use crate::upstream::{FormState, Upstream};

/// Granularity of interruptible sleeps
const PAUSE_SLICE: Duration = Duration::from_millis(100);

/// Ambient inputs shared by every unit of a run
pub struct RunContext<'a> {
    /// Checked between items
    pub shutdown: &'a AtomicBool,
    /// Throttle after each swept item
    pub item_delay: Duration,
    pub progress: &'a ProgressContext,
}

/// How a unit's pass ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitStatus {
    Completed,
    /// Swept to the end but the final item has not succeeded yet
    Incomplete,
    Interrupted,
}

impl fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed => f.write_str("completed"),
            Self::Incomplete => f.write_str("incomplete"),
            Self::Interrupted => f.write_str("interrupted"),
        }
    }
}

/// Counts for one pass over a unit
#[derive(Debug, Clone)]
pub struct UnitReport {
    pub id: CheckpointId,
    pub state: UnitStatus,
    /// Item attempts made in this pass
    pub processed: u32,
    pub succeeded: u32,
    pub failed: u32,
    pub links: u64,
    pub artifacts: u64,
    pub elapsed: Duration,
}

impl UnitReport {
    fn new(id: CheckpointId) -> Self {
        Self {
            id,
            state: UnitStatus::Incomplete,
            processed: 0,
            succeeded: 0,
            failed: 0,
            links: 0,
            artifacts: 0,
            elapsed: Duration::ZERO,
        }
    }

    fn success(&mut self, links: usize, artifacts: usize) {
        self.processed += 1;
        self.succeeded += 1;
        self.links += links as u64;
        self.artifacts += artifacts as u64;
    }

    fn failure(&mut self) {
        self.processed += 1;
        self.failed += 1;
    }
}

/// Sleep up to `delay`, returning early once `shutdown` is raised.
pub fn pause(delay: Duration, shutdown: &AtomicBool) {
    let deadline = Instant::now() + delay;
    loop {
        if shutdown.load(Ordering::Relaxed) {
            return;
        }
        let left = deadline.saturating_duration_since(Instant::now());
        if left.is_zero() {
            return;
        }
        std::thread::sleep(left.min(PAUSE_SLICE));
    }
}

/// Run one pass over the unit described by `checkpoint`.
///
/// Item failures are folded into the record and never abort the pass. A
/// store error does: the unit must not run ahead of its durable record.
pub fn run_unit<U: Upstream>(
    store: &CheckpointStore,
    processor: &UnitProcessor<'_, U>,
    session: &mut U::Session,
    form_state: FormState,
    mut checkpoint: Checkpoint,
    policy: &RetryPolicy,
    ctx: &RunContext<'_>,
) -> Result<UnitReport, StoreError> {
    let start = Instant::now();
    let id = checkpoint.id();
    let mut report = UnitReport::new(id.clone());
    let mut form_state = form_state;

    let pb = ctx
        .progress
        .unit_bar(&format!("unit {id}"), u64::from(checkpoint.item_count()));
    pb.set_position(checkpoint.completed_items.len() as u64);

    // Make sure a record exists before the first network request
    store.save(&mut checkpoint)?;

    let backlog = checkpoint.backlog();
    if !backlog.is_empty() {
        log::info!("{id}: {} failed item(s) from earlier passes", backlog.len());
        pb.set_message("retrying backlog");
    }

    let mut attempted = BTreeSet::new();
    for item in backlog {
        if ctx.shutdown.load(Ordering::Relaxed) {
            return Ok(finish(report, UnitStatus::Interrupted, &pb, start));
        }
        attempted.insert(item);
        let (decision, next) = retry_item(
            processor,
            session,
            &mut checkpoint,
            item,
            form_state,
            policy,
            ctx.shutdown,
        );
        form_state = next;
        match decision {
            RetryDecision::Recovered { links, artifacts } => report.success(links, artifacts),
            RetryDecision::Failed { .. } => report.failure(),
            RetryDecision::Exhausted { .. } => continue,
        }
        store.save(&mut checkpoint)?;
        pb.set_position(checkpoint.completed_items.len() as u64);
    }

    let from = checkpoint.resume_from();
    let end = checkpoint.end_item;
    if from <= end {
        log::info!("{id}: sweeping items {from}-{end}");
        pb.set_message("");
    }

    let partition = checkpoint.partition_key.clone();
    for item in from..=end {
        if checkpoint.item_state(item) == ItemState::Completed || attempted.contains(&item) {
            continue;
        }
        if ctx.shutdown.load(Ordering::Relaxed) {
            return Ok(finish(report, UnitStatus::Interrupted, &pb, start));
        }

        let outcome = processor.process_item(session, item, form_state, &partition);
        form_state = outcome.form_state;
        if outcome.success {
            let links = outcome.links.len();
            checkpoint.record_success(item, links, outcome.artifacts_fetched);
            report.success(links, outcome.artifacts_fetched);
            log::debug!(
                "{id}: item {item} done, {links} links, {} artifacts",
                outcome.artifacts_fetched
            );
        } else {
            let retries = checkpoint.record_failure(item);
            report.failure();
            log::warn!("{id}: item {item} failed (attempt {retries})");
        }
        store.save(&mut checkpoint)?;

        pb.set_position(checkpoint.completed_items.len() as u64);
        if !ctx.progress.is_tty() {
            log::info!(
                "{id}: item {item}/{end}, {:.1}% of unit done",
                checkpoint.progress_percent()
            );
        }

        if item < end {
            pause(ctx.item_delay, ctx.shutdown);
        }
    }

    checkpoint.refresh_completion();
    store.save(&mut checkpoint)?;

    let state = if checkpoint.is_completed {
        UnitStatus::Completed
    } else {
        UnitStatus::Incomplete
    };
    if ctx.shutdown.load(Ordering::Relaxed) && state != UnitStatus::Completed {
        return Ok(finish(report, UnitStatus::Interrupted, &pb, start));
    }
    Ok(finish(report, state, &pb, start))
}

fn finish(
    mut report: UnitReport,
    state: UnitStatus,
    pb: &indicatif::ProgressBar,
    start: Instant,
) -> UnitReport {
    pb.finish_and_clear();
    report.state = state;
    report.elapsed = start.elapsed();
    log::info!(
        "{}: {state} in {:.1}s ({} processed, {} ok, {} failed, {} links)",
        report.id,
        report.elapsed.as_secs_f64(),
        report.processed,
        report.succeeded,
        report.failed,
        report.links
    );
    report
}
