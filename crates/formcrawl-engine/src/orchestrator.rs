//! Partition a crawl into units and run them on a bounded executor pool

use std::fmt;
use std::str::FromStr;
use std::sync::Mutex;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use formcrawl_core::{
    ConversionQueue, FetchError, WorkQueue, fmt_num, retry_with_backoff, round_robin,
};
use formcrawl_store::{
    Checkpoint, CheckpointId, CheckpointStore, InvalidPartitionKey, PartitionKey, StoreError,
};

use crate::artifacts::ArtifactDir;
use crate::processor::UnitProcessor;
use crate::retry::RetryPolicy;
use crate::runner::{RunContext, UnitReport, UnitStatus, run_unit};
use crate::upstream::Upstream;

/// Rejected crawl configuration; nothing has run yet.
#[derive(Debug)]
pub enum ConfigError {
    /// A bound that must be positive was zero
    Zero(&'static str),
    /// Unit `unit` would start past the last item
    EmptyUnit { unit: u32, start: u32, total: u32 },
    Executors { executors: usize, units: u32 },
    Partition(InvalidPartitionKey),
    UnknownPartition { code: String, known: Vec<String> },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Zero(what) => write!(f, "{what} must be greater than zero"),
            Self::EmptyUnit { unit, start, total } => write!(
                f,
                "unit {unit} would start at item {start}, past the {total} items available"
            ),
            Self::Executors { executors, units } => {
                write!(f, "executors must be between 1 and {units}, got {executors}")
            }
            Self::Partition(e) => write!(f, "{e}"),
            Self::UnknownPartition { code, known } => {
                write!(f, "unknown partition '{code}' (known: {})", known.join(", "))
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Partition(e) => Some(e),
            _ => None,
        }
    }
}

impl From<InvalidPartitionKey> for ConfigError {
    fn from(e: InvalidPartitionKey) -> Self {
        Self::Partition(e)
    }
}

/// Item range owned by one unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnitRange {
    pub unit: u32,
    pub start: u32,
    /// Inclusive
    pub end: u32,
}

/// Split of `1..=total_items` into `num_units` consecutive ranges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrawlPlan {
    total_items: u32,
    unit_size: u32,
    num_units: u32,
}

impl CrawlPlan {
    pub fn new(total_items: u32, unit_size: u32, num_units: u32) -> Result<Self, ConfigError> {
        if total_items == 0 {
            return Err(ConfigError::Zero("total items"));
        }
        if unit_size == 0 {
            return Err(ConfigError::Zero("unit size"));
        }
        if num_units == 0 {
            return Err(ConfigError::Zero("number of units"));
        }
        let plan = Self {
            total_items,
            unit_size,
            num_units,
        };

        let last_start = u64::from(num_units - 1) * u64::from(unit_size) + 1;
        if last_start > u64::from(total_items) {
            return Err(ConfigError::EmptyUnit {
                unit: num_units,
                start: u32::try_from(last_start).unwrap_or(u32::MAX),
                total: total_items,
            });
        }
        let covered = u64::from(num_units) * u64::from(unit_size);
        if covered < u64::from(total_items) {
            log::warn!(
                "{num_units} units of {unit_size} cover only {covered} of {total_items} items"
            );
        }
        Ok(plan)
    }

    /// `num_units` units of `ceil(total_items / num_units)` items each
    pub fn split(total_items: u32, num_units: u32) -> Result<Self, ConfigError> {
        if num_units == 0 {
            return Err(ConfigError::Zero("number of units"));
        }
        Self::new(total_items, total_items.div_ceil(num_units), num_units)
    }

    pub fn total_items(&self) -> u32 {
        self.total_items
    }

    pub fn unit_size(&self) -> u32 {
        self.unit_size
    }

    pub fn num_units(&self) -> u32 {
        self.num_units
    }

    /// Range of `unit` (1-based)
    pub fn unit(&self, unit: u32) -> UnitRange {
        let start = (unit - 1) * self.unit_size + 1;
        let end = unit.saturating_mul(self.unit_size).min(self.total_items);
        UnitRange { unit, start, end }
    }

    pub fn units(&self) -> Vec<UnitRange> {
        (1..=self.num_units).map(|n| self.unit(n)).collect()
    }
}

/// How units are assigned to executors
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Schedule {
    /// Executors claim the next unclaimed unit
    #[default]
    Pool,
    /// Executor `i` owns units `n` with `(n - 1) % executors == i`
    RoundRobin,
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pool => f.write_str("pool"),
            Self::RoundRobin => f.write_str("round-robin"),
        }
    }
}

impl FromStr for Schedule {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pool" => Ok(Self::Pool),
            "round-robin" => Ok(Self::RoundRobin),
            other => Err(format!("unknown schedule '{other}' (pool, round-robin)")),
        }
    }
}

/// Execution settings for a run
#[derive(Debug, Clone)]
pub struct Settings {
    pub executors: usize,
    pub schedule: Schedule,
    pub retry: RetryPolicy,
    pub item_delay: Duration,
    /// Extra attempts to open a session before the unit is given up
    pub session_retries: u32,
    /// Base of the session backoff (`base * 2^attempt`)
    pub session_backoff: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            executors: 1,
            schedule: Schedule::Pool,
            retry: RetryPolicy::default(),
            item_delay: Duration::from_secs(1),
            session_retries: 3,
            session_backoff: Duration::from_secs(1),
        }
    }
}

impl Settings {
    pub fn validate(&self, plan: &CrawlPlan) -> Result<(), ConfigError> {
        if self.executors == 0 || self.executors > plan.num_units as usize {
            return Err(ConfigError::Executors {
                executors: self.executors,
                units: plan.num_units,
            });
        }
        if self.retry.attempt_budget == 0 {
            return Err(ConfigError::Zero("attempt budget"));
        }
        Ok(())
    }
}

/// Why a unit could not run
#[derive(Debug)]
pub enum UnitError {
    Store(StoreError),
    Session(FetchError),
}

impl fmt::Display for UnitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Store(e) => write!(f, "checkpoint: {e}"),
            Self::Session(e) => write!(f, "session: {e}"),
        }
    }
}

impl std::error::Error for UnitError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Store(e) => Some(e),
            Self::Session(e) => Some(e),
        }
    }
}

/// Per-unit result of a run
#[derive(Debug)]
pub enum UnitOutcome {
    /// Already complete, nothing left to retry
    Skipped(CheckpointId),
    Ran(UnitReport),
    Failed { id: CheckpointId, error: UnitError },
}

impl UnitOutcome {
    pub fn id(&self) -> &CheckpointId {
        match self {
            Self::Skipped(id) | Self::Failed { id, .. } => id,
            Self::Ran(report) => &report.id,
        }
    }
}

/// Aggregate of one orchestrator run
#[derive(Debug)]
pub struct RunSummary {
    pub partition: PartitionKey,
    pub total_units: u32,
    /// Outcomes sorted by unit; units never started (shutdown) are absent
    pub outcomes: Vec<UnitOutcome>,
    pub elapsed: Duration,
}

impl RunSummary {
    fn count(&self, pred: impl Fn(&UnitOutcome) -> bool) -> usize {
        self.outcomes.iter().filter(|o| pred(o)).count()
    }

    fn reports(&self) -> impl Iterator<Item = &UnitReport> {
        self.outcomes.iter().filter_map(|o| match o {
            UnitOutcome::Ran(report) => Some(report),
            _ => None,
        })
    }

    pub fn completed_units(&self) -> usize {
        self.count(|o| matches!(o, UnitOutcome::Ran(r) if r.state == UnitStatus::Completed))
    }

    pub fn skipped_units(&self) -> usize {
        self.count(|o| matches!(o, UnitOutcome::Skipped(_)))
    }

    pub fn incomplete_units(&self) -> usize {
        self.count(|o| matches!(o, UnitOutcome::Ran(r) if r.state == UnitStatus::Incomplete))
    }

    pub fn failed_units(&self) -> usize {
        self.count(|o| matches!(o, UnitOutcome::Failed { .. }))
    }

    /// Units interrupted mid-pass or never started
    pub fn interrupted_units(&self) -> usize {
        let stopped =
            self.count(|o| matches!(o, UnitOutcome::Ran(r) if r.state == UnitStatus::Interrupted));
        stopped + (self.total_units as usize).saturating_sub(self.outcomes.len())
    }

    pub fn items_processed(&self) -> u64 {
        self.reports().map(|r| u64::from(r.processed)).sum()
    }

    pub fn items_succeeded(&self) -> u64 {
        self.reports().map(|r| u64::from(r.succeeded)).sum()
    }

    pub fn items_failed(&self) -> u64 {
        self.reports().map(|r| u64::from(r.failed)).sum()
    }

    pub fn links(&self) -> u64 {
        self.reports().map(|r| r.links).sum()
    }

    pub fn artifacts(&self) -> u64 {
        self.reports().map(|r| r.artifacts).sum()
    }

    pub fn any_failed(&self) -> bool {
        self.failed_units() > 0
    }

    pub fn interrupted(&self) -> bool {
        self.interrupted_units() > 0
    }

    pub fn log(&self) {
        log::info!("=== Crawl Summary ({}) ===", self.partition);
        log::info!(
            "Units: {}/{} completed, {} skipped, {} incomplete, {} interrupted, {} failed",
            self.completed_units(),
            self.total_units,
            self.skipped_units(),
            self.incomplete_units(),
            self.interrupted_units(),
            self.failed_units()
        );
        log::info!(
            "Items: {} processed ({} ok, {} failed)",
            fmt_num(self.items_processed()),
            fmt_num(self.items_succeeded()),
            fmt_num(self.items_failed())
        );
        log::info!(
            "Links: {}, artifacts: {}",
            fmt_num(self.links()),
            fmt_num(self.artifacts())
        );
        for outcome in &self.outcomes {
            if let UnitOutcome::Failed { id, error } = outcome {
                log::error!("{id}: {error}");
            }
        }
        log::info!("Time: {:.1}s", self.elapsed.as_secs_f64());
    }
}

/// Fatal to the whole run; raised before any unit starts
#[derive(Debug)]
pub enum RunError {
    Config(ConfigError),
    Store(StoreError),
    Pool(rayon::ThreadPoolBuildError),
}

impl fmt::Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(e) => write!(f, "invalid configuration: {e}"),
            Self::Store(e) => write!(f, "checkpoint store: {e}"),
            Self::Pool(e) => write!(f, "executor pool: {e}"),
        }
    }
}

impl std::error::Error for RunError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Config(e) => Some(e),
            Self::Store(e) => Some(e),
            Self::Pool(e) => Some(e),
        }
    }
}

impl From<ConfigError> for RunError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

impl From<StoreError> for RunError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

/// Everything a run talks to besides its settings
pub struct Crawl<'a, U> {
    pub upstream: &'a U,
    pub store: &'a CheckpointStore,
    pub artifacts: &'a ArtifactDir,
    pub conversion: Option<&'a ConversionQueue>,
}

impl<U: Upstream> Crawl<'_, U> {
    /// Run every unit of `plan` for `partition`, resuming from the store.
    ///
    /// A unit's fatal error is recorded in its outcome; the other units keep
    /// going. Returns `Err` only when nothing could start.
    pub fn run(
        &self,
        plan: &CrawlPlan,
        partition: &PartitionKey,
        settings: &Settings,
        ctx: &RunContext<'_>,
    ) -> Result<RunSummary, RunError> {
        let start = Instant::now();
        settings.validate(plan)?;

        self.store.cleanup_tmp_files()?;
        for unit in self.store.list_partition(partition)? {
            if unit == 0 || unit > plan.num_units {
                log::warn!(
                    "ignoring checkpoint for unit {unit}: plan has {} units",
                    plan.num_units
                );
            }
        }

        let units = plan.units();
        log::info!(
            "Crawling partition {partition}: {} items in {} units of {}, {} executor(s), {} schedule",
            fmt_num(u64::from(plan.total_items)),
            plan.num_units,
            plan.unit_size,
            settings.executors,
            settings.schedule
        );

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(settings.executors)
            .thread_name(|i| format!("executor-{i}"))
            .build()
            .map_err(RunError::Pool)?;

        let stage = ctx.progress.stage_line("crawl");
        let outcomes = Mutex::new(Vec::with_capacity(units.len()));
        let record = |outcome: UnitOutcome| {
            let mut outcomes = outcomes.lock().expect("executor panicked");
            outcomes.push(outcome);
            stage.set_message(format!("{}/{} units", outcomes.len(), plan.num_units));
        };

        match settings.schedule {
            Schedule::Pool => {
                let queue = WorkQueue::new(units);
                pool.scope(|s| {
                    for _ in 0..settings.executors {
                        s.spawn(|_| {
                            while let Some(range) = queue.next() {
                                if ctx.shutdown.load(Ordering::Relaxed) {
                                    break;
                                }
                                record(self.run_one(range, plan, partition, settings, ctx));
                            }
                        });
                    }
                });
            }
            Schedule::RoundRobin => {
                let lanes = round_robin(units, settings.executors);
                pool.scope(|s| {
                    for lane in &lanes {
                        let record = &record;
                        s.spawn(move |_| {
                            for range in lane {
                                if ctx.shutdown.load(Ordering::Relaxed) {
                                    break;
                                }
                                record(self.run_one(range, plan, partition, settings, ctx));
                            }
                        });
                    }
                });
            }
        }
        stage.finish_and_clear();

        let mut outcomes = outcomes.into_inner().expect("executor panicked");
        outcomes.sort_by(|a, b| a.id().cmp(b.id()));
        Ok(RunSummary {
            partition: partition.clone(),
            total_units: plan.num_units,
            outcomes,
            elapsed: start.elapsed(),
        })
    }

    fn run_one(
        &self,
        range: &UnitRange,
        plan: &CrawlPlan,
        partition: &PartitionKey,
        settings: &Settings,
        ctx: &RunContext<'_>,
    ) -> UnitOutcome {
        let id = CheckpointId::new(partition.clone(), range.unit);
        let failed = |error| UnitOutcome::Failed {
            id: id.clone(),
            error,
        };

        let checkpoint = match self.store.load(partition, range.unit) {
            Ok(Some(cp)) => {
                if (cp.start_item, cp.end_item) != (range.start, range.end) {
                    log::warn!(
                        "{id}: stored range {}-{} differs from plan {}-{}, keeping stored",
                        cp.start_item,
                        cp.end_item,
                        range.start,
                        range.end
                    );
                }
                cp
            }
            Ok(None) => self.store.create(
                partition,
                range.unit,
                range.start,
                range.end,
                plan.unit_size,
                plan.total_items,
            ),
            Err(e) => {
                log::error!("{id}: cannot load checkpoint: {e}");
                return failed(UnitError::Store(e));
            }
        };

        if nothing_left(&checkpoint, &settings.retry) {
            log::info!("{id}: already completed, skipping");
            return UnitOutcome::Skipped(id.clone());
        }

        let label = format!("{id} session");
        let session = retry_with_backoff(
            &label,
            settings.session_retries,
            settings.session_backoff,
            || self.upstream.initialize_session(partition),
        );
        let (mut session, form_state) = match session {
            Ok(opened) => opened,
            Err(e) => return failed(UnitError::Session(e)),
        };

        let processor = UnitProcessor::new(self.upstream, self.artifacts, self.conversion);
        match run_unit(
            self.store,
            &processor,
            &mut session,
            form_state,
            checkpoint,
            &settings.retry,
            ctx,
        ) {
            Ok(report) => UnitOutcome::Ran(report),
            Err(e) if e.is_storage_full() => {
                log::error!("{id}: checkpoint directory is out of space, free disk and rerun: {e}");
                failed(UnitError::Store(e))
            }
            Err(e) => {
                log::error!("{id}: stopped on checkpoint error: {e}");
                failed(UnitError::Store(e))
            }
        }
    }
}

/// Completed, and every remaining failure has used up its budget
fn nothing_left(checkpoint: &Checkpoint, policy: &RetryPolicy) -> bool {
    checkpoint.is_completed
        && checkpoint
            .backlog()
            .iter()
            .all(|&item| checkpoint.retries_of(item) >= policy.attempt_budget)
}
