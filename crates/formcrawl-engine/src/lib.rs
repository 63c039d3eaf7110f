//! formcrawl-engine: resumable, partitioned crawl of a paged search form
//!
//! - [`upstream`]: the [`Upstream`] seam implemented by site clients
//! - [`processor`]: one attempt at one item
//! - [`retry`]: bounded re-attempts of failed items
//! - [`runner`]: one unit from its checkpoint to completion
//! - [`orchestrator`]: units on a bounded executor pool

pub mod artifacts;
pub mod orchestrator;
pub mod processor;
pub mod retry;
pub mod runner;
pub mod upstream;

#[cfg(test)]
mod testing;

pub use artifacts::{ArtifactDir, artifact_file_name};
pub use orchestrator::{
    ConfigError, Crawl, CrawlPlan, RunError, RunSummary, Schedule, Settings, UnitError,
    UnitOutcome, UnitRange,
};
pub use processor::{ItemOutcome, UnitProcessor};
pub use retry::{RetryDecision, RetryPolicy, retry_item};
pub use runner::{RunContext, UnitReport, UnitStatus, pause, run_unit};
pub use upstream::{FormState, PageFetch, Upstream};
