//! Bounded, throttled re-attempts of previously failed items

use std::sync::atomic::AtomicBool;
use std::time::Duration;

use formcrawl_store::Checkpoint;

use crate::processor::UnitProcessor;
use crate::runner::pause;
use crate::upstream::{FormState, Upstream};

/// How many attempts an item gets and how long to wait after each retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total failed attempts after which an item is left alone
    pub attempt_budget: u32,
    pub retry_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempt_budget: 3,
            retry_delay: Duration::from_secs(5),
        }
    }
}

/// Result of one [`retry_item`] call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Budget already spent; nothing attempted
    Exhausted { retries: u32 },
    Recovered { links: usize, artifacts: usize },
    /// Attempted and failed again
    Failed { retries: u32 },
}

impl RetryDecision {
    pub fn attempted(&self) -> bool {
        !matches!(self, Self::Exhausted { .. })
    }
}

/// Give a failed item one more attempt, if its budget allows.
///
/// Folds the result into `checkpoint` (the caller persists it) and returns
/// the form state to carry forward. Sleeps `retry_delay` after an attempt.
pub fn retry_item<U: Upstream>(
    processor: &UnitProcessor<'_, U>,
    session: &mut U::Session,
    checkpoint: &mut Checkpoint,
    item: u32,
    form_state: FormState,
    policy: &RetryPolicy,
    shutdown: &AtomicBool,
) -> (RetryDecision, FormState) {
    let unit = checkpoint.id();
    let retries = checkpoint.retries_of(item);
    if retries >= policy.attempt_budget {
        log::warn!(
            "{unit}: item {item} exhausted its retries ({retries}/{})",
            policy.attempt_budget
        );
        return (RetryDecision::Exhausted { retries }, form_state);
    }

    log::info!(
        "{unit}: retrying item {item} (attempt {}/{})",
        retries + 1,
        policy.attempt_budget
    );
    let partition = checkpoint.partition_key.clone();
    let outcome = processor.process_item(session, item, form_state, &partition);

    let decision = if outcome.success {
        let links = outcome.links.len();
        checkpoint.record_success(item, links, outcome.artifacts_fetched);
        log::info!("{unit}: item {item} recovered, {links} links");
        RetryDecision::Recovered {
            links,
            artifacts: outcome.artifacts_fetched,
        }
    } else {
        let retries = checkpoint.record_failure(item);
        log::warn!("{unit}: retry of item {item} failed ({retries}/{})", policy.attempt_budget);
        RetryDecision::Failed { retries }
    };

    pause(policy.retry_delay, shutdown);
    (decision, outcome.form_state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::ArtifactDir;
    use crate::testing::{FakeSession, ScriptedUpstream};
    use formcrawl_store::PartitionKey;
    use tempfile::TempDir;

    const POLICY: RetryPolicy = RetryPolicy {
        attempt_budget: 3,
        retry_delay: Duration::ZERO,
    };

    fn checkpoint() -> Checkpoint {
        Checkpoint::new(PartitionKey::new("T").unwrap(), 1, 1, 5, 5, 5)
    }

    #[test]
    fn exhausted_item_is_not_attempted() {
        let tmp = TempDir::new().unwrap();
        let dir = ArtifactDir::open(tmp.path()).unwrap();
        let upstream = ScriptedUpstream::new(1);
        let processor = UnitProcessor::new(&upstream, &dir, None);
        let mut session = FakeSession::default();

        let mut cp = checkpoint();
        for _ in 0..3 {
            cp.record_failure(2);
        }
        let before = cp.clone();
        let state: FormState = [("token", "x")].into_iter().collect();
        let (decision, next) = retry_item(
            &processor,
            &mut session,
            &mut cp,
            2,
            state.clone(),
            &POLICY,
            &AtomicBool::new(false),
        );

        assert_eq!(decision, RetryDecision::Exhausted { retries: 3 });
        assert!(!decision.attempted());
        assert_eq!(cp, before);
        assert_eq!(next, state);
        assert!(upstream.calls().is_empty());
    }

    #[test]
    fn recovery_clears_failure() {
        let tmp = TempDir::new().unwrap();
        let dir = ArtifactDir::open(tmp.path()).unwrap();
        let upstream = ScriptedUpstream::new(2);
        let processor = UnitProcessor::new(&upstream, &dir, None);
        let mut session = FakeSession::default();

        let mut cp = checkpoint();
        cp.record_success(1, 2, 2);
        cp.record_failure(2);
        let (decision, next) = retry_item(
            &processor,
            &mut session,
            &mut cp,
            2,
            FormState::new(),
            &POLICY,
            &AtomicBool::new(false),
        );

        assert_eq!(
            decision,
            RetryDecision::Recovered {
                links: 2,
                artifacts: 2
            }
        );
        assert!(cp.completed_items.contains(&2));
        assert!(cp.failed_items.is_empty());
        assert_eq!(cp.retries_of(2), 0);
        assert_eq!(cp.last_processed_item, 2);
        assert_eq!(next.get("token"), Some("2"));
    }

    #[test]
    fn failed_retry_counts_against_budget() {
        let tmp = TempDir::new().unwrap();
        let dir = ArtifactDir::open(tmp.path()).unwrap();
        let upstream = ScriptedUpstream::new(1).fail_always(2);
        let processor = UnitProcessor::new(&upstream, &dir, None);
        let mut session = FakeSession::default();

        let mut cp = checkpoint();
        cp.record_failure(2);
        let mut state = FormState::new();
        for expected in 2..=3 {
            let (decision, next) = retry_item(
                &processor,
                &mut session,
                &mut cp,
                2,
                state,
                &POLICY,
                &AtomicBool::new(false),
            );
            assert_eq!(decision, RetryDecision::Failed { retries: expected });
            state = next;
        }
        let (decision, _) = retry_item(
            &processor,
            &mut session,
            &mut cp,
            2,
            state,
            &POLICY,
            &AtomicBool::new(false),
        );
        assert_eq!(decision, RetryDecision::Exhausted { retries: 3 });
        assert_eq!(upstream.calls(), vec![2, 2]);
    }
}
