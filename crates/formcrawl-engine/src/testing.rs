//! Scripted upstream for engine tests

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use formcrawl_core::FetchError;
use formcrawl_store::PartitionKey;

use crate::upstream::{FormState, PageFetch, Upstream};

#[derive(Debug, Default)]
pub struct FakeSession {
    pub requests: u32,
}

/// Serves `links_per_item` links per page, with per-item failure scripts.
#[derive(Default)]
pub struct ScriptedUpstream {
    links_per_item: usize,
    always_fail: HashSet<u32>,
    fail_budget: Mutex<HashMap<u32, u32>>,
    failing_artifacts: HashSet<String>,
    interrupt: Option<(u32, Arc<AtomicBool>)>,
    session_failures: AtomicU32,
    calls: Mutex<Vec<u32>>,
}

impl ScriptedUpstream {
    pub fn new(links_per_item: usize) -> Self {
        Self {
            links_per_item,
            ..Self::default()
        }
    }

    pub fn fail_always(mut self, item: u32) -> Self {
        self.always_fail.insert(item);
        self
    }

    /// Fail the first `times` attempts of `item`
    pub fn fail_times(self, item: u32, times: u32) -> Self {
        self.fail_budget.lock().unwrap().insert(item, times);
        self
    }

    pub fn fail_artifact(mut self, doc: &str) -> Self {
        self.failing_artifacts.insert(doc.to_string());
        self
    }

    /// Raise `flag` once `item` has been fetched
    pub fn interrupt_after(mut self, item: u32, flag: Arc<AtomicBool>) -> Self {
        self.interrupt = Some((item, flag));
        self
    }

    pub fn fail_sessions(self, times: u32) -> Self {
        self.session_failures.store(times, Ordering::SeqCst);
        self
    }

    /// Items fetched so far, in call order
    pub fn calls(&self) -> Vec<u32> {
        self.calls.lock().unwrap().clone()
    }

    pub fn link(item: u32, n: usize) -> String {
        format!("https://example.vn/doc{item}-{n}/detail")
    }
}

impl Upstream for ScriptedUpstream {
    type Session = FakeSession;

    fn initialize_session(
        &self,
        _partition: &PartitionKey,
    ) -> Result<(FakeSession, FormState), FetchError> {
        let remaining = self.session_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.session_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(FetchError::Http {
                status: Some(503),
                message: "unavailable".into(),
            });
        }
        let state = [("token", "init")].into_iter().collect();
        Ok((FakeSession::default(), state))
    }

    fn fetch_page(
        &self,
        session: &mut FakeSession,
        item: u32,
        _form_state: &FormState,
        _partition: &PartitionKey,
    ) -> PageFetch {
        session.requests += 1;
        self.calls.lock().unwrap().push(item);

        if let Some((at, flag)) = &self.interrupt {
            if *at == item {
                flag.store(true, Ordering::SeqCst);
            }
        }

        if self.always_fail.contains(&item) {
            return PageFetch::failure();
        }
        if let Some(left) = self.fail_budget.lock().unwrap().get_mut(&item) {
            if *left > 0 {
                *left -= 1;
                return PageFetch::failure();
            }
        }

        let links = (1..=self.links_per_item)
            .map(|n| Self::link(item, n))
            .collect();
        let state = [("token", item.to_string())].into_iter().collect();
        PageFetch::success(links, state)
    }

    fn fetch_artifact(
        &self,
        session: &mut FakeSession,
        detail_url: &str,
    ) -> Result<Vec<u8>, FetchError> {
        session.requests += 1;
        let failing = self
            .failing_artifacts
            .iter()
            .any(|doc| detail_url.contains(&format!("/{doc}/")));
        if failing {
            return Err(FetchError::protocol("no pdf link"));
        }
        Ok(format!("%PDF {detail_url}").into_bytes())
    }
}
