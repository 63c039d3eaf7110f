//! One attempt at one item: fetch the result page, then its artifacts

use formcrawl_core::ConversionQueue;
use formcrawl_store::PartitionKey;

use crate::artifacts::{ArtifactDir, artifact_file_name};
use crate::upstream::{FormState, Upstream};

/// What a single attempt produced
#[derive(Debug, Clone)]
pub struct ItemOutcome {
    pub links: Vec<String>,
    /// State to use for the next request
    pub form_state: FormState,
    pub success: bool,
    pub artifacts_fetched: usize,
}

/// Processes items against an [`Upstream`], writing artifacts to disk.
pub struct UnitProcessor<'a, U> {
    upstream: &'a U,
    artifacts: &'a ArtifactDir,
    conversion: Option<&'a ConversionQueue>,
}

impl<'a, U: Upstream> UnitProcessor<'a, U> {
    pub fn new(
        upstream: &'a U,
        artifacts: &'a ArtifactDir,
        conversion: Option<&'a ConversionQueue>,
    ) -> Self {
        Self {
            upstream,
            artifacts,
            conversion,
        }
    }

    /// Attempt `item` once.
    ///
    /// Success is decided by the page fetch alone; artifact failures are
    /// logged and skipped.
    pub fn process_item(
        &self,
        session: &mut U::Session,
        item: u32,
        form_state: FormState,
        partition: &PartitionKey,
    ) -> ItemOutcome {
        let page = self
            .upstream
            .fetch_page(session, item, &form_state, partition);
        let form_state = form_state.or_keep(page.form_state);

        if !page.ok {
            return ItemOutcome {
                links: Vec::new(),
                form_state,
                success: false,
                artifacts_fetched: 0,
            };
        }

        let total = page.links.len();
        let mut artifacts_fetched = 0;
        for (i, link) in page.links.iter().enumerate() {
            let n = i + 1;
            log::debug!("item {item}: artifact {n}/{total}: {link}");
            if self.fetch_one(session, item, n, link) {
                artifacts_fetched += 1;
            }
        }

        ItemOutcome {
            links: page.links,
            form_state,
            success: true,
            artifacts_fetched,
        }
    }

    fn fetch_one(&self, session: &mut U::Session, item: u32, n: usize, link: &str) -> bool {
        let bytes = match self.upstream.fetch_artifact(session, link) {
            Ok(bytes) => bytes,
            Err(e) => {
                log::warn!("item {item}: artifact {link} failed: {e}");
                return false;
            }
        };

        let name = artifact_file_name(link, item, n);
        let path = match self.artifacts.write(&name, &bytes) {
            Ok(path) => path,
            Err(e) => {
                log::warn!("item {item}: writing {name} failed: {e}");
                return false;
            }
        };

        if let Some(queue) = self.conversion {
            queue.try_enqueue(path);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedUpstream;
    use formcrawl_core::ConvertError;
    use std::path::Path;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn key() -> PartitionKey {
        PartitionKey::new("T").unwrap()
    }

    #[test]
    fn success_downloads_every_link() {
        let tmp = TempDir::new().unwrap();
        let dir = ArtifactDir::open(tmp.path()).unwrap();
        let upstream = ScriptedUpstream::new(2);
        let processor = UnitProcessor::new(&upstream, &dir, None);

        let (mut session, state) = upstream.initialize_session(&key()).unwrap();
        let out = processor.process_item(&mut session, 4, state, &key());

        assert!(out.success);
        assert_eq!(out.links.len(), 2);
        assert_eq!(out.artifacts_fetched, 2);
        assert!(dir.path().join("doc4-1.pdf").exists());
        assert!(dir.path().join("doc4-2.pdf").exists());
        assert_eq!(out.form_state.get("token"), Some("4"));
    }

    #[test]
    fn failed_page_keeps_previous_state() {
        let tmp = TempDir::new().unwrap();
        let dir = ArtifactDir::open(tmp.path()).unwrap();
        let upstream = ScriptedUpstream::new(2).fail_always(5);
        let processor = UnitProcessor::new(&upstream, &dir, None);

        let (mut session, state) = upstream.initialize_session(&key()).unwrap();
        let out = processor.process_item(&mut session, 5, state.clone(), &key());

        assert!(!out.success);
        assert!(out.links.is_empty());
        assert_eq!(out.form_state, state);
    }

    #[test]
    fn artifact_failure_does_not_fail_item() {
        let tmp = TempDir::new().unwrap();
        let dir = ArtifactDir::open(tmp.path()).unwrap();
        let upstream = ScriptedUpstream::new(3).fail_artifact("doc1-2");
        let processor = UnitProcessor::new(&upstream, &dir, None);

        let (mut session, state) = upstream.initialize_session(&key()).unwrap();
        let out = processor.process_item(&mut session, 1, state, &key());

        assert!(out.success);
        assert_eq!(out.links.len(), 3);
        assert_eq!(out.artifacts_fetched, 2);
    }

    #[test]
    fn artifacts_are_queued_for_conversion() {
        let tmp = TempDir::new().unwrap();
        let dir = ArtifactDir::open(tmp.path()).unwrap();
        let converted = Arc::new(AtomicUsize::new(0));
        let seen = converted.clone();
        let queue = ConversionQueue::start(
            Arc::new(move |_: &Path| -> Result<(), ConvertError> {
                seen.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
            1,
            16,
        )
        .unwrap();

        let upstream = ScriptedUpstream::new(2);
        let processor = UnitProcessor::new(&upstream, &dir, Some(&queue));
        let (mut session, state) = upstream.initialize_session(&key()).unwrap();
        processor.process_item(&mut session, 1, state, &key());

        let stats = queue.shutdown();
        assert_eq!(stats.enqueued, 2);
        assert_eq!(converted.load(Ordering::SeqCst), 2);
    }
}
