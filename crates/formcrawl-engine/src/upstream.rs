//! Seam between the engine and the site being crawled

use std::collections::BTreeMap;

use formcrawl_core::FetchError;
use formcrawl_store::PartitionKey;

/// Opaque per-session tokens the upstream needs echoed on the next request
/// (hidden form inputs on an ASP.NET-style search form).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormState(BTreeMap<String, String>);

impl FormState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// `next` if it carries any tokens, otherwise `self` unchanged
    pub fn or_keep(self, next: FormState) -> FormState {
        if next.is_empty() { self } else { next }
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for FormState {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Result of fetching one result page
#[derive(Debug, Clone, Default)]
pub struct PageFetch {
    /// Absolute detail-page URLs found on the page
    pub links: Vec<String>,
    /// Tokens for the next request; empty means "no new tokens"
    pub form_state: FormState,
    pub ok: bool,
}

impl PageFetch {
    pub fn success(links: Vec<String>, form_state: FormState) -> Self {
        Self {
            links,
            form_state,
            ok: true,
        }
    }

    pub fn failure() -> Self {
        Self::default()
    }
}

/// The crawled site.
///
/// One value is shared by every executor; each unit opens its own
/// [`Session`](Upstream::Session) and never shares it.
pub trait Upstream: Sync {
    type Session: Send;

    /// Open a session and read the initial form state.
    fn initialize_session(
        &self,
        partition: &PartitionKey,
    ) -> Result<(Self::Session, FormState), FetchError>;

    /// Fetch result page `item`. Failures are reported through
    /// [`PageFetch::ok`]; this never errors.
    fn fetch_page(
        &self,
        session: &mut Self::Session,
        item: u32,
        form_state: &FormState,
        partition: &PartitionKey,
    ) -> PageFetch;

    /// Download the artifact behind one detail link.
    fn fetch_artifact(
        &self,
        session: &mut Self::Session,
        detail_url: &str,
    ) -> Result<Vec<u8>, FetchError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_state_keeps_previous() {
        let prev: FormState = [("__VIEWSTATE", "a")].into_iter().collect();
        let kept = prev.clone().or_keep(FormState::new());
        assert_eq!(kept, prev);

        let next: FormState = [("__VIEWSTATE", "b")].into_iter().collect();
        assert_eq!(prev.or_keep(next).get("__VIEWSTATE"), Some("b"));
    }

    #[test]
    fn iter_is_sorted_by_name() {
        let state: FormState = [("b", "2"), ("a", "1")].into_iter().collect();
        let names: Vec<&str> = state.iter().map(|(k, _)| k).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(state.len(), 2);
    }
}
