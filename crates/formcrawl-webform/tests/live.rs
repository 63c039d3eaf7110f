//! Against the real site. Run with `--ignored` when network access is available.

use formcrawl_engine::Upstream;
use formcrawl_store::PartitionKey;
use formcrawl_webform::{WebForm, WebFormConfig};

#[test]
#[ignore = "needs network access to the upstream site"]
fn first_result_page_has_detail_links() {
    let form = WebForm::new(WebFormConfig::default()).unwrap();
    let partition = PartitionKey::new("T").unwrap();

    let (mut session, state) = form.initialize_session(&partition).unwrap();
    assert!(state.get("__VIEWSTATE").is_some());

    let page = form.fetch_page(&mut session, 1, &state, &partition);
    assert!(page.ok);
    assert!(!page.links.is_empty());
    assert!(page.links.iter().all(|l| l.contains("/chi-tiet-ban-an")));
}
