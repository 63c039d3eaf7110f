//! HTML extraction for the search form and its result pages

use std::sync::LazyLock;

use formcrawl_engine::FormState;
use scraper::{Html, Selector};
use url::Url;

static HIDDEN_INPUTS: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"input[type="hidden"]"#).expect("invalid selector"));

static ANCHORS: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a[href]").expect("invalid selector"));

/// Hidden inputs with both a name and a non-empty value.
pub fn hidden_fields(document: &Html) -> FormState {
    document
        .select(&HIDDEN_INPUTS)
        .filter_map(|input| {
            let name = input.value().attr("name")?;
            let value = input.value().attr("value")?;
            (!name.is_empty() && !value.is_empty()).then_some((name, value))
        })
        .collect()
}

/// Absolute URLs of detail pages: links whose second path segment is
/// `detail_segment`, e.g. `/2ta123t1cvn/chi-tiet-ban-an`.
pub fn detail_links(document: &Html, base: &Url, detail_segment: &str) -> Vec<String> {
    let mut links: Vec<String> = Vec::new();
    for href in document.select(&ANCHORS).filter_map(|a| a.value().attr("href")) {
        let Ok(url) = base.join(href.trim()) else {
            continue;
        };
        let is_detail = url
            .path_segments()
            .and_then(|mut segments| segments.nth(1))
            .is_some_and(|segment| segment == detail_segment);
        if is_detail && !links.iter().any(|l| l == url.as_str()) {
            links.push(url.into());
        }
    }
    links
}

/// Last link to a `.pdf` file, absolutized against `base`.
///
/// Detail pages that carry several attachments list the current one last.
pub fn last_pdf_link(document: &Html, base: &Url) -> Option<String> {
    document
        .select(&ANCHORS)
        .filter_map(|a| a.value().attr("href"))
        .filter(|href| href.trim().to_ascii_lowercase().ends_with(".pdf"))
        .filter_map(|href| base.join(href.trim()).ok())
        .last()
        .map(String::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEARCH_PAGE: &str = r#"
        <html><body><form method="post">
          <input type="hidden" name="__VIEWSTATE" value="dDwtMTA4" />
          <input type="hidden" name="__EVENTVALIDATION" value="wEWBQ" />
          <input type="hidden" name="__EVENTTARGET" value="" />
          <input type="hidden" value="orphan" />
          <input type="text" name="txtKeyword" value="ignored" />
          <a href="/2ta1707573t1cvn/chi-tiet-ban-an">Bản án 1</a>
          <a href="/2ta1707574t1cvn/chi-tiet-ban-an">Bản án 2</a>
          <a href="/2ta1707573t1cvn/chi-tiet-ban-an">duplicate</a>
          <a href="https://congbobanan.toaan.gov.vn/3ta99/chi-tiet-ban-an">absolute</a>
          <a href="/0tat1cvn/ban-an-quyet-dinh">search</a>
          <a href="/a/b/chi-tiet-ban-an">too deep</a>
          <a href="javascript:__doPostBack('x','')">postback</a>
        </form></body></html>
    "#;

    fn base() -> Url {
        Url::parse("https://congbobanan.toaan.gov.vn").unwrap()
    }

    #[test]
    fn hidden_fields_need_name_and_value() {
        let state = hidden_fields(&Html::parse_document(SEARCH_PAGE));
        assert_eq!(state.len(), 2);
        assert_eq!(state.get("__VIEWSTATE"), Some("dDwtMTA4"));
        assert_eq!(state.get("__EVENTVALIDATION"), Some("wEWBQ"));
        assert_eq!(state.get("__EVENTTARGET"), None);
    }

    #[test]
    fn detail_links_filtered_and_absolutized() {
        let links = detail_links(&Html::parse_document(SEARCH_PAGE), &base(), "chi-tiet-ban-an");
        assert_eq!(
            links,
            vec![
                "https://congbobanan.toaan.gov.vn/2ta1707573t1cvn/chi-tiet-ban-an",
                "https://congbobanan.toaan.gov.vn/2ta1707574t1cvn/chi-tiet-ban-an",
                "https://congbobanan.toaan.gov.vn/3ta99/chi-tiet-ban-an",
            ]
        );
    }

    #[test]
    fn empty_results_page() {
        let doc = Html::parse_document("<html><body><p>Không có dữ liệu</p></body></html>");
        assert!(detail_links(&doc, &base(), "chi-tiet-ban-an").is_empty());
        assert!(hidden_fields(&doc).is_empty());
    }

    #[test]
    fn pdf_link_found_and_absolutized() {
        let doc = Html::parse_document(
            r#"<a href="/5ta1/chi-tiet-ban-an">self</a>
               <a href="/Resources/van-ban/BAN_AN_1.PDF">Tải về</a>"#,
        );
        assert_eq!(
            last_pdf_link(&doc, &base()).as_deref(),
            Some("https://congbobanan.toaan.gov.vn/Resources/van-ban/BAN_AN_1.PDF")
        );
    }

    #[test]
    fn later_attachment_wins() {
        let doc = Html::parse_document(
            r#"<a href="/Resources/van-ban/BAN_AN_cu.pdf">bản cũ</a>
               <a href="/5ta1/chi-tiet-ban-an">self</a>
               <a href="/Resources/van-ban/BAN_AN_moi.pdf">bản mới</a>"#,
        );
        assert_eq!(
            last_pdf_link(&doc, &base()).as_deref(),
            Some("https://congbobanan.toaan.gov.vn/Resources/van-ban/BAN_AN_moi.pdf")
        );
    }

    #[test]
    fn no_pdf_link() {
        let doc = Html::parse_document(r#"<a href="/x/chi-tiet-ban-an">x</a>"#);
        assert!(last_pdf_link(&doc, &base()).is_none());
    }
}
