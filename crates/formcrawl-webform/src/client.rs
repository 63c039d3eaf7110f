//! [`Upstream`] implementation for the search form

use std::time::Duration;

use formcrawl_core::{FetchError, HttpSettings, send_and_read, session_client};
use formcrawl_engine::{FormState, PageFetch, Upstream};
use formcrawl_store::PartitionKey;
use scraper::Html;
use url::Url;

use crate::config::WebFormConfig;
use crate::parse::{detail_links, last_pdf_link, hidden_fields};

/// ASP.NET postback target field
const EVENT_TARGET: &str = "__EVENTTARGET";
const EVENT_ARGUMENT: &str = "__EVENTARGUMENT";

/// One unit's conversation with the site: its own client and cookie jar.
pub struct WebSession {
    client: reqwest::Client,
}

/// Crawls result pages of a paged ASP.NET search form.
#[derive(Debug, Clone)]
pub struct WebForm {
    config: WebFormConfig,
    base_url: Url,
    base_domain: Url,
    http: HttpSettings,
}

impl WebForm {
    pub fn new(config: WebFormConfig) -> Result<Self, url::ParseError> {
        let base_url = Url::parse(&config.base_url)?;
        let base_domain = Url::parse(&config.base_domain)?;
        let http = config.http_settings();
        Ok(Self {
            config,
            base_url,
            base_domain,
            http,
        })
    }

    pub fn config(&self) -> &WebFormConfig {
        &self.config
    }

    fn read_timeout(&self) -> Duration {
        self.http.read_timeout
    }

    /// Form body for result page `item`.
    ///
    /// The first page is a search submit; later pages are a postback from
    /// the page dropdown.
    pub fn payload(
        &self,
        item: u32,
        form_state: &FormState,
        partition: &PartitionKey,
    ) -> Vec<(String, String)> {
        let fields = &self.config.fields;
        let mut payload: Vec<(String, String)> = form_state
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        let mut set = |name: &str, value: &str| {
            payload.retain(|(k, _)| k != name);
            payload.push((name.to_string(), value.to_string()));
        };
        set(&fields.keyword, &self.config.keyword);
        set(&fields.partition, partition.as_str());
        for blank in &fields.blank {
            set(blank, "");
        }
        if item <= 1 {
            set(&fields.search_button, &fields.search_button_value);
        } else {
            set(&fields.page, &item.to_string());
            set(EVENT_TARGET, &fields.page);
            set(EVENT_ARGUMENT, "");
        }
        payload
    }
}

impl Upstream for WebForm {
    type Session = WebSession;

    fn initialize_session(
        &self,
        partition: &PartitionKey,
    ) -> Result<(WebSession, FormState), FetchError> {
        let client = session_client(&self.http)?;
        let body = send_and_read(client.get(self.base_url.clone()), self.read_timeout())?;
        let state = hidden_fields(&Html::parse_document(&String::from_utf8_lossy(&body)));
        if state.is_empty() {
            log::warn!("partition {partition}: search page carried no hidden fields");
        }
        log::debug!(
            "partition {partition}: session opened with {} hidden field(s)",
            state.len()
        );
        Ok((WebSession { client }, state))
    }

    fn fetch_page(
        &self,
        session: &mut WebSession,
        item: u32,
        form_state: &FormState,
        partition: &PartitionKey,
    ) -> PageFetch {
        let request = session
            .client
            .post(self.base_url.clone())
            .form(&self.payload(item, form_state, partition));

        let body = match send_and_read(request, self.read_timeout()) {
            Ok(body) => body,
            Err(e) => {
                log::warn!("page {item} ({partition}): {e}");
                return PageFetch::failure();
            }
        };

        let document = Html::parse_document(&String::from_utf8_lossy(&body));
        let links = detail_links(&document, &self.base_domain, &self.config.detail_segment);
        let state = hidden_fields(&document);
        log::debug!("page {item} ({partition}): {} detail link(s)", links.len());
        PageFetch::success(links, state)
    }

    fn fetch_artifact(
        &self,
        session: &mut WebSession,
        detail_url: &str,
    ) -> Result<Vec<u8>, FetchError> {
        let page = send_and_read(session.client.get(detail_url), self.read_timeout())?;
        let pdf_url = {
            let document = Html::parse_document(&String::from_utf8_lossy(&page));
            last_pdf_link(&document, &self.base_domain)
        }
        .ok_or_else(|| FetchError::protocol(format!("no PDF link on {detail_url}")))?;

        log::trace!("downloading {pdf_url}");
        send_and_read(session.client.get(pdf_url), self.read_timeout())
    }
}
