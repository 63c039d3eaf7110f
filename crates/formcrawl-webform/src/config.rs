//! Site description for an ASP.NET-style paged search form

use std::time::Duration;

use formcrawl_core::HttpSettings;
use serde::{Deserialize, Serialize};

const FIELD_PREFIX: &str = "ctl00$Content_home_Public$ctl00$";

/// Names of the form controls posted on each page request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FormFields {
    pub keyword: String,
    /// Dropdown carrying the partition key
    pub partition: String,
    /// Submit button, posted on the first page only
    pub search_button: String,
    pub search_button_value: String,
    /// Page dropdown, also the postback target for pages after the first
    pub page: String,
    /// Filters posted empty on every request
    pub blank: Vec<String>,
}

impl Default for FormFields {
    fn default() -> Self {
        let field = |name: &str| format!("{FIELD_PREFIX}{name}");
        Self {
            keyword: field("txtKeyword"),
            partition: field("Drop_Levels"),
            search_button: field("cmd_search_banner"),
            search_button_value: "Tìm kiếm".to_string(),
            page: field("DropPages"),
            blank: vec![field("Ra_Drop_Courts"), field("Rad_DATE_FROM")],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebFormConfig {
    /// Search page: GET for the initial form, POST for every result page
    pub base_url: String,
    /// Prefix for relative links
    pub base_domain: String,
    pub keyword: String,
    /// Second path segment identifying detail-page links
    pub detail_segment: String,
    pub fields: FormFields,
    pub user_agent: String,
    pub connect_timeout_secs: u64,
    pub read_timeout_secs: u64,
    /// The upstream site serves an incomplete certificate chain
    pub accept_invalid_certs: bool,
}

impl Default for WebFormConfig {
    fn default() -> Self {
        Self {
            base_url: "https://congbobanan.toaan.gov.vn/0tat1cvn/ban-an-quyet-dinh".to_string(),
            base_domain: "https://congbobanan.toaan.gov.vn".to_string(),
            keyword: "Nhập tên vụ/việc hoặc số bản án, quyết định".to_string(),
            detail_segment: "chi-tiet-ban-an".to_string(),
            fields: FormFields::default(),
            user_agent: "Mozilla/5.0".to_string(),
            connect_timeout_secs: 30,
            read_timeout_secs: 60,
            accept_invalid_certs: true,
        }
    }
}

impl WebFormConfig {
    pub fn http_settings(&self) -> HttpSettings {
        HttpSettings {
            user_agent: self.user_agent.clone(),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            read_timeout: Duration::from_secs(self.read_timeout_secs),
            accept_invalid_certs: self.accept_invalid_certs,
        }
    }
}
