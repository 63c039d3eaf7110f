//! Configuration loading from TOML files

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use formcrawl_engine::{ConfigError, RetryPolicy, Schedule, Settings};
use formcrawl_store::{ALL_SENTINEL, PartitionKey};
use formcrawl_webform::WebFormConfig;

/// Global configuration for formcrawl
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub site: WebFormConfig,
    pub partitions: PartitionsConfig,
    pub crawl: CrawlConfig,
    pub output: OutputConfig,
    pub conversion: ConversionConfig,
}

/// Partition codes the site understands, with display names
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PartitionsConfig {
    pub default: String,
    pub known: BTreeMap<String, String>,
}

impl Default for PartitionsConfig {
    fn default() -> Self {
        let known = [
            ("TW", "Tòa án nhân dân tối cao"),
            ("CW", "Tòa án cấp cao"),
            ("T", "Tòa án nhân dân cấp tỉnh"),
            ("H", "Tòa án nhân dân cấp huyện"),
        ]
        .into_iter()
        .map(|(code, name)| (code.to_string(), name.to_string()))
        .collect();
        Self {
            default: "T".to_string(),
            known,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CrawlConfig {
    pub total_items: u32,
    pub units: u32,
    /// Defaults to one executor per unit
    pub executors: Option<usize>,
    pub schedule: Schedule,
    pub item_delay_ms: u64,
    pub retry_delay_ms: u64,
    pub attempt_budget: u32,
    pub session_retries: u32,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            total_items: 100,
            units: 5,
            executors: None,
            schedule: Schedule::Pool,
            item_delay_ms: 1000,
            retry_delay_ms: 5000,
            attempt_budget: 3,
            session_retries: 3,
        }
    }
}

impl CrawlConfig {
    pub fn settings(&self) -> Settings {
        Settings {
            executors: self.executors.unwrap_or(self.units as usize),
            schedule: self.schedule,
            retry: RetryPolicy {
                attempt_budget: self.attempt_budget,
                retry_delay: Duration::from_millis(self.retry_delay_ms),
            },
            item_delay: Duration::from_millis(self.item_delay_ms),
            session_retries: self.session_retries,
            session_backoff: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub dataset_dir: PathBuf,
    pub checkpoint_dir: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dataset_dir: PathBuf::from("./dataset"),
            checkpoint_dir: PathBuf::from("./checkpoints"),
        }
    }
}

/// Post-download conversion of artifacts by an external program
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConversionConfig {
    pub enabled: bool,
    /// Program and leading arguments; the artifact path is appended
    pub command: Vec<String>,
    pub workers: usize,
    pub queue_capacity: usize,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            command: vec!["pdftotext".to_string()],
            workers: 4,
            queue_capacity: 256,
        }
    }
}

/// Expand ${VAR} to environment variable value
fn expand_env_var(s: &str) -> Option<String> {
    if let Some(var_name) = s.strip_prefix("${").and_then(|s| s.strip_suffix('}')) {
        std::env::var(var_name).ok()
    } else {
        Some(s.to_string())
    }
}

impl Config {
    /// Load configuration from default locations
    ///
    /// Search order:
    /// 1. ./formcrawl.toml (current directory)
    /// 2. ~/.config/formcrawl/config.toml
    ///
    /// If no config file found, returns default config.
    pub fn load() -> Result<Self> {
        let local_config = PathBuf::from("formcrawl.toml");
        if local_config.exists() {
            return Self::from_file(&local_config);
        }

        if let Some(config_dir) = directories::ProjectDirs::from("", "", "formcrawl") {
            let user_config = config_dir.config_dir().join("config.toml");
            if user_config.exists() {
                return Self::from_file(&user_config);
            }
        }

        log::debug!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Load configuration from a specific file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let mut config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        config.expand_env()?;

        log::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    fn expand_env(&mut self) -> Result<()> {
        self.site.base_url = expand_env_var(&self.site.base_url)
            .with_context(|| format!("site.base_url: {} is not set", self.site.base_url))?;
        Ok(())
    }

    /// Partition for `code`, or the configured default.
    ///
    /// `ALL` selects the empty key (no partition filter). Other codes must
    /// be listed under `[partitions.known]` when that table is non-empty.
    pub fn resolve_partition(&self, code: Option<&str>) -> Result<PartitionKey, ConfigError> {
        let code = code
            .unwrap_or(self.partitions.default.as_str())
            .trim()
            .to_ascii_uppercase();
        if code == ALL_SENTINEL {
            return Ok(PartitionKey::all());
        }
        let known = &self.partitions.known;
        if !known.is_empty() && !known.contains_key(&code) {
            return Err(ConfigError::UnknownPartition {
                code,
                known: known.keys().cloned().collect(),
            });
        }
        Ok(PartitionKey::new(code)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert_eq!(config.output.checkpoint_dir, PathBuf::from("./checkpoints"));
        assert_eq!(config.crawl.attempt_budget, 3);
        assert_eq!(config.partitions.default, "T");
        assert!(!config.conversion.enabled);
    }

    #[test]
    fn executors_default_to_units() {
        let config = Config::default();
        assert_eq!(config.crawl.settings().executors, 5);
    }

    #[test]
    fn expand_env_var_literal() {
        assert_eq!(expand_env_var("literal"), Some("literal".to_string()));
    }

    #[test]
    fn expand_env_var_missing() {
        assert_eq!(expand_env_var("${NONEXISTENT_VAR_12345}"), None);
    }

    #[test]
    fn expand_env_var_path() {
        assert_eq!(expand_env_var("${PATH}"), std::env::var("PATH").ok());
    }

    #[test]
    fn parse_config_toml() {
        let toml = r#"
[site]
base_url = "https://example.vn/search"
detail_segment = "detail"

[partitions]
default = "H"

[crawl]
total_items = 50
units = 4
executors = 2
schedule = "round-robin"
item_delay_ms = 0

[output]
dataset_dir = "/tmp/dataset"

[conversion]
enabled = true
command = ["pdftotext", "-layout"]
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.site.base_url, "https://example.vn/search");
        assert_eq!(config.site.detail_segment, "detail");
        assert_eq!(config.site.fields.page, WebFormConfig::default().fields.page);
        assert_eq!(config.partitions.default, "H");
        assert_eq!(config.partitions.known.len(), 4);
        assert_eq!(config.crawl.schedule, Schedule::RoundRobin);
        let settings = config.crawl.settings();
        assert_eq!(settings.executors, 2);
        assert_eq!(settings.item_delay, Duration::ZERO);
        assert_eq!(config.output.dataset_dir, PathBuf::from("/tmp/dataset"));
        assert_eq!(config.output.checkpoint_dir, PathBuf::from("./checkpoints"));
        assert_eq!(config.conversion.command, vec!["pdftotext", "-layout"]);
    }

    #[test]
    fn from_file_reads_toml() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("formcrawl.toml");
        std::fs::write(&path, "[crawl]\nunits = 9\n").unwrap();
        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.crawl.units, 9);
        assert!(Config::from_file(&dir.path().join("missing.toml")).is_err());
    }

    #[test]
    fn resolve_partition_codes() {
        let config = Config::default();
        assert_eq!(config.resolve_partition(None).unwrap().as_str(), "T");
        assert_eq!(config.resolve_partition(Some("cw")).unwrap().as_str(), "CW");
        assert!(config.resolve_partition(Some("all")).unwrap().is_all());
        assert!(matches!(
            config.resolve_partition(Some("X")),
            Err(ConfigError::UnknownPartition { .. })
        ));
    }

    #[test]
    fn unknown_codes_allowed_without_known_table() {
        let mut config = Config::default();
        config.partitions.known.clear();
        assert_eq!(config.resolve_partition(Some("Q1")).unwrap().as_str(), "Q1");
        assert!(matches!(
            config.resolve_partition(Some("a/b")),
            Err(ConfigError::Partition(_))
        ));
    }
}
