//! Run configuration.
//!
//! [`NewsConfig`] enumerates every recognized option with its default. It is
//! loaded once (optionally from a YAML file), validated, and then shared
//! read-only behind an `Arc` for the rest of the run.

use crate::error::ConfigError;
use crate::models::Source;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, instrument};

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a professional news analysis assistant. \
You extract the key facts of several articles at once and translate titles and summaries \
into the reader's language. Always answer with valid JSON only.";

pub const DEFAULT_TASK_PROMPT: &str = "Analyze the following {article_count} articles. \
Return a JSON array with exactly {article_count} objects, in the same order as the articles. \
Each object must have the fields: \
\"localizedTitle\" (string), \"summary\" (string, 2-4 sentences), \
\"keyPersons\" (array of names), \"keyPersonBios\" (array of one-line bios, parallel to keyPersons), \
\"locationName\" (string), \"locationContext\" (string, one sentence of background), \
\"eventDate\" (string, YYYY-MM-DD if known), \"curatedAngles\" (array of story angle suggestions).\n\
{batch_content}";

/// Every option recognized by the pipeline.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NewsConfig {
    /// Digest name, used in the report title.
    pub name: String,
    /// Homepage URLs of the configured sources.
    pub sites: Vec<String>,
    /// Site URL → feed URL. Sites listed here use the feed strategy.
    pub feeds: BTreeMap<String, String>,
    /// Proxy URL for the proxy-enabled network context. When unset, the
    /// environment proxy settings apply.
    pub proxy: Option<String>,
    /// Root directory of the three cache namespaces.
    pub cache_dir: PathBuf,
    pub fetch_workers: usize,
    pub enrichment_workers: usize,
    pub batch_size: usize,
    /// Characters of body text included per article in a service request.
    pub body_char_limit: usize,
    /// Quality gate: minimum cleaned body length.
    pub min_body_chars: usize,
    /// Minimum extracted page text for crawled links.
    pub min_page_chars: usize,
    pub feed_timeout_secs: u64,
    pub page_timeout_secs: u64,
    pub service_timeout_secs: u64,
    pub system_prompt: String,
    /// Task instruction template with `{article_count}` and `{batch_content}`.
    pub task_prompt: String,
    pub report_header: String,
    /// Report title template with `{name}`, `{start_date}` and `{end_date}`.
    pub report_title_template: String,
    /// Extra term appended to key-person search links.
    pub person_search_suffix: Option<String>,
    /// Publishing destination (e.g. a chat or folder id).
    pub destination: Option<String>,
    pub collaborators: Vec<String>,
}

impl Default for NewsConfig {
    fn default() -> Self {
        Self {
            name: "News".to_string(),
            sites: Vec::new(),
            feeds: BTreeMap::new(),
            proxy: None,
            cache_dir: PathBuf::from("cache"),
            fetch_workers: 3,
            enrichment_workers: 10,
            batch_size: 3,
            body_char_limit: 1500,
            min_body_chars: 50,
            min_page_chars: 100,
            feed_timeout_secs: 30,
            page_timeout_secs: 15,
            service_timeout_secs: 60,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            task_prompt: DEFAULT_TASK_PROMPT.to_string(),
            report_header: "# News digest".to_string(),
            report_title_template: "{name} digest ({start_date} to {end_date})".to_string(),
            person_search_suffix: None,
            destination: None,
            collaborators: Vec::new(),
        }
    }
}

impl NewsConfig {
    /// Load a YAML config file. Missing keys fall back to their defaults.
    #[instrument(level = "info", skip_all, fields(%path))]
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_string(),
            source,
        })?;
        let config = Self::from_yaml(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_string(),
            source,
        })?;
        info!(sites = config.sites.len(), feeds = config.feeds.len(), "Loaded configuration");
        Ok(config)
    }

    pub fn from_yaml(raw: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(raw)
    }

    /// Add sites from a comma-separated list (`TARGET_SITES` format).
    pub fn extend_sites(&mut self, list: &str) {
        for site in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            if !self.sites.iter().any(|s| s == site) {
                self.sites.push(site.to_string());
            }
        }
    }

    /// Add feed mappings from `site=feed,site=feed` (`RSS_FEEDS` format).
    pub fn extend_feeds(&mut self, list: &str) {
        for mapping in list.split(',') {
            if let Some((site, feed)) = mapping.split_once('=') {
                let (site, feed) = (site.trim(), feed.trim());
                if !site.is_empty() && !feed.is_empty() {
                    self.feeds.insert(site.to_string(), feed.to_string());
                }
            }
        }
    }

    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("fetch_workers", self.fetch_workers),
            ("enrichment_workers", self.enrichment_workers),
            ("batch_size", self.batch_size),
            ("body_char_limit", self.body_char_limit),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    field,
                    reason: "must be greater than zero".to_string(),
                });
            }
        }
        if !self.task_prompt.contains("{batch_content}") {
            return Err(ConfigError::Invalid {
                field: "task_prompt",
                reason: "must contain the {batch_content} placeholder".to_string(),
            });
        }
        Ok(())
    }

    /// Configured sources, in configuration order.
    pub fn sources(&self) -> Vec<Source> {
        self.sites
            .iter()
            .map(|site| Source::new(site.clone(), self.feeds.get(site).cloned()))
            .collect()
    }

    pub fn feed_timeout(&self) -> Duration {
        Duration::from_secs(self.feed_timeout_secs)
    }

    pub fn page_timeout(&self) -> Duration {
        Duration::from_secs(self.page_timeout_secs)
    }

    pub fn service_timeout(&self) -> Duration {
        Duration::from_secs(self.service_timeout_secs)
    }

    pub fn report_title(&self, start_date: &str, end_date: &str) -> String {
        self.report_title_template
            .replace("{name}", &self.name)
            .replace("{start_date}", start_date)
            .replace("{end_date}", end_date)
    }
}

/// Credentials and model for the text-analysis service.
#[derive(Debug, Clone)]
pub struct ServiceCredentials {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
}

impl ServiceCredentials {
    pub const DEFAULT_BASE_URL: &'static str = "https://api.openai.com/v1";

    /// Both the key and the model are required; the base URL is optional.
    pub fn from_parts(
        api_key: Option<String>,
        model: Option<String>,
        base_url: Option<String>,
    ) -> Result<Self, ConfigError> {
        let api_key = api_key
            .filter(|k| !k.trim().is_empty())
            .ok_or(ConfigError::Missing("LLM_API_KEY"))?;
        let model = model
            .filter(|m| !m.trim().is_empty())
            .ok_or(ConfigError::Missing("LLM_MODEL"))?;
        let base_url = base_url
            .filter(|u| !u.trim().is_empty())
            .unwrap_or_else(|| Self::DEFAULT_BASE_URL.to_string());
        Ok(Self {
            api_key,
            model,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}
