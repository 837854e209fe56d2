//! Data models shared across the pipeline.
//!
//! - [`Source`]: a configured site, optionally with a feed URL
//! - [`DateWindow`]: the inclusive publish-date range of a run
//! - [`Article`]: fetched and cleaned article text
//! - [`EnrichedRecord`]: an article plus the analysis output
//! - [`FetchResult`]: the tagged outcome of one source task

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// A configured content source.
///
/// The presence of a feed URL selects the feed strategy; otherwise the
/// homepage is crawled for article links.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Source {
    /// Homepage URL, also used as the site identifier on articles.
    pub site: String,
    /// Syndication feed URL, if the site publishes one.
    pub feed: Option<String>,
}

impl Source {
    pub fn new(site: impl Into<String>, feed: Option<String>) -> Self {
        Self {
            site: site.into(),
            feed,
        }
    }
}

/// Inclusive `[start, end]` date range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateWindow {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    /// The `days_back` days leading up to and including `end`.
    pub fn days_back(end: NaiveDate, days_back: u32) -> Self {
        Self {
            start: end - Duration::days(i64::from(days_back)),
            end,
        }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}

/// A fetched article. The URL is the join key between fetch, cache and
/// enrichment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Article {
    pub site: String,
    pub url: String,
    pub title: String,
    pub date: Option<NaiveDate>,
    pub body: String,
}

impl Article {
    pub fn body_len(&self) -> usize {
        self.body.chars().count()
    }
}

/// An article together with the structured analysis output.
///
/// Records produced by fallback degradation carry an `error` marker and
/// empty person/location/angle fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichedRecord {
    pub url: String,
    pub date: Option<NaiveDate>,
    pub site: String,
    pub original_title: String,
    pub localized_title: String,
    pub summary: String,
    #[serde(default)]
    pub key_persons: Vec<String>,
    /// Parallel to `key_persons`; may be shorter.
    #[serde(default)]
    pub key_person_bios: Vec<String>,
    #[serde(default)]
    pub location_name: Option<String>,
    #[serde(default)]
    pub location_context: Option<String>,
    #[serde(default)]
    pub curated_angles: Vec<String>,
    #[serde(default)]
    pub event_date: Option<String>,
    pub processed_at: DateTime<Utc>,
    pub content_length: usize,
    #[serde(default)]
    pub error: Option<String>,
}

impl EnrichedRecord {
    pub fn is_fallback(&self) -> bool {
        self.error.is_some()
    }
}

/// A crawled link that produced no article.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedLink {
    pub url: String,
    pub reason: String,
}

/// Bookkeeping for one page-crawl source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrawlStats {
    pub total_links: usize,
    pub extracted: usize,
    pub failed: usize,
    pub errors: Vec<String>,
}

/// Outcome of one source task.
#[derive(Debug)]
pub enum FetchResult {
    /// Feed strategy output.
    Articles(Vec<Article>),
    /// Page-crawl output with the links that failed along the way.
    SourceBatch {
        articles: Vec<Article>,
        failed_links: Vec<FailedLink>,
        stats: CrawlStats,
    },
}

impl FetchResult {
    pub fn article_count(&self) -> usize {
        match self {
            FetchResult::Articles(articles) => articles.len(),
            FetchResult::SourceBatch { articles, .. } => articles.len(),
        }
    }
}
