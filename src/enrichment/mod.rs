//! Batch enrichment through the text-analysis service.
//!
//! Every article that reaches [`EnrichmentBatcher::enrich`] comes back as
//! exactly one [`EnrichedRecord`]:
//!
//! 1. cached records (keyed by article URL) are reused as is
//! 2. the remaining articles are split into fixed-size batches
//! 3. batches run concurrently, one service call each, on a bounded pool
//! 4. items are matched to articles by position; whatever the service
//!    fails to cover becomes a fallback record carrying an error marker
//! 5. every new record, fallback or not, is written back to the cache
//!
//! Output order is not guaranteed.

pub mod prompt;
pub mod response;

use crate::api::AnalysisService;
use crate::cache::{CacheStore, Namespace};
use crate::error::ServiceError;
use crate::models::{Article, EnrichedRecord};
use crate::utils::{truncate_chars, truncate_for_log};
use chrono::{DateTime, Utc};
use futures::FutureExt;
use futures::stream::{self, StreamExt};
use prompt::PromptTemplate;
use response::{AnalysisItem, parse_analysis_response};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

const EXCERPT_CHARS: usize = 200;
const UNCOVERED: &str = "analysis response did not cover this article";

/// Counters and records of one enrichment pass.
#[derive(Debug, Default)]
pub struct EnrichmentSummary {
    pub records: Vec<EnrichedRecord>,
    pub cache_hits: usize,
    /// Live service calls made (one per batch).
    pub batches: usize,
    pub fallbacks: usize,
}

/// Pool and batch settings.
#[derive(Debug, Clone, Copy)]
pub struct BatchSettings {
    pub batch_size: usize,
    pub workers: usize,
    pub timeout: Duration,
}

pub struct EnrichmentBatcher<S> {
    service: S,
    cache: Arc<CacheStore>,
    prompt: PromptTemplate,
    settings: BatchSettings,
}

fn excerpt(body: &str) -> String {
    format!("{}...", truncate_chars(body, EXCERPT_CHARS))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Record for an article the service did not cover.
pub fn fallback_record(article: &Article, reason: &str, now: DateTime<Utc>) -> EnrichedRecord {
    EnrichedRecord {
        url: article.url.clone(),
        date: article.date,
        site: article.site.clone(),
        original_title: article.title.clone(),
        localized_title: article.title.clone(),
        summary: excerpt(&article.body),
        key_persons: Vec::new(),
        key_person_bios: Vec::new(),
        location_name: None,
        location_context: None,
        curated_angles: Vec::new(),
        event_date: article.date.map(|d| d.to_string()),
        processed_at: now,
        content_length: article.body_len(),
        error: Some(reason.to_string()),
    }
}

/// Record built from a service item; missing fields default to the
/// article's own title, excerpt and date.
pub fn merge_item(article: &Article, item: AnalysisItem, now: DateTime<Utc>) -> EnrichedRecord {
    EnrichedRecord {
        url: article.url.clone(),
        date: article.date,
        site: article.site.clone(),
        original_title: article.title.clone(),
        localized_title: non_empty(item.localized_title).unwrap_or_else(|| article.title.clone()),
        summary: non_empty(item.summary).unwrap_or_else(|| excerpt(&article.body)),
        key_persons: item.key_persons,
        key_person_bios: item.key_person_bios,
        location_name: non_empty(item.location_name),
        location_context: non_empty(item.location_context),
        curated_angles: item.curated_angles,
        event_date: non_empty(item.event_date).or_else(|| article.date.map(|d| d.to_string())),
        processed_at: now,
        content_length: article.body_len(),
        error: None,
    }
}

impl<S: AnalysisService> EnrichmentBatcher<S> {
    pub fn new(
        service: S,
        cache: Arc<CacheStore>,
        prompt: PromptTemplate,
        settings: BatchSettings,
    ) -> Self {
        Self {
            service,
            cache,
            prompt,
            settings: BatchSettings {
                batch_size: settings.batch_size.max(1),
                workers: settings.workers.max(1),
                ..settings
            },
        }
    }

    pub fn service(&self) -> &S {
        &self.service
    }

    /// Enrich `articles`, one record per article.
    #[instrument(level = "info", skip_all, fields(articles = articles.len()))]
    pub async fn enrich(&self, articles: Vec<Article>) -> EnrichmentSummary {
        let mut summary = EnrichmentSummary::default();

        let mut pending = Vec::new();
        for article in articles {
            match self
                .cache
                .get::<EnrichedRecord>(Namespace::Enrichment, &article.url)
                .await
            {
                Some(record) => {
                    debug!(url = %article.url, "Enrichment cache hit");
                    summary.records.push(record);
                }
                None => pending.push(article),
            }
        }
        summary.cache_hits = summary.records.len();

        let batches: Vec<&[Article]> = pending.chunks(self.settings.batch_size).collect();
        summary.batches = batches.len();
        info!(
            cache_hits = summary.cache_hits,
            pending = pending.len(),
            batches = summary.batches,
            "Dispatching enrichment batches"
        );

        let produced: Vec<Vec<EnrichedRecord>> = stream::iter(batches.into_iter().enumerate())
            .map(|(index, batch)| self.run_batch(index, batch))
            .buffer_unordered(self.settings.workers)
            .collect()
            .await;

        for record in produced.into_iter().flatten() {
            if record.is_fallback() {
                summary.fallbacks += 1;
            }
            summary.records.push(record);
        }

        info!(
            records = summary.records.len(),
            cache_hits = summary.cache_hits,
            batches = summary.batches,
            fallbacks = summary.fallbacks,
            "Enrichment finished"
        );
        summary
    }

    /// One batch: a single service call, degraded to fallbacks on any
    /// failure, with every record persisted.
    async fn run_batch(&self, index: usize, batch: &[Article]) -> Vec<EnrichedRecord> {
        let records = match AssertUnwindSafe(self.analyze_batch(index, batch))
            .catch_unwind()
            .await
        {
            Ok(records) => records,
            Err(_) => {
                error!(batch = index, "Analysis task panicked; degrading batch");
                let now = Utc::now();
                batch
                    .iter()
                    .map(|a| fallback_record(a, "analysis task panicked", now))
                    .collect()
            }
        };

        for record in &records {
            self.cache
                .put(Namespace::Enrichment, &record.url, record)
                .await;
        }
        records
    }

    async fn analyze_batch(&self, index: usize, batch: &[Article]) -> Vec<EnrichedRecord> {
        let request = self.prompt.request(batch);
        let outcome =
            match tokio::time::timeout(self.settings.timeout, self.service.analyze(&request)).await
            {
                Err(_) => Err(ServiceError::Timeout(self.settings.timeout.as_secs()).to_string()),
                Ok(Err(e)) => Err(e.to_string()),
                Ok(Ok(text)) => parse_analysis_response(&text).map_err(|e| {
                    warn!(batch = index, raw = %truncate_for_log(&text, 200), "Malformed analysis response");
                    e.to_string()
                }),
            };

        let now = Utc::now();
        match outcome {
            Ok(items) => {
                if items.len() != batch.len() {
                    warn!(
                        batch = index,
                        expected = batch.len(),
                        got = items.len(),
                        "Analysis item count mismatch"
                    );
                }
                let mut items = items.into_iter();
                batch
                    .iter()
                    .map(|article| match items.next().flatten() {
                        Some(item) => merge_item(article, item, now),
                        None => fallback_record(article, UNCOVERED, now),
                    })
                    .collect()
            }
            Err(reason) => {
                warn!(batch = index, size = batch.len(), %reason, "Batch degraded to fallback records");
                batch
                    .iter()
                    .map(|article| fallback_record(article, &reason, now))
                    .collect()
            }
        }
    }
}
