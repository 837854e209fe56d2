//! Bounded fan-out of one fetch task per configured source.

use crate::models::{Article, DateWindow, FailedLink, FetchResult, Source};
use crate::scrapers::{SourceFetcher, Transport};
use futures::FutureExt;
use futures::stream::{self, StreamExt};
use std::panic::AssertUnwindSafe;
use tracing::{error, info, instrument};

/// Merged outcome of all source tasks.
#[derive(Debug, Default)]
pub struct FetchSummary {
    /// Flat article list, in task completion order.
    pub articles: Vec<Article>,
    pub completed: usize,
    /// Tasks that panicked and were excluded.
    pub failed_tasks: usize,
    pub failed_links: Vec<FailedLink>,
    /// Whole-source and per-link error messages from crawl stats.
    pub source_errors: Vec<String>,
}

pub struct FetchOrchestrator<T> {
    fetcher: SourceFetcher<T>,
    workers: usize,
}

impl<T: Transport> FetchOrchestrator<T> {
    pub fn new(fetcher: SourceFetcher<T>, workers: usize) -> Self {
        Self {
            fetcher,
            workers: workers.max(1),
        }
    }

    pub fn fetcher(&self) -> &SourceFetcher<T> {
        &self.fetcher
    }

    /// Run every source on a pool of `workers` and merge the results. An
    /// empty article list is a valid outcome.
    #[instrument(level = "info", skip_all, fields(sources = sources.len(), workers = self.workers))]
    pub async fn fetch_all(&self, sources: &[Source], window: DateWindow) -> FetchSummary {
        let results: Vec<(&Source, std::thread::Result<FetchResult>)> = stream::iter(sources)
            .map(|source| async move {
                let outcome = AssertUnwindSafe(self.fetcher.fetch(source, window))
                    .catch_unwind()
                    .await;
                (source, outcome)
            })
            .buffer_unordered(self.workers)
            .collect()
            .await;

        let mut summary = FetchSummary::default();
        for (source, outcome) in results {
            match outcome {
                Ok(FetchResult::Articles(articles)) => {
                    summary.completed += 1;
                    summary.articles.extend(articles);
                }
                Ok(FetchResult::SourceBatch {
                    articles,
                    failed_links,
                    stats,
                }) => {
                    summary.completed += 1;
                    summary.articles.extend(articles);
                    summary.failed_links.extend(failed_links);
                    summary.source_errors.extend(stats.errors);
                }
                Err(_) => {
                    error!(site = %source.site, "Source task panicked; excluding it");
                    summary.failed_tasks += 1;
                }
            }
        }

        info!(
            articles = summary.articles.len(),
            completed = summary.completed,
            failed_tasks = summary.failed_tasks,
            failed_links = summary.failed_links.len(),
            "Fetch finished"
        );
        summary
    }
}
