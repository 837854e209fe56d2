//! One digest run: housekeeping, fetch, normalize, enrich, render, publish.

use crate::api::AnalysisService;
use crate::cache::CacheStore;
use crate::config::NewsConfig;
use crate::content::ContentNormalizer;
use crate::enrichment::prompt::PromptTemplate;
use crate::enrichment::{BatchSettings, EnrichmentBatcher};
use crate::models::{Article, DateWindow, EnrichedRecord};
use crate::orchestrator::FetchOrchestrator;
use crate::outputs::report::{RenderConfig, render_report};
use crate::publish::{PublishRequest, ReportPublisher};
use crate::scrapers::{SourceFetcher, Transport};
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Everything a run produced.
#[derive(Debug)]
pub struct RunOutcome {
    pub title: String,
    /// Normalized articles that went into enrichment.
    pub articles: Vec<Article>,
    pub records: Vec<EnrichedRecord>,
    /// `None` when no article survived; nothing is rendered or published.
    pub report: Option<String>,
    pub published_url: Option<String>,
}

pub struct Pipeline<T, S, P> {
    config: Arc<NewsConfig>,
    cache: Arc<CacheStore>,
    orchestrator: FetchOrchestrator<T>,
    normalizer: ContentNormalizer,
    batcher: EnrichmentBatcher<S>,
    publisher: P,
}

impl<T, S, P> Pipeline<T, S, P>
where
    T: Transport,
    S: AnalysisService,
    P: ReportPublisher,
{
    pub fn new(
        config: Arc<NewsConfig>,
        cache: Arc<CacheStore>,
        transport: T,
        service: S,
        publisher: P,
    ) -> Self {
        let fetcher = SourceFetcher::new(transport, Arc::clone(&cache), &config);
        let orchestrator = FetchOrchestrator::new(fetcher, config.fetch_workers);
        let prompt = PromptTemplate {
            system_instruction: config.system_prompt.clone(),
            task_template: config.task_prompt.clone(),
            body_char_limit: config.body_char_limit,
        };
        let batcher = EnrichmentBatcher::new(
            service,
            Arc::clone(&cache),
            prompt,
            BatchSettings {
                batch_size: config.batch_size,
                workers: config.enrichment_workers,
                timeout: config.service_timeout(),
            },
        );
        Self {
            normalizer: ContentNormalizer::new(config.min_body_chars),
            config,
            cache,
            orchestrator,
            batcher,
            publisher,
        }
    }

    /// Run the digest for `window`. With `replay`, the given articles are
    /// used instead of fetching.
    #[instrument(level = "info", skip_all, fields(start = %window.start, end = %window.end))]
    pub async fn run(&self, window: DateWindow, replay: Option<Vec<Article>>) -> RunOutcome {
        for (ns, stats) in self.cache.sweep_all().await {
            if stats.removed > 0 {
                info!(namespace = %ns, removed = stats.removed, bytes = stats.bytes_freed, "Swept expired cache entries");
            }
        }

        let raw = match replay {
            Some(articles) => {
                info!(count = articles.len(), "Replaying saved articles");
                articles
            }
            None => {
                let sources = self.config.sources();
                if sources.is_empty() {
                    warn!("No sources configured");
                }
                self.orchestrator.fetch_all(&sources, window).await.articles
            }
        };

        let articles = self.normalizer.normalize(raw);
        let title = self
            .config
            .report_title(&window.start.to_string(), &window.end.to_string());

        if articles.is_empty() {
            warn!("No articles survived fetching and normalization; nothing to report");
            return RunOutcome {
                title,
                articles,
                records: Vec::new(),
                report: None,
                published_url: None,
            };
        }

        let records = self.batcher.enrich(articles.clone()).await.records;
        let report = render_report(&records, &RenderConfig::from(&*self.config), Utc::now());

        let published_url = self
            .publisher
            .publish(&PublishRequest {
                title: title.clone(),
                body: report.clone(),
                destination_id: self.config.destination.clone(),
                collaborator_ids: self.config.collaborators.clone(),
            })
            .await;
        if let Some(url) = &published_url {
            info!(%url, "Report published");
        }

        RunOutcome {
            title,
            articles,
            records,
            report: Some(report),
            published_url,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::AnalysisRequest;
    use crate::error::ServiceError;
    use crate::publish::DisabledPublisher;
    use crate::scrapers::testing::FakeTransport;
    use chrono::NaiveDate;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const SITE: &str = "https://climb.example.com";
    const FEED: &str = "https://climb.example.com/feed";

    /// Covers every stub in the request.
    #[derive(Default)]
    struct EchoService {
        calls: AtomicUsize,
    }

    impl AnalysisService for EchoService {
        async fn analyze(&self, request: &AnalysisRequest) -> Result<String, ServiceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let n = request.task_instruction.matches("\nTitle: ").count();
            let items: Vec<String> = (1..=n)
                .map(|i| format!(r#"{{"localizedTitle": "Localized {i}", "summary": "Summary {i}"}}"#))
                .collect();
            Ok(format!("[{}]", items.join(",")))
        }
    }

    fn window() -> DateWindow {
        DateWindow::new(
            NaiveDate::from_ymd_opt(2025, 5, 1).unwrap(),
            NaiveDate::from_ymd_opt(2025, 5, 7).unwrap(),
        )
    }

    fn item(slug: &str, pub_date: &str, body: &str) -> String {
        format!(
            "<item><title>{slug}</title><link>{SITE}/{slug}</link><pubDate>{pub_date}</pubDate>\
             <description><![CDATA[<p>{body}</p>]]></description></item>"
        )
    }

    fn feed() -> String {
        let long = "The north ridge was climbed in record time by a two-person team this week.";
        let items = [
            item("too-old", "Tue, 15 Apr 2025 10:00:00 +0000", long),
            item("in-window", "Tue, 06 May 2025 10:00:00 +0000", long),
            item("too-thin", "Sat, 03 May 2025 10:00:00 +0000", "Short."),
            item("too-new", "Fri, 09 May 2025 10:00:00 +0000", long),
            item("way-too-new", "Sun, 01 Jun 2025 10:00:00 +0000", long),
        ]
        .concat();
        format!("<rss version=\"2.0\"><channel><title>Climb</title>{items}</channel></rss>")
    }

    fn config(dir: &std::path::Path) -> Arc<NewsConfig> {
        let mut config = NewsConfig {
            name: "Climb".into(),
            cache_dir: dir.to_path_buf(),
            ..NewsConfig::default()
        };
        config.extend_sites(SITE);
        config.extend_feeds(&format!("{SITE}={FEED}"));
        Arc::new(config)
    }

    #[tokio::test]
    async fn test_feed_scenario_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let cache = Arc::new(CacheStore::open(&config.cache_dir));
        let pipeline = Pipeline::new(
            config,
            cache,
            FakeTransport::new().route(FEED, Ok(&feed())),
            EchoService::default(),
            DisabledPublisher,
        );

        let outcome = pipeline.run(window(), None).await;

        assert_eq!(outcome.articles.len(), 1);
        assert_eq!(outcome.records.len(), 1);
        assert!(!outcome.records[0].is_fallback());
        let report = outcome.report.unwrap();
        assert!(report.contains("Articles: 1\n"));
        assert_eq!(report.matches("\n## 1. ").count(), 1);
        assert!(!report.contains("\n## 2. "));
        assert!(report.contains("## 1. Localized 1"));
        assert_eq!(outcome.title, "Climb digest (2025-05-01 to 2025-05-07)");
        assert_eq!(outcome.published_url, None);
    }

    #[tokio::test]
    async fn test_second_run_uses_caches_only() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let cache = Arc::new(CacheStore::open(&config.cache_dir));
        let pipeline = Pipeline::new(
            config,
            cache,
            FakeTransport::new().route(FEED, Ok(&feed())),
            EchoService::default(),
            DisabledPublisher,
        );

        pipeline.run(window(), None).await;
        let second = pipeline.run(window(), None).await;

        assert_eq!(second.records.len(), 1);
        assert_eq!(pipeline.batcher.service().calls.load(Ordering::SeqCst), 1);
        assert_eq!(pipeline.orchestrator.fetcher().transport().call_count(FEED), 1);
    }

    #[tokio::test]
    async fn test_nothing_in_window_is_an_empty_outcome() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let cache = Arc::new(CacheStore::open(&config.cache_dir));
        let pipeline = Pipeline::new(
            config,
            cache,
            FakeTransport::new().route(FEED, Ok(&feed())),
            EchoService::default(),
            DisabledPublisher,
        );
        let january = DateWindow::new(
            NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2025, 1, 7).unwrap(),
        );

        let outcome = pipeline.run(january, None).await;
        assert!(outcome.records.is_empty());
        assert_eq!(outcome.report, None);
        assert_eq!(pipeline.batcher.service().calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_replay_skips_fetching() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let cache = Arc::new(CacheStore::open(&config.cache_dir));
        let pipeline = Pipeline::new(
            config,
            cache,
            FakeTransport::new(),
            EchoService::default(),
            DisabledPublisher,
        );
        let saved = vec![Article {
            site: SITE.into(),
            url: format!("{SITE}/saved"),
            title: "Saved story".into(),
            date: NaiveDate::from_ymd_opt(2025, 5, 2),
            body: "A saved article body that is comfortably over the length gate.".into(),
        }];

        let outcome = pipeline.run(window(), Some(saved)).await;
        assert_eq!(outcome.records.len(), 1);
        assert!(pipeline.orchestrator.fetcher().transport().calls().is_empty());
    }
}
