//! Page-crawl strategy for sources without a feed.
//!
//! The homepage is fetched, candidate article links are pulled from its
//! anchors, and every link is fetched (or reused from the page cache) one
//! after another. Crawled articles carry no publish date.

use super::{NetworkContext, SourceFetcher, Transport};
use crate::cache::Namespace;
use crate::content::page_text;
use crate::error::FetchError;
use crate::models::{Article, CrawlStats, FailedLink, FetchResult};
use itertools::Itertools;
use once_cell::sync::Lazy;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

static ANCHORS: Lazy<Selector> = Lazy::new(|| Selector::parse("a[href]").unwrap());

/// Substrings that mark navigation rather than article links.
const EXCLUDED: &[&str] = &[
    "#",
    "/tag/",
    "/category/",
    "/author/",
    "/page/",
    "login",
    "register",
];

/// Page-cache payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CachedPage {
    title: Option<String>,
    text: String,
}

/// Absolute URL for an anchor target: root-relative hrefs are appended to
/// the site URL, other non-`http` targets are dropped.
fn resolve_href(base: &str, href: &str) -> Option<String> {
    let href = href.trim();
    if href.starts_with("//") {
        None
    } else if href.starts_with('/') {
        Some(format!("{}{}", base.trim_end_matches('/'), href))
    } else if href.starts_with("http") {
        url::Url::parse(href).ok().map(|_| href.to_string())
    } else {
        None
    }
}

pub fn is_article_link(url: &str) -> bool {
    !EXCLUDED.iter().any(|pattern| url.contains(pattern))
}

/// Candidate article links of a homepage, de-duplicated in document order.
pub fn extract_links(base: &str, html: &str) -> Vec<String> {
    let document = Html::parse_document(html);
    let root = base.trim_end_matches('/');
    document
        .select(&ANCHORS)
        .filter_map(|a| a.value().attr("href"))
        .filter_map(|href| resolve_href(base, href))
        .filter(|url| is_article_link(url))
        .filter(|url| url.trim_end_matches('/') != root)
        .unique()
        .collect()
}

impl<T: Transport> SourceFetcher<T> {
    /// Crawl `site`, retrying the whole source directly when the proxy
    /// attempt fails on the homepage with a proxy or TLS error.
    #[instrument(level = "info", skip_all, fields(%site))]
    pub async fn crawl(&self, site: &str) -> FetchResult {
        let error = match self.crawl_with(site, NetworkContext::Proxy).await {
            Ok(result) => return result,
            Err(e) if e.is_proxy_or_tls() => {
                warn!(error = %e, "Proxy crawl failed; retrying direct");
                match self.crawl_with(site, NetworkContext::Direct).await {
                    Ok(result) => return result,
                    Err(e) => e,
                }
            }
            Err(e) => e,
        };

        warn!(error = %error, "Source unavailable; yielding no articles");
        FetchResult::SourceBatch {
            articles: Vec::new(),
            failed_links: Vec::new(),
            stats: CrawlStats {
                errors: vec![format!("{site}: {error}")],
                ..CrawlStats::default()
            },
        }
    }

    async fn crawl_with(&self, site: &str, ctx: NetworkContext) -> Result<FetchResult, FetchError> {
        let homepage = self.transport.get_text(site, ctx, self.feed_timeout).await?;
        let links = extract_links(site, &homepage);
        debug!(%ctx, links = links.len(), "Extracted candidate links");

        let mut stats = CrawlStats {
            total_links: links.len(),
            ..CrawlStats::default()
        };
        let mut articles = Vec::new();
        let mut failed_links = Vec::new();

        for link in links {
            match self.page(&link, ctx).await {
                Ok(page) => {
                    stats.extracted += 1;
                    articles.push(Article {
                        site: site.to_string(),
                        title: page.title.unwrap_or_else(|| link.clone()),
                        url: link,
                        date: None,
                        body: page.text,
                    });
                }
                Err(reason) => {
                    debug!(url = %link, %reason, "Link produced no article");
                    stats.failed += 1;
                    stats.errors.push(format!("{link}: {reason}"));
                    failed_links.push(FailedLink { url: link, reason });
                }
            }
        }

        info!(
            %ctx,
            total = stats.total_links,
            extracted = stats.extracted,
            failed = stats.failed,
            "Crawl finished"
        );
        Ok(FetchResult::SourceBatch {
            articles,
            failed_links,
            stats,
        })
    }

    /// Fetch-or-reuse one article page. Only pages with enough text are
    /// cached.
    async fn page(&self, url: &str, ctx: NetworkContext) -> Result<CachedPage, String> {
        if let Some(page) = self.cache.get::<CachedPage>(Namespace::Page, url).await {
            return Ok(page);
        }

        let html = self
            .transport
            .get_text(url, ctx, self.page_timeout)
            .await
            .map_err(|e| e.to_string())?;
        let (title, text) = page_text(&html);
        let len = text.chars().count();
        if len <= self.min_page_chars {
            return Err(format!("extracted text too short ({len} chars)"));
        }

        let page = CachedPage { title, text };
        self.cache.put(Namespace::Page, url, &page).await;
        Ok(page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheStore;
    use crate::scrapers::testing::FakeTransport;
    use std::sync::Arc;
    use std::time::Duration;

    const SITE: &str = "https://trail.example.com/";

    fn fetcher(fake: FakeTransport, dir: &std::path::Path) -> SourceFetcher<FakeTransport> {
        SourceFetcher {
            transport: fake,
            cache: Arc::new(CacheStore::open(dir)),
            feed_timeout: Duration::from_secs(30),
            page_timeout: Duration::from_secs(15),
            min_page_chars: 100,
        }
    }

    fn article_page(title: &str) -> String {
        format!(
            "<html><head><title>{title}</title><script>track()</script></head><body><p>{}</p></body></html>",
            "Fresh snow on the ridge made for a long and careful approach. ".repeat(3)
        )
    }

    const HOMEPAGE: &str = r##"<html><body>
        <a href="/2025/05/ridge-run">Ridge</a>
        <a href="https://trail.example.com/2025/05/hut-opening">Hut</a>
        <a href="/2025/05/ridge-run">Ridge again</a>
        <a href="/tag/snow">Tag</a>
        <a href="/category/news">Category</a>
        <a href="#top">Top</a>
        <a href="/login">Login</a>
        <a href="mailto:editor@example.com">Mail</a>
        <a href="/">Home</a>
        <a href="/2025/05/thin">Thin</a>
    </body></html>"##;

    #[test]
    fn test_extract_links_filters_and_dedupes() {
        let links = extract_links(SITE, HOMEPAGE);
        assert_eq!(
            links,
            vec![
                "https://trail.example.com/2025/05/ridge-run",
                "https://trail.example.com/2025/05/hut-opening",
                "https://trail.example.com/2025/05/thin",
            ]
        );
    }

    #[test]
    fn test_is_article_link() {
        assert!(is_article_link("https://x.example.com/2025/story"));
        assert!(!is_article_link("https://x.example.com/author/jo"));
        assert!(!is_article_link("https://x.example.com/register"));
    }

    fn routed() -> FakeTransport {
        FakeTransport::new()
            .route(SITE, Ok(HOMEPAGE))
            .route(
                "https://trail.example.com/2025/05/ridge-run",
                Ok(&article_page("Ridge run")),
            )
            .route(
                "https://trail.example.com/2025/05/hut-opening",
                Err(FetchError::Status(404)),
            )
            .route(
                "https://trail.example.com/2025/05/thin",
                Ok("<html><body><p>Too thin.</p></body></html>"),
            )
    }

    #[tokio::test]
    async fn test_crawl_records_failed_links() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = fetcher(routed(), dir.path());

        let FetchResult::SourceBatch {
            articles,
            failed_links,
            stats,
        } = fetcher.crawl(SITE).await
        else {
            panic!("crawl yields a source batch");
        };

        assert_eq!(articles.len(), 1);
        assert_eq!(articles[0].title, "Ridge run");
        assert_eq!(articles[0].date, None);
        assert!(!articles[0].body.contains("track()"));
        assert_eq!(failed_links.len(), 2);
        assert_eq!(stats.total_links, 3);
        assert_eq!(stats.extracted, 1);
        assert_eq!(stats.failed, 2);
    }

    #[tokio::test]
    async fn test_crawl_reuses_cached_pages() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = fetcher(routed(), dir.path());
        let ridge = "https://trail.example.com/2025/05/ridge-run";

        fetcher.crawl(SITE).await;
        fetcher.crawl(SITE).await;
        assert_eq!(fetcher.transport.call_count(ridge), 1);
        assert_eq!(fetcher.transport.call_count(SITE), 2);
    }

    #[tokio::test]
    async fn test_crawl_falls_back_to_direct_for_whole_source() {
        let dir = tempfile::tempdir().unwrap();
        let fake = routed().route_ctx(
            SITE,
            NetworkContext::Proxy,
            Err(FetchError::Tls("certificate verify failed".into())),
        );
        let fetcher = fetcher(fake, dir.path());

        let result = fetcher.crawl(SITE).await;
        assert_eq!(result.article_count(), 1);
        assert!(
            fetcher
                .transport
                .calls()
                .iter()
                .skip(1)
                .all(|(_, ctx)| *ctx == NetworkContext::Direct)
        );
    }

    #[tokio::test]
    async fn test_unavailable_source_yields_error_stats() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = fetcher(
            FakeTransport::new().route(SITE, Err(FetchError::Status(503))),
            dir.path(),
        );
        let FetchResult::SourceBatch { articles, stats, .. } = fetcher.crawl(SITE).await else {
            panic!("crawl yields a source batch");
        };
        assert!(articles.is_empty());
        assert_eq!(stats.errors.len(), 1);
        assert!(stats.errors[0].contains("503"));
    }
}
