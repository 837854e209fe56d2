//! Feed strategy: RSS 2.0 or Atom, filtered to the run's date window.

use super::{SourceFetcher, Transport, get_with_fallback};
use crate::cache::Namespace;
use crate::content::clean_feed_html;
use crate::error::FeedError;
use crate::models::{Article, DateWindow, FetchResult};
use chrono::{DateTime, NaiveDate, Utc};
use itertools::Itertools;
use quick_xml::Reader;
use quick_xml::de::from_str;
use quick_xml::events::Event;
use serde::Deserialize;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    items: Vec<RssItem>,
}

#[derive(Debug, Deserialize)]
struct RssItem {
    title: Option<String>,
    link: Option<String>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    description: Option<String>,
    #[serde(rename = "content:encoded", alias = "encoded")]
    content_encoded: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Atom {
    #[serde(rename = "entry", default)]
    entries: Vec<AtomEntry>,
}

#[derive(Debug, Deserialize)]
struct AtomEntry {
    title: Option<TextNode>,
    #[serde(rename = "link", default)]
    links: Vec<AtomLink>,
    published: Option<String>,
    updated: Option<String>,
    summary: Option<TextNode>,
    content: Option<TextNode>,
}

/// Element whose attributes (`type="html"` and friends) are ignored.
#[derive(Debug, Deserialize)]
struct TextNode {
    #[serde(rename = "$text", default)]
    value: String,
}

#[derive(Debug, Deserialize)]
struct AtomLink {
    #[serde(rename = "@href")]
    href: Option<String>,
    #[serde(rename = "@rel")]
    rel: Option<String>,
}

/// Format-neutral feed entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedEntry {
    pub title: Option<String>,
    pub link: Option<String>,
    pub published: Option<NaiveDate>,
    pub description: Option<String>,
    pub summary: Option<String>,
    pub content: Option<String>,
}

impl FeedEntry {
    /// Description, summary and full content joined for cleaning.
    fn raw_content(&self) -> String {
        [&self.description, &self.summary, &self.content]
            .into_iter()
            .flatten()
            .join(" ")
    }
}

/// RFC 2822 (RSS) or RFC 3339 (Atom) timestamp to its UTC calendar date.
pub fn parse_feed_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    DateTime::parse_from_rfc2822(raw)
        .or_else(|_| DateTime::parse_from_rfc3339(raw))
        .ok()
        .map(|dt| dt.with_timezone(&Utc).date_naive())
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Parse a feed document, trying RSS before Atom.
pub fn parse_feed(xml: &str) -> Result<Vec<FeedEntry>, FeedError> {
    let rss_err = match from_str::<Rss>(xml) {
        Ok(rss) => {
            return Ok(rss
                .channel
                .items
                .into_iter()
                .map(|item| FeedEntry {
                    title: non_empty(item.title),
                    link: non_empty(item.link),
                    published: item.pub_date.as_deref().and_then(parse_feed_date),
                    description: item.description,
                    summary: None,
                    content: item.content_encoded,
                })
                .collect());
        }
        Err(e) => e.to_string(),
    };

    if root_element(xml).as_deref() != Some("feed") {
        return Err(FeedError {
            rss: rss_err,
            atom: "root element is not <feed>".to_string(),
        });
    }
    match from_str::<Atom>(xml) {
        Ok(atom) => Ok(atom
            .entries
            .into_iter()
            .map(|entry| {
                let link = entry
                    .links
                    .iter()
                    .find(|l| matches!(l.rel.as_deref(), None | Some("alternate")))
                    .or_else(|| entry.links.first())
                    .and_then(|l| l.href.clone());
                FeedEntry {
                    title: non_empty(entry.title.map(|t| t.value)),
                    link: non_empty(link),
                    published: entry
                        .published
                        .or(entry.updated)
                        .as_deref()
                        .and_then(parse_feed_date),
                    description: None,
                    summary: entry.summary.map(|t| t.value),
                    content: entry.content.map(|t| t.value),
                }
            })
            .collect()),
        Err(e) => Err(FeedError {
            rss: rss_err,
            atom: e.to_string(),
        }),
    }
}

/// Local name of the document element.
fn root_element(xml: &str) -> Option<String> {
    let mut reader = Reader::from_str(xml);
    loop {
        match reader.read_event() {
            Ok(Event::Start(e) | Event::Empty(e)) => {
                return Some(String::from_utf8_lossy(e.local_name().as_ref()).into_owned());
            }
            Ok(Event::Eof) | Err(_) => return None,
            Ok(_) => {}
        }
    }
}

/// Window-filtered articles from parsed entries of `site`.
pub fn entries_to_articles(site: &str, entries: Vec<FeedEntry>, window: DateWindow) -> Vec<Article> {
    let mut articles = Vec::new();
    for entry in entries {
        let Some(date) = entry.published else {
            debug!(title = ?entry.title, "Entry has no parseable date; skipping");
            continue;
        };
        if !window.contains(date) {
            continue;
        }
        let Some(url) = entry.link.clone() else {
            warn!(%site, title = ?entry.title, "Entry has no link; skipping");
            continue;
        };
        let body = clean_feed_html(&entry.raw_content());
        articles.push(Article {
            site: site.to_string(),
            title: entry.title.clone().unwrap_or_else(|| url.clone()),
            url,
            date: Some(date),
            body,
        });
    }
    articles
}

impl<T: Transport> SourceFetcher<T> {
    /// Fetch-or-reuse the feed document and extract the in-window entries.
    /// Never fails; an unreachable or unparseable feed yields no articles.
    #[instrument(level = "info", skip_all, fields(%site, %feed_url))]
    pub async fn fetch_feed(&self, site: &str, feed_url: &str, window: DateWindow) -> FetchResult {
        let cached: Option<String> = self.cache.get(Namespace::Feed, feed_url).await;

        let entries = match cached.map(|xml| parse_feed(&xml)) {
            Some(Ok(entries)) => {
                debug!(entries = entries.len(), "Feed cache hit");
                entries
            }
            _ => {
                let xml = match get_with_fallback(&self.transport, feed_url, self.feed_timeout).await {
                    Ok(xml) => xml,
                    Err(e) => {
                        warn!(error = %e, "Feed fetch failed; source yields no articles");
                        return FetchResult::Articles(Vec::new());
                    }
                };
                match parse_feed(&xml) {
                    Ok(entries) => {
                        if !entries.is_empty() {
                            self.cache.put(Namespace::Feed, feed_url, &xml).await;
                        }
                        entries
                    }
                    Err(e) => {
                        warn!(error = %e, "Feed parse failed; source yields no articles");
                        return FetchResult::Articles(Vec::new());
                    }
                }
            }
        };

        let total = entries.len();
        let articles = entries_to_articles(site, entries, window);
        info!(total, in_window = articles.len(), "Feed processed");
        FetchResult::Articles(articles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheStore;
    use crate::error::FetchError;
    use crate::scrapers::NetworkContext;
    use crate::scrapers::testing::FakeTransport;
    use std::sync::Arc;
    use std::time::Duration;

    const SITE: &str = "https://climb.example.com";
    const FEED: &str = "https://climb.example.com/feed";

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn window() -> DateWindow {
        DateWindow::new(date(2025, 5, 1), date(2025, 5, 7))
    }

    fn rss(items: &[(&str, &str)]) -> String {
        let items: String = items
            .iter()
            .enumerate()
            .map(|(i, (pub_date, body))| {
                format!(
                    "<item><title>Story {i}</title><link>{SITE}/story-{i}</link>\
                     <pubDate>{pub_date}</pubDate>\
                     <description><![CDATA[<p>{body}</p>]]></description></item>"
                )
            })
            .collect();
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0" xmlns:content="http://purl.org/rss/1.0/modules/content/">
<channel><title>Climb</title><link>{SITE}</link><description>News</description>{items}</channel></rss>"#
        )
    }

    fn fetcher(fake: FakeTransport, dir: &std::path::Path) -> SourceFetcher<FakeTransport> {
        SourceFetcher {
            transport: fake,
            cache: Arc::new(CacheStore::open(dir)),
            feed_timeout: Duration::from_secs(30),
            page_timeout: Duration::from_secs(15),
            min_page_chars: 100,
        }
    }

    #[test]
    fn test_parse_rss_items() {
        let xml = rss(&[("Tue, 06 May 2025 10:00:00 +0000", "Body")]);
        let entries = parse_feed(&xml).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].title.as_deref(), Some("Story 0"));
        assert_eq!(entries[0].link.as_deref(), Some("https://climb.example.com/story-0"));
        assert_eq!(entries[0].published, Some(date(2025, 5, 6)));
        assert_eq!(entries[0].description.as_deref(), Some("<p>Body</p>"));
    }

    #[test]
    fn test_parse_rss_content_encoded() {
        let xml = r#"<rss version="2.0" xmlns:content="http://purl.org/rss/1.0/modules/content/"><channel>
            <item><title>A</title><link>https://x.example.com/a</link>
            <pubDate>Tue, 06 May 2025 10:00:00 GMT</pubDate>
            <content:encoded><![CDATA[<p>Full text</p>]]></content:encoded></item>
            </channel></rss>"#;
        let entries = parse_feed(xml).unwrap();
        assert_eq!(entries[0].content.as_deref(), Some("<p>Full text</p>"));
    }

    #[test]
    fn test_parse_atom_entries() {
        let xml = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Trail</title>
  <entry>
    <title type="html">Ridge run</title>
    <link rel="self" href="https://trail.example.com/self"/>
    <link rel="alternate" href="https://trail.example.com/ridge-run"/>
    <updated>2025-05-03T08:00:00Z</updated>
    <summary>Short summary</summary>
  </entry>
</feed>"#;
        let entries = parse_feed(xml).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].title.as_deref(), Some("Ridge run"));
        assert_eq!(entries[0].link.as_deref(), Some("https://trail.example.com/ridge-run"));
        assert_eq!(entries[0].published, Some(date(2025, 5, 3)));
        assert_eq!(entries[0].summary.as_deref(), Some("Short summary"));
    }

    #[test]
    fn test_atom_feed_without_entries_is_empty() {
        let xml = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom"><title>Quiet week</title></feed>"#;
        assert!(parse_feed(xml).unwrap().is_empty());
    }

    #[test]
    fn test_parse_garbage_is_an_error() {
        assert!(parse_feed("<html><body>not a feed</body></html>").is_err());
    }

    #[test]
    fn test_feed_date_formats() {
        assert_eq!(
            parse_feed_date("Wed, 07 May 2025 23:30:00 -0300"),
            Some(date(2025, 5, 8))
        );
        assert_eq!(parse_feed_date("2025-05-01T00:00:00+00:00"), Some(date(2025, 5, 1)));
        assert_eq!(parse_feed_date("yesterday"), None);
    }

    #[test]
    fn test_window_filter_is_inclusive() {
        let entry = |d: Option<NaiveDate>, link: Option<&str>| FeedEntry {
            title: Some("T".into()),
            link: link.map(str::to_string),
            published: d,
            description: Some("<p>Body</p>".into()),
            summary: None,
            content: None,
        };
        let entries = vec![
            entry(Some(date(2025, 4, 30)), Some("https://x/before")),
            entry(Some(date(2025, 5, 1)), Some("https://x/start")),
            entry(Some(date(2025, 5, 7)), Some("https://x/end")),
            entry(Some(date(2025, 5, 8)), Some("https://x/after")),
            entry(None, Some("https://x/undated")),
            entry(Some(date(2025, 5, 4)), None),
        ];
        let urls: Vec<String> = entries_to_articles(SITE, entries, window())
            .into_iter()
            .map(|a| a.url)
            .collect();
        assert_eq!(urls, vec!["https://x/start", "https://x/end"]);
    }

    #[tokio::test]
    async fn test_fetch_feed_second_call_hits_cache() {
        let dir = tempfile::tempdir().unwrap();
        let xml = rss(&[
            ("Tue, 06 May 2025 10:00:00 +0000", "A body that is long enough to matter."),
            ("Tue, 15 Apr 2025 10:00:00 +0000", "Old news."),
        ]);
        let fetcher = fetcher(FakeTransport::new().route(FEED, Ok(&xml)), dir.path());

        let first = fetcher.fetch_feed(SITE, FEED, window()).await;
        let second = fetcher.fetch_feed(SITE, FEED, window()).await;

        assert_eq!(first.article_count(), 1);
        assert_eq!(second.article_count(), 1);
        assert_eq!(fetcher.transport.call_count(FEED), 1);
        let FetchResult::Articles(articles) = second else {
            panic!("feed strategy yields plain articles");
        };
        assert_eq!(articles[0].body, "A body that is long enough to matter.");
        assert_eq!(articles[0].site, SITE);
    }

    #[tokio::test]
    async fn test_fetch_feed_without_entries_is_not_cached() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = fetcher(FakeTransport::new().route(FEED, Ok(&rss(&[]))), dir.path());

        fetcher.fetch_feed(SITE, FEED, window()).await;
        fetcher.fetch_feed(SITE, FEED, window()).await;
        assert_eq!(fetcher.transport.call_count(FEED), 2);
    }

    #[tokio::test]
    async fn test_fetch_feed_failure_yields_no_articles() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = fetcher(
            FakeTransport::new().route(FEED, Err(FetchError::Timeout)),
            dir.path(),
        );
        let result = fetcher.fetch_feed(SITE, FEED, window()).await;
        assert_eq!(result.article_count(), 0);
    }

    #[tokio::test]
    async fn test_fetch_feed_falls_back_to_direct() {
        let dir = tempfile::tempdir().unwrap();
        let xml = rss(&[("Sat, 03 May 2025 10:00:00 +0000", "Body text")]);
        let fake = FakeTransport::new()
            .route_ctx(FEED, NetworkContext::Proxy, Err(FetchError::Proxy("407".into())))
            .route_ctx(FEED, NetworkContext::Direct, Ok(&xml));
        let fetcher = fetcher(fake, dir.path());
        let result = fetcher.fetch_feed(SITE, FEED, window()).await;
        assert_eq!(result.article_count(), 1);
    }
}
