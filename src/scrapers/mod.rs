//! Source retrieval: HTTP transport plus the two per-source strategies.
//!
//! | Strategy | Module | Used when |
//! |----------|--------|-----------|
//! | Feed | [`feed`] | the source has a feed URL |
//! | Page crawl | [`crawl`] | otherwise |
//!
//! Every request names its [`NetworkContext`] explicitly. `Proxy` honours
//! the configured (or environment) proxy, `Direct` bypasses all proxies.
//! Nothing here touches process-wide state, so concurrent source tasks can
//! use different contexts at the same time.
//!
//! Transient statuses (429 and 5xx) are retried by [`RetryTransport`] with
//! exponential backoff and jitter, independently for each request.

pub mod crawl;
pub mod feed;

use crate::cache::CacheStore;
use crate::config::NewsConfig;
use crate::error::{ConfigError, FetchError};
use crate::models::{DateWindow, FetchResult, Source};
use rand::{Rng, rng};
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::{Client, Proxy, StatusCode};
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, error, instrument, warn};

/// Which network path a request takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NetworkContext {
    /// Through the configured or environment proxy.
    Proxy,
    /// With every proxy setting cleared.
    Direct,
}

impl fmt::Display for NetworkContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkContext::Proxy => f.write_str("proxy"),
            NetworkContext::Direct => f.write_str("direct"),
        }
    }
}

/// A GET-only text transport.
pub trait Transport {
    /// Fetch `url` as text through `ctx`, giving up after `timeout`.
    async fn get_text(
        &self,
        url: &str,
        ctx: NetworkContext,
        timeout: Duration,
    ) -> Result<String, FetchError>;
}

impl<T: Transport> Transport for &T {
    async fn get_text(
        &self,
        url: &str,
        ctx: NetworkContext,
        timeout: Duration,
    ) -> Result<String, FetchError> {
        (**self).get_text(url, ctx, timeout).await
    }
}

fn browser_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::USER_AGENT,
        HeaderValue::from_static(
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
        ),
    );
    headers.insert(
        header::ACCEPT,
        HeaderValue::from_static(
            "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8",
        ),
    );
    headers.insert(
        header::ACCEPT_LANGUAGE,
        HeaderValue::from_static("en-US,en;q=0.9"),
    );
    headers.insert(header::UPGRADE_INSECURE_REQUESTS, HeaderValue::from_static("1"));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("max-age=0"));
    headers.insert("Sec-Fetch-Dest", HeaderValue::from_static("document"));
    headers.insert("Sec-Fetch-Mode", HeaderValue::from_static("navigate"));
    headers.insert("Sec-Fetch-Site", HeaderValue::from_static("none"));
    headers.insert("Sec-Fetch-User", HeaderValue::from_static("?1"));
    headers
}

/// Map a reqwest failure onto the fetch taxonomy by inspecting the whole
/// source chain; proxy and TLS failures only show up in nested errors.
fn classify(e: &reqwest::Error) -> FetchError {
    if e.is_timeout() {
        return FetchError::Timeout;
    }
    let mut message = e.to_string();
    let mut source = e.source();
    while let Some(inner) = source {
        message.push_str(": ");
        message.push_str(&inner.to_string());
        source = inner.source();
    }
    let lower = message.to_lowercase();
    if lower.contains("proxy") {
        FetchError::Proxy(message)
    } else if ["tls", "ssl", "certificate", "handshake"]
        .iter()
        .any(|needle| lower.contains(needle))
    {
        FetchError::Tls(message)
    } else {
        FetchError::Network(message)
    }
}

/// reqwest-backed transport with one client per network context.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    proxied: Client,
    direct: Client,
}

impl HttpTransport {
    /// `proxy` overrides the environment proxy for the `Proxy` context.
    pub fn new(proxy: Option<&str>) -> Result<Self, ConfigError> {
        let mut proxied = Client::builder().default_headers(browser_headers());
        if let Some(url) = proxy {
            let proxy = Proxy::all(url).map_err(|e| ConfigError::Invalid {
                field: "proxy",
                reason: e.to_string(),
            })?;
            proxied = proxied.proxy(proxy);
        }
        let proxied = proxied
            .build()
            .map_err(|e| ConfigError::Client(e.to_string()))?;
        let direct = Self::direct_client()?;
        Ok(Self { proxied, direct })
    }

    fn direct_client() -> Result<Client, ConfigError> {
        Client::builder()
            .default_headers(browser_headers())
            .no_proxy()
            .build()
            .map_err(|e| ConfigError::Client(e.to_string()))
    }
}

impl Transport for HttpTransport {
    #[instrument(level = "debug", skip_all, fields(%url, %ctx))]
    async fn get_text(
        &self,
        url: &str,
        ctx: NetworkContext,
        timeout: Duration,
    ) -> Result<String, FetchError> {
        let client = match ctx {
            NetworkContext::Proxy => &self.proxied,
            NetworkContext::Direct => &self.direct,
        };
        let response = client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| classify(&e))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            return Err(FetchError::Transient(status.as_u16()));
        }
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }
        response.text().await.map_err(|e| classify(&e))
    }
}

/// Backoff settings for [`RetryTransport`].
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_jitter: Duration::from_millis(250),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based):
    /// `min(base * 2^(attempt-1), max) + jitter`.
    pub fn delay(&self, attempt: usize) -> Duration {
        let shift = attempt.saturating_sub(1).min(16) as u32;
        let delay = self.base_delay.saturating_mul(1 << shift).min(self.max_delay);
        let jitter_ms = self.max_jitter.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            0
        } else {
            rng().random_range(0..=jitter_ms)
        };
        delay + Duration::from_millis(jitter)
    }
}

/// Decorator that retries transient statuses of any [`Transport`].
pub struct RetryTransport<T> {
    inner: T,
    policy: RetryPolicy,
}

impl<T> RetryTransport<T> {
    pub fn new(inner: T, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

impl<T> fmt::Debug for RetryTransport<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryTransport")
            .field("policy", &self.policy)
            .finish()
    }
}

impl<T: Transport> Transport for RetryTransport<T> {
    async fn get_text(
        &self,
        url: &str,
        ctx: NetworkContext,
        timeout: Duration,
    ) -> Result<String, FetchError> {
        let total_t0 = Instant::now();
        let mut attempt = 0usize;

        loop {
            match self.inner.get_text(url, ctx, timeout).await {
                Ok(body) => return Ok(body),
                Err(e) if e.is_transient() => {
                    attempt += 1;
                    if attempt > self.policy.max_retries {
                        error!(
                            %url,
                            %ctx,
                            attempt,
                            max = self.policy.max_retries,
                            elapsed_ms_total = total_t0.elapsed().as_millis() as u64,
                            error = %e,
                            "GET exhausted retries"
                        );
                        return Err(e);
                    }
                    let delay = self.policy.delay(attempt);
                    warn!(%url, %ctx, attempt, ?delay, error = %e, "Transient failure; backing off");
                    sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Fetch through the proxy context, retrying once directly when the
/// failure is proxy- or TLS-specific.
pub async fn get_with_fallback<T: Transport>(
    transport: &T,
    url: &str,
    timeout: Duration,
) -> Result<String, FetchError> {
    match transport.get_text(url, NetworkContext::Proxy, timeout).await {
        Ok(body) => Ok(body),
        Err(e) if e.is_proxy_or_tls() => {
            warn!(%url, error = %e, "Proxy fetch failed; retrying direct");
            let body = transport
                .get_text(url, NetworkContext::Direct, timeout)
                .await?;
            debug!(%url, "Direct fetch succeeded");
            Ok(body)
        }
        Err(e) => Err(e),
    }
}

/// Per-source retrieval. The strategy is chosen by whether the source has
/// a feed URL; see [`feed`] and [`crawl`].
pub struct SourceFetcher<T> {
    transport: T,
    cache: Arc<CacheStore>,
    feed_timeout: Duration,
    page_timeout: Duration,
    min_page_chars: usize,
}

impl<T: Transport> SourceFetcher<T> {
    pub fn new(transport: T, cache: Arc<CacheStore>, config: &NewsConfig) -> Self {
        Self {
            transport,
            cache,
            feed_timeout: config.feed_timeout(),
            page_timeout: config.page_timeout(),
            min_page_chars: config.min_page_chars,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Fetch one source. Never fails: problems surface as empty results,
    /// failed links and crawl stats.
    pub async fn fetch(&self, source: &Source, window: DateWindow) -> FetchResult {
        match &source.feed {
            Some(feed_url) => self.fetch_feed(&source.site, feed_url, window).await,
            None => self.crawl(&source.site).await,
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::FakeTransport;
    use super::*;

    fn no_wait() -> RetryPolicy {
        RetryPolicy {
            max_retries: 3,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            max_jitter: Duration::ZERO,
        }
    }

    const URL: &str = "https://example.com/feed";
    const T: Duration = Duration::from_secs(5);

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_retries: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
            max_jitter: Duration::ZERO,
        };
        assert_eq!(policy.delay(1), Duration::from_secs(1));
        assert_eq!(policy.delay(2), Duration::from_secs(2));
        assert_eq!(policy.delay(3), Duration::from_secs(4));
        assert_eq!(policy.delay(4), Duration::from_secs(5));
    }

    #[test]
    fn test_backoff_jitter_is_bounded() {
        let policy = RetryPolicy::default();
        let d = policy.delay(1);
        assert!(d >= Duration::from_secs(1));
        assert!(d <= Duration::from_millis(1250));
    }

    #[tokio::test]
    async fn test_retry_recovers_from_transient_status() {
        let fake = FakeTransport::new().script(
            URL,
            None,
            vec![
                Err(FetchError::Transient(503)),
                Err(FetchError::Transient(429)),
                Ok("<rss/>"),
            ],
        );
        let transport = RetryTransport::new(&fake, no_wait());
        let body = transport
            .get_text(URL, NetworkContext::Proxy, T)
            .await
            .unwrap();
        assert_eq!(body, "<rss/>");
        assert_eq!(fake.call_count(URL), 3);
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_three_retries() {
        let fake = FakeTransport::new().route(URL, Err(FetchError::Transient(502)));
        let transport = RetryTransport::new(&fake, no_wait());
        let err = transport
            .get_text(URL, NetworkContext::Direct, T)
            .await
            .unwrap_err();
        assert_eq!(err, FetchError::Transient(502));
        assert_eq!(fake.call_count(URL), 4);
    }

    #[tokio::test]
    async fn test_non_transient_status_is_not_retried() {
        let fake = FakeTransport::new().route(URL, Err(FetchError::Status(404)));
        let transport = RetryTransport::new(&fake, no_wait());
        assert!(transport.get_text(URL, NetworkContext::Proxy, T).await.is_err());
        assert_eq!(fake.call_count(URL), 1);
    }

    #[tokio::test]
    async fn test_fallback_goes_direct_on_proxy_failure() {
        let fake = FakeTransport::new()
            .route_ctx(URL, NetworkContext::Proxy, Err(FetchError::Proxy("tunnel refused".into())))
            .route_ctx(URL, NetworkContext::Direct, Ok("body"));
        let body = get_with_fallback(&fake, URL, T).await.unwrap();
        assert_eq!(body, "body");
        assert_eq!(
            fake.calls(),
            vec![
                (URL.to_string(), NetworkContext::Proxy),
                (URL.to_string(), NetworkContext::Direct)
            ]
        );
    }

    #[tokio::test]
    async fn test_fallback_skipped_for_other_failures() {
        let fake = FakeTransport::new()
            .route_ctx(URL, NetworkContext::Proxy, Err(FetchError::Status(403)))
            .route_ctx(URL, NetworkContext::Direct, Ok("body"));
        assert_eq!(
            get_with_fallback(&fake, URL, T).await,
            Err(FetchError::Status(403))
        );
        assert_eq!(fake.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_direct_attempt_has_its_own_retry_budget() {
        let fake = FakeTransport::new()
            .route_ctx(URL, NetworkContext::Proxy, Err(FetchError::Tls("handshake".into())))
            .script(
                URL,
                Some(NetworkContext::Direct),
                vec![Err(FetchError::Transient(500)), Ok("ok")],
            );
        let transport = RetryTransport::new(&fake, no_wait());
        let body = get_with_fallback(&transport, URL, T).await.unwrap();
        assert_eq!(body, "ok");
        assert_eq!(fake.call_count(URL), 3);
    }

    #[test]
    fn test_http_transport_rejects_bad_proxy() {
        assert!(HttpTransport::new(Some("::not a url::")).is_err());
        assert!(HttpTransport::new(None).is_ok());
    }
}
