//! Rate-limited, retrying HTTP access to the GitHub REST API.

use std::collections::VecDeque;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{HeaderMap, ACCEPT, AUTHORIZATION, LINK};
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

use crate::config::{Settings, MAX_PER_PAGE};
use crate::error::{Error, Result};
use crate::github::metadata::StatusTracker;
use crate::github::types::{RateLimit, RateLimitResponse};

const GITHUB_ACCEPT: &str = "application/vnd.github.v3+json";
const USER_AGENT: &str = concat!("repostats/", env!("CARGO_PKG_VERSION"));

/// Sliding-window limiter: at most `max_requests` acquisitions per `window`.
#[derive(Debug)]
pub struct RateLimiter {
    max_requests: usize,
    window: Duration,
    sent: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            max_requests: max_requests.max(1),
            window,
            sent: Mutex::new(VecDeque::new()),
        }
    }

    pub fn max_requests(&self) -> usize {
        self.max_requests
    }

    /// Waits until a request may be sent and books it.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut sent = self.sent.lock().await;
                let now = Instant::now();
                while sent
                    .front()
                    .map_or(false, |first| now.duration_since(*first) >= self.window)
                {
                    sent.pop_front();
                }
                if sent.len() < self.max_requests {
                    sent.push_back(now);
                    return;
                }
                sent.front()
                    .map_or(Duration::ZERO, |first| self.window - now.duration_since(*first))
            };
            debug!(wait_ms = wait.as_millis() as u64, "rate limit reached, waiting");
            sleep(wait).await;
        }
    }
}

/// Bounded retries with exponential backoff for transient failures.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            max_retries: settings.max_retries,
            base_delay: settings.retry_base_delay(),
        }
    }

    pub async fn run<T, F, Fut>(&self, what: &str, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    let delay = self.base_delay * 2u32.saturating_pow(attempt);
                    attempt += 1;
                    warn!(target_url = what, attempt, error = %e, "transient failure, retrying");
                    sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageLinks {
    pub next: Option<String>,
    pub last: Option<String>,
}

impl PageLinks {
    /// Parses an RFC 8288 `Link` header as sent by GitHub.
    pub fn parse(header: &str) -> Self {
        let mut links = PageLinks::default();
        for part in header.split(',') {
            let mut segments = part.split(';');
            let Some(target) = segments.next().map(str::trim) else {
                continue;
            };
            let Some(url) = target.strip_prefix('<').and_then(|t| t.strip_suffix('>')) else {
                continue;
            };
            for param in segments {
                let Some(value) = param.trim().strip_prefix("rel=") else {
                    continue;
                };
                for rel in value.trim_matches('"').split_whitespace() {
                    match rel {
                        "next" => links.next = Some(url.to_string()),
                        "last" => links.last = Some(url.to_string()),
                        _ => {}
                    }
                }
            }
        }
        links
    }

    fn from_headers(headers: &HeaderMap) -> Self {
        headers
            .get(LINK)
            .and_then(|value| value.to_str().ok())
            .map(Self::parse)
            .unwrap_or_default()
    }

    /// The `page` query parameter of the last-page link.
    pub fn last_page_number(&self) -> Option<u64> {
        let url = reqwest::Url::parse(self.last.as_deref()?).ok()?;
        let page = url
            .query_pairs()
            .find(|(key, _)| key == "page")
            .and_then(|(_, value)| value.parse().ok());
        page
    }
}

#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub links: PageLinks,
}

pub struct GithubClient {
    http: reqwest::Client,
    token: String,
    api_base: String,
    per_page: usize,
    limiter: RateLimiter,
    retry: RetryPolicy,
    window: Duration,
    status: Option<Arc<StatusTracker>>,
}

impl GithubClient {
    /// A client budgeted with the configured fallback rate limit.
    pub fn new(settings: &Settings, token: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder().user_agent(USER_AGENT).build()?;
        Ok(Self {
            http,
            token: token.into(),
            api_base: settings.github_api_url.trim_end_matches('/').to_string(),
            per_page: settings.per_page.clamp(1, MAX_PER_PAGE),
            limiter: RateLimiter::new(settings.fallback_rate_limit, settings.rate_limit_window()),
            retry: RetryPolicy::from_settings(settings),
            window: settings.rate_limit_window(),
            status: None,
        })
    }

    pub fn with_status(mut self, tracker: Arc<StatusTracker>) -> Self {
        self.status = Some(tracker);
        self
    }

    /// Replaces the request budget, e.g. with the quota reported by the API.
    pub fn with_request_budget(mut self, max_requests: usize) -> Self {
        self.limiter = RateLimiter::new(max_requests, self.window);
        self
    }

    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    pub fn per_page(&self) -> usize {
        self.per_page
    }

    pub fn request_budget(&self) -> usize {
        self.limiter.max_requests()
    }

    /// Queries the core quota. Not counted against the limiter.
    pub async fn fetch_rate_limit(&self) -> Result<RateLimit> {
        let url = format!("{}/rate_limit", self.api_base);
        let response = self.request(&url).send().await?;
        let response = check_status(response, &url)?;
        let body: RateLimitResponse = response.json().await?;
        Ok(body.resources.core)
    }

    pub async fn get_page<T: DeserializeOwned>(&self, url: &str) -> Result<Page<T>> {
        let response = self.send(url).await?;
        let links = PageLinks::from_headers(response.headers());
        let items = response.json().await?;
        Ok(Page { items, links })
    }

    pub fn pager<T: DeserializeOwned>(&self, first_url: impl Into<String>) -> Pager<'_, T> {
        Pager {
            client: self,
            next: Some(first_url.into()),
            _marker: PhantomData,
        }
    }

    async fn send(&self, url: &str) -> Result<reqwest::Response> {
        self.retry
            .run(url, || async move {
                self.limiter.acquire().await;
                debug!(%url, "GET");
                let response = self.request(url).send().await?;
                self.record_status(response.headers());
                check_status(response, url)
            })
            .await
    }

    fn request(&self, url: &str) -> reqwest::RequestBuilder {
        self.http
            .get(url)
            .header(ACCEPT, GITHUB_ACCEPT)
            .header(AUTHORIZATION, format!("token {}", self.token))
    }

    fn record_status(&self, headers: &HeaderMap) {
        if let Some(tracker) = &self.status {
            tracker.record_response(
                header_number(headers, "x-ratelimit-limit"),
                header_number(headers, "x-ratelimit-remaining"),
            );
        }
    }
}

fn check_status(response: reqwest::Response, url: &str) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(Error::Status {
            status: status.as_u16(),
            url: url.to_string(),
        })
    }
}

fn header_number(headers: &HeaderMap, name: &str) -> Option<u64> {
    headers.get(name)?.to_str().ok()?.trim().parse().ok()
}

/// Walks a paged collection one page at a time. The caller decides whether to
/// continue after each page.
pub struct Pager<'a, T> {
    client: &'a GithubClient,
    next: Option<String>,
    _marker: PhantomData<fn() -> T>,
}

impl<'a, T: DeserializeOwned> Pager<'a, T> {
    pub async fn next_page(&mut self) -> Result<Option<Page<T>>> {
        let Some(url) = self.next.take() else {
            return Ok(None);
        };
        let page = self.client.get_page::<T>(&url).await?;
        self.next = page.links.next.clone();
        Ok(Some(page))
    }

    pub fn has_next(&self) -> bool {
        self.next.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_parse_link_header() {
        let header = r#"<https://api.github.com/repositories/1/pulls?state=all&per_page=100&page=2>; rel="next", <https://api.github.com/repositories/1/pulls?state=all&per_page=100&page=7>; rel="last""#;
        let links = PageLinks::parse(header);
        assert_eq!(
            links.next.as_deref(),
            Some("https://api.github.com/repositories/1/pulls?state=all&per_page=100&page=2")
        );
        assert_eq!(links.last_page_number(), Some(7));
    }

    #[test]
    fn test_page_size_is_capped() {
        let mut settings = Settings::with_root("/tmp/unused");
        settings.per_page = 250;
        assert_eq!(GithubClient::new(&settings, "t").unwrap().per_page(), MAX_PER_PAGE);
        settings.per_page = 0;
        assert_eq!(GithubClient::new(&settings, "t").unwrap().per_page(), 1);
    }

    #[test]
    fn test_parse_link_header_without_last() {
        let links = PageLinks::parse(r#"<https://x.test/a?page=1>; rel="prev""#);
        assert_eq!(links, PageLinks::default());
        assert_eq!(links.last_page_number(), None);
        assert_eq!(PageLinks::parse("garbage"), PageLinks::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limiter_waits_for_window() {
        let limiter = RateLimiter::new(2, Duration::from_secs(10));
        let start = Instant::now();

        limiter.acquire().await;
        limiter.acquire().await;
        assert!(start.elapsed() < Duration::from_secs(1));

        limiter.acquire().await;
        assert!(start.elapsed() >= Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limiter_never_zero() {
        let limiter = RateLimiter::new(0, Duration::from_secs(1));
        assert_eq!(limiter.max_requests(), 1);
        limiter.acquire().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_stops_after_max_retries() {
        let policy = RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(10),
        };
        let attempts = &AtomicU32::new(0);
        let result: Result<()> = policy
            .run("https://api.github.com/x", || async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(Error::Status {
                    status: 502,
                    url: "https://api.github.com/x".to_string(),
                })
            })
            .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_skips_permanent_errors() {
        let policy = RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(10),
        };
        let attempts = &AtomicU32::new(0);
        let result: Result<()> = policy
            .run("u", || async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(Error::Status {
                    status: 404,
                    url: "u".to_string(),
                })
            })
            .await;

        assert!(result.unwrap_err().is_not_found());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
