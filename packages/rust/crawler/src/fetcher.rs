//! Rate-limited, retrying page fetcher.

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::{Client, redirect};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};
use url::Url;

use topicharvest_shared::{
    HarvestConfig, HarvestError, PageContent, RateCategory, RateLimiter, Result, RetryPolicy,
    RetryState,
};

use crate::guard::is_ssrf_target;
use crate::{FetchError, FetchErrorKind};

/// Browser-like User-Agent; many sites refuse obvious bots outright.
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

const ACCEPT: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8";

const ACCEPT_LANGUAGE: &str = "en-US,en;q=0.5";

const MAX_REDIRECTS: usize = 5;

/// Media types the extractor can turn into text.
const SUPPORTED_TYPES: &[&str] = &["text/html", "application/xhtml+xml", "text/plain"];

/// Knobs for [`PageFetcher`].
#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
    /// Allow localhost/private IPs (for integration tests with mock servers).
    pub allow_private_hosts: bool,
}

impl From<&HarvestConfig> for FetchOptions {
    fn from(config: &HarvestConfig) -> Self {
        Self {
            request_timeout: config.request_timeout,
            retry: config.fetch_retry_policy(),
            allow_private_hosts: config.allow_private_hosts,
        }
    }
}

/// Fetches single pages under the shared fetch rate limit.
///
/// Every attempt, retries included, takes a fetch slot first. A stop cuts
/// short a wait for a slot or a backoff; a request already on the wire is
/// left to finish or time out.
#[derive(Debug, Clone)]
pub struct PageFetcher {
    client: Client,
    limiter: RateLimiter,
    options: FetchOptions,
    stop: CancellationToken,
}

/// One failed attempt, before the retry decision.
struct AttemptFailure {
    kind: FetchErrorKind,
    message: String,
    retry_after: Option<Duration>,
}

impl AttemptFailure {
    fn new(kind: FetchErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retry_after: None,
        }
    }
}

impl PageFetcher {
    pub fn new(limiter: RateLimiter, options: FetchOptions, stop: CancellationToken) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(header::ACCEPT, HeaderValue::from_static(ACCEPT));
        headers.insert(header::ACCEPT_LANGUAGE, HeaderValue::from_static(ACCEPT_LANGUAGE));

        let allow_private = options.allow_private_hosts;
        let policy = redirect::Policy::custom(move |attempt| {
            if attempt.previous().len() >= MAX_REDIRECTS {
                attempt.error("too many redirects")
            } else if !allow_private && is_ssrf_target(attempt.url()) {
                attempt.error("redirect to a private host")
            } else {
                attempt.follow()
            }
        });

        let client = Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .redirect(policy)
            .timeout(options.request_timeout)
            .build()
            .map_err(|e| HarvestError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            limiter,
            options,
            stop,
        })
    }

    /// Fetch `url`, retrying transient failures within the retry bound.
    #[instrument(skip_all, fields(url = %url))]
    pub async fn fetch(&self, url: &str) -> std::result::Result<PageContent, FetchError> {
        let target = self.check_target(url)?;
        let policy = self.options.retry;
        let mut retry = RetryState::new();

        loop {
            if !self.limiter.acquire_or_cancel(RateCategory::Fetch, &self.stop).await {
                return Err(FetchError::new(
                    FetchErrorKind::Aborted,
                    retry.attempts(),
                    "stopped while waiting for a fetch slot",
                ));
            }
            let attempt = retry.begin_attempt();
            debug!(attempt, "fetching page");

            let failure = match self.attempt(&target).await {
                Ok((http_status, content_type, body)) => {
                    return Ok(PageContent {
                        url: url.to_string(),
                        body,
                        http_status,
                        content_type,
                        fetched_at: Utc::now(),
                        attempts: attempt,
                    });
                }
                Err(failure) => failure,
            };

            if !failure.kind.is_retryable() {
                return Err(FetchError::new(failure.kind, attempt, failure.message));
            }
            if !retry.can_retry(&policy) {
                warn!(attempts = attempt, kind = %failure.kind, "fetch retries exhausted");
                return Err(FetchError::new(failure.kind, attempt, failure.message));
            }

            let delay = match failure.kind {
                FetchErrorKind::HttpError { code: 429 } => {
                    policy.rate_limited_backoff(attempt, failure.retry_after)
                }
                _ => policy.backoff(attempt),
            };
            debug!(attempt, ?delay, kind = %failure.kind, "retrying after backoff");
            retry.schedule(delay);
            if !retry.wait(&self.stop).await {
                return Err(FetchError::new(
                    FetchErrorKind::Aborted,
                    attempt,
                    format!("stopped during backoff after: {}", failure.message),
                ));
            }
        }
    }

    fn check_target(&self, url: &str) -> std::result::Result<Url, FetchError> {
        let parsed = Url::parse(url).map_err(|e| {
            FetchError::new(FetchErrorKind::Unsupported, 0, format!("malformed URL: {e}"))
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(FetchError::new(
                FetchErrorKind::Unsupported,
                0,
                format!("unsupported scheme: {}", parsed.scheme()),
            ));
        }
        if !self.options.allow_private_hosts && is_ssrf_target(&parsed) {
            return Err(FetchError::new(
                FetchErrorKind::Unsupported,
                0,
                "blocked private or local host",
            ));
        }
        Ok(parsed)
    }

    /// A single request. Returns status, media type and body.
    async fn attempt(
        &self,
        url: &Url,
    ) -> std::result::Result<(u16, Option<String>, String), AttemptFailure> {
        let response = self
            .client
            .get(url.as_str())
            .send()
            .await
            .map_err(transport_failure)?;

        let status = response.status();
        if !status.is_success() {
            let mut failure = AttemptFailure::new(
                FetchErrorKind::HttpError {
                    code: status.as_u16(),
                },
                format!("HTTP {status}"),
            );
            failure.retry_after = retry_after(response.headers());
            return Err(failure);
        }

        let content_type = media_type(response.headers());
        if let Some(ct) = content_type.as_deref() {
            if !SUPPORTED_TYPES.contains(&ct) {
                return Err(AttemptFailure::new(
                    FetchErrorKind::Unsupported,
                    format!("unsupported content type: {ct}"),
                ));
            }
        }

        let body = response.text().await.map_err(transport_failure)?;
        Ok((status.as_u16(), content_type, body))
    }
}

fn transport_failure(e: reqwest::Error) -> AttemptFailure {
    let kind = if e.is_timeout() {
        FetchErrorKind::Timeout
    } else if e.is_redirect() {
        FetchErrorKind::Unsupported
    } else {
        FetchErrorKind::ConnectionError
    };
    AttemptFailure::new(kind, e.to_string())
}

/// `Content-Type` without parameters, lowercased.
fn media_type(headers: &HeaderMap) -> Option<String> {
    let raw = headers.get(header::CONTENT_TYPE)?.to_str().ok()?;
    let media = raw.split(';').next()?.trim().to_ascii_lowercase();
    (!media.is_empty()).then_some(media)
}

/// `Retry-After` as delta-seconds or an HTTP date.
fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    let raw = headers.get(header::RETRY_AFTER)?.to_str().ok()?.trim();
    if let Ok(secs) = raw.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let at = DateTime::parse_from_rfc2822(raw).ok()?.with_timezone(&Utc);
    (at - Utc::now()).to_std().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use topicharvest_shared::RateSpec;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const PAGE: &str = "<html><head><title>Hi</title></head><body><p>Hello there.</p></body></html>";

    fn options(max_retries: u32) -> FetchOptions {
        FetchOptions {
            request_timeout: Duration::from_secs(5),
            retry: RetryPolicy {
                max_retries,
                base_delay: Duration::from_millis(5),
                max_delay: Duration::from_millis(20),
                rate_limited_delay: Duration::from_millis(10),
            },
            allow_private_hosts: true,
        }
    }

    fn fetcher(options: FetchOptions) -> PageFetcher {
        PageFetcher::new(RateLimiter::unlimited(), options, CancellationToken::new()).unwrap()
    }

    fn html(status: u16) -> ResponseTemplate {
        ResponseTemplate::new(status).set_body_raw(PAGE, "text/html; charset=utf-8")
    }

    #[tokio::test]
    async fn fetches_html_page() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/page"))
            .respond_with(html(200))
            .expect(1)
            .mount(&server)
            .await;

        let url = format!("{}/page", server.uri());
        let page = fetcher(options(2)).fetch(&url).await.unwrap();
        assert_eq!(page.url, url);
        assert_eq!(page.http_status, 200);
        assert_eq!(page.content_type.as_deref(), Some("text/html"));
        assert_eq!(page.attempts, 1);
        assert!(page.body.contains("Hello there."));
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let server = MockServer::start().await;
        Mock::given(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let err = fetcher(options(2))
            .fetch(&format!("{}/missing", server.uri()))
            .await
            .unwrap_err();
        assert_eq!(err.kind, FetchErrorKind::HttpError { code: 404 });
        assert_eq!(err.attempts, 1);
    }

    #[tokio::test]
    async fn server_errors_are_retried_up_to_bound() {
        let server = MockServer::start().await;
        Mock::given(path("/flaky"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&server)
            .await;

        let err = fetcher(options(2))
            .fetch(&format!("{}/flaky", server.uri()))
            .await
            .unwrap_err();
        assert_eq!(err.kind, FetchErrorKind::HttpError { code: 503 });
        assert_eq!(err.attempts, 3);
    }

    #[tokio::test]
    async fn rate_limited_response_is_retried() {
        let server = MockServer::start().await;
        Mock::given(path("/busy"))
            .respond_with(ResponseTemplate::new(429))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(path("/busy"))
            .respond_with(html(200))
            .expect(1)
            .mount(&server)
            .await;

        let start = std::time::Instant::now();
        let page = fetcher(options(2))
            .fetch(&format!("{}/busy", server.uri()))
            .await
            .unwrap();
        assert_eq!(page.attempts, 2);
        assert!(start.elapsed() >= Duration::from_millis(10));
    }

    #[tokio::test]
    async fn unsupported_content_type_fails_once() {
        let server = MockServer::start().await;
        Mock::given(path("/report.pdf"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(b"%PDF-1.4".to_vec(), "application/pdf"))
            .expect(1)
            .mount(&server)
            .await;

        let err = fetcher(options(2))
            .fetch(&format!("{}/report.pdf", server.uri()))
            .await
            .unwrap_err();
        assert_eq!(err.kind, FetchErrorKind::Unsupported);
        assert_eq!(err.attempts, 1);
    }

    #[tokio::test]
    async fn plain_text_is_accepted() {
        let server = MockServer::start().await;
        Mock::given(path("/notes.txt"))
            .respond_with(ResponseTemplate::new(200).set_body_raw("plain notes", "text/plain"))
            .mount(&server)
            .await;

        let page = fetcher(options(0))
            .fetch(&format!("{}/notes.txt", server.uri()))
            .await
            .unwrap();
        assert_eq!(page.content_type.as_deref(), Some("text/plain"));
    }

    #[tokio::test]
    async fn slow_responses_time_out() {
        let server = MockServer::start().await;
        Mock::given(path("/slow"))
            .respond_with(html(200).set_delay(Duration::from_secs(2)))
            .expect(2)
            .mount(&server)
            .await;

        let mut opts = options(1);
        opts.request_timeout = Duration::from_millis(200);
        let err = fetcher(opts)
            .fetch(&format!("{}/slow", server.uri()))
            .await
            .unwrap_err();
        assert_eq!(err.kind, FetchErrorKind::Timeout);
        assert_eq!(err.attempts, 2);
    }

    #[tokio::test]
    async fn malformed_and_private_urls_are_rejected_up_front() {
        let mut opts = options(2);
        opts.allow_private_hosts = false;
        let fetcher = fetcher(opts);

        let err = fetcher.fetch("not a url").await.unwrap_err();
        assert_eq!(err.kind, FetchErrorKind::Unsupported);
        assert_eq!(err.attempts, 0);

        let err = fetcher.fetch("http://127.0.0.1:9/").await.unwrap_err();
        assert_eq!(err.kind, FetchErrorKind::Unsupported);
        assert_eq!(err.attempts, 0);
    }

    #[tokio::test]
    async fn stopped_fetcher_sends_nothing() {
        let server = MockServer::start().await;
        Mock::given(path("/page"))
            .respond_with(html(200))
            .expect(0)
            .mount(&server)
            .await;

        let stop = CancellationToken::new();
        let fetcher = PageFetcher::new(RateLimiter::unlimited(), options(2), stop.clone()).unwrap();
        stop.cancel();
        let err = fetcher.fetch(&format!("{}/page", server.uri())).await.unwrap_err();
        assert_eq!(err.kind, FetchErrorKind::Aborted);
        assert_eq!(err.attempts, 0);
    }

    #[tokio::test]
    async fn stop_cuts_backoff_short() {
        let server = MockServer::start().await;
        Mock::given(path("/down"))
            .respond_with(ResponseTemplate::new(503))
            .expect(1)
            .mount(&server)
            .await;

        let mut opts = options(3);
        opts.retry.base_delay = Duration::from_secs(30);
        opts.retry.max_delay = Duration::from_secs(30);
        let stop = CancellationToken::new();
        let fetcher = PageFetcher::new(RateLimiter::unlimited(), opts, stop.clone()).unwrap();

        let url = format!("{}/down", server.uri());
        let handle = tokio::spawn(async move { fetcher.fetch(&url).await });
        tokio::time::sleep(Duration::from_millis(200)).await;
        stop.cancel();

        let err = handle.await.unwrap().unwrap_err();
        assert_eq!(err.kind, FetchErrorKind::Aborted);
        assert_eq!(err.attempts, 1);
    }

    #[tokio::test]
    async fn every_attempt_takes_a_fetch_slot() {
        let server = MockServer::start().await;
        Mock::given(path("/flaky"))
            .respond_with(ResponseTemplate::new(500))
            .expect(3)
            .mount(&server)
            .await;

        let limiter = RateLimiter::new(RateSpec::unlimited(), RateSpec::per_second(10));
        let fetcher = PageFetcher::new(limiter, options(2), CancellationToken::new()).unwrap();
        let start = std::time::Instant::now();
        let _ = fetcher.fetch(&format!("{}/flaky", server.uri())).await;
        assert!(start.elapsed() >= Duration::from_millis(180));
    }

    #[test]
    fn parses_retry_after_forms() {
        let mut headers = HeaderMap::new();
        headers.insert(header::RETRY_AFTER, HeaderValue::from_static("12"));
        assert_eq!(retry_after(&headers), Some(Duration::from_secs(12)));

        headers.insert(header::RETRY_AFTER, HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"));
        // A date in the past means no extra wait.
        assert_eq!(retry_after(&headers), None);
    }

    #[test]
    fn media_type_drops_parameters() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("Text/HTML; charset=UTF-8"));
        assert_eq!(media_type(&headers).as_deref(), Some("text/html"));
    }
}
