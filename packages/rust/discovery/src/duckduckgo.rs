//! DuckDuckGo HTML endpoint search provider.

use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use scraper::{Html, Selector};
use tracing::{debug, instrument};
use url::Url;

use topicharvest_shared::{HarvestError, Result};

use crate::{SearchError, SearchProvider};

/// User-Agent string for search requests.
const USER_AGENT: &str = concat!("topicharvest/", env!("CARGO_PKG_VERSION"));

/// Result offset step between pages of the HTML endpoint.
const PAGE_OFFSET: u32 = 30;

static RESULT_LINK: LazyLock<Option<Selector>> =
    LazyLock::new(|| Selector::parse("a.result__a").ok());

/// Searches the DuckDuckGo HTML (no-JS) endpoint.
///
/// Result links are wrapped in a `/l/?uddg=<target>` redirect; the target is
/// unwrapped and sponsored links (which carry no target) are dropped.
pub struct DuckDuckGoProvider {
    client: Client,
    endpoint: String,
}

impl DuckDuckGoProvider {
    /// Create a provider posting queries to `endpoint`.
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| HarvestError::Network(format!("failed to build search client: {e}")))?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl SearchProvider for DuckDuckGoProvider {
    #[instrument(skip(self), fields(provider = "duckduckgo"))]
    async fn search_page(&self, query: &str, page: u32) -> std::result::Result<Vec<String>, SearchError> {
        if query.trim().is_empty() {
            return Err(SearchError::InvalidQuery {
                reason: "query is empty".into(),
            });
        }

        let offset = page.saturating_mul(PAGE_OFFSET).to_string();
        let response = self
            .client
            .post(&self.endpoint)
            .form(&[("q", query), ("s", offset.as_str()), ("kl", "us-en")])
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        // 202 is the endpoint's bot-challenge page.
        if status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::ACCEPTED {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(SearchError::RateLimited { retry_after });
        }
        if !status.is_success() {
            return Err(SearchError::Api {
                status: status.as_u16(),
            });
        }

        let body = response.text().await.map_err(classify_transport)?;
        let urls = parse_results(&body);
        debug!(count = urls.len(), "parsed search results");
        Ok(urls)
    }

    fn name(&self) -> &'static str {
        "duckduckgo"
    }
}

fn classify_transport(e: reqwest::Error) -> SearchError {
    if e.is_timeout() {
        SearchError::Timeout
    } else {
        SearchError::Network(e.to_string())
    }
}

/// Extract result target URLs from a results page, in page order.
fn parse_results(html: &str) -> Vec<String> {
    let Some(selector) = RESULT_LINK.as_ref() else {
        return Vec::new();
    };
    let doc = Html::parse_document(html);
    doc.select(selector)
        .filter_map(|a| a.value().attr("href"))
        .filter_map(resolve_result_link)
        .collect()
}

fn resolve_result_link(href: &str) -> Option<String> {
    let base = Url::parse("https://duckduckgo.com/").ok()?;
    let url = base.join(href.trim()).ok()?;
    let is_wrapper = url
        .host_str()
        .is_some_and(|h| h == "duckduckgo.com" || h.ends_with(".duckduckgo.com"));
    if is_wrapper {
        return url
            .query_pairs()
            .find(|(k, _)| k == "uddg")
            .map(|(_, v)| v.into_owned());
    }
    Some(url.to_string())
}
