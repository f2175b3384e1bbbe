//! Lazy topic → URL resolution.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use futures::StreamExt;
use futures::stream::{self, BoxStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use topicharvest_shared::{RateCategory, RateLimiter, RetryPolicy, RetryState, Topic, normalize_url};

use crate::{SearchError, SearchProvider, SeenUrls};

/// Per-topic search limits.
#[derive(Debug, Clone)]
pub struct ResolveOptions {
    /// Distinct candidates examined per topic, including ones already seen.
    pub max_results: usize,
    /// Result pages requested per topic.
    pub max_pages: u32,
    /// Retry policy for transient search failures.
    pub retry: RetryPolicy,
}

/// Resolves topics into streams of new, normalized URLs.
///
/// Cloning shares the provider, the rate limiter and the seen set, so clones
/// can resolve different topics concurrently without handing out a URL twice.
#[derive(Clone)]
pub struct TopicResolver {
    provider: Arc<dyn SearchProvider>,
    limiter: RateLimiter,
    seen: SeenUrls,
    options: ResolveOptions,
    stop: CancellationToken,
}

impl TopicResolver {
    pub fn new(
        provider: Arc<dyn SearchProvider>,
        limiter: RateLimiter,
        seen: SeenUrls,
        options: ResolveOptions,
        stop: CancellationToken,
    ) -> Self {
        Self {
            provider,
            limiter,
            seen,
            options,
            stop,
        }
    }

    pub fn seen(&self) -> &SeenUrls {
        &self.seen
    }

    /// Stream the URLs `topic` contributes.
    ///
    /// Search pages are requested only as the stream is polled. The stream
    /// ends when the per-topic cap is reached, the provider runs dry, a
    /// permanent error occurs, retries run out, or the stop token fires.
    /// URLs already yielded survive a later failure.
    pub fn resolve(&self, topic: &Topic) -> BoxStream<'static, String> {
        let state = ResolveState {
            resolver: self.clone(),
            query: topic.as_str().to_string(),
            page: 0,
            examined: HashSet::new(),
            buffer: VecDeque::new(),
            exhausted: false,
        };
        stream::unfold(state, |mut state| async move {
            let url = state.next_url().await?;
            Some((url, state))
        })
        .boxed()
    }

    /// One result page, retried on transient errors. `None` ends the topic.
    async fn query_page(&self, query: &str, page: u32) -> Option<Vec<String>> {
        let policy = self.options.retry;
        let mut retry = RetryState::new();
        loop {
            if !self.limiter.acquire_or_cancel(RateCategory::Search, &self.stop).await {
                return None;
            }
            let attempt = retry.begin_attempt();
            let err = match self.provider.search_page(query, page).await {
                Ok(urls) => return Some(urls),
                Err(err) => err,
            };

            if !err.is_transient() {
                warn!(topic = query, page, error = %err, "search failed permanently");
                return None;
            }
            if !retry.can_retry(&policy) {
                warn!(topic = query, page, attempts = attempt, error = %err, "search retries exhausted");
                return None;
            }
            let delay = match &err {
                SearchError::RateLimited { retry_after } => policy.rate_limited_backoff(attempt, *retry_after),
                _ => policy.backoff(attempt),
            };
            debug!(topic = query, page, attempt, ?delay, error = %err, "retrying search");
            retry.schedule(delay);
            if !retry.wait(&self.stop).await {
                return None;
            }
        }
    }
}

struct ResolveState {
    resolver: TopicResolver,
    query: String,
    page: u32,
    examined: HashSet<String>,
    buffer: VecDeque<String>,
    exhausted: bool,
}

impl ResolveState {
    async fn next_url(&mut self) -> Option<String> {
        let max_results = self.resolver.options.max_results;
        loop {
            if self.resolver.stop.is_cancelled() {
                return None;
            }
            while let Some(candidate) = self.buffer.pop_front() {
                if self.examined.len() >= max_results {
                    return None;
                }
                let Some(url) = normalize_url(&candidate) else {
                    debug!(candidate, "dropping unusable search result");
                    continue;
                };
                if !self.examined.insert(url.clone()) {
                    continue;
                }
                if self.resolver.seen.claim(&url) {
                    return Some(url);
                }
                debug!(%url, "already seen");
            }

            if self.exhausted
                || self.examined.len() >= max_results
                || self.page >= self.resolver.options.max_pages
            {
                return None;
            }

            match self.resolver.query_page(&self.query, self.page).await {
                Some(urls) if !urls.is_empty() => {
                    self.page += 1;
                    self.buffer.extend(urls);
                }
                _ => {
                    info!(topic = %self.query, pages = self.page, found = self.examined.len(), "topic exhausted");
                    self.exhausted = true;
                }
            }
        }
    }
}
