//! Topic discovery: turning a topic into a deduplicated stream of candidate URLs.
//!
//! The [`TopicResolver`] pages through a [`SearchProvider`] under the shared
//! search rate limit and filters every candidate through [`SeenUrls`], so a URL
//! is handed out once across all topics and across runs.

mod duckduckgo;
mod resolver;
mod seen;

use std::time::Duration;

use async_trait::async_trait;

pub use duckduckgo::DuckDuckGoProvider;
pub use resolver::{ResolveOptions, TopicResolver};
pub use seen::SeenUrls;

// ---------------------------------------------------------------------------
// SearchError
// ---------------------------------------------------------------------------

/// Failure of a single search query.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SearchError {
    /// The provider throttled us.
    #[error("rate limited by search provider")]
    RateLimited { retry_after: Option<Duration> },

    /// Connection-level failure.
    #[error("search network error: {0}")]
    Network(String),

    /// The query did not answer in time.
    #[error("search request timed out")]
    Timeout,

    /// Non-success HTTP status from the provider.
    #[error("search provider returned HTTP {status}")]
    Api { status: u16 },

    /// The provider rejected the query itself.
    #[error("invalid query: {reason}")]
    InvalidQuery { reason: String },
}

impl SearchError {
    /// Whether retrying the same query may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::RateLimited { .. } | Self::Network(_) | Self::Timeout => true,
            Self::Api { status } => *status >= 500,
            Self::InvalidQuery { .. } => false,
        }
    }
}

// ---------------------------------------------------------------------------
// SearchProvider
// ---------------------------------------------------------------------------

/// A web search backend returning candidate URLs one result page at a time.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// Fetch result page `page` (0-based) for `query`.
    ///
    /// An empty page means the provider has nothing more for this query.
    async fn search_page(&self, query: &str, page: u32) -> Result<Vec<String>, SearchError>;

    /// Provider name for tracing.
    fn name(&self) -> &'static str;
}
