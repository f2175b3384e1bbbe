//! Request throttling shared by every search and fetch worker.
//!
//! Each [`RateCategory`] gets its own GCRA limiter, so search and fetch spend
//! independent budgets. Cloning a [`RateLimiter`] shares the underlying state.

use std::num::NonZeroU32;
use std::sync::Arc;

use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter as GovRateLimiter};
use tokio_util::sync::CancellationToken;

type DirectLimiter = GovRateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Which budget a request is charged against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateCategory {
    Search,
    Fetch,
}

/// Requests per minute plus how many may be issued back-to-back.
///
/// With `burst = 1`, no sliding one-second window ever holds more than
/// `per_minute / 60` requests. `per_minute = 0` disables throttling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateSpec {
    pub per_minute: u32,
    pub burst: u32,
}

impl RateSpec {
    pub fn per_second(rate: u32) -> Self {
        Self {
            per_minute: rate.saturating_mul(60),
            burst: 1,
        }
    }

    pub fn unlimited() -> Self {
        Self {
            per_minute: 0,
            burst: 1,
        }
    }
}

/// Shared throttle for outbound requests.
#[derive(Clone)]
pub struct RateLimiter {
    search: Option<Arc<DirectLimiter>>,
    fetch: Option<Arc<DirectLimiter>>,
    search_spec: RateSpec,
    fetch_spec: RateSpec,
}

impl RateLimiter {
    /// Build a limiter; rates are fixed for its lifetime.
    pub fn new(search: RateSpec, fetch: RateSpec) -> Self {
        Self {
            search: build_limiter(search),
            fetch: build_limiter(fetch),
            search_spec: search,
            fetch_spec: fetch,
        }
    }

    /// A limiter that never waits.
    pub fn unlimited() -> Self {
        Self::new(RateSpec::unlimited(), RateSpec::unlimited())
    }

    pub fn spec(&self, category: RateCategory) -> RateSpec {
        match category {
            RateCategory::Search => self.search_spec,
            RateCategory::Fetch => self.fetch_spec,
        }
    }

    /// Wait until a request slot is available for `category`.
    pub async fn acquire(&self, category: RateCategory) {
        if let Some(limiter) = self.limiter(category) {
            limiter.until_ready().await;
        }
    }

    /// Like [`acquire`](Self::acquire), but gives up when `stop` fires.
    ///
    /// Returns `true` when a slot was taken.
    pub async fn acquire_or_cancel(&self, category: RateCategory, stop: &CancellationToken) -> bool {
        if stop.is_cancelled() {
            return false;
        }
        tokio::select! {
            biased;
            _ = stop.cancelled() => false,
            _ = self.acquire(category) => true,
        }
    }

    fn limiter(&self, category: RateCategory) -> Option<&DirectLimiter> {
        match category {
            RateCategory::Search => self.search.as_deref(),
            RateCategory::Fetch => self.fetch.as_deref(),
        }
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("search", &self.search_spec)
            .field("fetch", &self.fetch_spec)
            .finish()
    }
}

fn build_limiter(spec: RateSpec) -> Option<Arc<DirectLimiter>> {
    let per_minute = NonZeroU32::new(spec.per_minute)?;
    let burst = NonZeroU32::new(spec.burst).unwrap_or(NonZeroU32::MIN);
    let quota = Quota::per_minute(per_minute).allow_burst(burst);
    Some(Arc::new(GovRateLimiter::direct(quota)))
}
