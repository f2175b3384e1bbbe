//! Bounded retry bookkeeping.
//!
//! Retries are explicit state (attempt count + next eligible instant) that the
//! caller checks cooperatively. Waiting is a timer sleep raced against the stop
//! token, never a blocked thread.

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Retry bound and backoff delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt; total attempts are `max_retries + 1`.
    pub max_retries: u32,
    /// Delay before the first retry; doubles for each further retry.
    pub base_delay: Duration,
    /// Ceiling for exponential backoff.
    pub max_delay: Duration,
    /// Minimum delay after the remote signalled rate limiting.
    pub rate_limited_delay: Duration,
}

impl RetryPolicy {
    /// No retries, no delays.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            rate_limited_delay: Duration::ZERO,
        }
    }

    /// Exponential delay before retry number `retry` (1-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        let shift = retry.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << shift)
            .min(self.max_delay)
    }

    /// Delay after a rate-limited response; honours the server's hint if larger.
    pub fn rate_limited_backoff(&self, retry: u32, hint: Option<Duration>) -> Duration {
        let floor = self.rate_limited_delay.max(self.backoff(retry));
        match hint {
            Some(hint) => hint.min(self.max_delay.max(self.rate_limited_delay)).max(floor),
            None => floor,
        }
    }
}

/// Attempt counter plus the instant the next attempt becomes eligible.
#[derive(Debug, Clone, Default)]
pub struct RetryState {
    attempts: u32,
    next_eligible: Option<Instant>,
}

impl RetryState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Record the start of an attempt and return its 1-based number.
    pub fn begin_attempt(&mut self) -> u32 {
        self.attempts += 1;
        self.next_eligible = None;
        self.attempts
    }

    /// Whether another attempt is allowed under `policy`.
    pub fn can_retry(&self, policy: &RetryPolicy) -> bool {
        self.attempts <= policy.max_retries
    }

    /// Mark the next attempt as eligible `delay` from now.
    pub fn schedule(&mut self, delay: Duration) -> Instant {
        let at = Instant::now() + delay;
        self.next_eligible = Some(at);
        at
    }

    pub fn next_eligible(&self) -> Option<Instant> {
        self.next_eligible
    }

    /// Sleep until the scheduled instant. Returns `false` if `stop` fired first.
    pub async fn wait(&self, stop: &CancellationToken) -> bool {
        let Some(at) = self.next_eligible else {
            return !stop.is_cancelled();
        };
        tokio::select! {
            biased;
            _ = stop.cancelled() => false,
            _ = tokio::time::sleep_until(at) => true,
        }
    }
}
