//! Polite page fetching.
//!
//! This crate provides:
//! - [`PageFetcher`]: rate-limited, retrying HTTP fetch of a single URL
//! - [`FetchError`]: the classified failure of a fetch, with its attempt count
//! - [`is_ssrf_target`]: the private-host guard applied before every request

mod fetcher;
mod guard;

use topicharvest_shared::FailureKind;

pub use fetcher::{FetchOptions, PageFetcher};
pub use guard::{is_private_ip, is_ssrf_target};

/// Classification of a failed fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchErrorKind {
    Timeout,
    ConnectionError,
    HttpError { code: u16 },
    Unsupported,
    Aborted,
}

impl FetchErrorKind {
    /// Whether another attempt may succeed.
    pub fn is_retryable(self) -> bool {
        match self {
            Self::Timeout | Self::ConnectionError => true,
            Self::HttpError { code } => code == 429 || code >= 500,
            Self::Unsupported | Self::Aborted => false,
        }
    }
}

impl From<FetchErrorKind> for FailureKind {
    fn from(kind: FetchErrorKind) -> Self {
        match kind {
            FetchErrorKind::Timeout => FailureKind::Timeout,
            FetchErrorKind::ConnectionError => FailureKind::ConnectionError,
            FetchErrorKind::HttpError { code } => FailureKind::HttpError { code },
            FetchErrorKind::Unsupported => FailureKind::Unsupported,
            FetchErrorKind::Aborted => FailureKind::Aborted,
        }
    }
}

impl std::fmt::Display for FetchErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        FailureKind::from(*self).fmt(f)
    }
}

/// A fetch that ended without a usable response.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind} after {attempts} attempt(s): {message}")]
pub struct FetchError {
    pub kind: FetchErrorKind,
    /// Requests actually sent; 0 when the URL was rejected up front.
    pub attempts: u32,
    pub message: String,
}

impl FetchError {
    pub fn new(kind: FetchErrorKind, attempts: u32, message: impl Into<String>) -> Self {
        Self {
            kind,
            attempts,
            message: message.into(),
        }
    }

    pub fn failure_kind(&self) -> FailureKind {
        self.kind.into()
    }
}
