//! Shared types, error model, configuration, and throttling for topicharvest.
//!
//! This crate is the foundation depended on by all other topicharvest crates.
//! It provides:
//! - [`HarvestError`]: the unified error type
//! - Domain types ([`Topic`], [`UrlRecord`], [`DatasetRecord`], [`PageContent`])
//! - Configuration ([`AppConfig`], [`HarvestConfig`], config loading)
//! - [`RateLimiter`] and the retry/backoff bookkeeping used by search and fetch

pub mod config;
pub mod error;
pub mod rate_limit;
pub mod retry;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, DefaultsConfig, ExtractPolicyConfig, FetchPolicyConfig, HarvestConfig,
    SearchPolicyConfig, config_dir, config_file_path, init_config, load_config, load_config_from,
};
pub use error::{HarvestError, Result};
pub use rate_limit::{RateCategory, RateLimiter, RateSpec};
pub use retry::{RetryPolicy, RetryState};
pub use types::{
    CompletedEntry, DatasetRecord, ErrorEntry, FailureKind, Outcome, PageContent, SeedUrl,
    StatusCounts, Topic, UrlRecord, UrlStatus, normalize_url,
};
