//! Application configuration for topicharvest.
//!
//! User config lives at `~/.topicharvest/topicharvest.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{HarvestError, Result};
use crate::rate_limit::RateSpec;
use crate::retry::RetryPolicy;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "topicharvest.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".topicharvest";

/// Default search endpoint (DuckDuckGo's HTML interface).
pub const DEFAULT_SEARCH_ENDPOINT: &str = "https://html.duckduckgo.com/html/";

// ---------------------------------------------------------------------------
// Config structs (matching topicharvest.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Global defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Search (discovery) policy.
    #[serde(default)]
    pub search: SearchPolicyConfig,

    /// Page fetch policy.
    #[serde(default)]
    pub fetch: FetchPolicyConfig,

    /// Content extraction policy.
    #[serde(default)]
    pub extract: ExtractPolicyConfig,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Directory holding the progress lists and `dataset.jsonl`.
    #[serde(default = "default_output_dir")]
    pub output_dir: String,

    /// Maximum candidate URLs examined per topic.
    #[serde(default = "default_urls_per_topic")]
    pub urls_per_topic: usize,

    /// Concurrent fetch/extract workers.
    #[serde(default = "default_fetch_concurrency")]
    pub fetch_concurrency: usize,

    /// Topics resolved concurrently.
    #[serde(default = "default_topic_concurrency")]
    pub topic_concurrency: usize,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            urls_per_topic: default_urls_per_topic(),
            fetch_concurrency: default_fetch_concurrency(),
            topic_concurrency: default_topic_concurrency(),
        }
    }
}

fn default_output_dir() -> String {
    "final_dataset".into()
}
fn default_urls_per_topic() -> usize {
    10
}
fn default_fetch_concurrency() -> usize {
    4
}
fn default_topic_concurrency() -> usize {
    2
}

/// `[search]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchPolicyConfig {
    /// Search endpoint URL.
    #[serde(default = "default_search_endpoint")]
    pub endpoint: String,

    /// Search requests per minute (0 disables throttling).
    #[serde(default = "default_search_rate")]
    pub rate_per_minute: u32,

    /// Requests allowed back-to-back before throttling kicks in.
    #[serde(default = "default_burst")]
    pub burst: u32,

    /// Maximum result pages requested per topic.
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,

    /// Retries for a transiently failing search query.
    #[serde(default = "default_retries")]
    pub retries: u32,

    /// Search request timeout in seconds.
    #[serde(default = "default_search_timeout")]
    pub timeout_secs: u64,
}

impl Default for SearchPolicyConfig {
    fn default() -> Self {
        Self {
            endpoint: default_search_endpoint(),
            rate_per_minute: default_search_rate(),
            burst: default_burst(),
            max_pages: default_max_pages(),
            retries: default_retries(),
            timeout_secs: default_search_timeout(),
        }
    }
}

fn default_search_endpoint() -> String {
    DEFAULT_SEARCH_ENDPOINT.into()
}
fn default_search_rate() -> u32 {
    30
}
fn default_burst() -> u32 {
    1
}
fn default_max_pages() -> u32 {
    5
}
fn default_retries() -> u32 {
    2
}
fn default_search_timeout() -> u64 {
    10
}

/// `[fetch]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchPolicyConfig {
    /// Page requests per minute across all workers (0 disables throttling).
    #[serde(default = "default_fetch_rate")]
    pub rate_per_minute: u32,

    /// Requests allowed back-to-back before throttling kicks in.
    #[serde(default = "default_burst")]
    pub burst: u32,

    /// Per-request timeout in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Retries after a transient failure (timeout, 5xx, connection error, 429).
    #[serde(default = "default_retries")]
    pub max_retries: u32,

    /// First backoff delay in ms; doubles on every retry.
    #[serde(default = "default_backoff_base")]
    pub backoff_base_ms: u64,

    /// Upper bound for any backoff delay in ms.
    #[serde(default = "default_backoff_max")]
    pub backoff_max_ms: u64,

    /// Minimum delay in ms after the remote answered 429.
    #[serde(default = "default_rate_limited_backoff")]
    pub rate_limited_backoff_ms: u64,

    /// Permit loopback/private hosts (local testing only).
    #[serde(default)]
    pub allow_private_hosts: bool,
}

impl Default for FetchPolicyConfig {
    fn default() -> Self {
        Self {
            rate_per_minute: default_fetch_rate(),
            burst: default_burst(),
            request_timeout_secs: default_request_timeout(),
            max_retries: default_retries(),
            backoff_base_ms: default_backoff_base(),
            backoff_max_ms: default_backoff_max(),
            rate_limited_backoff_ms: default_rate_limited_backoff(),
            allow_private_hosts: false,
        }
    }
}

fn default_fetch_rate() -> u32 {
    120
}
fn default_request_timeout() -> u64 {
    30
}
fn default_backoff_base() -> u64 {
    500
}
fn default_backoff_max() -> u64 {
    30_000
}
fn default_rate_limited_backoff() -> u64 {
    10_000
}

/// `[extract]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractPolicyConfig {
    /// Pages whose extracted text is shorter than this (in chars) are rejected.
    #[serde(default = "default_min_text_chars")]
    pub min_text_chars: usize,
}

impl Default for ExtractPolicyConfig {
    fn default() -> Self {
        Self {
            min_text_chars: default_min_text_chars(),
        }
    }
}

fn default_min_text_chars() -> usize {
    50
}

// ---------------------------------------------------------------------------
// Harvest config (runtime, merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime harvest configuration, merged from the config file and CLI flags.
#[derive(Debug, Clone)]
pub struct HarvestConfig {
    /// Directory for progress lists and the dataset.
    pub output_dir: PathBuf,
    /// Maximum candidate URLs examined per topic.
    pub urls_per_topic: usize,
    /// Maximum search result pages per topic.
    pub max_search_pages: u32,
    /// Search endpoint URL.
    pub search_endpoint: String,
    /// Search request timeout.
    pub search_timeout: Duration,
    /// Search throttle.
    pub search_rate: RateSpec,
    /// Retries for transient search failures.
    pub search_retries: u32,
    /// Fetch throttle.
    pub fetch_rate: RateSpec,
    /// Concurrent fetch/extract workers.
    pub fetch_concurrency: usize,
    /// Topics resolved concurrently.
    pub topic_concurrency: usize,
    /// Per-request fetch timeout.
    pub request_timeout: Duration,
    /// Retries for transient fetch failures.
    pub max_retries: u32,
    /// First backoff delay.
    pub backoff_base: Duration,
    /// Backoff ceiling.
    pub backoff_max: Duration,
    /// Minimum delay after a 429.
    pub rate_limited_backoff: Duration,
    /// Minimum extracted text length in chars.
    pub min_text_chars: usize,
    /// Permit loopback/private hosts.
    pub allow_private_hosts: bool,
}

impl From<&AppConfig> for HarvestConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            output_dir: PathBuf::from(&config.defaults.output_dir),
            urls_per_topic: config.defaults.urls_per_topic,
            max_search_pages: config.search.max_pages,
            search_endpoint: config.search.endpoint.clone(),
            search_timeout: Duration::from_secs(config.search.timeout_secs),
            search_rate: RateSpec {
                per_minute: config.search.rate_per_minute,
                burst: config.search.burst,
            },
            search_retries: config.search.retries,
            fetch_rate: RateSpec {
                per_minute: config.fetch.rate_per_minute,
                burst: config.fetch.burst,
            },
            fetch_concurrency: config.defaults.fetch_concurrency,
            topic_concurrency: config.defaults.topic_concurrency,
            request_timeout: Duration::from_secs(config.fetch.request_timeout_secs),
            max_retries: config.fetch.max_retries,
            backoff_base: Duration::from_millis(config.fetch.backoff_base_ms),
            backoff_max: Duration::from_millis(config.fetch.backoff_max_ms),
            rate_limited_backoff: Duration::from_millis(config.fetch.rate_limited_backoff_ms),
            min_text_chars: config.extract.min_text_chars,
            allow_private_hosts: config.fetch.allow_private_hosts,
        }
    }
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl HarvestConfig {
    /// Reject settings the orchestrator cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.fetch_concurrency == 0 {
            return Err(HarvestError::config("fetch_concurrency must be at least 1"));
        }
        if self.topic_concurrency == 0 {
            return Err(HarvestError::config("topic_concurrency must be at least 1"));
        }
        if self.request_timeout.is_zero() {
            return Err(HarvestError::config("request timeout must be non-zero"));
        }
        Ok(())
    }

    /// Retry policy applied to page fetches.
    pub fn fetch_retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: self.backoff_base,
            max_delay: self.backoff_max,
            rate_limited_delay: self.rate_limited_backoff,
        }
    }

    /// Retry policy applied to search queries (same delays, own bound).
    pub fn search_retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.search_retries,
            ..self.fetch_retry_policy()
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.topicharvest/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| HarvestError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.topicharvest/topicharvest.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| HarvestError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| HarvestError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| HarvestError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| HarvestError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| HarvestError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}
