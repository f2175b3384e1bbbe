//! Core domain types for topic harvesting.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{HarvestError, Result};

// ---------------------------------------------------------------------------
// Topic
// ---------------------------------------------------------------------------

/// A search seed used to discover candidate pages. Always trimmed and non-blank.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Topic(String);

impl Topic {
    /// Create a topic, rejecting blank labels.
    pub fn new(label: impl AsRef<str>) -> Result<Self> {
        let trimmed = label.as_ref().trim();
        if trimmed.is_empty() {
            return Err(HarvestError::validation("topic must not be blank"));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for Topic {
    type Err = HarvestError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::new(s)
    }
}

// ---------------------------------------------------------------------------
// URL normalization
// ---------------------------------------------------------------------------

/// Normalize a candidate URL for deduplication.
///
/// Only absolute http(s) URLs with a host survive. The fragment is dropped and a
/// trailing slash is removed from non-root paths without a query.
pub fn normalize_url(raw: &str) -> Option<String> {
    let mut url = Url::parse(raw.trim()).ok()?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return None;
    }
    url.host_str()?;
    url.set_fragment(None);

    let mut s = url.to_string();
    if url.path() != "/" && url.query().is_none() && s.ends_with('/') {
        s.pop();
    }
    Some(s)
}

// ---------------------------------------------------------------------------
// Status and failure classification
// ---------------------------------------------------------------------------

/// Lifecycle status of an admitted URL. `Completed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UrlStatus {
    Pending,
    Completed,
    Failed,
}

impl UrlStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// Why a URL ended up `Failed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureKind {
    /// The request timed out on every permitted attempt.
    Timeout,
    /// Connect/reset/body-read failure on every permitted attempt.
    ConnectionError,
    /// Non-success HTTP status.
    HttpError { code: u16 },
    /// Malformed URL, blocked host, or a content type we cannot extract.
    Unsupported,
    /// The run was stopped while this fetch was waiting.
    Aborted,
    /// Extracted text fell below the minimum length.
    TooShort,
    /// The body could not be turned into text at all.
    Malformed,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timeout => f.write_str("timeout"),
            Self::ConnectionError => f.write_str("connection_error"),
            Self::HttpError { code } => write!(f, "http_error({code})"),
            Self::Unsupported => f.write_str("unsupported"),
            Self::Aborted => f.write_str("aborted"),
            Self::TooShort => f.write_str("too_short"),
            Self::Malformed => f.write_str("malformed"),
        }
    }
}

/// Terminal result of harvesting one URL, applied by the single writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Completed {
        /// Zero-based line of the record in the dataset sink.
        dataset_line: u64,
        attempts: u32,
    },
    Failed {
        failure: FailureKind,
        message: String,
        attempts: u32,
    },
}

// ---------------------------------------------------------------------------
// UrlRecord
// ---------------------------------------------------------------------------

/// One entry of the master URL list.
///
/// Fields are private so that the status invariants hold:
/// `Failed` always carries an error and classification, `Completed` never does
/// and always points at its dataset line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UrlRecord {
    url: String,
    topic: Topic,
    status: UrlStatus,
    #[serde(default)]
    attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    failure: Option<FailureKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    dataset_line: Option<u64>,
    discovered_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    updated_at: Option<DateTime<Utc>>,
}

impl UrlRecord {
    /// A freshly admitted URL.
    pub fn pending(url: impl Into<String>, topic: Topic) -> Self {
        Self {
            url: url.into(),
            topic,
            status: UrlStatus::Pending,
            attempts: 0,
            last_error: None,
            failure: None,
            dataset_line: None,
            discovered_at: Utc::now(),
            updated_at: None,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    pub fn status(&self) -> UrlStatus {
        self.status
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn failure(&self) -> Option<&FailureKind> {
        self.failure.as_ref()
    }

    pub fn dataset_line(&self) -> Option<u64> {
        self.dataset_line
    }

    pub fn discovered_at(&self) -> DateTime<Utc> {
        self.discovered_at
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Whether `outcome` is the terminal state this record is already in.
    pub fn matches(&self, outcome: &Outcome) -> bool {
        match (self.status, outcome) {
            (UrlStatus::Completed, Outcome::Completed { dataset_line, .. }) => {
                self.dataset_line == Some(*dataset_line)
            }
            (UrlStatus::Failed, Outcome::Failed { failure, .. }) => {
                self.failure.as_ref() == Some(failure)
            }
            _ => false,
        }
    }

    /// Move a pending record to its terminal state. Returns `false` (and changes
    /// nothing) when the record is already terminal.
    pub fn apply(&mut self, outcome: Outcome) -> bool {
        if self.is_terminal() {
            return false;
        }
        match outcome {
            Outcome::Completed {
                dataset_line,
                attempts,
            } => {
                self.status = UrlStatus::Completed;
                self.attempts = self.attempts.saturating_add(attempts);
                self.dataset_line = Some(dataset_line);
                self.last_error = None;
                self.failure = None;
            }
            Outcome::Failed {
                failure,
                message,
                attempts,
            } => {
                self.status = UrlStatus::Failed;
                self.attempts = self.attempts.saturating_add(attempts);
                self.last_error = Some(message);
                self.failure = Some(failure);
                self.dataset_line = None;
            }
        }
        self.updated_at = Some(Utc::now());
        true
    }

    /// Manual retry: move a failed record back to pending.
    ///
    /// The attempt count is kept so the error history stays visible.
    pub fn requeue(&mut self) -> bool {
        if self.status != UrlStatus::Failed {
            return false;
        }
        self.status = UrlStatus::Pending;
        self.last_error = None;
        self.failure = None;
        self.updated_at = Some(Utc::now());
        true
    }

    /// Check the status invariants of a record read back from disk.
    pub fn validate(&self) -> std::result::Result<(), String> {
        match self.status {
            UrlStatus::Pending if self.dataset_line.is_some() => {
                Err(format!("{}: pending record has a dataset line", self.url))
            }
            UrlStatus::Completed if self.last_error.is_some() || self.failure.is_some() => {
                Err(format!("{}: completed record carries an error", self.url))
            }
            UrlStatus::Completed if self.dataset_line.is_none() => {
                Err(format!("{}: completed record has no dataset line", self.url))
            }
            UrlStatus::Failed if self.last_error.is_none() || self.failure.is_none() => {
                Err(format!("{}: failed record has no error", self.url))
            }
            _ => Ok(()),
        }
    }

    /// Boundary view for the completed list.
    pub fn completed_entry(&self) -> Option<CompletedEntry> {
        match (self.status, self.dataset_line) {
            (UrlStatus::Completed, Some(dataset_line)) => Some(CompletedEntry {
                url: self.url.clone(),
                topic: self.topic.clone(),
                dataset_line,
                attempts: self.attempts,
            }),
            _ => None,
        }
    }

    /// Boundary view for the error list.
    pub fn error_entry(&self) -> Option<ErrorEntry> {
        match (self.status, &self.failure) {
            (UrlStatus::Failed, Some(failure)) => Some(ErrorEntry {
                url: self.url.clone(),
                topic: self.topic.clone(),
                error_classification: failure.clone(),
                message: self.last_error.clone().unwrap_or_default(),
                attempts: self.attempts,
            }),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Boundary views
// ---------------------------------------------------------------------------

/// An entry of `websites_completed.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedEntry {
    pub url: String,
    pub topic: Topic,
    /// Zero-based line in `dataset.jsonl` holding this URL's record.
    pub dataset_line: u64,
    pub attempts: u32,
}

/// An entry of `websites_errors.json`, shaped to be fed back as retry input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEntry {
    pub url: String,
    pub topic: Topic,
    pub error_classification: FailureKind,
    pub message: String,
    pub attempts: u32,
}

/// A URL supplied directly as input instead of through search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedUrl {
    pub url: String,
    pub topic: Topic,
}

impl From<ErrorEntry> for SeedUrl {
    fn from(entry: ErrorEntry) -> Self {
        Self {
            url: entry.url,
            topic: entry.topic,
        }
    }
}

/// Counts of URLs per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub total: usize,
    pub pending: usize,
    pub completed: usize,
    pub failed: usize,
}

// ---------------------------------------------------------------------------
// Page content and dataset records
// ---------------------------------------------------------------------------

/// A fetched page. Owned by a worker and dropped after extraction.
#[derive(Debug, Clone)]
pub struct PageContent {
    pub url: String,
    /// Decoded response body.
    pub body: String,
    pub http_status: u16,
    /// Media type from the `Content-Type` header, lowercased, without parameters.
    pub content_type: Option<String>,
    pub fetched_at: DateTime<Utc>,
    /// Number of requests it took to get this response.
    pub attempts: u32,
}

/// One line of `dataset.jsonl`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetRecord {
    pub url: String,
    pub topic: Topic,
    pub text: String,
    pub extracted_at: DateTime<Utc>,
    /// Document `<title>`, when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topic(s: &str) -> Topic {
        Topic::new(s).unwrap()
    }

    #[test]
    fn topic_is_trimmed_and_non_blank() {
        assert_eq!(topic("  rust async  ").as_str(), "rust async");
        assert!(Topic::new("   ").is_err());
        assert!("".parse::<Topic>().is_err());
    }

    #[test]
    fn normalize_strips_fragment_and_trailing_slash() {
        assert_eq!(
            normalize_url("https://example.com/guide/#intro").as_deref(),
            Some("https://example.com/guide")
        );
        assert_eq!(
            normalize_url("https://example.com").as_deref(),
            Some("https://example.com/")
        );
        assert_eq!(
            normalize_url("https://example.com/a/?q=1").as_deref(),
            Some("https://example.com/a/?q=1")
        );
    }

    #[test]
    fn normalize_rejects_non_http() {
        assert!(normalize_url("ftp://example.com/file").is_none());
        assert!(normalize_url("mailto:someone@example.com").is_none());
        assert!(normalize_url("/relative/path").is_none());
    }

    #[test]
    fn completed_clears_error_and_sets_line() {
        let mut record = UrlRecord::pending("https://example.com/a", topic("a"));
        assert!(record.apply(Outcome::Completed {
            dataset_line: 4,
            attempts: 2,
        }));
        assert_eq!(record.status(), UrlStatus::Completed);
        assert_eq!(record.dataset_line(), Some(4));
        assert_eq!(record.attempts(), 2);
        assert!(record.last_error().is_none());
        assert!(record.validate().is_ok());
    }

    #[test]
    fn terminal_records_do_not_transition() {
        let mut record = UrlRecord::pending("https://example.com/a", topic("a"));
        let failed = Outcome::Failed {
            failure: FailureKind::HttpError { code: 404 },
            message: "HTTP 404".into(),
            attempts: 1,
        };
        assert!(record.apply(failed.clone()));
        assert!(record.matches(&failed));
        assert!(!record.apply(failed));
        assert!(!record.apply(Outcome::Completed {
            dataset_line: 0,
            attempts: 1,
        }));
        assert_eq!(record.status(), UrlStatus::Failed);
        assert_eq!(record.attempts(), 1);
        assert_eq!(record.last_error(), Some("HTTP 404"));
    }

    #[test]
    fn requeue_only_from_failed() {
        let mut record = UrlRecord::pending("https://example.com/a", topic("a"));
        assert!(!record.requeue());
        record.apply(Outcome::Failed {
            failure: FailureKind::Timeout,
            message: "timed out".into(),
            attempts: 3,
        });
        assert!(record.requeue());
        assert_eq!(record.status(), UrlStatus::Pending);
        assert_eq!(record.attempts(), 3);
        assert!(record.validate().is_ok());
    }

    #[test]
    fn validate_catches_inconsistent_snapshot() {
        let json = r#"{
            "url": "https://example.com/a",
            "topic": "a",
            "status": "failed",
            "attempts": 1,
            "discovered_at": "2025-01-01T00:00:00Z"
        }"#;
        let record: UrlRecord = serde_json::from_str(json).expect("deserialize");
        assert!(record.validate().is_err());
    }

    #[test]
    fn failure_kind_serialization() {
        let json = serde_json::to_string(&FailureKind::HttpError { code: 503 }).unwrap();
        assert_eq!(json, r#"{"kind":"http_error","code":503}"#);
        let parsed: FailureKind = serde_json::from_str(r#"{"kind":"too_short"}"#).unwrap();
        assert_eq!(parsed, FailureKind::TooShort);
    }

    #[test]
    fn error_entry_feeds_back_as_seed() {
        let mut record = UrlRecord::pending("https://example.com/a", topic("rust"));
        record.apply(Outcome::Failed {
            failure: FailureKind::ConnectionError,
            message: "connection reset".into(),
            attempts: 3,
        });
        let entry = record.error_entry().expect("failed record has an error entry");
        assert_eq!(entry.error_classification, FailureKind::ConnectionError);
        let seed = SeedUrl::from(entry);
        assert_eq!(seed.url, "https://example.com/a");
        assert_eq!(seed.topic.as_str(), "rust");
    }

    #[test]
    fn dataset_record_schema() {
        let record = DatasetRecord {
            url: "https://example.com/a".into(),
            topic: topic("rust"),
            text: "Some extracted text".into(),
            extracted_at: Utc::now(),
            title: None,
        };
        let value: serde_json::Value = serde_json::to_value(&record).unwrap();
        let obj = value.as_object().unwrap();
        assert!(obj.contains_key("url"));
        assert!(obj.contains_key("topic"));
        assert!(obj.contains_key("text"));
        assert!(obj.contains_key("extracted_at"));
        assert!(!obj.contains_key("title"));
    }
}
