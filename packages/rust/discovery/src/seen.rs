//! Run-wide set of URLs that have already been handed out.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

/// Shared "seen URL" set.
///
/// [`claim`](Self::claim) checks and inserts under one short lock, so when two
/// topics find the same URL exactly one of them gets it. The lock is never held
/// across an await.
#[derive(Debug, Clone, Default)]
pub struct SeenUrls {
    inner: Arc<Mutex<HashSet<String>>>,
}

impl SeenUrls {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `url`; returns `true` if this call was the first to see it.
    pub fn claim(&self, url: &str) -> bool {
        let mut set = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        set.insert(url.to_string())
    }

    pub fn contains(&self, url: &str) -> bool {
        let set = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        set.contains(url)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl FromIterator<String> for SeenUrls {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        Self {
            inner: Arc::new(Mutex::new(iter.into_iter().collect())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claim_is_first_wins() {
        let seen = SeenUrls::new();
        assert!(seen.claim("https://example.com/a"));
        assert!(!seen.claim("https://example.com/a"));
        assert_eq!(seen.len(), 1);
    }

    #[test]
    fn clones_share_state() {
        let seen: SeenUrls = vec!["https://example.com/old".to_string()]
            .into_iter()
            .collect();
        let other = seen.clone();
        assert!(!other.claim("https://example.com/old"));
        assert!(other.claim("https://example.com/new"));
        assert!(seen.contains("https://example.com/new"));
    }

    #[test]
    fn concurrent_claims_hand_out_once() {
        let seen = SeenUrls::new();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let seen = seen.clone();
                std::thread::spawn(move || {
                    (0..100)
                        .filter(|i| seen.claim(&format!("https://example.com/{i}")))
                        .count()
                })
            })
            .collect();
        let total: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(total, 100);
    }
}
