//! URL progress lists.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use topicharvest_shared::{
    CompletedEntry, ErrorEntry, HarvestError, Outcome, Result, StatusCounts, Topic, UrlRecord,
    UrlStatus,
};

use crate::atomic::write_json_atomic;

/// Persistent status of every admitted URL.
///
/// The master list is the only file read back and is rewritten on every
/// transition. The completed and error lists are projections of it, rewritten
/// by [`flush`](Self::flush) and [`flush_views`](Self::flush_views). Records
/// keep their admission order.
#[derive(Debug)]
pub struct ProgressStore {
    dir: PathBuf,
    records: Vec<UrlRecord>,
    index: HashMap<String, usize>,
    views_stale: bool,
}

impl ProgressStore {
    pub const MASTER_FILE: &'static str = "websites_master.json";
    pub const COMPLETED_FILE: &'static str = "websites_completed.json";
    pub const ERRORS_FILE: &'static str = "websites_errors.json";

    /// Load the store rooted at `dir`, creating the directory if needed.
    ///
    /// A missing master list is an empty store. A master list that cannot be
    /// parsed is an error; it is never silently replaced.
    pub fn load(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir).map_err(|e| HarvestError::io(dir, e))?;

        let master = dir.join(Self::MASTER_FILE);
        let loaded: Vec<UrlRecord> = if master.exists() {
            let bytes = std::fs::read(&master).map_err(|e| HarvestError::io(&master, e))?;
            serde_json::from_slice(&bytes).map_err(|e| {
                HarvestError::Storage(format!("corrupt master list {}: {e}", master.display()))
            })?
        } else {
            Vec::new()
        };

        let mut store = Self {
            dir: dir.to_path_buf(),
            records: Vec::with_capacity(loaded.len()),
            index: HashMap::with_capacity(loaded.len()),
            views_stale: false,
        };
        for record in loaded {
            record
                .validate()
                .map_err(|msg| HarvestError::Storage(format!("corrupt master list: {msg}")))?;
            if store.index.contains_key(record.url()) {
                warn!(url = record.url(), "duplicate URL in master list, keeping first");
                continue;
            }
            store.index.insert(record.url().to_string(), store.records.len());
            store.records.push(record);
        }

        let counts = store.counts();
        info!(
            dir = %dir.display(),
            total = counts.total,
            pending = counts.pending,
            completed = counts.completed,
            failed = counts.failed,
            "loaded progress"
        );
        Ok(store)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn master_path(&self) -> PathBuf {
        self.dir.join(Self::MASTER_FILE)
    }

    pub fn completed_path(&self) -> PathBuf {
        self.dir.join(Self::COMPLETED_FILE)
    }

    pub fn errors_path(&self) -> PathBuf {
        self.dir.join(Self::ERRORS_FILE)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn contains(&self, url: &str) -> bool {
        self.index.contains_key(url)
    }

    pub fn get(&self, url: &str) -> Option<&UrlRecord> {
        self.index.get(url).map(|&i| &self.records[i])
    }

    /// All records in admission order.
    pub fn records(&self) -> &[UrlRecord] {
        &self.records
    }

    pub fn pending(&self) -> impl Iterator<Item = &UrlRecord> {
        self.records
            .iter()
            .filter(|r| r.status() == UrlStatus::Pending)
    }

    pub fn completed(&self) -> Vec<CompletedEntry> {
        self.records.iter().filter_map(UrlRecord::completed_entry).collect()
    }

    pub fn failed(&self) -> Vec<ErrorEntry> {
        self.records.iter().filter_map(UrlRecord::error_entry).collect()
    }

    pub fn counts(&self) -> StatusCounts {
        let mut counts = StatusCounts {
            total: self.records.len(),
            ..StatusCounts::default()
        };
        for record in &self.records {
            match record.status() {
                UrlStatus::Pending => counts.pending += 1,
                UrlStatus::Completed => counts.completed += 1,
                UrlStatus::Failed => counts.failed += 1,
            }
        }
        counts
    }

    /// Admit `url` as pending under `topic` and persist it.
    ///
    /// Returns `false` if the URL is already known, whatever its status.
    pub fn admit(&mut self, url: &str, topic: &Topic) -> Result<bool> {
        if self.index.contains_key(url) {
            return Ok(false);
        }
        self.index.insert(url.to_string(), self.records.len());
        self.records.push(UrlRecord::pending(url, topic.clone()));
        debug!(url, topic = %topic, "admitted");
        self.persist()?;
        Ok(true)
    }

    /// Move a pending URL to its terminal state and persist it.
    ///
    /// Returns `Ok(false)` when nothing changed: the record already holds this
    /// outcome, or it is terminal with a different one (terminal records only
    /// change through [`requeue`](Self::requeue)).
    pub fn record_outcome(&mut self, url: &str, outcome: Outcome) -> Result<bool> {
        let record = self.record_mut(url)?;
        if record.matches(&outcome) {
            return Ok(false);
        }
        if record.is_terminal() {
            warn!(url, status = ?record.status(), "ignoring outcome for terminal URL");
            return Ok(false);
        }
        record.apply(outcome);
        self.persist()?;
        Ok(true)
    }

    /// Manual retry: move a failed URL back to pending, keeping its attempts.
    ///
    /// Returns `Ok(false)` if the URL is not failed.
    pub fn requeue(&mut self, url: &str) -> Result<bool> {
        let record = self.record_mut(url)?;
        if !record.requeue() {
            return Ok(false);
        }
        self.persist()?;
        Ok(true)
    }

    /// Whether the completed and error lists lag behind the master.
    pub fn views_stale(&self) -> bool {
        self.views_stale
    }

    /// Write the master list, then the derived views.
    pub fn flush(&mut self) -> Result<()> {
        write_json_atomic(&self.master_path(), &self.records)?;
        self.views_stale = true;
        self.flush_views()
    }

    /// Rewrite the completed and error lists if a transition changed them.
    pub fn flush_views(&mut self) -> Result<()> {
        if !self.views_stale {
            return Ok(());
        }
        write_json_atomic(&self.completed_path(), &self.completed())?;
        write_json_atomic(&self.errors_path(), &self.failed())?;
        self.views_stale = false;
        Ok(())
    }

    fn persist(&mut self) -> Result<()> {
        write_json_atomic(&self.master_path(), &self.records)?;
        self.views_stale = true;
        Ok(())
    }

    fn record_mut(&mut self, url: &str) -> Result<&mut UrlRecord> {
        let &i = self
            .index
            .get(url)
            .ok_or_else(|| HarvestError::validation(format!("unknown URL: {url}")))?;
        Ok(&mut self.records[i])
    }
}

/// Read an error list (such as `websites_errors.json`) for re-feeding.
pub fn read_error_list(path: &Path) -> Result<Vec<ErrorEntry>> {
    let bytes = std::fs::read(path).map_err(|e| HarvestError::io(path, e))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| HarvestError::validation(format!("invalid error list {}: {e}", path.display())))
}
