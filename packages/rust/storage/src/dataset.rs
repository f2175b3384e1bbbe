//! Append-only JSONL dataset sink.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use topicharvest_shared::{DatasetRecord, HarvestError, Result};

/// Writer for `dataset.jsonl`.
///
/// Each accepted record becomes one line, fsynced before [`append`](Self::append)
/// returns. Lines are numbered from zero in file order and never rewritten.
#[derive(Debug)]
pub struct DatasetSink {
    path: PathBuf,
    file: File,
    index: HashMap<String, u64>,
    lines: u64,
}

impl DatasetSink {
    pub const FILE_NAME: &'static str = "dataset.jsonl";

    /// Open (or create) the dataset at `path` and index what is already there.
    ///
    /// A trailing line without its newline was torn by a crash and is cut off.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| HarvestError::io(parent, e))?;
        }

        let mut index = HashMap::new();
        let mut lines = 0u64;
        let mut valid_len = 0u64;

        if path.exists() {
            let mut reader =
                BufReader::new(File::open(path).map_err(|e| HarvestError::io(path, e))?);
            let mut buf = Vec::new();
            loop {
                buf.clear();
                let n = reader
                    .read_until(b'\n', &mut buf)
                    .map_err(|e| HarvestError::io(path, e))?;
                if n == 0 {
                    break;
                }
                if buf.last() != Some(&b'\n') {
                    warn!(path = %path.display(), bytes = n, "truncating torn dataset line");
                    break;
                }
                match serde_json::from_slice::<DatasetRecord>(&buf) {
                    Ok(record) => {
                        index.entry(record.url).or_insert(lines);
                    }
                    Err(e) => warn!(line = lines, error = %e, "unreadable dataset line"),
                }
                lines += 1;
                valid_len += n as u64;
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| HarvestError::io(path, e))?;
        let on_disk = file.metadata().map_err(|e| HarvestError::io(path, e))?.len();
        if on_disk > valid_len {
            file.set_len(valid_len).map_err(|e| HarvestError::io(path, e))?;
            file.sync_all().map_err(|e| HarvestError::io(path, e))?;
        }

        debug!(path = %path.display(), lines, "opened dataset");
        Ok(Self {
            path: path.to_path_buf(),
            file,
            index,
            lines,
        })
    }

    /// Append `record` and return its line number.
    ///
    /// A URL already in the dataset is not written again; its existing line is
    /// returned instead.
    pub fn append(&mut self, record: &DatasetRecord) -> Result<u64> {
        if let Some(&line) = self.index.get(&record.url) {
            debug!(url = %record.url, line, "record already in dataset");
            return Ok(line);
        }

        let mut buf = serde_json::to_vec(record)
            .map_err(|e| HarvestError::Storage(format!("failed to serialize dataset record: {e}")))?;
        buf.push(b'\n');
        self.file
            .write_all(&buf)
            .map_err(|e| HarvestError::io(&self.path, e))?;
        self.file
            .sync_data()
            .map_err(|e| HarvestError::io(&self.path, e))?;

        let line = self.lines;
        self.lines += 1;
        self.index.insert(record.url.clone(), line);
        Ok(line)
    }

    /// Line holding `url`'s record, if it was written.
    pub fn line_of(&self, url: &str) -> Option<u64> {
        self.index.get(url).copied()
    }

    pub fn len(&self) -> u64 {
        self.lines
    }

    pub fn is_empty(&self) -> bool {
        self.lines == 0
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn flush(&mut self) -> Result<()> {
        self.file.flush().map_err(|e| HarvestError::io(&self.path, e))?;
        self.file.sync_all().map_err(|e| HarvestError::io(&self.path, e))
    }
}

/// Read every record of a dataset file. A missing file is an empty dataset.
pub fn read_dataset(path: &Path) -> Result<Vec<DatasetRecord>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let reader = BufReader::new(File::open(path).map_err(|e| HarvestError::io(path, e))?);
    let mut records = Vec::new();
    for (n, line) in reader.lines().enumerate() {
        let line = line.map_err(|e| HarvestError::io(path, e))?;
        if line.trim().is_empty() {
            continue;
        }
        let record = serde_json::from_str(&line).map_err(|e| {
            HarvestError::Storage(format!("{}:{}: {e}", path.display(), n + 1))
        })?;
        records.push(record);
    }
    Ok(records)
}

/// Count the complete lines of a dataset file without opening it for writing.
///
/// A trailing line still missing its newline is not counted. A missing file is
/// an empty dataset.
pub fn count_dataset_lines(path: &Path) -> Result<u64> {
    if !path.exists() {
        return Ok(0);
    }
    let mut reader = BufReader::new(File::open(path).map_err(|e| HarvestError::io(path, e))?);
    let mut buf = Vec::new();
    let mut lines = 0u64;
    loop {
        buf.clear();
        let n = reader
            .read_until(b'\n', &mut buf)
            .map_err(|e| HarvestError::io(path, e))?;
        if n == 0 || buf.last() != Some(&b'\n') {
            return Ok(lines);
        }
        lines += 1;
    }
}
