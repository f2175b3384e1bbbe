//! Durable run state: the URL progress lists and the dataset file.
//!
//! Both stores are owned by a single writer and live under the output
//! directory:
//!
//! | file | contents |
//! |---|---|
//! | `websites_master.json` | every admitted URL with its status (source of truth) |
//! | `websites_completed.json` | derived view of completed URLs |
//! | `websites_errors.json` | derived view of failed URLs, re-feedable as retry input |
//! | `dataset.jsonl` | one extracted record per line |
//!
//! **Write rules:**
//! - JSON snapshots are replaced atomically (temp file, fsync, rename); the
//!   master is written before the views.
//! - Dataset lines are appended and fsynced before the owning URL is marked
//!   completed, so a completed URL always has its line on disk.

mod atomic;
mod dataset;
mod progress;

pub use atomic::{write_atomic, write_json_atomic};
pub use dataset::{DatasetSink, count_dataset_lines, read_dataset};
pub use progress::{ProgressStore, read_error_list};
