//! Atomic file replacement.

use std::io::Write;
use std::path::Path;

use serde::Serialize;
use tempfile::NamedTempFile;

use topicharvest_shared::{HarvestError, Result};

/// Replace `path` with `bytes` so readers see either the old or the new
/// contents, never a mix.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));

    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| HarvestError::io(dir, e))?;
    tmp.write_all(bytes).map_err(|e| HarvestError::io(tmp.path(), e))?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| HarvestError::io(tmp.path(), e))?;
    tmp.persist(path)
        .map_err(|e| HarvestError::io(path, e.error))?;

    sync_dir(dir)
}

/// Make a rename inside `dir` durable.
#[cfg(unix)]
fn sync_dir(dir: &Path) -> Result<()> {
    std::fs::File::open(dir)
        .and_then(|d| d.sync_all())
        .map_err(|e| HarvestError::io(dir, e))
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> Result<()> {
    Ok(())
}

/// Serialize `value` as pretty JSON and [`write_atomic`] it.
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let mut bytes = serde_json::to_vec_pretty(value)
        .map_err(|e| HarvestError::Storage(format!("failed to serialize {}: {e}", path.display())))?;
    bytes.push(b'\n');
    write_atomic(path, &bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replaces_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, b"old").unwrap();

        write_atomic(&path, b"new contents").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"new contents");
    }

    #[cfg(unix)]
    #[test]
    fn directory_sync_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let err = sync_dir(&dir.path().join("gone")).unwrap_err();
        assert!(matches!(err, HarvestError::Io { .. }));
    }

    #[test]
    fn leaves_no_temp_files_behind() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("list.json");
        write_json_atomic(&path, &vec!["a", "b"]).unwrap();
        write_json_atomic(&path, &vec!["c"]).unwrap();

        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("list.json")]);
        let back: Vec<String> = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(back, vec!["c".to_string()]);
    }
}
