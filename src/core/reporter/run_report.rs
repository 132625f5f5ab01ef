//! Run report JSON document.

use crate::error::StorageError;
use serde::Serialize;
use std::fs;
use std::path::Path;

/// Write `report` as pretty-printed JSON, replacing any previous version.
///
/// The document is written next to its final path and renamed into place,
/// so readers never see a half-written report.
pub fn write_run_report<T: Serialize>(path: &Path, report: &T) -> Result<(), StorageError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| StorageError::io(parent, e))?;
    }
    let json = serde_json::to_string_pretty(report).map_err(|e| StorageError::Serialize {
        what: path.display().to_string(),
        reason: e.to_string(),
    })?;

    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json).map_err(|e| StorageError::io(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| StorageError::io(path, e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use tempfile::TempDir;

    #[test]
    fn writes_and_replaces() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("r-run.json");

        write_run_report(&path, &json!({ "run_id": "r", "completed_at": null })).unwrap();
        write_run_report(&path, &json!({ "run_id": "r", "completed_at": "now" })).unwrap();

        let written: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written["completed_at"], "now");
        assert!(!path.with_extension("json.tmp").exists());
    }
}
