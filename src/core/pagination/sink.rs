//! Append-only newline-delimited JSON output.

use crate::error::StorageError;
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Number of leading lines re-read and parsed after the first flushes
const SELF_CHECK_LINES: usize = 3;

/// Single-writer NDJSON stream.
///
/// Records are buffered and flushed per page so partial progress survives a
/// crash. Until the first [`SELF_CHECK_LINES`] lines have been verified, every
/// flush re-reads the file head and fails with [`StorageError::Integrity`] if
/// a line is not a JSON object.
pub struct NdjsonSink {
    path: PathBuf,
    writer: BufWriter<File>,
    lines_written: usize,
    verified: bool,
}

impl NdjsonSink {
    pub fn create(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StorageError::io(parent, e))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| StorageError::io(&path, e))?;
        Ok(Self {
            path,
            writer: BufWriter::new(file),
            lines_written: 0,
            verified: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn lines_written(&self) -> usize {
        self.lines_written
    }

    pub fn append<T: Serialize>(&mut self, record: &T) -> Result<(), StorageError> {
        let line = serde_json::to_string(record).map_err(|e| StorageError::Serialize {
            what: self.path.display().to_string(),
            reason: e.to_string(),
        })?;
        self.writer
            .write_all(line.as_bytes())
            .and_then(|_| self.writer.write_all(b"\n"))
            .map_err(|e| StorageError::io(&self.path, e))?;
        self.lines_written += 1;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), StorageError> {
        self.writer
            .flush()
            .map_err(|e| StorageError::io(&self.path, e))?;
        if !self.verified && self.lines_written > 0 {
            self.self_check()?;
            self.verified = self.lines_written >= SELF_CHECK_LINES;
        }
        Ok(())
    }

    fn self_check(&self) -> Result<(), StorageError> {
        let file = File::open(&self.path).map_err(|e| StorageError::io(&self.path, e))?;
        let integrity = |reason: String| StorageError::Integrity {
            path: self.path.clone(),
            reason,
        };

        let mut checked = 0;
        for (index, line) in BufReader::new(file).lines().take(SELF_CHECK_LINES).enumerate() {
            let line = line.map_err(|e| StorageError::io(&self.path, e))?;
            match serde_json::from_str::<serde_json::Value>(&line) {
                Ok(value) if value.is_object() => checked += 1,
                Ok(_) => return Err(integrity(format!("line {} is not a JSON object", index + 1))),
                Err(e) => return Err(integrity(format!("line {}: {}", index + 1, e))),
            }
        }
        if checked < SELF_CHECK_LINES.min(self.lines_written) {
            return Err(integrity(format!(
                "expected {} lines, found {}",
                SELF_CHECK_LINES.min(self.lines_written),
                checked
            )));
        }
        Ok(())
    }
}
