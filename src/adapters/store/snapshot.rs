//! Snapshot Files
//!
//! JSON persistence for the in-memory stores: whole-state snapshots written
//! atomically (temp file + rename) and append-only JSON-lines logs.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::ports::StoreError;

/// Snapshot file names under the data directory
pub const POSITIONS_FILE: &str = "positions.json";
pub const ASSOCIATIONS_FILE: &str = "associations.json";
pub const NOTIFICATIONS_FILE: &str = "notifications.json";
pub const QUEUE_FILE: &str = "queue.json";
pub const AUDIT_FILE: &str = "audit.jsonl";

#[derive(Debug, Clone)]
pub struct SnapshotFile {
    path: PathBuf,
}

impl SnapshotFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn in_dir(data_dir: &Path, name: &str) -> Self {
        Self::new(data_dir.join(name))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the snapshot. A missing or empty file is `None`.
    pub fn load<T: DeserializeOwned>(&self) -> Result<Option<T>, StoreError> {
        if !self.path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&self.path)
            .map_err(|e| StoreError::Persistence(format!("read {}: {}", self.path.display(), e)))?;

        if content.trim().is_empty() {
            return Ok(None);
        }

        let value = serde_json::from_str(&content)
            .map_err(|e| StoreError::Persistence(format!("parse {}: {}", self.path.display(), e)))?;

        Ok(Some(value))
    }

    /// Write the snapshot via a temp file so a crash never leaves a torn file
    pub fn save<T: Serialize>(&self, value: &T) -> Result<(), StoreError> {
        self.ensure_parent()?;

        let content = serde_json::to_string_pretty(value)
            .map_err(|e| StoreError::Persistence(format!("serialize: {}", e)))?;

        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, content)
            .map_err(|e| StoreError::Persistence(format!("write {}: {}", tmp.display(), e)))?;
        fs::rename(&tmp, &self.path)
            .map_err(|e| StoreError::Persistence(format!("rename {}: {}", self.path.display(), e)))?;

        Ok(())
    }

    /// Append one JSON record as a line
    pub fn append_line<T: Serialize>(&self, value: &T) -> Result<(), StoreError> {
        self.ensure_parent()?;

        let mut line = serde_json::to_string(value)
            .map_err(|e| StoreError::Persistence(format!("serialize: {}", e)))?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| StoreError::Persistence(format!("open {}: {}", self.path.display(), e)))?;
        file.write_all(line.as_bytes())
            .map_err(|e| StoreError::Persistence(format!("append {}: {}", self.path.display(), e)))?;

        Ok(())
    }

    /// Read every parseable line; corrupt lines are logged and skipped
    pub fn read_lines<T: DeserializeOwned>(&self) -> Result<Vec<T>, StoreError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let content = fs::read_to_string(&self.path)
            .map_err(|e| StoreError::Persistence(format!("read {}: {}", self.path.display(), e)))?;

        let mut records = Vec::new();
        for (n, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(line) {
                Ok(record) => records.push(record),
                Err(e) => tracing::warn!(
                    "Skipping corrupt line {} in {}: {}",
                    n + 1,
                    self.path.display(),
                    e
                ),
            }
        }
        Ok(records)
    }

    fn ensure_parent(&self) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .map_err(|e| StoreError::Persistence(format!("create {}: {}", parent.display(), e)))?;
            }
        }
        Ok(())
    }
}
