// SPDX-License-Identifier: MIT OR Apache-2.0
//! The local auto-skip database.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;

/// Errors from the skip database.
#[derive(Debug, Error)]
pub enum SkipDbError {
    /// The database file could not be read or written.
    #[error("skip db io error at {path}: {reason}")]
    Io {
        /// Database path.
        path: String,
        /// IO error text.
        reason: String,
    },
    /// The database file is corrupt.
    #[error("skip db at {path} is corrupt: {reason}")]
    Corrupt {
        /// Database path.
        path: String,
        /// Parse error text.
        reason: String,
    },
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct DbContents {
    /// Hex fingerprint → completion marker.
    entries: BTreeMap<String, bool>,
}

/// A file-backed fingerprint → completed store.
///
/// The CLI consults it before invoking the engine: a recorded fingerprint
/// means the target (and its whole subtree) can be skipped.
pub struct SkipDb {
    path: PathBuf,
    contents: Mutex<DbContents>,
}

impl SkipDb {
    /// Open (or create) the database at `path`.
    pub fn open(path: &Path) -> Result<Self, SkipDbError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(text) => serde_json::from_str(&text).map_err(|e| SkipDbError::Corrupt {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => DbContents::default(),
            Err(e) => {
                return Err(SkipDbError::Io {
                    path: path.display().to_string(),
                    reason: e.to_string(),
                });
            }
        };
        Ok(Self {
            path: path.to_path_buf(),
            contents: Mutex::new(contents),
        })
    }

    /// True if the fingerprint is recorded as completed.
    #[must_use]
    pub fn exists(&self, fingerprint_hex: &str) -> bool {
        self.contents
            .lock()
            .expect("skip db lock")
            .entries
            .get(fingerprint_hex)
            .copied()
            .unwrap_or(false)
    }

    /// Record a completed fingerprint and persist.
    pub fn add(&self, fingerprint_hex: &str) -> Result<(), SkipDbError> {
        {
            let mut contents = self.contents.lock().expect("skip db lock");
            contents
                .entries
                .insert(fingerprint_hex.to_string(), true);
        }
        self.persist()
    }

    /// Remove a fingerprint and persist.
    pub fn remove(&self, fingerprint_hex: &str) -> Result<(), SkipDbError> {
        {
            let mut contents = self.contents.lock().expect("skip db lock");
            contents.entries.remove(fingerprint_hex);
        }
        self.persist()
    }

    /// Number of recorded fingerprints.
    #[must_use]
    pub fn len(&self) -> usize {
        self.contents.lock().expect("skip db lock").entries.len()
    }

    /// True when nothing is recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn persist(&self) -> Result<(), SkipDbError> {
        let text = {
            let contents = self.contents.lock().expect("skip db lock");
            serde_json::to_string_pretty(&*contents).expect("db contents serialize")
        };
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| SkipDbError::Io {
                path: self.path.display().to_string(),
                reason: e.to_string(),
            })?;
        }
        std::fs::write(&self.path, text).map_err(|e| SkipDbError::Io {
            path: self.path.display().to_string(),
            reason: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_and_persists_fingerprints() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("skip.json");

        let db = SkipDb::open(&path).expect("open");
        assert!(!db.exists("abc"));
        db.add("abc").expect("add");
        assert!(db.exists("abc"));

        let reopened = SkipDb::open(&path).expect("reopen");
        assert!(reopened.exists("abc"));
        assert_eq!(reopened.len(), 1);
    }

    #[test]
    fn remove_deletes_entries() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("skip.json");
        let db = SkipDb::open(&path).expect("open");
        db.add("abc").expect("add");
        db.remove("abc").expect("remove");
        assert!(!db.exists("abc"));
        assert!(db.is_empty());
    }

    #[test]
    fn corrupt_files_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("skip.json");
        std::fs::write(&path, "not json").expect("write");
        assert!(matches!(
            SkipDb::open(&path),
            Err(SkipDbError::Corrupt { .. })
        ));
    }
}
