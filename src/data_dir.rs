use crate::metric_name::ScannerLocation;
use std::path::{Path, PathBuf};

/// Manages the collector's state directory (default `.stability-collector/`).
///
/// Holds the rejection ledger, one lock file per scanner location and the
/// status of the last run. Reports themselves never live here.
#[derive(Debug, Clone)]
pub struct StateDir {
    root: PathBuf,
}

impl StateDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path to the SQLite rejection ledger.
    pub fn ledger(&self) -> PathBuf {
        self.root.join("ledger.db")
    }

    /// Path to the last-run status file.
    pub fn status(&self) -> PathBuf {
        self.root.join("status.json")
    }

    pub fn locks_dir(&self) -> PathBuf {
        self.root.join("locks")
    }

    /// Lock file guarding one location (e.g. `locks/Harvard.Northwest.Bay1.lock`).
    pub fn lock_for(&self, location: &ScannerLocation) -> PathBuf {
        self.locks_dir().join(format!("{}.lock", location.dotted()))
    }

    /// Create the root and locks directories.
    /// Returns Ok(true) if the root was created, Ok(false) if it already existed.
    pub fn init(&self) -> std::io::Result<bool> {
        let created = !self.root.exists();
        std::fs::create_dir_all(&self.root)?;
        std::fs::create_dir_all(self.locks_dir())?;
        Ok(created)
    }
}
