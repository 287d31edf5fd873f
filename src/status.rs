/// Last-run status file: the `RunSummary` of the most recent invocation as
/// JSON.
///
/// Uses atomic write pattern: write to a temp file in the same directory,
/// then rename over the old one.
use crate::pipeline::{LocationResult, RunSummary};
use chrono::{DateTime, Utc};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Errors from status file operations.
#[derive(Debug, thiserror::Error)]
pub enum StatusError {
    #[error("failed to serialize status: {source}")]
    Serialize { source: serde_json::Error },
    #[error("failed to write temp status file in {}: {source}", .dir.display())]
    Write {
        dir: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to persist status file {}: {source}", .path.display())]
    Persist {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to read status file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse status file {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

pub struct StatusFile {
    path: PathBuf,
}

impl StatusFile {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Atomically replace the status file with `summary`.
    ///
    /// Readers never see a partial write.
    pub fn write(&self, summary: &RunSummary) -> Result<(), StatusError> {
        let json = serde_json::to_string_pretty(summary)
            .map_err(|e| StatusError::Serialize { source: e })?;

        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        let write_err = |e| StatusError::Write {
            dir: dir.to_path_buf(),
            source: e,
        };
        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(write_err)?;
        tmp.write_all(json.as_bytes()).map_err(write_err)?;
        tmp.write_all(b"\n").map_err(write_err)?;

        tmp.persist(&self.path).map_err(|e| StatusError::Persist {
            path: self.path.clone(),
            source: e.error,
        })?;
        Ok(())
    }

    /// Load the last summary. `Ok(None)` if no run has been recorded yet.
    pub fn read(&self) -> Result<Option<RunSummary>, StatusError> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(StatusError::Read {
                    path: self.path.clone(),
                    source: e,
                })
            }
        };
        serde_json::from_str(&contents)
            .map(Some)
            .map_err(|e| StatusError::Parse {
                path: self.path.clone(),
                source: e,
            })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Epoch seconds as a UTC timestamp; `-` for zero.
pub fn format_epoch(epoch: i64) -> String {
    if epoch == 0 {
        return "-".to_string();
    }
    DateTime::<Utc>::from_timestamp(epoch, 0)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| epoch.to_string())
}

/// Human-readable rendering of a summary for `--status`.
pub fn render(summary: &RunSummary) -> String {
    let mut out = format!(
        "last run: {} ({}s){}\n",
        summary.started_at.format("%Y-%m-%d %H:%M:%S UTC"),
        (summary.finished_at - summary.started_at).num_seconds(),
        if summary.dry_run { " [dry run]" } else { "" }
    );
    for loc in &summary.locations {
        let detail = match &loc.result {
            LocationResult::NoNewFiles => "no new files".to_string(),
            LocationResult::Processed(r) if r.previewed > 0 => format!(
                "{} previewed, {} rejected, {} deferred, {} failed, {} samples",
                r.previewed, r.rejected, r.deferred, r.failed, r.samples
            ),
            LocationResult::Processed(r) => format!(
                "{} ingested, {} rejected, {} deferred, {} quarantined, {} failed, {} samples",
                r.ingested, r.rejected, r.deferred, r.quarantined, r.failed, r.samples
            ),
            LocationResult::Locked => "skipped (locked)".to_string(),
            LocationResult::Failed { error } => format!("FAILED: {error}"),
        };
        out.push_str(&format!("  {}: {}\n", loc.location, detail));
    }
    out
}
