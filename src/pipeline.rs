/// Pipeline driver: one ingestion cycle per configured scanner location.
///
/// Each location runs under an exclusive lock file in the state directory and
/// fails independently; nothing that goes wrong in one location stops the
/// others.
use crate::config::Scanner;
use crate::data_dir::StateDir;
use crate::ingest::{CycleError, CycleOutcome, CycleReport, IngestSettings, Ingestor};
use crate::ledger::Ledger;
use crate::publish::Publisher;
use crate::retry::RejectPolicy;
use crate::store::ReportStore;
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::path::PathBuf;
use tracing::{error, info, warn};

/// What happened to one location during a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum LocationResult {
    NoNewFiles,
    Processed(CycleReport),
    /// Another instance held the location lock.
    Locked,
    Failed { error: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationSummary {
    pub location: String,
    pub search_dir: PathBuf,
    #[serde(flatten)]
    pub result: LocationResult,
}

/// Record of one invocation, persisted as the last-run status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub dry_run: bool,
    pub locations: Vec<LocationSummary>,
}

impl RunSummary {
    /// Samples published across all locations.
    pub fn samples(&self) -> u64 {
        self.reports().map(|r| r.samples).sum()
    }

    pub fn ingested(&self) -> usize {
        self.reports().map(|r| r.ingested).sum()
    }

    pub fn rejected(&self) -> usize {
        self.reports().map(|r| r.rejected).sum()
    }

    /// Locations that failed outright (not merely locked).
    pub fn failed_locations(&self) -> usize {
        self.locations
            .iter()
            .filter(|l| matches!(l.result, LocationResult::Failed { .. }))
            .count()
    }

    fn reports(&self) -> impl Iterator<Item = &CycleReport> {
        self.locations.iter().filter_map(|l| match &l.result {
            LocationResult::Processed(report) => Some(report),
            _ => None,
        })
    }
}

#[derive(Debug, thiserror::Error)]
enum LocationError {
    #[error("location is locked by another instance")]
    Locked,
    #[error("failed to open lock file {}: {source}", .path.display())]
    LockFile {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("{0}")]
    Cycle(#[from] CycleError),
}

/// Runs every configured location once.
pub struct Pipeline<'a> {
    store: &'a dyn ReportStore,
    state: &'a StateDir,
    settings: IngestSettings,
    rejects: Option<(Ledger, RejectPolicy)>,
    dry_run: bool,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        store: &'a dyn ReportStore,
        state: &'a StateDir,
        mut settings: IngestSettings,
        dry_run: bool,
    ) -> Self {
        settings.dry_run = dry_run;
        Self {
            store,
            state,
            settings,
            rejects: None,
            dry_run,
        }
    }

    pub fn with_ledger(mut self, ledger: Ledger, policy: RejectPolicy) -> Self {
        self.rejects = Some((ledger, policy));
        self
    }

    pub fn run(&self, scanners: &[Scanner], publisher: &mut dyn Publisher) -> RunSummary {
        let started_at = Utc::now();
        let mut locations = Vec::with_capacity(scanners.len());

        for scanner in scanners {
            let result = match self.run_location(scanner, publisher) {
                Ok(CycleOutcome::NoNewFiles) => LocationResult::NoNewFiles,
                Ok(CycleOutcome::Processed(report)) => LocationResult::Processed(report),
                Err(LocationError::Locked) => {
                    warn!(location = %scanner.location, "location is locked by another instance, skipping");
                    LocationResult::Locked
                }
                Err(e) => {
                    error!(location = %scanner.location, error = %e, "location failed");
                    LocationResult::Failed {
                        error: e.to_string(),
                    }
                }
            };
            locations.push(LocationSummary {
                location: scanner.location.to_string(),
                search_dir: scanner.search_dir.clone(),
                result,
            });
        }

        let summary = RunSummary {
            started_at,
            finished_at: Utc::now(),
            dry_run: self.dry_run,
            locations,
        };
        info!(
            locations = summary.locations.len(),
            ingested = summary.ingested(),
            rejected = summary.rejected(),
            samples = summary.samples(),
            failed = summary.failed_locations(),
            "run complete"
        );
        summary
    }

    fn run_location(
        &self,
        scanner: &Scanner,
        publisher: &mut dyn Publisher,
    ) -> Result<CycleOutcome, LocationError> {
        let lock = self.acquire_lock(scanner)?;

        let mut ingestor = Ingestor::new(self.store, publisher, &self.settings);
        if let Some((ledger, policy)) = &self.rejects {
            ingestor = ingestor.with_ledger(ledger, *policy);
        }
        let outcome =
            ingestor.run_cycle(&scanner.location, &scanner.search_dir, Utc::now().timestamp());

        // Dropping the file releases the lock as well; unlock explicitly so
        // a failure shows up in the log.
        if let Err(e) = FileExt::unlock(&lock) {
            warn!(location = %scanner.location, error = %e, "failed to release location lock");
        }
        outcome.map_err(LocationError::from)
    }

    fn acquire_lock(&self, scanner: &Scanner) -> Result<File, LocationError> {
        let path = self.state.lock_for(&scanner.location);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|e| LocationError::LockFile {
                path: path.clone(),
                source: e,
            })?;

        match file.try_lock_exclusive() {
            Ok(()) => Ok(file),
            Err(e) if e.kind() == fs2::lock_contended_error().kind() => Err(LocationError::Locked),
            Err(e) => Err(LocationError::LockFile { path, source: e }),
        }
    }
}
