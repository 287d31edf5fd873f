/// Report ingestion: discover pending reports in a search directory, turn
/// each into samples, publish them, then move the report into the ingested
/// subdirectory. The move is the only record that a report was processed,
/// so a dry run publishes (to the log) but leaves every report in place.
use crate::coil::{self, ResolutionError};
use crate::ledger::Ledger;
use crate::metric_name::{section_samples, ScannerLocation};
use crate::publish::{PublishError, Publisher};
use crate::report::{self, ExpectedShape, HeaderFormatError};
use crate::retry::{RejectDecision, RejectPolicy};
use crate::store::ReportStore;
use crate::timestamp::{self, TimestampError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

/// Per-file processing states, logged on every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileState {
    Discovering,
    ParsingHeader,
    Rejected,
    ExtractingMetrics,
    Publishing,
    MarkedIngested,
}

/// Where a report stands at the end of a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestStatus {
    /// Still in the search directory: failed transiently or backing off.
    Pending,
    Ingested,
    /// Unparseable; left in place (or quarantined, see `LogFile::moved_to`).
    Rejected,
}

/// One discovered report and what happened to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogFile {
    pub path: PathBuf,
    pub timestamp: Option<i64>,
    pub status: IngestStatus,
    pub samples: u64,
    pub moved_to: Option<PathBuf>,
    pub error: Option<String>,
}

impl LogFile {
    fn discovered(path: PathBuf) -> Self {
        Self {
            path,
            timestamp: None,
            status: IngestStatus::Pending,
            samples: 0,
            moved_to: None,
            error: None,
        }
    }
}

/// Why a single report was not ingested.
#[derive(Debug, thiserror::Error)]
pub enum FileError {
    #[error("{0}")]
    Timestamp(#[from] TimestampError),
    #[error("{0}")]
    Header(#[from] HeaderFormatError),
    #[error("{0}")]
    Resolution(#[from] ResolutionError),
    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("{0}")]
    Publish(#[from] PublishError),
    #[error("failed to move {} into {}: {source}", .path.display(), .dest_dir.display())]
    Relocate {
        path: PathBuf,
        dest_dir: PathBuf,
        source: std::io::Error,
    },
}

impl FileError {
    /// Whether the report itself is at fault (as opposed to I/O or the
    /// publisher). Only these count against the rejection ledger.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            FileError::Timestamp(_) | FileError::Header(_) | FileError::Resolution(_)
        )
    }
}

/// A failure that ends the whole cycle for one directory.
#[derive(Debug, thiserror::Error)]
pub enum CycleError {
    #[error("failed to scan {}: {source}", .dir.display())]
    Discover {
        dir: PathBuf,
        source: std::io::Error,
    },
}

/// Counters and per-file results for one cycle over one directory.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CycleReport {
    pub discovered: usize,
    pub ingested: usize,
    /// Parsed and published in a dry run, left in place.
    #[serde(default)]
    pub previewed: usize,
    pub rejected: usize,
    pub deferred: usize,
    pub quarantined: usize,
    pub failed: usize,
    pub samples: u64,
    pub dropped_sections: usize,
    pub files: Vec<LogFile>,
}

#[derive(Debug, Clone)]
pub enum CycleOutcome {
    NoNewFiles,
    Processed(CycleReport),
}

/// Static settings shared by every location.
#[derive(Debug, Clone)]
pub struct IngestSettings {
    pub file_prefix: String,
    pub expected: ExpectedShape,
    pub ingested_dir: String,
    pub quarantine_dir: String,
    /// Leave reports and the rejection ledger untouched.
    pub dry_run: bool,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            file_prefix: "Stability".to_string(),
            expected: ExpectedShape::default(),
            ingested_dir: "ingested".to_string(),
            quarantine_dir: "rejected".to_string(),
            dry_run: false,
        }
    }
}

struct Processed {
    timestamp: i64,
    samples: u64,
    dropped_sections: usize,
    /// `None` in a dry run.
    dest: Option<PathBuf>,
}

/// Drives reports through the per-file state machine.
pub struct Ingestor<'a> {
    store: &'a dyn ReportStore,
    publisher: &'a mut dyn Publisher,
    settings: &'a IngestSettings,
    rejects: Option<(&'a Ledger, RejectPolicy)>,
}

impl<'a> Ingestor<'a> {
    pub fn new(
        store: &'a dyn ReportStore,
        publisher: &'a mut dyn Publisher,
        settings: &'a IngestSettings,
    ) -> Self {
        Self {
            store,
            publisher,
            settings,
            rejects: None,
        }
    }

    /// Track rejections in `ledger` and back off / quarantine per `policy`.
    pub fn with_ledger(mut self, ledger: &'a Ledger, policy: RejectPolicy) -> Self {
        self.rejects = Some((ledger, policy));
        self
    }

    /// One pass over `search_dir`. `now` (epoch seconds) drives the
    /// rejection backoff only; sample timestamps come from file names.
    pub fn run_cycle(
        &mut self,
        location: &ScannerLocation,
        search_dir: &Path,
        now: i64,
    ) -> Result<CycleOutcome, CycleError> {
        transition(search_dir, FileState::Discovering);
        let paths = self
            .store
            .discover(search_dir, &self.settings.file_prefix)
            .map_err(|e| CycleError::Discover {
                dir: search_dir.to_path_buf(),
                source: e,
            })?;

        if paths.is_empty() {
            info!(location = %location, "no new files");
            return Ok(CycleOutcome::NoNewFiles);
        }

        let mut report = CycleReport {
            discovered: paths.len(),
            ..Default::default()
        };

        for path in paths {
            let mut file = LogFile::discovered(path);

            if let Some((ledger, _)) = self.rejects {
                match ledger.deferred_until(&file.path, now) {
                    Ok(Some(until)) => {
                        debug!(file = %file.path.display(), until, "still backing off, skipping");
                        report.deferred += 1;
                        report.files.push(file);
                        continue;
                    }
                    Ok(None) => {}
                    // Without the ledger the report is simply retried.
                    Err(e) => {
                        error!(file = %file.path.display(), error = %e, "failed to read rejection ledger");
                    }
                }
            }

            match self.process_file(location, search_dir, &file.path) {
                Ok(done) => {
                    file.timestamp = Some(done.timestamp);
                    file.samples = done.samples;
                    report.samples += done.samples;
                    report.dropped_sections += done.dropped_sections;
                    match done.dest {
                        Some(dest) => {
                            file.status = IngestStatus::Ingested;
                            file.moved_to = Some(dest);
                            report.ingested += 1;
                            self.clear_rejection(&file.path);
                        }
                        None => report.previewed += 1,
                    }
                }
                Err(e) if e.is_rejection() => {
                    transition(&file.path, FileState::Rejected);
                    warn!(file = %file.path.display(), error = %e, "rejected report, leaving it in place");
                    file.status = IngestStatus::Rejected;
                    file.error = Some(e.to_string());
                    report.rejected += 1;
                    if self.apply_reject_policy(&mut file, &e, search_dir, now) {
                        report.quarantined += 1;
                    }
                }
                Err(e) => {
                    error!(file = %file.path.display(), error = %e, "failed to ingest report, will retry next cycle");
                    file.error = Some(e.to_string());
                    report.failed += 1;
                }
            }
            report.files.push(file);
        }

        info!(
            location = %location,
            discovered = report.discovered,
            ingested = report.ingested,
            previewed = report.previewed,
            rejected = report.rejected,
            deferred = report.deferred,
            failed = report.failed,
            samples = report.samples,
            "cycle complete"
        );
        Ok(CycleOutcome::Processed(report))
    }

    fn process_file(
        &mut self,
        location: &ScannerLocation,
        search_dir: &Path,
        path: &Path,
    ) -> Result<Processed, FileError> {
        transition(path, FileState::ParsingHeader);
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let timestamp = timestamp::extract_epoch(&name)?;

        let text = self.store.read(path).map_err(|e| FileError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;
        let parsed = report::parse(&text, self.settings.expected)?;
        let coil = coil::resolve(&parsed.configuration.channels)?;

        transition(path, FileState::ExtractingMetrics);
        debug!(file = %path.display(), coil = %coil, sections = parsed.sections.len(), samples = parsed.sample_count(), "resolved coil");
        for defect in &parsed.defects {
            warn!(file = %path.display(), error = %defect, "dropping malformed section");
        }
        if parsed.sections.is_empty() {
            warn!(file = %path.display(), "report has no usable sections");
        }

        transition(path, FileState::Publishing);
        let mut samples = 0u64;
        for section in &parsed.sections {
            for sample in section_samples(location, &coil, section, timestamp) {
                self.publisher.publish(&sample)?;
                samples += 1;
            }
        }
        self.publisher.flush()?;

        if self.settings.dry_run {
            info!(file = %path.display(), samples, "dry run, leaving report in place");
            return Ok(Processed {
                timestamp,
                samples,
                dropped_sections: parsed.defects.len(),
                dest: None,
            });
        }

        let dest_dir = search_dir.join(&self.settings.ingested_dir);
        let dest = self
            .store
            .relocate(path, &dest_dir)
            .map_err(|e| FileError::Relocate {
                path: path.to_path_buf(),
                dest_dir,
                source: e,
            })?;

        transition(path, FileState::MarkedIngested);
        info!(file = %path.display(), dest = %dest.display(), samples, "report ingested");
        Ok(Processed {
            timestamp,
            samples,
            dropped_sections: parsed.defects.len(),
            dest: Some(dest),
        })
    }

    /// Record a rejection in the ledger (if enabled). Returns true if the
    /// report was quarantined.
    fn apply_reject_policy(
        &self,
        file: &mut LogFile,
        err: &FileError,
        search_dir: &Path,
        now: i64,
    ) -> bool {
        let Some((ledger, policy)) = self.rejects else {
            return false;
        };
        if self.settings.dry_run {
            return false;
        }

        let decision = match ledger.record(&file.path, &err.to_string(), now, &policy) {
            Ok(decision) => decision,
            Err(e) => {
                error!(file = %file.path.display(), error = %e, "failed to record rejection");
                return false;
            }
        };
        match decision {
            RejectDecision::RetryNextCycle => false,
            RejectDecision::Defer {
                attempt,
                not_before,
            } => {
                info!(file = %file.path.display(), attempt, not_before, "backing off rejected report");
                false
            }
            RejectDecision::Quarantine { attempts } => {
                let dest_dir = search_dir.join(&self.settings.quarantine_dir);
                match self.store.relocate(&file.path, &dest_dir) {
                    Ok(dest) => {
                        warn!(file = %file.path.display(), dest = %dest.display(), attempts, "quarantined report");
                        self.clear_rejection(&file.path);
                        file.moved_to = Some(dest);
                        true
                    }
                    // The ledger row stays, so the next cycle quarantines again.
                    Err(e) => {
                        error!(file = %file.path.display(), error = %e, attempts, "failed to quarantine report");
                        false
                    }
                }
            }
        }
    }

    /// Drop the ledger entry for a report that has left the search directory.
    fn clear_rejection(&self, path: &Path) {
        if let Some((ledger, _)) = self.rejects {
            if let Err(e) = ledger.clear(path) {
                error!(file = %path.display(), error = %e, "failed to clear rejection ledger entry");
            }
        }
    }
}

fn transition(path: &Path, state: FileState) {
    debug!(path = %path.display(), state = ?state, "state transition");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publish::{PlaintextPublisher, PublishMode};
    use crate::store::DiskStore;
    use crate::test_support::{render_report, FailingPublisher, MemoryStore, RecordingPublisher};
    use tempfile::TempDir;

    const NOW: i64 = 1_700_000_000;
    const NAME: &str = "Stability_20180110T165545.txt";

    fn loc() -> ScannerLocation {
        ScannerLocation::parse("loc").unwrap()
    }

    fn good_report() -> String {
        render_report(16, 500, "32", &[("SNR", &["Mean[%]", "StdDev"]), ("Drift", &["Pct"])])
    }

    fn outcome_report(outcome: CycleOutcome) -> CycleReport {
        match outcome {
            CycleOutcome::Processed(report) => report,
            CycleOutcome::NoNewFiles => panic!("expected files to be processed"),
        }
    }

    #[test]
    fn ingests_and_moves_report() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(NAME), good_report()).unwrap();
        let settings = IngestSettings::default();
        let mut publisher = RecordingPublisher::default();

        let report = outcome_report(
            Ingestor::new(&DiskStore, &mut publisher, &settings)
                .run_cycle(&loc(), dir.path(), NOW)
                .unwrap(),
        );

        assert_eq!(report.discovered, 1);
        assert_eq!(report.ingested, 1);
        assert_eq!(report.samples, 16 * 3);
        assert_eq!(publisher.samples.len(), 16 * 3);
        assert_eq!(publisher.flushes, 1);

        let expected_ts = timestamp::extract_epoch(NAME).unwrap();
        assert!(publisher.samples.iter().all(|s| s.timestamp == expected_ts));
        assert!(publisher.names().contains(&"loc.32.SNR.Meanpct.1"));
        assert!(publisher.names().contains(&"loc.32.Drift.Pct.16"));

        assert!(!dir.path().join(NAME).exists());
        assert!(dir.path().join("ingested").join(NAME).exists());
        assert_eq!(report.files[0].status, IngestStatus::Ingested);
        assert_eq!(report.files[0].timestamp, Some(expected_ts));
    }

    #[test]
    fn second_run_finds_nothing() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(NAME), good_report()).unwrap();
        let settings = IngestSettings::default();

        let mut first = RecordingPublisher::default();
        Ingestor::new(&DiskStore, &mut first, &settings)
            .run_cycle(&loc(), dir.path(), NOW)
            .unwrap();
        assert!(!first.samples.is_empty());

        let mut second = RecordingPublisher::default();
        let outcome = Ingestor::new(&DiskStore, &mut second, &settings)
            .run_cycle(&loc(), dir.path(), NOW)
            .unwrap();
        assert!(matches!(outcome, CycleOutcome::NoNewFiles));
        assert!(second.samples.is_empty());
    }

    #[test]
    fn empty_directory_is_no_new_files() {
        let dir = TempDir::new().unwrap();
        let settings = IngestSettings::default();
        let mut publisher = RecordingPublisher::default();
        let outcome = Ingestor::new(&DiskStore, &mut publisher, &settings)
            .run_cycle(&loc(), dir.path(), NOW)
            .unwrap();
        assert!(matches!(outcome, CycleOutcome::NoNewFiles));
    }

    #[test]
    fn missing_directory_is_cycle_error() {
        let dir = TempDir::new().unwrap();
        let settings = IngestSettings::default();
        let mut publisher = RecordingPublisher::default();
        let result = Ingestor::new(&DiskStore, &mut publisher, &settings).run_cycle(
            &loc(),
            &dir.path().join("missing"),
            NOW,
        );
        assert!(matches!(result, Err(CycleError::Discover { .. })));
    }

    #[test]
    fn bad_header_publishes_nothing_and_stays_pending() {
        let dir = TempDir::new().unwrap();
        let text = good_report().replacen("16 slices", "1 slice", 1);
        std::fs::write(dir.path().join(NAME), text).unwrap();
        let settings = IngestSettings::default();
        let mut publisher = RecordingPublisher::default();

        let report = outcome_report(
            Ingestor::new(&DiskStore, &mut publisher, &settings)
                .run_cycle(&loc(), dir.path(), NOW)
                .unwrap(),
        );

        assert_eq!(report.rejected, 1);
        assert!(publisher.samples.is_empty());
        assert!(dir.path().join(NAME).exists());
        assert!(!dir.path().join("ingested").exists());
        assert_eq!(report.files[0].status, IngestStatus::Rejected);
    }

    #[test]
    fn unknown_channel_count_is_resolution_rejection() {
        let dir = TempDir::new().unwrap();
        let text = render_report(16, 500, "20", &[("SNR", &["Mean"])]);
        std::fs::write(dir.path().join(NAME), text).unwrap();
        let settings = IngestSettings::default();
        let mut publisher = RecordingPublisher::default();

        let report = outcome_report(
            Ingestor::new(&DiskStore, &mut publisher, &settings)
                .run_cycle(&loc(), dir.path(), NOW)
                .unwrap(),
        );

        assert_eq!(report.rejected, 1);
        assert!(report.files[0]
            .error
            .as_deref()
            .unwrap()
            .contains("unknown channel count"));
        assert!(publisher.samples.is_empty());
        assert!(dir.path().join(NAME).exists());
    }

    #[test]
    fn rejection_does_not_stop_other_files() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("Stability_nodate.txt"), good_report()).unwrap();
        std::fs::write(dir.path().join(NAME), good_report()).unwrap();
        let settings = IngestSettings::default();
        let mut publisher = RecordingPublisher::default();

        let report = outcome_report(
            Ingestor::new(&DiskStore, &mut publisher, &settings)
                .run_cycle(&loc(), dir.path(), NOW)
                .unwrap(),
        );

        assert_eq!(report.rejected, 1);
        assert_eq!(report.ingested, 1);
        assert!(dir.path().join("Stability_nodate.txt").exists());
        assert!(dir.path().join("ingested").join(NAME).exists());
    }

    #[test]
    fn rejected_file_is_retried_every_cycle_without_ledger() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("Stability_nodate.txt"), good_report()).unwrap();
        let settings = IngestSettings::default();

        for _ in 0..3 {
            let mut publisher = RecordingPublisher::default();
            let report = outcome_report(
                Ingestor::new(&DiskStore, &mut publisher, &settings)
                    .run_cycle(&loc(), dir.path(), NOW)
                    .unwrap(),
            );
            assert_eq!(report.rejected, 1);
        }
    }

    #[test]
    fn malformed_section_is_dropped_rest_ingested() {
        let dir = TempDir::new().unwrap();
        let mut text = good_report();
        text.push_str("\nStability Broken results:\n\nslice# A B\n 1 1.0\n");
        std::fs::write(dir.path().join(NAME), text).unwrap();
        let settings = IngestSettings::default();
        let mut publisher = RecordingPublisher::default();

        let report = outcome_report(
            Ingestor::new(&DiskStore, &mut publisher, &settings)
                .run_cycle(&loc(), dir.path(), NOW)
                .unwrap(),
        );

        assert_eq!(report.ingested, 1);
        assert_eq!(report.dropped_sections, 1);
        assert_eq!(publisher.samples.len(), 16 * 3);
        assert!(publisher.names().iter().all(|n| !n.contains("Broken")));
    }

    #[test]
    fn publish_failure_leaves_file_pending() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(NAME), good_report()).unwrap();
        let settings = IngestSettings::default();
        let mut publisher = FailingPublisher { fail_after: 5 };

        let report = outcome_report(
            Ingestor::new(&DiskStore, &mut publisher, &settings)
                .run_cycle(&loc(), dir.path(), NOW)
                .unwrap(),
        );

        assert_eq!(report.failed, 1);
        assert_eq!(report.ingested, 0);
        assert_eq!(report.files[0].status, IngestStatus::Pending);
        assert!(dir.path().join(NAME).exists());
        assert!(!dir.path().join("ingested").join(NAME).exists());
    }

    #[test]
    fn works_against_memory_store() {
        let store = MemoryStore::default();
        store.insert("/scan/bay1", NAME, &good_report());
        store.insert("/scan/bay1", "other.txt", "ignored");
        let settings = IngestSettings::default();
        let mut publisher = RecordingPublisher::default();

        let report = outcome_report(
            Ingestor::new(&store, &mut publisher, &settings)
                .run_cycle(&loc(), Path::new("/scan/bay1"), NOW)
                .unwrap(),
        );

        assert_eq!(report.ingested, 1);
        assert_eq!(
            store.paths(),
            vec![
                PathBuf::from("/scan/bay1/ingested").join(NAME),
                PathBuf::from("/scan/bay1/other.txt"),
            ]
        );
    }

    #[test]
    fn configurable_slice_count() {
        let store = MemoryStore::default();
        store.insert("/d", NAME, &render_report(4, 100, "64", &[("SNR", &["Mean"])]));
        let settings = IngestSettings {
            expected: ExpectedShape {
                slices: 4,
                measurements: 100,
            },
            ..Default::default()
        };
        let mut publisher = RecordingPublisher::default();

        let report = outcome_report(
            Ingestor::new(&store, &mut publisher, &settings)
                .run_cycle(&loc(), Path::new("/d"), NOW)
                .unwrap(),
        );
        assert_eq!(report.samples, 4);
        assert!(publisher.names().contains(&"loc.64.SNR.Mean.4"));
    }

    #[test]
    fn dry_run_leaves_report_in_place() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(NAME), good_report()).unwrap();
        let settings = IngestSettings {
            dry_run: true,
            ..Default::default()
        };
        let mut buf = Vec::new();
        let mut publisher = PlaintextPublisher::new(&mut buf, PublishMode::DryRun);

        for _ in 0..2 {
            let report = outcome_report(
                Ingestor::new(&DiskStore, &mut publisher, &settings)
                    .run_cycle(&loc(), dir.path(), NOW)
                    .unwrap(),
            );
            assert_eq!(report.previewed, 1);
            assert_eq!(report.ingested, 0);
            assert_eq!(report.samples, 16 * 3);
            assert_eq!(report.files[0].status, IngestStatus::Pending);
            assert!(report.files[0].moved_to.is_none());
        }

        assert_eq!(publisher.published(), 2 * 16 * 3);
        assert!(dir.path().join(NAME).exists());
        assert!(!dir.path().join("ingested").exists());
        assert!(buf.is_empty());
    }

    mod with_ledger {
        use super::*;

        fn policy(max_attempts: u32) -> RejectPolicy {
            RejectPolicy {
                initial_backoff_secs: 100,
                max_backoff_secs: 1000,
                max_attempts,
            }
        }

        fn run(
            store: &MemoryStore,
            ledger: &Ledger,
            policy: RejectPolicy,
            now: i64,
        ) -> CycleReport {
            let settings = IngestSettings::default();
            let mut publisher = RecordingPublisher::default();
            outcome_report(
                Ingestor::new(store, &mut publisher, &settings)
                    .with_ledger(ledger, policy)
                    .run_cycle(&loc(), Path::new("/d"), now)
                    .unwrap(),
            )
        }

        #[test]
        fn rejected_file_backs_off() {
            let state = TempDir::new().unwrap();
            let ledger = Ledger::open_or_create(&state.path().join("ledger.db")).unwrap();
            let store = MemoryStore::default();
            store.insert("/d", NAME, "garbage");

            let first = run(&store, &ledger, policy(0), NOW);
            assert_eq!(first.rejected, 1);

            let during = run(&store, &ledger, policy(0), NOW + 50);
            assert_eq!(during.deferred, 1);
            assert_eq!(during.rejected, 0);

            let after = run(&store, &ledger, policy(0), NOW + 100);
            assert_eq!(after.rejected, 1);
            let entries = ledger.list().unwrap();
            assert_eq!(entries.len(), 1);
            assert_eq!(entries[0].attempts, 2);
        }

        #[test]
        fn rejected_file_is_quarantined_at_limit() {
            let state = TempDir::new().unwrap();
            let ledger = Ledger::open_or_create(&state.path().join("ledger.db")).unwrap();
            let store = MemoryStore::default();
            store.insert("/d", NAME, "garbage");

            run(&store, &ledger, policy(2), NOW);
            let second = run(&store, &ledger, policy(2), NOW + 1000);
            assert_eq!(second.quarantined, 1);
            assert_eq!(store.paths(), vec![PathBuf::from("/d/rejected").join(NAME)]);
            assert!(ledger.list().unwrap().is_empty());
        }

        #[test]
        fn fixed_file_clears_ledger() {
            let state = TempDir::new().unwrap();
            let ledger = Ledger::open_or_create(&state.path().join("ledger.db")).unwrap();
            let store = MemoryStore::default();
            store.insert("/d", NAME, "garbage");

            run(&store, &ledger, policy(0), NOW);
            assert_eq!(ledger.list().unwrap().len(), 1);

            store.insert("/d", NAME, &good_report());
            let report = run(&store, &ledger, policy(0), NOW + 1000);
            assert_eq!(report.ingested, 1);
            assert!(ledger.list().unwrap().is_empty());
        }

        #[test]
        fn failed_quarantine_keeps_attempts() {
            let dir = TempDir::new().unwrap();
            std::fs::write(dir.path().join(NAME), "garbage").unwrap();
            // A regular file where the quarantine directory should go.
            std::fs::write(dir.path().join("rejected"), "").unwrap();
            let ledger = Ledger::open_or_create(&dir.path().join("ledger.db")).unwrap();
            let settings = IngestSettings::default();

            let cycle = |now| {
                let mut publisher = RecordingPublisher::default();
                outcome_report(
                    Ingestor::new(&DiskStore, &mut publisher, &settings)
                        .with_ledger(&ledger, policy(2))
                        .run_cycle(&loc(), dir.path(), now)
                        .unwrap(),
                )
            };

            cycle(NOW);
            let second = cycle(NOW + 1000);
            assert_eq!(second.rejected, 1);
            assert_eq!(second.quarantined, 0);
            assert!(second.files[0].moved_to.is_none());
            assert!(dir.path().join(NAME).exists());

            let entries = ledger.list().unwrap();
            assert_eq!(entries.len(), 1);
            assert_eq!(entries[0].attempts, 2);

            // Still over the limit, so the next cycle tries the move again.
            let third = cycle(NOW + 2000);
            assert_eq!(third.rejected, 1);
            assert_eq!(third.deferred, 0);
            assert_eq!(ledger.list().unwrap()[0].attempts, 3);
        }

        #[test]
        fn broken_ledger_does_not_stop_ingestion() {
            let state = TempDir::new().unwrap();
            let db = state.path().join("ledger.db");
            let ledger = Ledger::open_or_create(&db).unwrap();
            rusqlite::Connection::open(&db)
                .unwrap()
                .execute_batch("DROP TABLE rejections;")
                .unwrap();

            let store = MemoryStore::default();
            store.insert("/d", NAME, &good_report());
            store.insert("/d", "Stability_20180111T165545.txt", &good_report());
            store.insert("/d", "Stability_20180112T165545.txt", "garbage");

            let report = run(&store, &ledger, policy(1), NOW);
            assert_eq!(report.ingested, 2);
            assert_eq!(report.rejected, 1);
            assert_eq!(report.quarantined, 0);
            assert_eq!(report.failed, 0);
            assert_eq!(report.samples, 2 * 16 * 3);
        }

        #[test]
        fn dry_run_leaves_ledger_untouched() {
            let state = TempDir::new().unwrap();
            let ledger = Ledger::open_or_create(&state.path().join("ledger.db")).unwrap();
            let store = MemoryStore::default();
            store.insert("/d", NAME, "garbage");
            let settings = IngestSettings {
                dry_run: true,
                ..Default::default()
            };
            let mut publisher = RecordingPublisher::default();

            let report = outcome_report(
                Ingestor::new(&store, &mut publisher, &settings)
                    .with_ledger(&ledger, policy(1))
                    .run_cycle(&loc(), Path::new("/d"), NOW)
                    .unwrap(),
            );
            assert_eq!(report.rejected, 1);
            assert_eq!(report.quarantined, 0);
            assert!(ledger.list().unwrap().is_empty());
            assert_eq!(store.paths(), vec![PathBuf::from("/d").join(NAME)]);
        }

        #[test]
        fn transient_failures_do_not_count() {
            let state = TempDir::new().unwrap();
            let ledger = Ledger::open_or_create(&state.path().join("ledger.db")).unwrap();
            let store = MemoryStore::default();
            store.insert("/d", NAME, &good_report());
            let settings = IngestSettings::default();
            let mut publisher = FailingPublisher { fail_after: 0 };

            let report = outcome_report(
                Ingestor::new(&store, &mut publisher, &settings)
                    .with_ledger(&ledger, policy(1))
                    .run_cycle(&loc(), Path::new("/d"), NOW)
                    .unwrap(),
            );
            assert_eq!(report.failed, 1);
            assert!(ledger.list().unwrap().is_empty());
        }
    }

    #[test]
    fn rejection_classification() {
        let header = FileError::Header(HeaderFormatError::Missing);
        assert!(header.is_rejection());
        let read = FileError::Read {
            path: PathBuf::from("x"),
            source: std::io::Error::other("boom"),
        };
        assert!(!read.is_rejection());
    }
}
