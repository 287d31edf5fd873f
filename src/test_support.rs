//! Fixtures shared by unit tests.

use crate::metric_name::MetricSample;
use crate::publish::{PublishError, Publisher};
use crate::store::ReportStore;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

/// Render a well-formed report. Every cell value is unique
/// (`<slice>.<section><column>`), so tests can tell samples apart.
pub fn render_report(
    slices: u32,
    measurements: u32,
    channels: &str,
    sections: &[(&str, &[&str])],
) -> String {
    let width = slices.to_string().len().max(2);
    let mut text = format!(
        "Stability configuration: {slices} slices, {measurements} measurements, {channels} channels\n"
    );
    for (sec, (section_type, columns)) in sections.iter().enumerate() {
        text.push_str(&format!("\nStability {section_type} results:\n\nslice#"));
        for column in columns.iter() {
            text.push(' ');
            text.push_str(column);
        }
        text.push('\n');
        for slice in 1..=slices {
            text.push_str(&format!("{slice:>width$}"));
            for col in 0..columns.len() {
                text.push_str(&format!(" {slice}.{sec}{col}"));
            }
            text.push('\n');
        }
    }
    text
}

/// Keeps every sample it is given.
#[derive(Debug, Default)]
pub struct RecordingPublisher {
    pub samples: Vec<MetricSample>,
    pub flushes: u32,
}

impl RecordingPublisher {
    pub fn names(&self) -> Vec<&str> {
        self.samples.iter().map(|s| s.name.as_str()).collect()
    }
}

impl Publisher for RecordingPublisher {
    fn publish(&mut self, sample: &MetricSample) -> Result<(), PublishError> {
        self.samples.push(sample.clone());
        Ok(())
    }

    fn flush(&mut self) -> Result<(), PublishError> {
        self.flushes += 1;
        Ok(())
    }
}

/// Accepts `fail_after` samples, then fails every publish.
#[derive(Debug)]
pub struct FailingPublisher {
    pub fail_after: usize,
}

impl Publisher for FailingPublisher {
    fn publish(&mut self, sample: &MetricSample) -> Result<(), PublishError> {
        if self.fail_after == 0 {
            return Err(PublishError::Write {
                name: sample.name.clone(),
                source: io::Error::new(io::ErrorKind::BrokenPipe, "relay went away"),
            });
        }
        self.fail_after -= 1;
        Ok(())
    }
}

/// In-memory [`ReportStore`] keyed by full path.
#[derive(Debug, Default)]
pub struct MemoryStore {
    files: RefCell<BTreeMap<PathBuf, String>>,
}

impl MemoryStore {
    /// Add or replace `dir/name`.
    pub fn insert(&self, dir: &str, name: &str, text: &str) {
        self.files
            .borrow_mut()
            .insert(Path::new(dir).join(name), text.to_string());
    }

    /// All paths currently held, sorted.
    pub fn paths(&self) -> Vec<PathBuf> {
        self.files.borrow().keys().cloned().collect()
    }
}

impl ReportStore for MemoryStore {
    fn discover(&self, dir: &Path, prefix: &str) -> io::Result<Vec<PathBuf>> {
        Ok(self
            .files
            .borrow()
            .keys()
            .filter(|p| p.parent() == Some(dir))
            .filter(|p| {
                p.file_name()
                    .is_some_and(|n| n.to_string_lossy().starts_with(prefix))
            })
            .cloned()
            .collect())
    }

    fn read(&self, path: &Path) -> io::Result<String> {
        self.files
            .borrow()
            .get(path)
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no such report"))
    }

    fn relocate(&self, path: &Path, dest_dir: &Path) -> io::Result<PathBuf> {
        let mut files = self.files.borrow_mut();
        let text = files
            .remove(path)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no such report"))?;
        let name = path
            .file_name()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "no file name"))?;
        let dest = dest_dir.join(name);
        files.insert(dest.clone(), text);
        Ok(dest)
    }
}
