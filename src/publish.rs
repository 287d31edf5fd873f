//! Sample publishing.
//!
//! Everything downstream of extraction goes through [`Publisher`]. The
//! shipped sink writes one plaintext line per sample
//! (`<name> <value> <timestamp>`), either to stdout or to a file that a
//! relay picks up. Dry-run mode logs what would be written instead.

use crate::metric_name::MetricSample;
use regex::Regex;
use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Whether samples actually leave the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishMode {
    Live,
    DryRun,
}

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("failed to open publisher output {}: {source}", .path.display())]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to write sample {name}: {source}")]
    Write {
        name: String,
        source: std::io::Error,
    },
    #[error("failed to flush publisher output: {source}")]
    Flush { source: std::io::Error },
}

/// Destination for extracted samples.
pub trait Publisher {
    /// Hand one sample downstream. An error means the sample may not have
    /// been delivered.
    fn publish(&mut self, sample: &MetricSample) -> Result<(), PublishError>;

    /// Make everything accepted so far durable downstream.
    fn flush(&mut self) -> Result<(), PublishError> {
        Ok(())
    }
}

/// Render a sample as a plaintext protocol line, newline included.
pub fn format_line(sample: &MetricSample) -> String {
    format!("{} {} {}\n", sample.name, sample.value, sample.timestamp)
}

/// Line-oriented sink over any writer.
pub struct PlaintextPublisher<W: Write> {
    out: W,
    mode: PublishMode,
    published: u64,
}

impl<W: Write> PlaintextPublisher<W> {
    pub fn new(out: W, mode: PublishMode) -> Self {
        Self {
            out,
            mode,
            published: 0,
        }
    }

    /// Samples accepted so far (including dry-run ones).
    pub fn published(&self) -> u64 {
        self.published
    }
}

impl PlaintextPublisher<Box<dyn Write>> {
    /// Open the configured output: `-` is stdout, anything else a file
    /// opened for appending. In dry-run mode nothing is opened.
    pub fn open(output: &Path, mode: PublishMode) -> Result<Self, PublishError> {
        let out: Box<dyn Write> = if mode == PublishMode::DryRun || output == Path::new("-") {
            Box::new(std::io::stdout())
        } else {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(output)
                .map_err(|e| PublishError::Open {
                    path: output.to_path_buf(),
                    source: e,
                })?;
            Box::new(BufWriter::new(file))
        };
        Ok(Self::new(out, mode))
    }
}

impl<W: Write> Publisher for PlaintextPublisher<W> {
    fn publish(&mut self, sample: &MetricSample) -> Result<(), PublishError> {
        match self.mode {
            PublishMode::DryRun => {
                tracing::info!(
                    metric = %sample.name,
                    value = %sample.value,
                    timestamp = sample.timestamp,
                    "dry run, not publishing"
                );
            }
            PublishMode::Live => {
                self.out
                    .write_all(format_line(sample).as_bytes())
                    .map_err(|e| PublishError::Write {
                        name: sample.name.clone(),
                        source: e,
                    })?;
            }
        }
        self.published += 1;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), PublishError> {
        if self.mode == PublishMode::DryRun {
            return Ok(());
        }
        self.out
            .flush()
            .map_err(|e| PublishError::Flush { source: e })
    }
}

/// Whitelist/blacklist over metric names. Patterns match anywhere in the
/// name unless anchored.
#[derive(Debug, Clone, Default)]
pub struct MetricFilter {
    whitelist: Vec<Regex>,
    blacklist: Vec<Regex>,
}

impl MetricFilter {
    pub fn new(whitelist: &[String], blacklist: &[String]) -> Result<Self, regex::Error> {
        let compile = |patterns: &[String]| {
            patterns
                .iter()
                .map(|p| Regex::new(p))
                .collect::<Result<Vec<_>, _>>()
        };
        Ok(Self {
            whitelist: compile(whitelist)?,
            blacklist: compile(blacklist)?,
        })
    }

    /// An empty whitelist allows everything not blacklisted.
    pub fn allows(&self, name: &str) -> bool {
        let whitelisted =
            self.whitelist.is_empty() || self.whitelist.iter().any(|r| r.is_match(name));
        whitelisted && !self.blacklist.iter().any(|r| r.is_match(name))
    }
}

/// Applies a [`MetricFilter`] in front of another publisher.
pub struct FilteredPublisher<P> {
    inner: P,
    filter: MetricFilter,
    dropped: u64,
}

impl<P: Publisher> FilteredPublisher<P> {
    pub fn new(inner: P, filter: MetricFilter) -> Self {
        Self {
            inner,
            filter,
            dropped: 0,
        }
    }

    /// Samples discarded by the filter so far.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }
}

impl<P: Publisher> Publisher for FilteredPublisher<P> {
    fn publish(&mut self, sample: &MetricSample) -> Result<(), PublishError> {
        if self.filter.allows(&sample.name) {
            self.inner.publish(sample)
        } else {
            self.dropped += 1;
            tracing::trace!(metric = %sample.name, "filtered out");
            Ok(())
        }
    }

    fn flush(&mut self) -> Result<(), PublishError> {
        self.inner.flush()
    }
}
