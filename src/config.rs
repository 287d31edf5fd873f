use crate::metric_name::{LocationError, ScannerLocation};
use crate::publish::MetricFilter;
use crate::report::ExpectedShape;
use crate::retry::RejectPolicy;
use serde::Deserialize;
use std::path::{Component, Path, PathBuf};

/// Upper bound on `format.expected_slices`; real scanners stay in the tens.
pub const MAX_SLICES: u32 = 1024;

/// Top-level configuration loaded from stability.toml.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    /// Parent of per-location export directories.
    pub base_dir: PathBuf,
    /// Where the ledger, lock files and last-run status live.
    pub state_dir: PathBuf,
    pub format: FormatConfig,
    pub ingest: IngestConfig,
    pub rejects: RejectsConfig,
    pub publisher: PublisherConfig,
    pub scanners: Vec<ScannerConfig>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct FormatConfig {
    pub file_prefix: String,
    pub expected_slices: u32,
    pub expected_measurements: u32,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Subdirectory of each search directory that receives ingested reports.
    pub ingested_dir: String,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RejectsConfig {
    pub enabled: bool,
    pub initial_backoff_secs: u64,
    pub max_backoff_secs: u64,
    pub max_attempts: u32,
    pub quarantine_dir: String,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct PublisherConfig {
    pub dry_run: bool,
    /// `-` for stdout.
    pub output: PathBuf,
    pub whitelist: Vec<String>,
    pub blacklist: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScannerConfig {
    pub location: String,
    #[serde(default)]
    pub search_dir: Option<PathBuf>,
}

/// A scanner entry after validation.
#[derive(Debug, Clone)]
pub struct Scanner {
    pub location: ScannerLocation,
    pub search_dir: PathBuf,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid scanner location: {0}")]
    Location(#[from] LocationError),
    #[error("scanner location {location} is configured twice")]
    DuplicateLocation { location: String },
    #[error("no scanners configured")]
    NoScanners,
    #[error("format.expected_slices must be at least 1")]
    ZeroSlices,
    #[error("format.expected_slices must be at most {max}, got {value}")]
    TooManySlices { max: u32, value: u32 },
    #[error("format.file_prefix must not be empty")]
    EmptyPrefix,
    #[error("{field} must be a single directory name, got {value:?}")]
    DirName { field: &'static str, value: String },
    #[error("invalid publisher filter pattern: {0}")]
    Filter(#[from] regex::Error),
}

impl CollectorConfig {
    /// Read and parse a TOML config file. Does not validate.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;
        toml::from_str(&contents).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Check everything that can be checked before touching the file system
    /// and resolve each scanner's search directory.
    pub fn validate(&self) -> Result<Vec<Scanner>, ConfigError> {
        if self.format.expected_slices == 0 {
            return Err(ConfigError::ZeroSlices);
        }
        if self.format.expected_slices > MAX_SLICES {
            return Err(ConfigError::TooManySlices {
                max: MAX_SLICES,
                value: self.format.expected_slices,
            });
        }
        if self.format.file_prefix.is_empty() {
            return Err(ConfigError::EmptyPrefix);
        }
        check_dir_name("ingest.ingested_dir", &self.ingest.ingested_dir)?;
        check_dir_name("rejects.quarantine_dir", &self.rejects.quarantine_dir)?;
        self.filter()?;

        if self.scanners.is_empty() {
            return Err(ConfigError::NoScanners);
        }

        let mut scanners: Vec<Scanner> = Vec::with_capacity(self.scanners.len());
        for entry in &self.scanners {
            let location = ScannerLocation::parse(&entry.location)?;
            if scanners.iter().any(|s| s.location == location) {
                return Err(ConfigError::DuplicateLocation {
                    location: location.to_string(),
                });
            }
            let search_dir = entry
                .search_dir
                .clone()
                .unwrap_or_else(|| self.base_dir.join(location.as_path()));
            scanners.push(Scanner {
                location,
                search_dir,
            });
        }
        Ok(scanners)
    }

    pub fn expected_shape(&self) -> ExpectedShape {
        ExpectedShape {
            slices: self.format.expected_slices,
            measurements: self.format.expected_measurements,
        }
    }

    /// The backoff policy, or `None` when the rejection ledger is off.
    pub fn reject_policy(&self) -> Option<RejectPolicy> {
        self.rejects.enabled.then_some(RejectPolicy {
            initial_backoff_secs: self.rejects.initial_backoff_secs,
            max_backoff_secs: self.rejects.max_backoff_secs,
            max_attempts: self.rejects.max_attempts,
        })
    }

    pub fn filter(&self) -> Result<MetricFilter, ConfigError> {
        Ok(MetricFilter::new(
            &self.publisher.whitelist,
            &self.publisher.blacklist,
        )?)
    }
}

fn check_dir_name(field: &'static str, value: &str) -> Result<(), ConfigError> {
    let mut components = Path::new(value).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => Err(ConfigError::DirName {
            field,
            value: value.to_string(),
        }),
    }
}

// --- Default implementations ---

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("/ncf/dicom-backups/_Scanner"),
            state_dir: PathBuf::from(".stability-collector"),
            format: FormatConfig::default(),
            ingest: IngestConfig::default(),
            rejects: RejectsConfig::default(),
            publisher: PublisherConfig::default(),
            scanners: Vec::new(),
        }
    }
}

impl Default for FormatConfig {
    fn default() -> Self {
        let shape = ExpectedShape::default();
        Self {
            file_prefix: "Stability".to_string(),
            expected_slices: shape.slices,
            expected_measurements: shape.measurements,
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            ingested_dir: "ingested".to_string(),
        }
    }
}

impl Default for RejectsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            initial_backoff_secs: 300,
            max_backoff_secs: 86_400,
            max_attempts: 0,
            quarantine_dir: "rejected".to_string(),
        }
    }
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            dry_run: false,
            output: PathBuf::from("-"),
            whitelist: Vec::new(),
            blacklist: Vec::new(),
        }
    }
}
