/// Metric namespace: `location.coil.section_type.column_label.slice`.
use crate::coil::CoilId;
use crate::report::Section;
use serde::Serialize;
use std::fmt;

/// Hierarchical scanner location such as `Harvard/Northwest/Bay1`.
///
/// Segments are non-empty and contain neither dots nor whitespace, so the
/// dotted form can't collide with another location.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScannerLocation {
    raw: String,
    segments: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LocationError {
    #[error("scanner location is empty")]
    Empty,
    #[error("scanner location {location:?} has an empty segment")]
    EmptySegment { location: String },
    #[error("scanner location segment {segment:?} contains '.' or whitespace")]
    InvalidSegment { segment: String },
}

impl ScannerLocation {
    /// Parse a `/`-separated location. A single leading or trailing `/` is
    /// tolerated.
    pub fn parse(raw: &str) -> Result<Self, LocationError> {
        let trimmed = raw.trim().trim_matches('/');
        if trimmed.is_empty() {
            return Err(LocationError::Empty);
        }

        let mut segments = Vec::new();
        for segment in trimmed.split('/') {
            if segment.is_empty() {
                return Err(LocationError::EmptySegment {
                    location: raw.to_string(),
                });
            }
            if segment.contains('.') || segment.chars().any(char::is_whitespace) {
                return Err(LocationError::InvalidSegment {
                    segment: segment.to_string(),
                });
            }
            segments.push(segment.to_string());
        }

        Ok(Self {
            raw: trimmed.to_string(),
            segments,
        })
    }

    /// Location in its native `/`-separated form.
    pub fn as_path(&self) -> &str {
        &self.raw
    }

    /// Location with separators rewritten to dots.
    pub fn dotted(&self) -> String {
        self.segments.join(".")
    }
}

impl fmt::Display for ScannerLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// One value ready for the publisher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricSample {
    pub name: String,
    /// Token exactly as it appeared in the report.
    pub value: String,
    pub timestamp: i64,
}

/// Build the dotted metric name for a single table cell.
///
/// `row_index` is the slice number printed on the row, never a position.
pub fn build_name(
    location: &ScannerLocation,
    coil: &CoilId,
    section_type: &str,
    column_label: &str,
    row_index: u32,
) -> String {
    format!(
        "{}.{}.{}.{}.{}",
        location.dotted(),
        coil,
        section_type,
        column_label,
        row_index
    )
}

/// Every sample in a section, row by row, column by column.
pub fn section_samples<'a>(
    location: &'a ScannerLocation,
    coil: &'a CoilId,
    section: &'a Section,
    timestamp: i64,
) -> impl Iterator<Item = MetricSample> + 'a {
    section.rows.iter().flat_map(move |row| {
        section
            .labels
            .iter()
            .zip(&row.values)
            .map(move |(label, value)| MetricSample {
                name: build_name(location, coil, &section.section_type, label, row.slice),
                value: value.clone(),
                timestamp,
            })
    })
}
