//! Stability report parsing.
//!
//! A report is a configuration line followed by any number of result tables:
//!
//! ```text
//! Stability configuration: 16 slices, 500 measurements, 32 channels
//!
//! Stability SNR results:
//!
//! slice# Mean[%] StdDev
//!  1 98.5 0.3
//!  2 98.1 0.4
//! ...
//! 16 97.9 0.2
//! ```
//!
//! Parsing is line-oriented: find a section title, expect the blank line and
//! the `slice#` header, then accumulate exactly one row per slice. A table
//! that deviates anywhere is dropped whole and reported as a defect; the
//! remaining tables are still returned.

use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;

static CONFIGURATION_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^Stability configuration: (\d+) slices, (\d+) measurements, (\d+) channels\s*$",
    )
    .unwrap()
});

static SECTION_TITLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^Stability ([A-Za-z0-9_]+) results:\s*$").unwrap());

const HEADER_MARKER: &str = "slice#";

/// Slice and measurement counts a report must declare to be accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpectedShape {
    pub slices: u32,
    pub measurements: u32,
}

impl Default for ExpectedShape {
    fn default() -> Self {
        Self {
            slices: 16,
            measurements: 500,
        }
    }
}

/// Values declared on a report's configuration line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelConfiguration {
    pub slices: u32,
    pub measurements: u32,
    /// Raw channel count as printed; resolved to a coil separately.
    pub channels: String,
}

/// One slice row of a section table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    /// Physical slice number printed at the start of the row (1-based).
    pub slice: u32,
    /// Value tokens, aligned with the section's labels.
    pub values: Vec<String>,
}

/// One result table, e.g. `Stability SNR results:`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub section_type: String,
    /// Sanitized column labels.
    pub labels: Vec<String>,
    pub rows: Vec<Row>,
}

impl Section {
    /// Number of samples this section yields (rows × columns).
    pub fn sample_count(&self) -> usize {
        self.rows.len() * self.labels.len()
    }
}

/// A report whose configuration line was accepted.
#[derive(Debug, Clone)]
pub struct ParsedReport {
    pub configuration: ChannelConfiguration,
    pub sections: Vec<Section>,
    /// Tables that were dropped, in report order.
    pub defects: Vec<SectionShapeError>,
}

impl ParsedReport {
    pub fn sample_count(&self) -> usize {
        self.sections.iter().map(Section::sample_count).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HeaderFormatError {
    #[error("report is empty")]
    Missing,
    #[error("unrecognized configuration line {line:?}")]
    Unrecognized { line: String },
    #[error("report declares {found} slices, expected {expected}")]
    SliceCount { expected: u32, found: u32 },
    #[error("report declares {found} measurements, expected {expected}")]
    MeasurementCount { expected: u32, found: u32 },
}

/// A result table that could not be read as a complete slice × column grid.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("section {section_type:?} at line {line}: {defect}")]
pub struct SectionShapeError {
    pub section_type: String,
    /// 1-based line number of the section title.
    pub line: usize,
    pub defect: ShapeDefect,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ShapeDefect {
    #[error("expected a blank line after the title")]
    MissingBlankLine,
    #[error("expected a `slice#` header row")]
    MissingHeader,
    #[error("header row has no columns")]
    NoColumns,
    #[error("column {raw:?} has no alphanumeric characters")]
    EmptyLabel { raw: String },
    #[error("column label {label:?} appears twice")]
    DuplicateLabel { label: String },
    #[error("section type already seen earlier in the report")]
    DuplicateSection,
    #[error("expected row for slice {expected}, found {found:?}")]
    UnexpectedRow { expected: u32, found: String },
    #[error("slice {slice} has {found} values for {expected} columns")]
    ColumnCount {
        slice: u32,
        expected: usize,
        found: usize,
    },
    #[error("more than {expected} slice rows")]
    ExtraRow { expected: u32 },
}

/// Turn a raw header token into a namespace-safe label.
///
/// `[%]` becomes `pct`, then everything that is not an ASCII letter or digit
/// is dropped. Applying it twice gives the same result as applying it once.
pub fn sanitize_label(raw: &str) -> String {
    raw.replace("[%]", "pct")
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect()
}

/// Parse a full report.
///
/// Fails only when the configuration line is missing, malformed, or declares
/// counts other than `expected`. Table defects are collected in
/// [`ParsedReport::defects`] instead.
pub fn parse(raw_text: &str, expected: ExpectedShape) -> Result<ParsedReport, HeaderFormatError> {
    let lines: Vec<&str> = raw_text.lines().collect();
    let first = lines.first().ok_or(HeaderFormatError::Missing)?;
    let configuration = parse_configuration(first, expected)?;

    let mut sections: Vec<Section> = Vec::new();
    let mut defects = Vec::new();
    let mut seen = HashSet::new();

    let mut cursor = 1;
    while cursor < lines.len() {
        let Some(section_type) = section_title(lines[cursor]) else {
            cursor += 1;
            continue;
        };
        let title_line = cursor + 1;

        let (result, next) = read_section(&lines, cursor + 1, section_type, expected.slices);
        cursor = next;

        let outcome = result.and_then(|section| {
            if seen.insert(section.section_type.clone()) {
                Ok(section)
            } else {
                Err(ShapeDefect::DuplicateSection)
            }
        });
        match outcome {
            Ok(section) => sections.push(section),
            Err(defect) => defects.push(SectionShapeError {
                section_type: section_type.to_string(),
                line: title_line,
                defect,
            }),
        }
    }

    Ok(ParsedReport {
        configuration,
        sections,
        defects,
    })
}

/// Parse and validate the configuration line against the expected shape.
pub fn parse_configuration(
    line: &str,
    expected: ExpectedShape,
) -> Result<ChannelConfiguration, HeaderFormatError> {
    let line = line.trim_start_matches('\u{feff}');
    let unrecognized = || HeaderFormatError::Unrecognized {
        line: line.to_string(),
    };

    let caps = CONFIGURATION_LINE.captures(line).ok_or_else(unrecognized)?;
    let slices: u32 = caps[1].parse().map_err(|_| unrecognized())?;
    let measurements: u32 = caps[2].parse().map_err(|_| unrecognized())?;

    if slices != expected.slices {
        return Err(HeaderFormatError::SliceCount {
            expected: expected.slices,
            found: slices,
        });
    }
    if measurements != expected.measurements {
        return Err(HeaderFormatError::MeasurementCount {
            expected: expected.measurements,
            found: measurements,
        });
    }

    Ok(ChannelConfiguration {
        slices,
        measurements,
        channels: caps[3].to_string(),
    })
}

fn section_title(line: &str) -> Option<&str> {
    SECTION_TITLE
        .captures(line)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

/// Width of the right-aligned slice number field.
fn slice_field_width(slices: u32) -> usize {
    slices.to_string().len().max(2)
}

/// Read one table starting just after its title.
///
/// Returns the table (or the defect that ended it) and the index at which
/// scanning should resume. On a defect the offending line is not consumed so
/// that a following section title is still found.
fn read_section(
    lines: &[&str],
    start: usize,
    section_type: &str,
    slices: u32,
) -> (Result<Section, ShapeDefect>, usize) {
    let mut cursor = start;

    match lines.get(cursor) {
        Some(line) if line.trim().is_empty() => cursor += 1,
        _ => return (Err(ShapeDefect::MissingBlankLine), cursor),
    }

    let header = match lines.get(cursor).and_then(|l| l.strip_prefix(HEADER_MARKER)) {
        Some(rest) => rest,
        None => return (Err(ShapeDefect::MissingHeader), cursor),
    };
    cursor += 1;

    let labels = match header_labels(header) {
        Ok(labels) => labels,
        Err(defect) => return (Err(defect), cursor),
    };

    let width = slice_field_width(slices);
    let mut rows = Vec::new();
    for slice in 1..=slices {
        let Some(line) = lines.get(cursor) else {
            return (
                Err(ShapeDefect::UnexpectedRow {
                    expected: slice,
                    found: "<end of report>".to_string(),
                }),
                cursor,
            );
        };

        let prefix = format!("{slice:>width$}");
        let Some(rest) = line.strip_prefix(prefix.as_str()) else {
            return (
                Err(ShapeDefect::UnexpectedRow {
                    expected: slice,
                    found: line.to_string(),
                }),
                cursor,
            );
        };

        let values: Vec<String> = rest.split_whitespace().map(str::to_string).collect();
        if values.len() != labels.len() {
            return (
                Err(ShapeDefect::ColumnCount {
                    slice,
                    expected: labels.len(),
                    found: values.len(),
                }),
                cursor + 1,
            );
        }
        rows.push(Row { slice, values });
        cursor += 1;
    }

    let overflow = lines
        .get(cursor)
        .and_then(|l| l.get(..width))
        .and_then(|p| p.trim().parse::<u32>().ok())
        == slices.checked_add(1);
    if overflow {
        return (Err(ShapeDefect::ExtraRow { expected: slices }), cursor);
    }

    (
        Ok(Section {
            section_type: section_type.to_string(),
            labels,
            rows,
        }),
        cursor,
    )
}

fn header_labels(header: &str) -> Result<Vec<String>, ShapeDefect> {
    let mut labels = Vec::new();
    for raw in header.split_whitespace() {
        let label = sanitize_label(raw);
        if label.is_empty() {
            return Err(ShapeDefect::EmptyLabel {
                raw: raw.to_string(),
            });
        }
        if labels.contains(&label) {
            return Err(ShapeDefect::DuplicateLabel { label });
        }
        labels.push(label);
    }
    if labels.is_empty() {
        return Err(ShapeDefect::NoColumns);
    }
    Ok(labels)
}
