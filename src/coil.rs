/// Channel count to coil resolution.
///
/// The channel count printed on a report's configuration line is the number of
/// physical receive channels, which does not always match the coil designation
/// used in the metric namespace. All known counts live in one table.
use std::fmt;

/// Raw channel count (as printed) → canonical coil identifier.
const COIL_TABLE: &[(&str, &str)] = &[("32", "32"), ("48", "64"), ("64", "64")];

/// Canonical coil identifier, e.g. `"64"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CoilId(&'static str);

impl CoilId {
    pub fn as_str(&self) -> &str {
        self.0
    }
}

impl fmt::Display for CoilId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown channel count {raw:?} (known: {})", known_channel_counts().join(", "))]
pub struct ResolutionError {
    pub raw: String,
}

/// Resolve a raw channel count to its coil identifier.
///
/// Surrounding whitespace is ignored; anything else must match a table entry
/// exactly.
pub fn resolve(raw_channel_count: &str) -> Result<CoilId, ResolutionError> {
    let raw = raw_channel_count.trim();
    COIL_TABLE
        .iter()
        .find(|(channels, _)| *channels == raw)
        .map(|(_, coil)| CoilId(coil))
        .ok_or_else(|| ResolutionError {
            raw: raw.to_string(),
        })
}

/// Every raw channel count the resolver accepts, in table order.
pub fn known_channel_counts() -> Vec<&'static str> {
    COIL_TABLE.iter().map(|(channels, _)| *channels).collect()
}
