/// Report timestamps: every report embeds its acquisition time in the file
/// name (`Stability_20180110T165545.txt`). All samples from one report share
/// this instant.
use chrono::{Local, NaiveDateTime, TimeZone};
use regex::Regex;
use std::sync::LazyLock;

const TOKEN_FORMAT: &str = "%Y%m%dT%H%M%S";

static TOKEN_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{8}T\d{6})").unwrap());

#[derive(Debug, thiserror::Error)]
pub enum TimestampError {
    #[error("no YYYYMMDDTHHMMSS token in file name {filename:?}")]
    MissingToken { filename: String },
    #[error("invalid date-time token {token:?}: {source}")]
    Invalid {
        token: String,
        source: chrono::ParseError,
    },
    #[error("date-time token {token:?} does not exist in the local time zone")]
    Nonexistent { token: String },
    #[error("date-time token {token:?} resolves to epoch zero")]
    Zero { token: String },
}

/// Extract the local-time epoch (seconds) encoded in a report file name.
///
/// Ambiguous local times (DST fall-back) resolve to the earlier instant.
pub fn extract_epoch(filename: &str) -> Result<i64, TimestampError> {
    let token = TOKEN_PATTERN
        .captures(filename)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .ok_or_else(|| TimestampError::MissingToken {
            filename: filename.to_string(),
        })?;

    let naive = NaiveDateTime::parse_from_str(token, TOKEN_FORMAT).map_err(|e| {
        TimestampError::Invalid {
            token: token.to_string(),
            source: e,
        }
    })?;

    let local = Local
        .from_local_datetime(&naive)
        .earliest()
        .ok_or_else(|| TimestampError::Nonexistent {
            token: token.to_string(),
        })?;

    let epoch = local.timestamp();
    if epoch == 0 {
        return Err(TimestampError::Zero {
            token: token.to_string(),
        });
    }
    Ok(epoch)
}
