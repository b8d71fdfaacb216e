//! Column encoding helpers
//!
//! UUIDs are stored as hyphenated TEXT and timestamps as fixed-width
//! RFC 3339 TEXT in UTC with millisecond precision, so string comparison in
//! SQL orders timestamps chronologically.

use crate::{Error, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use uuid::Uuid;

/// Encode a timestamp for storage (`2026-01-02T03:04:05.678Z`)
pub fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Decode a stored timestamp
pub fn parse_ts(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("Invalid timestamp '{}': {}", value, e)))
}

/// Decode a stored UUID
pub fn parse_uuid(value: &str) -> Result<Uuid> {
    Uuid::parse_str(value).map_err(|e| Error::Internal(format!("Invalid UUID '{}': {}", value, e)))
}
