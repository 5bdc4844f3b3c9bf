//! Millisecond timestamps and their ISO-8601 form.

use crate::{error::Result, Error, Timestamp};
use chrono::{DateTime, SecondsFormat, Utc};

/// Current wall-clock time in milliseconds since the epoch.
pub fn now_millis() -> Timestamp {
    Utc::now().timestamp_millis().max(0) as Timestamp
}

/// Format as `2026-01-01T00:00:00.000Z`.
pub fn to_iso8601(ts: Timestamp) -> String {
    let millis = i64::try_from(ts).unwrap_or(i64::MAX);
    DateTime::<Utc>::from_timestamp_millis(millis)
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
        .to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn parse_iso8601(value: &str) -> Result<Timestamp> {
    let parsed = DateTime::parse_from_rfc3339(value)
        .map_err(|e| Error::InvalidTimestamp(format!("{value}: {e}")))?;
    let millis = parsed.timestamp_millis();
    if millis < 0 {
        return Err(Error::InvalidTimestamp(value.to_string()));
    }
    Ok(millis as Timestamp)
}
