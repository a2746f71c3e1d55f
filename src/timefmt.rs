//! Timestamp codec. RFC 3339 is the only accepted wire format; everything is
//! converted to unix milliseconds at the boundary. The `YYYY-MM-DD hh:mm AM`
//! rendering exists for human-facing messages only and is never parsed.

use chrono::{DateTime, SecondsFormat, Utc};

use crate::model::Ms;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimestampError {
    pub input: String,
    pub reason: String,
}

impl std::fmt::Display for TimestampError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid timestamp {:?}: {}", self.input, self.reason)
    }
}

impl std::error::Error for TimestampError {}

pub fn parse_rfc3339(input: &str) -> Result<Ms, TimestampError> {
    DateTime::parse_from_rfc3339(input.trim())
        .map(|dt| dt.timestamp_millis())
        .map_err(|e| TimestampError {
            input: input.to_string(),
            reason: e.to_string(),
        })
}

pub fn to_rfc3339(ms: Ms) -> String {
    match DateTime::<Utc>::from_timestamp_millis(ms) {
        Some(dt) => dt.to_rfc3339_opts(SecondsFormat::AutoSi, true),
        None => ms.to_string(),
    }
}

/// `2026-10-17 09:30 AM`, UTC.
pub fn human(ms: Ms) -> String {
    match DateTime::<Utc>::from_timestamp_millis(ms) {
        Some(dt) => dt.format("%Y-%m-%d %I:%M %p").to_string(),
        None => ms.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_utc_and_offsets() {
        let utc = parse_rfc3339("2026-10-17T10:00:00Z").unwrap();
        let offset = parse_rfc3339("2026-10-17T12:00:00+02:00").unwrap();
        assert_eq!(utc, offset);
        assert_eq!(utc, 1_792_231_200_000);
    }

    #[test]
    fn rejects_the_legacy_display_format() {
        let err = parse_rfc3339("2026-10-17 10:00 AM").unwrap_err();
        assert_eq!(err.input, "2026-10-17 10:00 AM");
        assert!(err.to_string().contains("invalid timestamp"));
    }

    #[test]
    fn formats_back_to_rfc3339() {
        assert_eq!(to_rfc3339(1_792_231_200_000), "2026-10-17T10:00:00Z");
        assert_eq!(to_rfc3339(1_792_231_200_250), "2026-10-17T10:00:00.250Z");
    }

    #[test]
    fn human_uses_twelve_hour_clock() {
        assert_eq!(human(1_792_231_200_000), "2026-10-17 10:00 AM");
        assert_eq!(human(1_792_231_200_000 + 4 * 3_600_000), "2026-10-17 02:00 PM");
    }
}
