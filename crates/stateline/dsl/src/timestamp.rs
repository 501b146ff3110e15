//! Strict wait-timestamp parsing
//!
//! Wait targets require the full ISO-8601 profile: date, a literal `T`
//! separator and an explicit timezone (`Z` or a numeric offset). A
//! space-separated date-time or a missing timezone is rejected even
//! though common parsers accept them, and impossible calendar or clock
//! values (month 13, hour 25) are rejected rather than normalized.
//! Fractional seconds are accepted to nanosecond precision.

use crate::errors::{DslError, DslResult};
use chrono::{DateTime, Utc};

/// Parse a wait timestamp, strictly.
pub fn parse_timestamp(text: &str) -> DslResult<DateTime<Utc>> {
    let invalid = || DslError::InvalidTimestamp(text.to_string());

    // chrono tolerates a lowercase or missing separator in some entry
    // points, so the shape is pinned down before handing it over.
    let bytes = text.as_bytes();
    if bytes.len() < 11 || bytes[10] != b'T' {
        return Err(invalid());
    }
    let time_part = &text[11..];
    if !time_part.ends_with('Z') && !time_part.contains('+') && !time_part.contains('-') {
        return Err(invalid());
    }

    let parsed = DateTime::parse_from_rfc3339(text).map_err(|_| invalid())?;
    Ok(parsed.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    #[test]
    fn test_accepts_utc_and_offsets() {
        assert!(parse_timestamp("2016-03-14T01:59:00Z").is_ok());
        assert!(parse_timestamp("2016-03-14T01:59:00+01:30").is_ok());
        assert!(parse_timestamp("2016-03-14T01:59:00-05:00").is_ok());
    }

    #[test]
    fn test_accepts_fractional_seconds() {
        let ts = parse_timestamp("2016-03-14T01:59:00.123456789Z").unwrap();
        assert_eq!(ts.nanosecond(), 123_456_789);
    }

    #[test]
    fn test_rejects_missing_t_separator() {
        assert!(parse_timestamp("2016-03-14 01:59:00Z").is_err());
        assert!(parse_timestamp("2016-03-14").is_err());
    }

    #[test]
    fn test_rejects_missing_timezone() {
        assert!(parse_timestamp("2016-03-14T01:59:00").is_err());
    }

    #[test]
    fn test_rejects_impossible_values() {
        assert!(parse_timestamp("2016-13-14T01:59:00Z").is_err());
        assert!(parse_timestamp("2016-03-14T25:59:00Z").is_err());
        assert!(parse_timestamp("2016-02-30T01:59:00Z").is_err());
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(parse_timestamp("not a timestamp").is_err());
        assert!(parse_timestamp("{% $.when %}").is_err());
    }
}
