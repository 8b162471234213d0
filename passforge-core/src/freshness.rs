//! Freshness markers: HTTP dates, update tags, and the not-modified test.

use chrono::{DateTime, Datelike, SecondsFormat, Timelike, Utc};

/// Whether a pass last updated at `updated_at` has changed since the
/// client's `marker`.
///
/// Compared by calendar components down to the second, never by duration
/// subtraction: a marker equal to `updated_at` at second granularity is not
/// modified, and only a strictly later server timestamp counts as modified.
/// Sub-second jitter from formatting round-trips therefore never flips the
/// result.
pub fn is_modified_since(updated_at: DateTime<Utc>, marker: DateTime<Utc>) -> bool {
    calendar_key(&updated_at) > calendar_key(&marker)
}

fn calendar_key(ts: &DateTime<Utc>) -> (i32, u32, u32, u32, u32, u32) {
    (
        ts.year(),
        ts.month(),
        ts.day(),
        ts.hour(),
        ts.minute(),
        ts.second(),
    )
}

/// Format a timestamp as an HTTP-date (`Last-Modified`).
pub fn format_http_date(ts: DateTime<Utc>) -> String {
    ts.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Parse an HTTP-date (`If-Modified-Since`).
pub fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(value.trim())
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}

/// Format a `passesUpdatedSince` tag.
pub fn format_update_tag(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a `passesUpdatedSince` tag.
pub fn parse_update_tag(tag: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(tag.trim())
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn at(h: u32, m: u32, s: u32, micros: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 19, h, m, s).unwrap() + Duration::microseconds(micros)
    }

    #[test]
    fn equal_second_is_not_modified() {
        let updated = at(12, 0, 0, 700_000);
        assert!(!is_modified_since(updated, at(12, 0, 0, 0)));
        assert!(!is_modified_since(updated, updated));
    }

    #[test]
    fn one_second_earlier_marker_is_modified() {
        assert!(is_modified_since(at(12, 0, 0, 0), at(11, 59, 59, 0)));
    }

    #[test]
    fn later_marker_is_not_modified() {
        assert!(!is_modified_since(at(12, 0, 0, 0), at(12, 0, 1, 0)));
    }

    #[test]
    fn day_rollover_compares_by_calendar() {
        let before_midnight = Utc.with_ymd_and_hms(2026, 12, 31, 23, 59, 59).unwrap();
        let after_midnight = Utc.with_ymd_and_hms(2027, 1, 1, 0, 0, 0).unwrap();
        assert!(is_modified_since(after_midnight, before_midnight));
        assert!(!is_modified_since(before_midnight, after_midnight));
    }

    #[test]
    fn http_date_roundtrip_drops_subseconds() {
        let updated = at(8, 5, 9, 250_000);
        let header = format_http_date(updated);
        assert_eq!(header, "Mon, 19 Oct 2026 08:05:09 GMT");

        let marker = parse_http_date(&header).unwrap();
        assert_eq!(marker, at(8, 5, 9, 0));
        assert!(!is_modified_since(updated, marker));
    }

    #[test]
    fn rejects_malformed_http_date() {
        assert!(parse_http_date("yesterday").is_none());
    }

    #[test]
    fn update_tag_keeps_microseconds() {
        let ts = at(8, 5, 9, 123_456);
        let tag = format_update_tag(ts);
        assert_eq!(tag, "2026-10-19T08:05:09.123456Z");
        assert_eq!(parse_update_tag(&tag), Some(ts));
        assert_eq!(parse_update_tag("not-a-tag"), None);
    }
}
