//! Date normalization.
//!
//! Every source date is reduced to a UTC instant; the canonical textual form
//! is ISO-8601 with millisecond precision (`2024-01-05T00:00:00.000Z`), which
//! sorts lexically and matches what the site's scripts produce.

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use regex::Regex;
use serde::Serializer;
use std::sync::OnceLock;

/// Parse a `M/D/YYYY` annotation into midnight UTC of that calendar day.
///
/// Returns `None` for anything that is not exactly that shape or that names
/// a day the calendar does not have (`2/30/2024`, `13/40/2024`).
pub fn parse_mdy(text: &str) -> Option<DateTime<Utc>> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"^(\d{1,2})/(\d{1,2})/(\d{4})$").unwrap());

    let caps = re.captures(text.trim())?;
    let month: u32 = caps[1].parse().ok()?;
    let day: u32 = caps[2].parse().ok()?;
    let year: i32 = caps[3].parse().ok()?;

    let date = NaiveDate::from_ymd_opt(year, month, day)?;
    Some(date.and_hms_opt(0, 0, 0)?.and_utc())
}

/// Parse an RFC 3339 timestamp such as the catalog's `publishedAt`.
pub fn parse_published(text: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

pub fn format_canonical(date: &DateTime<Utc>) -> String {
    date.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// `serialize_with` helper: canonical string, or `null` when unresolved.
pub fn serialize_canonical<S: Serializer>(
    date: &Option<DateTime<Utc>>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match date {
        Some(d) => serializer.serialize_str(&format_canonical(d)),
        None => serializer.serialize_none(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_mdy_is_midnight_utc() {
        let d = parse_mdy("1/5/2024").unwrap();
        assert_eq!(format_canonical(&d), "2024-01-05T00:00:00.000Z");

        let d = parse_mdy("12/31/1999").unwrap();
        assert_eq!(format_canonical(&d), "1999-12-31T00:00:00.000Z");
    }

    #[test]
    fn test_leap_day() {
        assert!(parse_mdy("2/29/2024").is_some());
        assert!(parse_mdy("2/29/2023").is_none());
    }

    #[test]
    fn test_malformed_mdy_rejected() {
        for bad in ["13/40/2024", "2/30/2024", "", "0/1/2024", "1/5/24", "2024-01-05", "1/5/2024x"] {
            assert!(parse_mdy(bad).is_none(), "accepted {:?}", bad);
        }
    }

    #[test]
    fn test_parse_published_normalizes_offset() {
        let d = parse_published("2024-03-10T22:15:00+02:00").unwrap();
        assert_eq!(format_canonical(&d), "2024-03-10T20:15:00.000Z");
        assert!(parse_published("yesterday").is_none());
    }
}
