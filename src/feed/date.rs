//! Timestamp resolution for feed dates.
//!
//! Feeds in the wild mix RFC 822 dates (RSS) and ISO 8601 dates (Atom), with
//! numeric offsets or zone abbreviations. Formats are tried in a fixed order
//! and the first successful parse wins. An unparseable date is not an error:
//! the item simply has no publication time.

use chrono::{DateTime, FixedOffset, Utc};

/// Resolves a feed timestamp to an absolute point in time.
///
/// Tries, in order: RFC 822 with a numeric offset or a named zone (weekday
/// and seconds optional), then ISO 8601 with a numeric offset or `Z`, with
/// or without fractional seconds. Returns `None`
/// when nothing matches.
///
/// # Examples
///
/// ```
/// use feedsync::feed::parse_date;
///
/// let date = parse_date("Mon, 01 Jan 2024 12:00:00 GMT").unwrap();
/// assert_eq!(date.to_rfc3339(), "2024-01-01T12:00:00+00:00");
///
/// assert!(parse_date("yesterday").is_none());
/// ```
pub fn parse_date(input: &str) -> Option<DateTime<Utc>> {
    let s = input.trim();
    if s.is_empty() {
        return None;
    }

    parse_rfc822(s)
        .or_else(|| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

fn parse_rfc822(s: &str) -> Option<DateTime<FixedOffset>> {
    if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
        return Some(dt);
    }
    // chrono knows GMT and UT but not the common "UTC" spelling
    let (local, zone) = s.rsplit_once(' ')?;
    if zone.eq_ignore_ascii_case("UTC") {
        return DateTime::parse_from_rfc2822(&format!("{} +0000", local)).ok();
    }
    None
}
