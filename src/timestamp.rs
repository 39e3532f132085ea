//! ==============================================================================
//! timestamp.rs - best-effort date/time parsing
//! ==============================================================================
//!
//! purpose:
//!     sensors in the field are configured by hand and post timestamps in
//!     whatever format their firmware happens to print. instead of locking
//!     onto one layout we try a list of common ones and normalize to utc.
//!
//! accepted shapes:
//!     - rfc 3339 / iso 8601 with `Z` or an offset ("2023-01-01T00:00:00Z")
//!     - rfc 2822 ("Sun, 01 Jan 2023 00:00:00 +0000")
//!     - naive date-times and dates, read as utc ("2023-01-01 00:00:00")
//!     - ansi c / unix `date` output ("Sun Jan  1 00:00:00 UTC 2023")
//!     - all-digit values: epoch seconds, ms, us, ns, YYYYMMDD, YYYYMMDDhhmmss
//!
//! relationships:
//!     - used by: ingest.rs (step 4 of the pipeline)
//!
//! ==============================================================================

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};

/// layouts carrying an explicit offset
const OFFSET_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f%:z",
    "%Y-%m-%dT%H:%M:%S%.f%z",
    "%Y-%m-%d %H:%M:%S%.f%:z",
    "%Y-%m-%d %H:%M:%S%.f%z",
    "%Y-%m-%d %H:%M:%S%.f %:z",
    "%Y-%m-%d %H:%M:%S%.f %z",
    "%Y-%m-%dT%H:%M%:z",
    "%Y-%m-%d %H:%M %z",
    "%a %b %e %H:%M:%S %z %Y",
    "%d %b %Y %H:%M:%S %z",
];

/// layouts without an offset; interpreted as utc
const NAIVE_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M:%S%.f",
    "%Y/%m/%d %H:%M",
    "%m/%d/%Y %H:%M:%S%.f",
    "%m/%d/%Y %H:%M",
    "%d.%m.%Y %H:%M:%S%.f",
    "%a %b %e %H:%M:%S %Y",
    "%a, %d %b %Y %H:%M:%S",
    "%d %b %Y %H:%M:%S",
    "%B %d, %Y %H:%M:%S",
    "%Y%m%d%H%M%S",
];

const NAIVE_DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%m/%d/%Y",
    "%d.%m.%Y",
    "%B %d, %Y",
    "%b %d, %Y",
    "%d %B %Y",
    "%d %b %Y",
    "%Y%m%d",
];

/// utc zone names that show up in unix `date` and http-style stamps
const UTC_NAMES: &[&str] = &[" UTC", " GMT", " Z"];

/// parse `raw` into a utc instant, or `None` when no known layout matches
pub fn parse_any(raw: &str) -> Option<DateTime<Utc>> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }

    if s.bytes().all(|b| b.is_ascii_digit()) {
        return parse_digits(s);
    }

    if let Ok(t) = DateTime::parse_from_rfc3339(s) {
        return Some(t.with_timezone(&Utc));
    }
    if let Ok(t) = DateTime::parse_from_rfc2822(s) {
        return Some(t.with_timezone(&Utc));
    }
    for fmt in OFFSET_FORMATS {
        if let Ok(t) = DateTime::parse_from_str(s, fmt) {
            return Some(t.with_timezone(&Utc));
        }
    }

    // "Z"/"UTC"/"GMT" suffixes on otherwise naive layouts
    let naive = strip_utc_name(s);
    for fmt in NAIVE_DATETIME_FORMATS {
        if let Ok(t) = NaiveDateTime::parse_from_str(naive, fmt) {
            return Some(Utc.from_utc_datetime(&t));
        }
    }
    for fmt in NAIVE_DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(naive, fmt) {
            return d.and_hms_opt(0, 0, 0).map(|t| Utc.from_utc_datetime(&t));
        }
    }

    // "Sun Jan  1 00:00:00 UTC 2023"
    for name in UTC_NAMES {
        if let Some((head, year)) = s.rsplit_once(' ') {
            if let Some(head) = head.strip_suffix(name) {
                let joined = format!("{head} {year}");
                if let Ok(t) = NaiveDateTime::parse_from_str(&joined, "%a %b %e %H:%M:%S %Y") {
                    return Some(Utc.from_utc_datetime(&t));
                }
            }
        }
    }

    None
}

fn strip_utc_name(s: &str) -> &str {
    for name in UTC_NAMES {
        if let Some(rest) = s.strip_suffix(name) {
            return rest.trim_end();
        }
    }
    s.strip_suffix('Z').unwrap_or(s)
}

/// all-digit input: the length decides the unit
fn parse_digits(s: &str) -> Option<DateTime<Utc>> {
    match s.len() {
        8 => NaiveDate::parse_from_str(s, "%Y%m%d")
            .ok()?
            .and_hms_opt(0, 0, 0)
            .map(|t| Utc.from_utc_datetime(&t)),
        14 => NaiveDateTime::parse_from_str(s, "%Y%m%d%H%M%S")
            .ok()
            .map(|t| Utc.from_utc_datetime(&t)),
        1..=10 => DateTime::from_timestamp(s.parse().ok()?, 0),
        13 => DateTime::from_timestamp_millis(s.parse().ok()?),
        16 => DateTime::from_timestamp_micros(s.parse().ok()?),
        19 => Some(DateTime::from_timestamp_nanos(s.parse().ok()?)),
        _ => None,
    }
}
