//! Timestamp recognition and the canonical `MM-DD|HH:MM:SS.mmm` rendering

use std::borrow::Cow;
use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use regex::Regex;

const CANONICAL_FORMAT: &str = "%m-%d|%H:%M:%S%.3f";

static CANONICAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\d{2}-\d{2}\|\d{2}:\d{2}:\d{2}\.\d{3}$").expect("canonical pattern is valid")
});

static COMPACT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{4})(\d{2})(\d{2})[T ]?(\d{2})(\d{2})(\d{2})(?:\.(\d{1,9}))?$")
        .expect("compact pattern is valid")
});

/// Offset-carrying layouts `parse_from_rfc3339` rejects
const OFFSET_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f%:z",
    "%Y-%m-%d %H:%M:%S%.f%z",
    "%Y-%m-%dT%H:%M:%S%.f%z",
];

/// Layouts without an offset, read as UTC
const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y/%m/%d %H:%M:%S%.f",
    "%Y/%m/%dT%H:%M:%S%.f",
];

/// Render any recognized timestamp in canonical form
///
/// Values already in canonical form are returned unchanged. Anything that
/// does not parse yields `None`; nothing is guessed.
pub fn canonicalize(value: &str) -> Option<String> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if CANONICAL.is_match(value) {
        return Some(value.to_string());
    }
    parse(value).map(format)
}

pub fn is_canonical(value: &str) -> bool {
    CANONICAL.is_match(value)
}

pub fn format(dt: NaiveDateTime) -> String {
    dt.format(CANONICAL_FORMAT).to_string()
}

/// Parse a timestamp into UTC
///
/// Accepts RFC3339 and its space-separated variant, slash-separated dates,
/// compact `YYYYMMDDTHHMMSS`, and epoch seconds, milliseconds, microseconds
/// or nanoseconds.
pub fn parse(value: &str) -> Option<NaiveDateTime> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    if value.bytes().all(|b| b.is_ascii_digit() || b == b'.') {
        if let Some(dt) = parse_epoch(value) {
            return Some(dt.naive_utc());
        }
    }

    if let Some(caps) = COMPACT.captures(value.trim_end_matches(['Z', 'z'])) {
        let num = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<u32>().ok());
        let nanos = caps.get(7).map(|m| fraction_nanos(m.as_str())).unwrap_or(0);
        let date = NaiveDate::from_ymd_opt(num(1)? as i32, num(2)?, num(3)?)?;
        return date.and_hms_nano_opt(num(4)?, num(5)?, num(6)?, nanos);
    }

    let value = decimal_point(value);

    if let Ok(dt) = DateTime::parse_from_rfc3339(&value) {
        return Some(dt.naive_utc());
    }
    for layout in OFFSET_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(&value, layout) {
            return Some(dt.naive_utc());
        }
    }

    let naive = value.trim_end_matches(['Z', 'z']);
    NAIVE_FORMATS
        .iter()
        .find_map(|layout| NaiveDateTime::parse_from_str(naive, layout).ok())
}

/// Python logging writes `12:00:00,123`
fn decimal_point(value: &str) -> Cow<'_, str> {
    let bytes = value.as_bytes();
    match value.find(',') {
        Some(pos)
            if pos > 0
                && bytes[pos - 1].is_ascii_digit()
                && bytes.get(pos + 1).is_some_and(u8::is_ascii_digit) =>
        {
            let mut owned = value.to_string();
            owned.replace_range(pos..pos + 1, ".");
            Cow::Owned(owned)
        }
        _ => Cow::Borrowed(value),
    }
}

/// Epoch values, classified by the digit count of the integer part
fn parse_epoch(value: &str) -> Option<DateTime<Utc>> {
    let (int, frac) = match value.split_once('.') {
        Some((int, frac)) => (int, Some(frac)),
        None => (value, None),
    };
    if frac.is_some_and(|f| f.is_empty() || !f.bytes().all(|b| b.is_ascii_digit())) {
        return None;
    }

    let n: i64 = int.parse().ok()?;
    let (secs, nanos) = match (int.len(), frac) {
        (10, frac) => (n, frac.map(fraction_nanos).unwrap_or(0)),
        (13, frac) => (
            n / 1_000,
            (n % 1_000) as u32 * 1_000_000 + frac.map(|f| fraction_nanos(f) / 1_000).unwrap_or(0),
        ),
        (16, None) => (n / 1_000_000, (n % 1_000_000) as u32 * 1_000),
        (19, None) => (n / 1_000_000_000, (n % 1_000_000_000) as u32),
        _ => return None,
    };

    DateTime::from_timestamp(secs, nanos)
}

/// Fractional-second digits as nanoseconds (extra precision is truncated)
fn fraction_nanos(digits: &str) -> u32 {
    let mut padded: String = digits.chars().take(9).collect();
    while padded.len() < 9 {
        padded.push('0');
    }
    padded.parse().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rfc3339() {
        assert_eq!(
            canonicalize("2024-01-02T03:04:05.678Z").as_deref(),
            Some("01-02|03:04:05.678")
        );
        assert_eq!(
            canonicalize("2024-01-02T03:04:05.678901234Z").as_deref(),
            Some("01-02|03:04:05.678")
        );
    }

    #[test]
    fn test_offset_converted_to_utc() {
        assert_eq!(
            canonicalize("2024-01-02T05:04:05+02:00").as_deref(),
            Some("01-02|03:04:05.000")
        );
        assert_eq!(
            canonicalize("2024-01-02 05:04:05.1+0200").as_deref(),
            Some("01-02|03:04:05.100")
        );
    }

    #[test]
    fn test_common_layouts() {
        assert_eq!(
            canonicalize("2024-01-02 03:04:05").as_deref(),
            Some("01-02|03:04:05.000")
        );
        assert_eq!(
            canonicalize("2024/01/02 03:04:05.5").as_deref(),
            Some("01-02|03:04:05.500")
        );
        assert_eq!(
            canonicalize("2024-01-02 03:04:05,123").as_deref(),
            Some("01-02|03:04:05.123")
        );
        assert_eq!(
            canonicalize("20240102T030405Z").as_deref(),
            Some("01-02|03:04:05.000")
        );
    }

    #[test]
    fn test_epoch() {
        assert_eq!(canonicalize("1704164645").as_deref(), Some("01-02|03:04:05.000"));
        assert_eq!(
            canonicalize("1704164645.25").as_deref(),
            Some("01-02|03:04:05.250")
        );
        assert_eq!(
            canonicalize("1704164645678").as_deref(),
            Some("01-02|03:04:05.678")
        );
        assert_eq!(
            canonicalize("1704164645678901").as_deref(),
            Some("01-02|03:04:05.678")
        );
        assert_eq!(
            canonicalize("1704164645678901234").as_deref(),
            Some("01-02|03:04:05.678")
        );
    }

    #[test]
    fn test_canonical_passes_through() {
        assert_eq!(
            canonicalize("12-31|23:59:59.999").as_deref(),
            Some("12-31|23:59:59.999")
        );
        assert!(is_canonical("01-02|03:04:05.678"));
        assert!(!is_canonical("01-02 03:04:05.678"));
    }

    #[test]
    fn test_unrecognized() {
        assert_eq!(canonicalize(""), None);
        assert_eq!(canonicalize("yesterday"), None);
        assert_eq!(canonicalize("2024-01-15"), None);
        assert_eq!(canonicalize("12345"), None);
        assert_eq!(canonicalize("1.2.3"), None);
    }
}
