//! RFC 2822 date formatting.

use chrono::{DateTime, FixedOffset, Local, TimeZone, Utc};

/// `Thu, 01 Jan 1970 00:00:00 +0000`; the day is always two digits.
const RFC2822_FORMAT: &str = "%a, %d %b %Y %H:%M:%S %z";

/// Formats a timestamp as an RFC 2822 date in UTC or the local zone.
#[must_use]
pub fn format_rfc2822<Tz: TimeZone>(date: &DateTime<Tz>, utc: bool) -> String {
    if utc {
        format_rfc2822_utc(date)
    } else {
        date.with_timezone(&Local).format(RFC2822_FORMAT).to_string()
    }
}

/// Formats a timestamp as an RFC 2822 date in UTC (`+0000`).
#[must_use]
pub fn format_rfc2822_utc<Tz: TimeZone>(date: &DateTime<Tz>) -> String {
    date.with_timezone(&Utc).format(RFC2822_FORMAT).to_string()
}

/// Formats the current time as an RFC 2822 date.
#[must_use]
pub fn now_rfc2822(utc: bool) -> String {
    format_rfc2822(&Utc::now(), utc)
}

/// Parses an RFC 2822 date, returning `None` if it does not conform.
#[must_use]
pub fn parse_rfc2822(text: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc2822(text.trim()).ok()
}

/// Returns true if `text` is a well-formed RFC 2822 date.
#[must_use]
pub fn is_rfc2822_date(text: &str) -> bool {
    parse_rfc2822(text).is_some()
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;

    fn at(millis: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(millis).unwrap()
    }

    #[test]
    fn test_utc_formatting() {
        let cases = [
            (0, "Thu, 01 Jan 1970 00:00:00 +0000"),
            (329629726785, "Thu, 12 Jun 1980 03:48:46 +0000"),
            (729629726785, "Sat, 13 Feb 1993 18:55:26 +0000"),
            (1129629726785, "Tue, 18 Oct 2005 10:02:06 +0000"),
            (1529629726785, "Fri, 22 Jun 2018 01:08:46 +0000"),
        ];
        for (millis, expected) in cases {
            assert_eq!(format_rfc2822_utc(&at(millis)), expected);
            assert_eq!(format_rfc2822(&at(millis), true), expected);
        }
    }

    #[test]
    fn test_local_formatting_is_valid() {
        for millis in [0, 329629726785, 729629726785, 1129629726785, 1529629726785] {
            let local = format_rfc2822(&at(millis), false);
            assert!(is_rfc2822_date(&local), "{local}");
            assert_eq!(parse_rfc2822(&local).unwrap().timestamp(), millis / 1000);
        }
    }

    #[test]
    fn test_is_rfc2822_date_rejects_garbage() {
        assert!(!is_rfc2822_date("yesterday"));
        assert!(!is_rfc2822_date("2018-06-22T01:08:46Z"));
        assert!(is_rfc2822_date(&now_rfc2822(true)));
    }
}
