//! HTTP header dates.
//!
//! Parsing is locale independent and accepts the RFC 1123, RFC 850,
//! Netscape cookie and asctime layouts. Output is always RFC 1123.

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use rand::Rng;

const HEADER_TIME_FORMATS: [&str; 5] = [
    "%a, %d %b %Y %H:%M:%S",
    "%a, %d-%b-%Y %H:%M:%S",
    "%a, %d-%b-%y %H:%M:%S",
    "%A, %d-%b-%Y %H:%M:%S",
    "%A %b %e %H:%M:%S %Y",
];

/// Parse a header date; trailing text such as `GMT` is ignored.
pub fn parse_header_time(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    HEADER_TIME_FORMATS.iter().find_map(|fmt| {
        NaiveDateTime::parse_and_remainder(value, fmt)
            .ok()
            .map(|(parsed, _)| parsed.and_utc())
    })
}

/// Render a timestamp as `Sun, 06 Nov 1994 08:49:37 GMT`.
pub fn format_header_time(time: DateTime<Utc>) -> String {
    time.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Current time in header format, shifted by `offset_secs`.
pub fn http_time(offset_secs: i64) -> String {
    format_header_time(Utc::now() + Duration::seconds(offset_secs))
}

/// Uniform random value in `1..=range`; zero for non-positive ranges.
pub fn pick_from_range(range: i64) -> i64 {
    if range <= 0 {
        return 0;
    }
    rand::thread_rng().gen_range(1..=range)
}

/// Move `time` by a random amount of up to `range_secs` seconds,
/// keeping the sign of `range_secs`.
pub fn randomize(time: DateTime<Utc>, range_secs: i64) -> DateTime<Utc> {
    let delta = pick_from_range(range_secs.abs());
    let signed = if range_secs < 0 { -delta } else { delta };
    time + Duration::seconds(signed)
}
