//! Conversions between the textual and tick-based time values found in a manifest and the integer
//! microseconds used throughout the resolved model.
//
// All arithmetic here is integer arithmetic. Segment boundaries are always derived from a running
// tick count in the template's own timescale and converted once, so that rounding never compounds
// over the thousands of segments in a long presentation.

use chrono::{DateTime, TimeDelta, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use crate::DashSegmentsError;


pub const MICROS_PER_SECOND: i64 = 1_000_000;

lazy_static! {
    // Only the time part of an xs:duration is accepted, matching the attributes (minBufferTime,
    // mediaPresentationDuration, Period@start...) that manifests use in practice.
    static ref XS_TIME_DURATION: Regex = Regex::new(concat!(
        r"^PT",
        r"(?:(?P<hours>\d+)H)?",
        r"(?:(?P<minutes>\d+)M)?",
        r"(?:(?P<seconds>\d+)(?:\.(?P<fraction>\d+))?S)?$")).unwrap();
}


fn invalid_duration(text: &str, why: &str) -> DashSegmentsError {
    DashSegmentsError::InvalidDuration(format!("{text:?}: {why}"))
}

fn component(text: &str, digits: Option<regex::Match>, micros_per_unit: i64) -> Result<i64, DashSegmentsError> {
    match digits {
        None => Ok(0),
        Some(m) => m.as_str().parse::<i64>()
            .ok()
            .and_then(|v| v.checked_mul(micros_per_unit))
            .ok_or_else(|| invalid_duration(text, "component out of range")),
    }
}

/// Parse a duration of the form `PT[nH][nM][n[.f]S]` into microseconds.
///
/// Hours and minutes are integers, seconds may carry a fractional part (digits beyond microsecond
/// precision are truncated). Missing components count as zero, but at least one component must be
/// present.
pub fn parse_duration(text: &str) -> Result<i64, DashSegmentsError> {
    let caps = XS_TIME_DURATION.captures(text.trim())
        .ok_or_else(|| invalid_duration(text, "expecting PT[nH][nM][n[.f]S]"))?;
    if caps.name("hours").is_none() &&
        caps.name("minutes").is_none() &&
        caps.name("seconds").is_none() {
            return Err(invalid_duration(text, "empty duration"));
        }
    let hours = component(text, caps.name("hours"), 3600 * MICROS_PER_SECOND)?;
    let minutes = component(text, caps.name("minutes"), 60 * MICROS_PER_SECOND)?;
    let seconds = component(text, caps.name("seconds"), MICROS_PER_SECOND)?;
    let mut fraction = 0;
    if let Some(f) = caps.name("fraction") {
        let digits = &f.as_str()[..f.as_str().len().min(6)];
        // digits is at most 6 ASCII digits, so this can't overflow
        fraction = format!("{digits:0<6}").parse::<i64>()
            .map_err(|_| invalid_duration(text, "bad fractional seconds"))?;
    }
    hours.checked_add(minutes)
        .and_then(|v| v.checked_add(seconds))
        .and_then(|v| v.checked_add(fraction))
        .ok_or_else(|| invalid_duration(text, "duration out of range"))
}

fn saturate(v: i128) -> i64 {
    v.clamp(i64::MIN as i128, i64::MAX as i128) as i64
}

/// Convert a value in `timescale` ticks per second to microseconds, rounding towards negative
/// infinity. A zero timescale is treated as 1.
pub fn time_to_micros(time: i64, timescale: u64) -> i64 {
    let ts = timescale.max(1) as i128;
    saturate((time as i128 * MICROS_PER_SECOND as i128).div_euclid(ts))
}

/// Convert microseconds to ticks of `timescale` per second, rounding towards negative infinity. A
/// zero timescale is treated as 1.
pub fn micros_to_time(micros: i64, timescale: u64) -> i64 {
    let ts = timescale.max(1) as i128;
    saturate((micros as i128 * ts).div_euclid(MICROS_PER_SECOND as i128))
}

/// Signed distance from `earlier` to `later` in microseconds.
pub fn micros_between(later: &DateTime<Utc>, earlier: &DateTime<Utc>) -> i64 {
    let delta: TimeDelta = *later - *earlier;
    delta.num_microseconds()
        .unwrap_or_else(|| delta.num_milliseconds().saturating_mul(1000))
}

/// Parse the `MPD@availabilityStartTime` attribute (`yyyy-MM-ddTHH:mm:ssZ`, UTC). A 19-character
/// value without an offset is taken to be UTC.
pub fn parse_availability_time(text: &str) -> Result<DateTime<Utc>, DashSegmentsError> {
    let mut s = text.trim().to_string();
    if s.len() == 19 {
        s.push('Z');
    }
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DashSegmentsError::InvalidFormat(format!("date-time {text:?}: {e}")))
}

/// Parse an HTTP `Date` header value, such as `Sun, 06 Nov 1994 08:49:37 GMT`.
pub fn parse_http_date(text: &str) -> Result<DateTime<Utc>, DashSegmentsError> {
    DateTime::parse_from_rfc2822(text.trim())
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DashSegmentsError::InvalidFormat(format!("HTTP date {text:?}: {e}")))
}
