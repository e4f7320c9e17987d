//! # Time Utilities
//!
//! Conversions between the remote API's time representations and the
//! snapshot's.
//!
//! | Function | Description |
//! |----------|-------------|
//! | [`resolve_start_time`] | UTC timestamp + IANA zone -> wall clock in the reference zone |
//! | [`parse_clock_duration`] | `HH:MM:SS[.fff]` -> [`Duration`] |
//! | [`api_date`] | Day-granular date filter value (`YYYY-MM-DD`) |
//!
//! The [`duration_nanos`] module serializes durations as integer nanoseconds,
//! which is how existing snapshot files store them.

use std::time::Duration;

use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;

use crate::error::{PegasusError, Result};

const API_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";
const API_DATE_FORMAT: &str = "%Y-%m-%d";

/// Parse an IANA zone name. An empty name means UTC.
pub fn parse_timezone(name: &str) -> Result<Tz> {
    if name.is_empty() {
        return Ok(Tz::UTC);
    }
    name.parse::<Tz>()
        .map_err(|_| PegasusError::InvalidTimezone(name.to_string()))
}

/// Resolve a raw activity start time into the reference zone.
///
/// The API reports the instant in UTC alongside the zone the activity was
/// recorded in. The local wall clock in that zone is kept and re-labelled
/// with the reference zone, so a 7am run in Denver reads as 7am everywhere
/// in the snapshot.
pub fn resolve_start_time(timestamp: &str, zone: &str, reference: Tz) -> Result<DateTime<FixedOffset>> {
    let activity_tz = parse_timezone(zone)?;

    let instant = NaiveDateTime::parse_from_str(timestamp, API_TIMESTAMP_FORMAT)
        .map_err(|_| PegasusError::InvalidTimestamp(timestamp.to_string()))?;

    let wall_clock = Utc
        .from_utc_datetime(&instant)
        .with_timezone(&activity_tz)
        .naive_local();

    reference
        .from_local_datetime(&wall_clock)
        .earliest()
        .map(|t| t.fixed_offset())
        .ok_or_else(|| PegasusError::InvalidTimestamp(format!("{} does not exist in {}", wall_clock, reference)))
}

/// Longest duration a snapshot can hold: `i64::MAX` nanoseconds, the range
/// of the integer field existing snapshot files use.
pub const MAX_DURATION: Duration = Duration::from_nanos(i64::MAX as u64);

/// Parse an `HH:MM:SS[.fff]` clock duration.
///
/// The fractional part is read as a decimal fraction of a second. Values
/// above [`MAX_DURATION`] are rejected.
pub fn parse_clock_duration(raw: &str) -> Result<Duration> {
    let invalid = || PegasusError::InvalidDuration(raw.to_string());

    let (whole, frac) = match raw.split_once('.') {
        Some((w, f)) => (w, Some(f)),
        None => (raw, None),
    };

    let parts: Vec<&str> = whole.split(':').collect();
    if parts.len() != 3 {
        return Err(invalid());
    }

    let mut secs: u64 = 0;
    for (part, scale) in parts.iter().zip([3600u64, 60, 1]) {
        let value: u64 = part.trim().parse().map_err(|_| invalid())?;
        secs = value
            .checked_mul(scale)
            .and_then(|v| secs.checked_add(v))
            .ok_or_else(invalid)?;
    }

    let nanos = match frac {
        None => 0,
        Some(f) if f.is_empty() || !f.bytes().all(|b| b.is_ascii_digit()) => return Err(invalid()),
        Some(f) => {
            let digits: String = f.chars().chain(std::iter::repeat('0')).take(9).collect();
            digits.parse::<u32>().map_err(|_| invalid())?
        }
    };

    let duration = Duration::new(secs, nanos);
    if duration > MAX_DURATION {
        return Err(invalid());
    }
    Ok(duration)
}

/// Format an instant as the API's day-granular filter value.
pub fn api_date(t: &DateTime<Utc>) -> String {
    t.format(API_DATE_FORMAT).to_string()
}

/// Serde adapter for [`Duration`] as integer nanoseconds.
///
/// Writes at most [`MAX_DURATION`](super::MAX_DURATION). Reads any JSON
/// integer; negative values come from older writers and clamp to zero.
pub mod duration_nanos {
    use std::fmt;
    use std::time::Duration;

    use serde::de::{self, Visitor};
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        let nanos = d.as_nanos().min(i64::MAX as u128) as u64;
        s.serialize_u64(nanos)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        d.deserialize_any(NanosVisitor)
    }

    struct NanosVisitor;

    impl<'de> Visitor<'de> for NanosVisitor {
        type Value = Duration;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("an integer number of nanoseconds")
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<Duration, E> {
            Ok(Duration::from_nanos(v))
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<Duration, E> {
            Ok(Duration::from_nanos(v.max(0) as u64))
        }
    }
}
