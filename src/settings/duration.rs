//! Serde support for human-readable durations such as `500ms`, `1.5s`, `5m`
//! or `1m30s`. A bare number is read as a number of seconds.

use serde::de::{self, Visitor};
use serde::{Deserializer, Serializer};
use std::fmt;
use std::time::Duration;

const NANOS_PER_SEC: u128 = 1_000_000_000;

/// Parse a duration string made of `<number><unit>` segments.
///
/// Supported units: `ns`, `us` (or `µs`), `ms`, `s`, `m`, `h`. Numbers may
/// carry a fraction (`1.5s`). A plain number is a number of seconds.
pub fn parse_duration(input: &str) -> Result<Duration, String> {
    let s = input.trim();
    if s.is_empty() {
        return Err("empty duration".to_string());
    }
    if s.chars().all(|c| c.is_ascii_digit() || c == '.') {
        return to_duration(segment_nanos(s, NANOS_PER_SEC, input)?, input);
    }

    let mut total: u128 = 0;
    let mut rest = s;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or_else(|| format!("missing unit in duration {input:?}"))?;
        let (number, tail) = rest.split_at(number_len);

        let unit_len = tail
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(tail.len());
        let (unit, tail) = tail.split_at(unit_len);
        let unit_nanos: u128 = match unit {
            "ns" => 1,
            "us" | "µs" | "μs" => 1_000,
            "ms" => 1_000_000,
            "s" => NANOS_PER_SEC,
            "m" => 60 * NANOS_PER_SEC,
            "h" => 3_600 * NANOS_PER_SEC,
            unit => return Err(format!("unknown unit {unit:?} in duration {input:?}")),
        };

        total = total
            .checked_add(segment_nanos(number, unit_nanos, input)?)
            .ok_or_else(|| out_of_range(input))?;
        rest = tail;
    }

    to_duration(total, input)
}

/// Nanoseconds in `number` (digits with an optional fraction) of a unit.
fn segment_nanos(number: &str, unit_nanos: u128, input: &str) -> Result<u128, String> {
    let invalid = || format!("invalid duration {input:?}");
    let (whole, fraction) = number.split_once('.').unwrap_or((number, ""));
    if (whole.is_empty() && fraction.is_empty()) || fraction.contains('.') {
        return Err(invalid());
    }

    let whole: u128 = if whole.is_empty() {
        0
    } else {
        whole.parse().map_err(|_| out_of_range(input))?
    };
    let mut nanos = whole
        .checked_mul(unit_nanos)
        .ok_or_else(|| out_of_range(input))?;

    // digits past nanosecond precision of an hour cannot matter
    let fraction = &fraction[..fraction.len().min(18)];
    if !fraction.is_empty() {
        let digits: u128 = fraction.parse().map_err(|_| invalid())?;
        let scale = 10u128.pow(fraction.len() as u32);
        nanos = nanos
            .checked_add(digits * unit_nanos / scale)
            .ok_or_else(|| out_of_range(input))?;
    }
    Ok(nanos)
}

fn to_duration(nanos: u128, input: &str) -> Result<Duration, String> {
    let secs = u64::try_from(nanos / NANOS_PER_SEC).map_err(|_| out_of_range(input))?;
    Ok(Duration::new(secs, (nanos % NANOS_PER_SEC) as u32))
}

fn out_of_range(input: &str) -> String {
    format!("duration {input:?} is out of range")
}

/// Format a duration the way [`parse_duration`] reads it back.
pub fn format_duration(d: Duration) -> String {
    if d.is_zero() {
        return "0s".to_string();
    }
    let secs = d.as_secs();
    let sub = d.subsec_nanos();
    let mut out = String::new();
    if secs >= 3600 {
        out.push_str(&format!("{}h", secs / 3600));
    }
    if secs % 3600 >= 60 {
        out.push_str(&format!("{}m", secs % 3600 / 60));
    }
    if secs % 60 > 0 {
        out.push_str(&format!("{}s", secs % 60));
    }
    for (value, unit) in [(sub / 1_000_000, "ms"), (sub / 1_000 % 1_000, "us"), (sub % 1_000, "ns")] {
        if value > 0 {
            out.push_str(&format!("{}{}", value, unit));
        }
    }
    out
}

pub fn serialize<S>(d: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&format_duration(*d))
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    deserializer.deserialize_any(DurationVisitor)
}

struct DurationVisitor;

impl Visitor<'_> for DurationVisitor {
    type Value = Duration;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a duration such as \"10s\" or a number of seconds")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Duration, E> {
        parse_duration(v).map_err(E::custom)
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Duration, E> {
        Ok(Duration::from_secs(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Duration, E> {
        u64::try_from(v)
            .map(Duration::from_secs)
            .map_err(|_| E::custom("duration cannot be negative"))
    }
}
