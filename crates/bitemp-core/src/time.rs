//! Timestamp handling.
//!
//! Every stored timestamp is timezone-naive. Anything that arrives with an
//! offset goes through [`to_naive`], which keeps the wall-clock reading and
//! drops the offset, so both query paths compare like with like.

use std::fmt;

use chrono::{
  DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeZone,
  format::{DelayedFormat, StrftimeItems},
};

use crate::error::TimeParseError;

/// Stop time of an interval that has not (yet) been closed.
pub const END_OF_TIME: NaiveDateTime = NaiveDateTime::MAX;

/// Lower bound used when a range query has no start.
pub const BEGINNING_OF_TIME: NaiveDateTime = NaiveDateTime::MIN;

const OFFSET_FORMATS: &[&str] = &[
  "%Y-%m-%d %H:%M:%S%.f%:z",
  "%Y-%m-%d %H:%M:%S%.f%z",
  "%Y-%m-%d %H:%M%:z",
  "%Y-%m-%dT%H:%M%:z",
];

const DATETIME_FORMATS: &[&str] = &[
  "%Y-%m-%d %H:%M:%S%.f",
  "%Y-%m-%dT%H:%M:%S%.f",
  "%Y-%m-%d %H:%M",
  "%Y-%m-%dT%H:%M",
  // Zulu without seconds; a zero offset leaves the wall clock as is.
  "%Y-%m-%dT%H:%MZ",
  "%Y-%m-%d %H:%MZ",
  "%Y/%m/%d %H:%M:%S%.f",
  "%Y/%m/%d %H:%M",
  "%m/%d/%Y %H:%M:%S",
  "%m/%d/%Y %H:%M",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y", "%Y/%m/%d"];

/// Strip the offset from a zoned timestamp, keeping its local wall-clock time.
pub fn to_naive<Tz: TimeZone>(dt: &DateTime<Tz>) -> NaiveDateTime {
  dt.naive_local()
}

/// Parse an ISO-like date or date-time string. Date-only input means midnight.
pub fn parse_timestamp(text: &str) -> Option<NaiveDateTime> {
  let s = text.trim();
  if s.is_empty() {
    return None;
  }

  if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
    return Some(to_naive(&dt));
  }
  for fmt in OFFSET_FORMATS {
    if let Ok(dt) = DateTime::parse_from_str(s, fmt) {
      return Some(to_naive(&dt));
    }
  }
  for fmt in DATETIME_FORMATS {
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
      return Some(dt);
    }
  }
  DATE_FORMATS
    .iter()
    .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
    .map(|d| d.and_time(NaiveTime::MIN))
}

/// Parse a table cell, coercing anything unusable to `None`.
pub fn parse_cell(cell: &serde_json::Value) -> Option<NaiveDateTime> {
  match cell {
    serde_json::Value::String(s) => parse_timestamp(s),
    _ => None,
  }
}

/// A query time with no time-of-day component selects the "which interval was
/// in effect that day" tie-break.
pub fn is_date_only(t: NaiveDateTime) -> bool { t.time() == NaiveTime::MIN }

/// Minute-resolution rendering used in user-facing messages.
pub fn minute(t: &NaiveDateTime) -> DelayedFormat<StrftimeItems<'static>> {
  t.format("%Y-%m-%d %H:%M")
}

// ─── TimeInput ───────────────────────────────────────────────────────────────

/// A time argument to a query: either text still to be parsed or an already
/// typed value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimeInput {
  Text(String),
  At(NaiveDateTime),
}

impl TimeInput {
  /// Resolve to the naive timestamp used for comparisons.
  pub fn resolve(&self) -> Result<NaiveDateTime, TimeParseError> {
    match self {
      Self::Text(s) => {
        parse_timestamp(s).ok_or_else(|| TimeParseError(s.clone()))
      }
      Self::At(t) => Ok(*t),
    }
  }
}

impl fmt::Display for TimeInput {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Text(s) => f.write_str(s),
      Self::At(t) => write!(f, "{t}"),
    }
  }
}

impl From<&str> for TimeInput {
  fn from(s: &str) -> Self { Self::Text(s.to_owned()) }
}

impl From<String> for TimeInput {
  fn from(s: String) -> Self { Self::Text(s) }
}

impl From<NaiveDateTime> for TimeInput {
  fn from(t: NaiveDateTime) -> Self { Self::At(t) }
}

impl From<NaiveDate> for TimeInput {
  fn from(d: NaiveDate) -> Self { Self::At(d.and_time(NaiveTime::MIN)) }
}

impl<Tz: TimeZone> From<DateTime<Tz>> for TimeInput {
  fn from(dt: DateTime<Tz>) -> Self { Self::At(to_naive(&dt)) }
}
