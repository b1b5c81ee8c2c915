//! Facts — one bi-temporal measurement row — and the raw tabular batches they
//! are normalized from.
//!
//! A fact carries two independent time axes: the valid-time interval
//! `[valid_start_time, valid_stop_time)` during which the measurement was true,
//! and the `transaction_time` at which the system learned about it. Facts are
//! never updated; corrections arrive as new facts with a later transaction
//! time.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ─── Raw input ───────────────────────────────────────────────────────────────

/// Tabular input as produced by a loader: arbitrary-cased column names and
/// untyped cells. Rows shorter than `columns` are treated as null-padded.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawBatch {
  pub columns: Vec<String>,
  #[serde(default)]
  pub rows:    Vec<Vec<Value>>,
}

impl RawBatch {
  pub fn new<I, S>(columns: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    Self {
      columns: columns.into_iter().map(Into::into).collect(),
      rows:    Vec::new(),
    }
  }

  /// Builder-style row append.
  pub fn with_row<I, V>(mut self, row: I) -> Self
  where
    I: IntoIterator<Item = V>,
    V: Into<Value>,
  {
    self.push_row(row);
    self
  }

  pub fn push_row<I, V>(&mut self, row: I)
  where
    I: IntoIterator<Item = V>,
    V: Into<Value>,
  {
    self.rows.push(row.into_iter().map(Into::into).collect());
  }

  pub fn len(&self) -> usize { self.rows.len() }

  pub fn is_empty(&self) -> bool { self.rows.is_empty() }
}

// ─── Fact ────────────────────────────────────────────────────────────────────

/// A single normalized measurement.
///
/// Serializes to a flat record: the named fields plus every extra attribute
/// column at the top level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fact {
  pub first_name:       Option<String>,
  pub last_name:        Option<String>,
  /// Canonical code: trimmed, with any spreadsheet `.0` artifact removed.
  #[serde(rename = "loinc_code")]
  pub code:             String,
  pub concept_name:     String,
  #[serde(default)]
  pub value:            Value,
  /// `None` when the source value could not be parsed.
  pub valid_start_time: Option<NaiveDateTime>,
  /// [`crate::time::END_OF_TIME`] when the interval is still open.
  pub valid_stop_time:  NaiveDateTime,
  /// `None` when the source value could not be parsed.
  pub transaction_time: Option<NaiveDateTime>,
  #[serde(flatten)]
  pub attributes:       Map<String, Value>,
}

impl Fact {
  /// Case-insensitive match on both names. A missing name never matches.
  pub fn matches_subject(&self, first_name: &str, last_name: &str) -> bool {
    eq_ignore_case(self.first_name.as_deref(), first_name)
      && eq_ignore_case(self.last_name.as_deref(), last_name)
  }

  pub fn matches_code(&self, code: &str) -> bool {
    self.code.trim() == code.trim()
  }

  pub fn matches_concept(&self, concept_name: &str) -> bool {
    self.concept_name.to_lowercase() == concept_name.to_lowercase()
  }

  /// Recorded no later than `as_of`.
  pub fn known_as_of(&self, as_of: NaiveDateTime) -> bool {
    self.transaction_time.is_some_and(|tx| tx <= as_of)
  }

  /// Half-open containment: start inclusive, stop exclusive.
  pub fn valid_at(&self, t: NaiveDateTime) -> bool {
    self.valid_start_time.is_some_and(|start| start <= t) && self.valid_stop_time > t
  }

  /// The interval *starts* inside `[from, until)`; the stop time is ignored.
  pub fn started_within(&self, from: NaiveDateTime, until: NaiveDateTime) -> bool {
    self
      .valid_start_time
      .is_some_and(|start| start >= from && start < until)
  }

  /// The fact as a flat attribute → value map.
  pub fn to_record(&self) -> serde_json::Result<Map<String, Value>> {
    match serde_json::to_value(self)? {
      Value::Object(map) => Ok(map),
      _ => Ok(Map::new()),
    }
  }
}

fn eq_ignore_case(stored: Option<&str>, wanted: &str) -> bool {
  stored.is_some_and(|s| s.to_lowercase() == wanted.to_lowercase())
}

/// Canonical form of a code cell: stringified, trimmed, and without the
/// trailing `.0` that numeric spreadsheet cells pick up.
pub fn canonical_code(cell: &Value) -> String {
  let raw = match cell {
    Value::String(s) => s.clone(),
    Value::Null => String::new(),
    other => other.to_string(),
  };
  let trimmed = raw.trim();
  trimmed.strip_suffix(".0").unwrap_or(trimmed).to_owned()
}
