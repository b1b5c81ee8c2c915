//! Error types for `bitemp-core`.

use chrono::NaiveDateTime;
use thiserror::Error;

use crate::time::minute;

/// A batch (or the initial table) could not be loaded.
#[derive(Debug, Error)]
pub enum LoadError {
  #[error("required column '{0}' not found")]
  MissingColumn(&'static str),

  #[error("io error: {0}")]
  Io(#[from] std::io::Error),

  #[error("csv error: {0}")]
  Csv(#[from] csv::Error),
}

/// A caller-supplied time could not be understood.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unrecognised date/time {0:?}")]
pub struct TimeParseError(pub String);

/// Why a query produced no answer.
///
/// Each empty-result variant names the filter stage that emptied the
/// candidate set, so callers can tell "unknown patient" apart from "nothing
/// recorded yet" or "nothing valid then".
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
  #[error("invalid time: {0}")]
  InvalidTime(#[from] TimeParseError),

  #[error(
    "No records found for patient '{first_name} {last_name}' with LOINC code '{code}'."
  )]
  NoRecords {
    first_name: String,
    last_name:  String,
    code:       String,
  },

  #[error(
    "No records for this LOINC code were known to the system at {}.",
    minute(.as_of)
  )]
  CodeNotKnownAsOf { as_of: NaiveDateTime },

  #[error(
    "No measurement found for the specified valid time: {}.",
    minute(.valid_time)
  )]
  NoValidMeasurement { valid_time: NaiveDateTime },

  #[error("No records found for this patient and criteria.")]
  NoMatchingRecords,

  #[error("No records were known to the system at {}.", minute(.as_of))]
  NothingKnownAsOf { as_of: NaiveDateTime },

  #[error("No measurements found that started in the specified valid time range.")]
  NothingInRange,

  #[error("An unexpected error occurred: {0}")]
  Unexpected(String),
}

impl QueryError {
  /// `true` for the staged "filter emptied the result" outcomes.
  pub fn is_not_found(&self) -> bool {
    !matches!(self, Self::InvalidTime(_) | Self::Unexpected(_))
  }
}

pub type Result<T, E = LoadError> = std::result::Result<T, E>;
