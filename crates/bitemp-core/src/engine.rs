//! The bi-temporal query engine.
//!
//! Both query shapes are linear scans over a read-locked view of the live
//! fact table, narrowing the candidate set stage by stage:
//!
//! | stage | point-in-time | history |
//! |-------|---------------|---------|
//! | subject | names + code | names, then code or concept name |
//! | as-of | `transaction_time <= T` | `transaction_time <= T` |
//! | valid time | `start <= V < stop` | `from <= start < until` |
//!
//! An empty stage ends the query with a [`QueryError`] naming that stage.

use std::{
  fmt,
  panic::{self, AssertUnwindSafe},
  sync::Arc,
};

use chrono::{Local, NaiveDateTime};
use serde::Serialize;

use crate::{
  error::{LoadError, QueryError},
  fact::{Fact, RawBatch},
  lookup::CodeLookup,
  table::{AppendReport, SharedFactTable},
  time::{BEGINNING_OF_TIME, END_OF_TIME, TimeInput, is_date_only},
};

/// Source of "now" for queries that omit a transaction time.
pub type Clock = Arc<dyn Fn() -> NaiveDateTime + Send + Sync>;

fn wall_clock() -> NaiveDateTime { Local::now().naive_local() }

// ─── Query types ─────────────────────────────────────────────────────────────

/// "What was `code` for this patient at `valid_time`, as known at
/// `transaction_time`?"
#[derive(Debug, Clone)]
pub struct PointInTimeQuery {
  pub first_name:       String,
  pub last_name:        String,
  pub code:             String,
  pub valid_time:       TimeInput,
  /// Defaults to the engine clock.
  pub transaction_time: Option<TimeInput>,
}

impl PointInTimeQuery {
  pub fn new(
    first_name: impl Into<String>,
    last_name: impl Into<String>,
    code: impl Into<String>,
    valid_time: impl Into<TimeInput>,
  ) -> Self {
    Self {
      first_name:       first_name.into(),
      last_name:        last_name.into(),
      code:             code.into(),
      valid_time:       valid_time.into(),
      transaction_time: None,
    }
  }

  pub fn as_of(mut self, transaction_time: impl Into<TimeInput>) -> Self {
    self.transaction_time = Some(transaction_time.into());
    self
  }
}

/// Every measurement for a patient whose validity started in
/// `[valid_start, valid_end)`, as known at `transaction_time`.
#[derive(Debug, Clone, Default)]
pub struct HistoryQuery {
  pub first_name:       String,
  pub last_name:        String,
  /// Takes precedence over `concept_name` when both are set.
  pub code:             Option<String>,
  pub concept_name:     Option<String>,
  pub valid_start:      Option<TimeInput>,
  pub valid_end:        Option<TimeInput>,
  pub transaction_time: Option<TimeInput>,
}

impl HistoryQuery {
  pub fn new(first_name: impl Into<String>, last_name: impl Into<String>) -> Self {
    Self {
      first_name: first_name.into(),
      last_name: last_name.into(),
      ..Self::default()
    }
  }

  pub fn code(mut self, code: impl Into<String>) -> Self {
    self.code = Some(code.into());
    self
  }

  pub fn concept_name(mut self, concept_name: impl Into<String>) -> Self {
    self.concept_name = Some(concept_name.into());
    self
  }

  pub fn valid_from(mut self, start: impl Into<TimeInput>) -> Self {
    self.valid_start = Some(start.into());
    self
  }

  pub fn valid_until(mut self, end: impl Into<TimeInput>) -> Self {
    self.valid_end = Some(end.into());
    self
  }

  pub fn as_of(mut self, transaction_time: impl Into<TimeInput>) -> Self {
    self.transaction_time = Some(transaction_time.into());
    self
  }
}

/// Result of a history query, ordered by `valid_start_time` ascending.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct History {
  pub records: Vec<Fact>,
  pub count:   usize,
}

// ─── Evaluation ──────────────────────────────────────────────────────────────

fn resolve_or(
  input: Option<&TimeInput>,
  default: NaiveDateTime,
) -> Result<NaiveDateTime, QueryError> {
  Ok(input.map(TimeInput::resolve).transpose()?.unwrap_or(default))
}

/// Treat blank filter strings as absent.
fn filter_value(value: &Option<String>) -> Option<&str> {
  value.as_deref().filter(|s| !s.trim().is_empty())
}

/// The candidate with the greatest key; the earliest in table order wins ties.
fn latest_by<'a, K: Ord>(
  candidates: &[&'a Fact],
  key: impl Fn(&Fact) -> K,
) -> Option<&'a Fact> {
  candidates.iter().copied().fold(None, |best, f| match best {
    Some(b) if key(b) >= key(f) => Some(b),
    _ => Some(f),
  })
}

/// Evaluate a point-in-time query over `facts`, using `now` when the query
/// has no transaction time.
pub fn point_in_time(
  facts: &[Fact],
  query: &PointInTimeQuery,
  now: NaiveDateTime,
) -> Result<Fact, QueryError> {
  let valid_time = query.valid_time.resolve()?;
  let as_of = resolve_or(query.transaction_time.as_ref(), now)?;

  let subject: Vec<&Fact> = facts
    .iter()
    .filter(|f| {
      f.matches_subject(&query.first_name, &query.last_name) && f.matches_code(&query.code)
    })
    .collect();
  if subject.is_empty() {
    return Err(QueryError::NoRecords {
      first_name: query.first_name.clone(),
      last_name:  query.last_name.clone(),
      code:       query.code.clone(),
    });
  }

  let known: Vec<&Fact> = subject.into_iter().filter(|f| f.known_as_of(as_of)).collect();
  if known.is_empty() {
    return Err(QueryError::CodeNotKnownAsOf { as_of });
  }

  let candidates: Vec<&Fact> = known.into_iter().filter(|f| f.valid_at(valid_time)).collect();
  tracing::debug!(candidates = candidates.len(), %valid_time, %as_of, "point-in-time candidates");

  // A date-only question asks which interval was in effect that day; a
  // question with a time of day asks for the most recent correction.
  let winner = if is_date_only(valid_time) {
    latest_by(&candidates, |f| f.valid_start_time)
  } else {
    latest_by(&candidates, |f| f.transaction_time)
  };

  winner
    .cloned()
    .ok_or(QueryError::NoValidMeasurement { valid_time })
}

/// Evaluate a history query over `facts`.
pub fn history(
  facts: &[Fact],
  query: &HistoryQuery,
  now: NaiveDateTime,
) -> Result<History, QueryError> {
  let as_of = resolve_or(query.transaction_time.as_ref(), now)?;
  let from = resolve_or(query.valid_start.as_ref(), BEGINNING_OF_TIME)?;
  let until = resolve_or(query.valid_end.as_ref(), END_OF_TIME)?;

  let mut matching: Vec<&Fact> = facts
    .iter()
    .filter(|f| f.matches_subject(&query.first_name, &query.last_name))
    .collect();

  if let Some(code) = filter_value(&query.code) {
    matching.retain(|f| f.matches_code(code));
  } else if let Some(concept) = filter_value(&query.concept_name) {
    matching.retain(|f| f.matches_concept(concept));
  }
  if matching.is_empty() {
    return Err(QueryError::NoMatchingRecords);
  }

  matching.retain(|f| f.known_as_of(as_of));
  if matching.is_empty() {
    return Err(QueryError::NothingKnownAsOf { as_of });
  }

  // Range membership looks at the start only: an interval that begins inside
  // the range belongs to it however long it lasts.
  matching.retain(|f| f.started_within(from, until));
  if matching.is_empty() {
    return Err(QueryError::NothingInRange);
  }

  matching.sort_by_key(|f| f.valid_start_time);
  let records: Vec<Fact> = matching.into_iter().cloned().collect();
  Ok(History { count: records.len(), records })
}

/// Run `f`, turning a panic into [`QueryError::Unexpected`] so a query can
/// never take its caller down.
fn guarded<T>(f: impl FnOnce() -> Result<T, QueryError>) -> Result<T, QueryError> {
  panic::catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|payload| {
    let message = payload
      .downcast_ref::<&str>()
      .map(|s| (*s).to_owned())
      .or_else(|| payload.downcast_ref::<String>().cloned())
      .unwrap_or_else(|| "query evaluation panicked".to_owned());
    tracing::error!(%message, "query failed unexpectedly");
    Err(QueryError::Unexpected(message))
  })
}

// ─── QueryEngine ─────────────────────────────────────────────────────────────

/// Stateless query logic bound to a live fact table and a code lookup.
///
/// The engine holds a handle, not a copy: facts appended through any clone of
/// the [`SharedFactTable`] are visible to the next query.
#[derive(Clone)]
pub struct QueryEngine {
  table:  SharedFactTable,
  lookup: Arc<CodeLookup>,
  clock:  Clock,
}

impl fmt::Debug for QueryEngine {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("QueryEngine")
      .field("facts", &self.table.len())
      .field("codes", &self.lookup.len())
      .finish_non_exhaustive()
  }
}

impl QueryEngine {
  pub fn new(table: SharedFactTable, lookup: Arc<CodeLookup>) -> Self {
    Self { table, lookup, clock: Arc::new(wall_clock) }
  }

  /// Replace the source of "now" used when a query omits its transaction time.
  pub fn with_clock(
    mut self,
    clock: impl Fn() -> NaiveDateTime + Send + Sync + 'static,
  ) -> Self {
    self.clock = Arc::new(clock);
    self
  }

  pub fn table(&self) -> &SharedFactTable { &self.table }

  pub fn lookup(&self) -> &CodeLookup { &self.lookup }

  /// Append a batch, normalized against this engine's lookup.
  pub fn append(&self, batch: &RawBatch) -> Result<AppendReport, LoadError> {
    self.table.append(batch, &self.lookup)
  }

  pub fn point_in_time(&self, query: &PointInTimeQuery) -> Result<Fact, QueryError> {
    guarded(|| {
      let now = (self.clock)();
      self.table.with_facts(|facts| point_in_time(facts, query, now))
    })
  }

  pub fn history(&self, query: &HistoryQuery) -> Result<History, QueryError> {
    guarded(|| {
      let now = (self.clock)();
      self.table.with_facts(|facts| history(facts, query, now))
    })
  }
}
