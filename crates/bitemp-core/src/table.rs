//! The fact table: normalization of raw batches, the ordered fact collection,
//! and the lock-guarded handle shared between queries and appends.

use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::{
  error::LoadError,
  fact::{Fact, RawBatch, canonical_code},
  lookup::CodeLookup,
  time::{END_OF_TIME, parse_cell},
};

/// `concept_name` for codes missing from the lookup.
pub const UNKNOWN_CONCEPT: &str = "Unknown Concept";

pub const CODE_COLUMN: &str = "loinc_code";
const CODE_ALIAS: &str = "loinc_num";
pub const VALID_START_COLUMN: &str = "valid_start_time";
pub const VALID_STOP_COLUMN: &str = "valid_stop_time";
pub const TRANSACTION_COLUMN: &str = "transaction_time";
const FIRST_NAME_COLUMN: &str = "first_name";
const LAST_NAME_COLUMN: &str = "last_name";
const VALUE_COLUMN: &str = "value";
const CONCEPT_COLUMN: &str = "concept_name";

/// Columns mapped onto named [`Fact`] fields rather than `attributes`.
const RESERVED_COLUMNS: &[&str] = &[
  FIRST_NAME_COLUMN,
  LAST_NAME_COLUMN,
  CODE_COLUMN,
  CONCEPT_COLUMN,
  VALUE_COLUMN,
  VALID_START_COLUMN,
  VALID_STOP_COLUMN,
  TRANSACTION_COLUMN,
];

// ─── Normalization ───────────────────────────────────────────────────────────

/// Spreadsheet exports leave blank or `Unnamed: N` headers behind.
fn is_export_artifact(header: &str) -> bool {
  header.trim().is_empty() || header.starts_with("Unnamed:")
}

fn canonical_column(header: &str) -> String {
  let name = header.trim().to_lowercase().replace([' ', '-'], "_");
  if name == CODE_ALIAS { CODE_COLUMN.to_owned() } else { name }
}

fn text_cell(cell: &Value) -> Option<String> {
  match cell {
    Value::Null => None,
    Value::String(s) => Some(s.clone()),
    other => Some(other.to_string()),
  }
}

/// Turn a raw batch into facts.
///
/// Cell-level problems (unparseable times, unknown codes) are coerced to null
/// or sentinel values. Only a missing code, `valid_start_time` or
/// `transaction_time` column fails the batch.
pub fn normalize(batch: &RawBatch, lookup: &CodeLookup) -> Result<Vec<Fact>, LoadError> {
  let columns: Vec<(usize, String)> = batch
    .columns
    .iter()
    .enumerate()
    .filter(|(_, header)| !is_export_artifact(header))
    .map(|(i, header)| (i, canonical_column(header)))
    .collect();

  let position = |name: &str| {
    columns
      .iter()
      .find(|(_, column)| column == name)
      .map(|(i, _)| *i)
  };

  let code_idx = position(CODE_COLUMN).ok_or(LoadError::MissingColumn(CODE_COLUMN))?;
  let start_idx =
    position(VALID_START_COLUMN).ok_or(LoadError::MissingColumn(VALID_START_COLUMN))?;
  let tx_idx =
    position(TRANSACTION_COLUMN).ok_or(LoadError::MissingColumn(TRANSACTION_COLUMN))?;
  let stop_idx = position(VALID_STOP_COLUMN);
  let first_idx = position(FIRST_NAME_COLUMN);
  let last_idx = position(LAST_NAME_COLUMN);
  let value_idx = position(VALUE_COLUMN);

  let extras: Vec<&(usize, String)> = columns
    .iter()
    .filter(|(_, column)| !RESERVED_COLUMNS.contains(&column.as_str()))
    .collect();

  if stop_idx.is_none() {
    tracing::debug!("batch has no {VALID_STOP_COLUMN} column; all intervals are open");
  }

  let null = Value::Null;
  let facts = batch
    .rows
    .iter()
    .map(|row| {
      let cell = |i: usize| row.get(i).unwrap_or(&null);
      let code = canonical_code(cell(code_idx));
      let concept_name = lookup.get(&code).unwrap_or(UNKNOWN_CONCEPT).to_owned();

      let attributes: Map<String, Value> = extras
        .iter()
        .map(|(i, column)| (column.clone(), cell(*i).clone()))
        .collect();

      Fact {
        first_name: first_idx.and_then(|i| text_cell(cell(i))),
        last_name: last_idx.and_then(|i| text_cell(cell(i))),
        code,
        concept_name,
        value: value_idx.map(|i| cell(i).clone()).unwrap_or(Value::Null),
        valid_start_time: parse_cell(cell(start_idx)),
        valid_stop_time: stop_idx
          .and_then(|i| parse_cell(cell(i)))
          .unwrap_or(END_OF_TIME),
        transaction_time: parse_cell(cell(tx_idx)),
        attributes,
      }
    })
    .collect();

  Ok(facts)
}

/// Most recently recorded first; rows without a transaction time sink to the
/// end. Stable, so load order breaks ties.
fn sort_by_transaction_desc(facts: &mut [Fact]) {
  facts.sort_by(|a, b| b.transaction_time.cmp(&a.transaction_time));
}

// ─── FactTable ───────────────────────────────────────────────────────────────

/// Outcome of a successful [`FactTable::append`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AppendReport {
  pub rows_added: usize,
}

/// The in-memory fact collection, always ordered by transaction time
/// descending. It only grows.
#[derive(Debug, Clone, Default)]
pub struct FactTable {
  facts: Vec<Fact>,
}

impl FactTable {
  pub fn try_build(batch: &RawBatch, lookup: &CodeLookup) -> Result<Self, LoadError> {
    let facts = normalize(batch, lookup)?;
    tracing::info!(rows = facts.len(), "fact table built");
    Ok(Self::from_facts(facts))
  }

  /// Like [`Self::try_build`], but a failed build is logged and yields an
  /// empty table. Callers should check [`Self::is_empty`].
  pub fn build(batch: &RawBatch, lookup: &CodeLookup) -> Self {
    Self::try_build(batch, lookup).unwrap_or_else(|e| {
      tracing::error!(error = %e, "could not build fact table");
      Self::default()
    })
  }

  pub fn from_facts(mut facts: Vec<Fact>) -> Self {
    sort_by_transaction_desc(&mut facts);
    Self { facts }
  }

  /// Normalize `batch` and merge it in. On error the table is unchanged.
  pub fn append(
    &mut self,
    batch: &RawBatch,
    lookup: &CodeLookup,
  ) -> Result<AppendReport, LoadError> {
    let new_facts = normalize(batch, lookup)?;
    let rows_added = new_facts.len();

    self.facts.extend(new_facts);
    sort_by_transaction_desc(&mut self.facts);

    tracing::info!(rows_added, total = self.facts.len(), "batch appended");
    Ok(AppendReport { rows_added })
  }

  pub fn facts(&self) -> &[Fact] { &self.facts }

  pub fn len(&self) -> usize { self.facts.len() }

  pub fn is_empty(&self) -> bool { self.facts.is_empty() }
}

// ─── SharedFactTable ─────────────────────────────────────────────────────────

/// A cloneable handle to one live [`FactTable`].
///
/// Queries hold the read lock for their whole scan; `append` holds the write
/// lock across normalize, concatenate and re-sort, so a scan never observes a
/// half-applied batch.
#[derive(Debug, Clone, Default)]
pub struct SharedFactTable {
  inner: Arc<RwLock<FactTable>>,
}

impl SharedFactTable {
  pub fn new(table: FactTable) -> Self {
    Self { inner: Arc::new(RwLock::new(table)) }
  }

  pub fn read(&self) -> RwLockReadGuard<'_, FactTable> { self.inner.read() }

  pub fn with_facts<T>(&self, f: impl FnOnce(&[Fact]) -> T) -> T {
    f(self.inner.read().facts())
  }

  pub fn append(
    &self,
    batch: &RawBatch,
    lookup: &CodeLookup,
  ) -> Result<AppendReport, LoadError> {
    self.inner.write().append(batch, lookup)
  }

  pub fn len(&self) -> usize { self.inner.read().len() }

  pub fn is_empty(&self) -> bool { self.inner.read().is_empty() }
}

impl From<FactTable> for SharedFactTable {
  fn from(table: FactTable) -> Self { Self::new(table) }
}

#[cfg(test)]
mod tests {
  use serde_json::json;

  use super::*;
  use crate::time::parse_timestamp;

  fn lookup() -> CodeLookup { CodeLookup::from_pairs([("1234-5", "Glucose")]) }

  fn base_batch() -> RawBatch {
    RawBatch::new([
      "First Name",
      "Last-Name",
      "LOINC-NUM",
      "Value",
      "Unit",
      "Valid Start Time",
      "Transaction Time",
      "Unnamed: 7",
    ])
    .with_row([
      json!("John"),
      json!("Doe"),
      json!(" 1234-5 "),
      json!(5.4),
      json!("mmol/L"),
      json!("2024-01-01 08:00"),
      json!("2024-01-02 09:00"),
      json!("junk"),
    ])
    .with_row([
      json!("Jane"),
      json!("Roe"),
      json!(9876.0),
      json!(1),
      json!("g/dL"),
      json!("2024-01-03"),
      json!("2024-03-01 12:00"),
      Value::Null,
    ])
  }

  #[test]
  fn normalize_canonicalizes_columns_and_codes() {
    let facts = normalize(&base_batch(), &lookup()).unwrap();
    assert_eq!(facts.len(), 2);

    let john = &facts[0];
    assert_eq!(john.first_name.as_deref(), Some("John"));
    assert_eq!(john.last_name.as_deref(), Some("Doe"));
    assert_eq!(john.code, "1234-5");
    assert_eq!(john.concept_name, "Glucose");
    assert_eq!(john.value, json!(5.4));
    assert_eq!(john.attributes.get("unit"), Some(&json!("mmol/L")));
    assert!(!john.attributes.contains_key("unnamed:_7"));
    assert_eq!(john.attributes.len(), 1);

    let jane = &facts[1];
    assert_eq!(jane.code, "9876");
    assert_eq!(jane.concept_name, UNKNOWN_CONCEPT);
  }

  #[test]
  fn missing_stop_column_means_end_of_time() {
    let facts = normalize(&base_batch(), &lookup()).unwrap();
    assert!(facts.iter().all(|f| f.valid_stop_time == END_OF_TIME));
  }

  #[test]
  fn unparseable_times_are_coerced() {
    let batch = RawBatch::new([
      "loinc_code",
      "valid_start_time",
      "valid_stop_time",
      "transaction_time",
    ])
    .with_row([json!("1"), json!("garbage"), json!("also garbage"), json!("")])
    .with_row([json!("2"), json!("2024-01-01")]);

    let facts = normalize(&batch, &lookup()).unwrap();
    assert_eq!(facts[0].valid_start_time, None);
    assert_eq!(facts[0].valid_stop_time, END_OF_TIME);
    assert_eq!(facts[0].transaction_time, None);

    // Short rows are null-padded.
    assert_eq!(facts[1].valid_start_time, parse_timestamp("2024-01-01"));
    assert_eq!(facts[1].transaction_time, None);
    assert_eq!(facts[1].first_name, None);
  }

  #[test]
  fn slash_dated_datetimes_survive_normalization() {
    let batch = RawBatch::new(["loinc_code", "valid_start_time", "transaction_time"])
      .with_row([json!("1234-5"), json!("2024/01/05 10:30"), json!("2024-01-06T08:15Z")]);

    let facts = normalize(&batch, &lookup()).unwrap();
    assert_eq!(facts[0].valid_start_time, parse_timestamp("2024-01-05 10:30"));
    assert_eq!(facts[0].transaction_time, parse_timestamp("2024-01-06 08:15"));
    assert!(facts[0].valid_start_time.is_some());
  }

  #[test]
  fn required_columns_are_enforced_in_order() {
    let no_code = RawBatch::new(["valid_start_time", "transaction_time"]);
    assert!(matches!(
      normalize(&no_code, &lookup()),
      Err(LoadError::MissingColumn(CODE_COLUMN))
    ));

    let no_start = RawBatch::new(["loinc_code", "transaction_time"]);
    assert!(matches!(
      normalize(&no_start, &lookup()),
      Err(LoadError::MissingColumn(VALID_START_COLUMN))
    ));

    let no_tx = RawBatch::new(["loinc_code", "valid_start_time"]);
    assert!(matches!(
      normalize(&no_tx, &lookup()),
      Err(LoadError::MissingColumn(TRANSACTION_COLUMN))
    ));
  }

  #[test]
  fn source_concept_column_is_overridden() {
    let batch = RawBatch::new([
      "loinc_code",
      "concept_name",
      "valid_start_time",
      "transaction_time",
    ])
    .with_row([
      json!("1234-5"),
      json!("stale name"),
      json!("2024-01-01"),
      json!("2024-01-01"),
    ]);
    let facts = normalize(&batch, &lookup()).unwrap();
    assert_eq!(facts[0].concept_name, "Glucose");
    assert!(facts[0].attributes.is_empty());
  }

  #[test]
  fn build_sorts_by_transaction_time_descending() {
    let table = FactTable::build(&base_batch(), &lookup());
    let txs: Vec<_> = table.facts().iter().map(|f| f.transaction_time).collect();
    assert_eq!(
      txs,
      vec![
        parse_timestamp("2024-03-01 12:00"),
        parse_timestamp("2024-01-02 09:00"),
      ]
    );
  }

  #[test]
  fn failed_build_is_empty() {
    let table = FactTable::build(&RawBatch::new(["value"]), &lookup());
    assert!(table.is_empty());
    assert!(FactTable::try_build(&RawBatch::new(["value"]), &lookup()).is_err());
  }

  #[test]
  fn append_adds_and_resorts_without_touching_existing() {
    let mut table = FactTable::build(&base_batch(), &lookup());
    let before = table.facts().to_vec();

    let batch = RawBatch::new(["LOINC-NUM", "valid_start_time", "transaction_time"])
      .with_row([json!("1234-5"), json!("2024-02-01"), json!("2024-02-15")])
      .with_row([json!("1234-5"), json!("2024-02-01"), json!("not a time")]);

    let report = table.append(&batch, &lookup()).unwrap();
    assert_eq!(report, AppendReport { rows_added: 2 });
    assert_eq!(table.len(), 4);

    for old in &before {
      assert!(table.facts().contains(old));
    }
    assert_eq!(table.facts()[1].transaction_time, parse_timestamp("2024-02-15"));
    assert_eq!(table.facts()[3].transaction_time, None);
  }

  #[test]
  fn failed_append_leaves_table_untouched() {
    let mut table = FactTable::build(&base_batch(), &lookup());
    let before = table.facts().to_vec();

    let err = table
      .append(&RawBatch::new(["loinc_code", "valid_start_time"]), &lookup())
      .unwrap_err();
    assert!(err.to_string().contains(TRANSACTION_COLUMN));
    assert_eq!(table.facts(), before.as_slice());
  }

  #[test]
  fn shared_table_sees_appends_through_every_handle() {
    let shared = SharedFactTable::new(FactTable::build(&base_batch(), &lookup()));
    let other = shared.clone();

    let batch = RawBatch::new(["loinc_code", "valid_start_time", "transaction_time"])
      .with_row([json!("1234-5"), json!("2024-05-01"), json!("2024-05-01")]);
    shared.append(&batch, &lookup()).unwrap();

    assert_eq!(other.len(), 3);
    assert_eq!(
      other.with_facts(|facts| facts[0].valid_start_time),
      parse_timestamp("2024-05-01")
    );
  }
}
