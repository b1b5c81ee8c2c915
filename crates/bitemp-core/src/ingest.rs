//! CSV ingestion into [`RawBatch`]es.
//!
//! The header row becomes the column list verbatim; normalization happens
//! later in [`crate::table::normalize`]. Every cell is kept as text, with
//! empty cells turned into nulls.

use std::{fs::File, io::Read, path::Path};

use serde_json::Value;

use crate::{error::LoadError, fact::RawBatch};

pub fn read_csv(path: impl AsRef<Path>) -> Result<RawBatch, LoadError> {
  let file = File::open(path.as_ref())?;
  read_csv_from(file)
}

pub fn read_csv_from<R: Read>(reader: R) -> Result<RawBatch, LoadError> {
  let mut rdr = csv::ReaderBuilder::new().flexible(true).from_reader(reader);

  let mut batch = RawBatch::new(rdr.headers()?.iter());
  for record in rdr.records() {
    let record = record?;
    batch.push_row(record.iter().map(|cell| {
      if cell.is_empty() {
        Value::Null
      } else {
        Value::String(cell.to_owned())
      }
    }));
  }

  tracing::debug!(columns = batch.columns.len(), rows = batch.len(), "csv batch read");
  Ok(batch)
}
