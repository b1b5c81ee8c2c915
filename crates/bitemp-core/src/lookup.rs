//! Code → concept name lookup.
//!
//! Loaded once from a headerless two-column table (code, display name) and
//! never modified afterwards.

use std::{collections::HashMap, fs::File, io::Read, path::Path};

use crate::error::LoadError;

/// Returned by [`CodeLookup::resolve`] for codes the table does not know.
pub const UNKNOWN_CODE: &str = "Unknown LOINC Code";

#[derive(Debug, Clone, Default)]
pub struct CodeLookup {
  names: HashMap<String, String>,
}

impl CodeLookup {
  /// Load the lookup from a CSV file.
  ///
  /// A missing or unparseable file yields an empty lookup; every code then
  /// resolves to [`UNKNOWN_CODE`].
  pub fn load(path: impl AsRef<Path>) -> Self {
    let path = path.as_ref();
    let loaded = File::open(path)
      .map_err(LoadError::from)
      .and_then(Self::from_reader);

    match loaded {
      Ok(lookup) => {
        tracing::info!(path = %path.display(), codes = lookup.len(), "code lookup loaded");
        lookup
      }
      Err(e) => {
        tracing::warn!(
          path = %path.display(),
          error = %e,
          "could not load code lookup; continuing without concept names"
        );
        Self::default()
      }
    }
  }

  /// Read `code,name` rows. Rows with fewer than two fields are skipped;
  /// later duplicates replace earlier ones.
  pub fn from_reader<R: Read>(reader: R) -> Result<Self, LoadError> {
    let mut rdr = csv::ReaderBuilder::new()
      .has_headers(false)
      .flexible(true)
      .from_reader(reader);

    let mut names = HashMap::new();
    for record in rdr.records() {
      let record = record?;
      if let (Some(code), Some(name)) = (record.get(0), record.get(1)) {
        names.insert(code.trim().to_owned(), name.to_owned());
      }
    }
    Ok(Self { names })
  }

  pub fn from_pairs<I, C, N>(pairs: I) -> Self
  where
    I: IntoIterator<Item = (C, N)>,
    C: AsRef<str>,
    N: Into<String>,
  {
    let names = pairs
      .into_iter()
      .map(|(code, name)| (code.as_ref().trim().to_owned(), name.into()))
      .collect();
    Self { names }
  }

  pub fn get(&self, code: &str) -> Option<&str> {
    self.names.get(code.trim()).map(String::as_str)
  }

  /// Display name for `code`, or [`UNKNOWN_CODE`].
  pub fn resolve(&self, code: &str) -> &str {
    self.get(code).unwrap_or(UNKNOWN_CODE)
  }

  pub fn len(&self) -> usize { self.names.len() }

  pub fn is_empty(&self) -> bool { self.names.is_empty() }
}
