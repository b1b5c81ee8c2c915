//! Core types and query logic for the bitemp measurement store.
//!
//! This crate is deliberately free of HTTP dependencies. It owns the fact
//! table model, the code lookup, and the bi-temporal query engine; the API and
//! server crates are thin layers on top.

pub mod engine;
pub mod error;
pub mod fact;
pub mod ingest;
pub mod lookup;
pub mod table;
pub mod time;

pub use engine::{History, HistoryQuery, PointInTimeQuery, QueryEngine};
pub use error::{LoadError, QueryError, Result, TimeParseError};
pub use fact::{Fact, RawBatch};
pub use lookup::CodeLookup;
pub use table::{AppendReport, FactTable, SharedFactTable};
pub use time::TimeInput;
