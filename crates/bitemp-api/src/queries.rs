//! Handlers for the two query shapes.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `GET`  | `/point-in-time` | `first_name`, `last_name`, `code`, `valid_time` required; optional `transaction_time` |
//! | `GET`  | `/history` | `first_name`, `last_name` required; optional `code`, `concept_name`, `valid_start`, `valid_end`, `transaction_time` |
//!
//! Times are ISO-like strings; a date without a time means midnight.

use std::sync::Arc;

use axum::{
  Json,
  extract::{Query, State, rejection::QueryRejection},
};
use bitemp_core::{History, HistoryQuery, PointInTimeQuery, QueryEngine, TimeInput};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::{blocking, error::ApiError};

/// Blank optional parameters (as sent by empty form fields) count as absent.
fn present(value: Option<String>) -> Option<String> {
  value.filter(|s| !s.trim().is_empty())
}

fn time(value: Option<String>) -> Option<TimeInput> { present(value).map(TimeInput::from) }

// ─── Point-in-time ────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct PointInTimeParams {
  pub first_name:       String,
  pub last_name:        String,
  pub code:             String,
  pub valid_time:       String,
  pub transaction_time: Option<String>,
}

impl From<PointInTimeParams> for PointInTimeQuery {
  fn from(p: PointInTimeParams) -> Self {
    PointInTimeQuery {
      first_name:       p.first_name,
      last_name:        p.last_name,
      code:             p.code,
      valid_time:       TimeInput::from(p.valid_time),
      transaction_time: time(p.transaction_time),
    }
  }
}

/// `GET /point-in-time?first_name=..&last_name=..&code=..&valid_time=..[&transaction_time=..]`
///
/// Returns the winning fact as a flat record.
pub async fn point_in_time(
  State(engine): State<Arc<QueryEngine>>,
  params: Result<Query<PointInTimeParams>, QueryRejection>,
) -> Result<Json<Map<String, Value>>, ApiError> {
  let Query(params) = params.map_err(ApiError::Params)?;
  let query = PointInTimeQuery::from(params);
  let fact = blocking(engine, move |e| e.point_in_time(&query))
    .await?
    .map_err(ApiError::Query)?;

  let record = fact
    .to_record()
    .map_err(|e| ApiError::Internal(e.to_string()))?;
  Ok(Json(record))
}

// ─── History ──────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct HistoryParams {
  pub first_name:       String,
  pub last_name:        String,
  pub code:             Option<String>,
  pub concept_name:     Option<String>,
  pub valid_start:      Option<String>,
  pub valid_end:        Option<String>,
  pub transaction_time: Option<String>,
}

impl From<HistoryParams> for HistoryQuery {
  fn from(p: HistoryParams) -> Self {
    HistoryQuery {
      first_name:       p.first_name,
      last_name:        p.last_name,
      code:             present(p.code),
      concept_name:     present(p.concept_name),
      valid_start:      time(p.valid_start),
      valid_end:        time(p.valid_end),
      transaction_time: time(p.transaction_time),
    }
  }
}

/// `GET /history?first_name=..&last_name=..[&code=..|&concept_name=..][&valid_start=..][&valid_end=..][&transaction_time=..]`
pub async fn history(
  State(engine): State<Arc<QueryEngine>>,
  params: Result<Query<HistoryParams>, QueryRejection>,
) -> Result<Json<History>, ApiError> {
  let Query(params) = params.map_err(ApiError::HistoryParams)?;
  let query = HistoryQuery::from(params);
  let history = blocking(engine, move |e| e.history(&query))
    .await?
    .map_err(ApiError::History)?;
  Ok(Json(history))
}
