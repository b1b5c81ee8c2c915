//! `POST /facts` — append a raw batch to the live table.
//!
//! Body: `{"columns": [...], "rows": [[...], ...]}`. Columns go through the
//! same normalization as the initial load; a batch missing a required column
//! is rejected with 422 and the table is left as it was.

use std::sync::Arc;

use axum::{
  Json,
  extract::State,
  http::StatusCode,
  response::IntoResponse,
};
use bitemp_core::{QueryEngine, RawBatch};

use crate::{blocking, error::ApiError};

/// Returns 201 + `{"rows_added": n}`.
pub async fn append(
  State(engine): State<Arc<QueryEngine>>,
  Json(batch): Json<RawBatch>,
) -> Result<impl IntoResponse, ApiError> {
  let report = blocking(engine, move |e| e.append(&batch)).await??;
  Ok((StatusCode::CREATED, Json(report)))
}
