//! Small read-only metadata endpoints.

use std::sync::Arc;

use axum::{
  Json,
  extract::{Path, State},
};
use bitemp_core::QueryEngine;
use serde::Serialize;

use crate::{blocking, error::ApiError};

#[derive(Debug, Serialize)]
pub struct Concept {
  pub code:         String,
  pub concept_name: String,
}

/// `GET /concepts/{code}` — unknown codes resolve to the "unknown" sentinel
/// rather than 404.
pub async fn get_one(
  State(engine): State<Arc<QueryEngine>>,
  Path(code): Path<String>,
) -> Json<Concept> {
  let concept_name = engine.lookup().resolve(&code).to_owned();
  Json(Concept { code: code.trim().to_owned(), concept_name })
}

#[derive(Debug, Serialize)]
pub struct Stats {
  pub facts: usize,
  pub codes: usize,
}

/// `GET /stats`. Counting facts takes the table lock, so it runs on the
/// blocking pool like the queries.
pub async fn stats(State(engine): State<Arc<QueryEngine>>) -> Result<Json<Stats>, ApiError> {
  let stats = blocking(engine, |e| Stats {
    facts: e.table().len(),
    codes: e.lookup().len(),
  })
  .await?;
  Ok(Json(stats))
}
