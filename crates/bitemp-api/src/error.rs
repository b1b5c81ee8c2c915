//! API error type and [`axum::response::IntoResponse`] implementation.

use axum::{
  Json,
  extract::rejection::QueryRejection,
  http::StatusCode,
  response::{IntoResponse, Response},
};
use bitemp_core::{LoadError, QueryError};
use serde_json::json;
use thiserror::Error;

/// An error returned by an API handler.
#[derive(Debug, Error)]
pub enum ApiError {
  /// A point-in-time query produced no answer.
  #[error("{0}")]
  Query(QueryError),

  /// A history query produced no answer; the body also carries `count: 0`.
  #[error("{0}")]
  History(QueryError),

  /// The query string did not deserialize (missing or malformed parameter).
  #[error("{}", .0.body_text())]
  Params(QueryRejection),

  /// As [`ApiError::Params`], on the history route.
  #[error("{}", .0.body_text())]
  HistoryParams(QueryRejection),

  #[error("{0}")]
  Load(#[from] LoadError),

  #[error("internal error: {0}")]
  Internal(String),
}

fn query_status(e: &QueryError) -> StatusCode {
  match e {
    QueryError::InvalidTime(_) => StatusCode::BAD_REQUEST,
    QueryError::Unexpected(_) => StatusCode::INTERNAL_SERVER_ERROR,
    _ => StatusCode::NOT_FOUND,
  }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    let message = self.to_string();
    let (status, body) = match &self {
      ApiError::Query(e) => (query_status(e), json!({ "error": message })),
      ApiError::History(e) => {
        (query_status(e), json!({ "error": message, "count": 0 }))
      }
      ApiError::Params(_) => (StatusCode::BAD_REQUEST, json!({ "error": message })),
      ApiError::HistoryParams(_) => {
        (StatusCode::BAD_REQUEST, json!({ "error": message, "count": 0 }))
      }
      ApiError::Load(_) => {
        (StatusCode::UNPROCESSABLE_ENTITY, json!({ "error": message }))
      }
      ApiError::Internal(_) => {
        (StatusCode::INTERNAL_SERVER_ERROR, json!({ "error": message }))
      }
    };
    (status, Json(body)).into_response()
  }
}
