//! JSON REST API for bitemp.
//!
//! Exposes an axum [`Router`] over a [`QueryEngine`]. Auth, TLS, and transport
//! concerns are the caller's responsibility.
//!
//! # Mounting
//!
//! ```rust,ignore
//! .nest("/api", bitemp_api::api_router(engine.clone()))
//! ```

pub mod concepts;
pub mod error;
pub mod facts;
pub mod queries;

use std::sync::Arc;

use axum::{
  Router,
  routing::{get, post},
};
use bitemp_core::QueryEngine;

pub use error::ApiError;

/// Build the API router for `engine`.
pub fn api_router(engine: Arc<QueryEngine>) -> Router<()> {
  Router::new()
    // Queries
    .route("/point-in-time", get(queries::point_in_time))
    .route("/history", get(queries::history))
    // Ingestion
    .route("/facts", post(facts::append))
    // Metadata
    .route("/concepts/{code}", get(concepts::get_one))
    .route("/stats", get(concepts::stats))
    .with_state(engine)
}

/// Run `f` against the engine on the blocking pool; scans and appends hold
/// the table lock for their whole duration.
pub(crate) async fn blocking<T, F>(engine: Arc<QueryEngine>, f: F) -> Result<T, ApiError>
where
  F: FnOnce(&QueryEngine) -> T + Send + 'static,
  T: Send + 'static,
{
  tokio::task::spawn_blocking(move || f(&engine))
    .await
    .map_err(|e| ApiError::Internal(e.to_string()))
}

#[cfg(test)]
mod tests;
