//! Router tests driven through `tower::ServiceExt::oneshot`.

use std::sync::Arc;

use axum::{
  body::Body,
  http::{Request, StatusCode, header},
};
use bitemp_core::{
  CodeLookup, FactTable, QueryEngine, RawBatch, SharedFactTable, time::parse_timestamp,
};
use serde_json::{Value, json};
use tower::ServiceExt as _;

use crate::api_router;

fn engine() -> Arc<QueryEngine> {
  let lookup = Arc::new(CodeLookup::from_pairs([("1234-5", "Glucose")]));
  let batch = RawBatch::new([
    "first_name",
    "last_name",
    "loinc_num",
    "value",
    "valid_start_time",
    "valid_stop_time",
    "transaction_time",
  ])
  .with_row([
    json!("John"),
    json!("Doe"),
    json!("1234-5"),
    json!(5),
    json!("2024-01-01"),
    Value::Null,
    json!("2024-01-01"),
  ])
  .with_row([
    json!("John"),
    json!("Doe"),
    json!("1234-5"),
    json!(7),
    json!("2024-01-01"),
    Value::Null,
    json!("2024-03-01"),
  ]);

  let table = FactTable::build(&batch, &lookup);
  // Fixed "now" so default transaction times are deterministic.
  let now = parse_timestamp("2025-01-01").unwrap();
  Arc::new(QueryEngine::new(SharedFactTable::new(table), lookup).with_clock(move || now))
}

async fn send(
  engine: Arc<QueryEngine>,
  method: &str,
  uri: &str,
  body: Option<Value>,
) -> (StatusCode, Value) {
  let mut builder = Request::builder().method(method).uri(uri);
  let body = match body {
    Some(json) => {
      builder = builder.header(header::CONTENT_TYPE, "application/json");
      Body::from(json.to_string())
    }
    None => Body::empty(),
  };

  let resp = api_router(engine)
    .oneshot(builder.body(body).unwrap())
    .await
    .unwrap();
  let status = resp.status();
  let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
  let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
  (status, value)
}

// ── Point-in-time ────────────────────────────────────────────────────────────

#[tokio::test]
async fn point_in_time_returns_flat_record() {
  let (status, body) = send(
    engine(),
    "GET",
    "/point-in-time?first_name=john&last_name=DOE&code=1234-5\
     &valid_time=2024-02-01T10:00&transaction_time=2024-04-01",
    None,
  )
  .await;

  assert_eq!(status, StatusCode::OK);
  assert_eq!(body["value"], json!(7));
  assert_eq!(body["loinc_code"], json!("1234-5"));
  assert_eq!(body["concept_name"], json!("Glucose"));
}

#[tokio::test]
async fn point_in_time_unknown_code_is_404_with_message() {
  let (status, body) = send(
    engine(),
    "GET",
    "/point-in-time?first_name=John&last_name=Doe&code=9999&valid_time=2024-02-01",
    None,
  )
  .await;

  assert_eq!(status, StatusCode::NOT_FOUND);
  assert_eq!(
    body["error"],
    json!("No records found for patient 'John Doe' with LOINC code '9999'.")
  );
}

#[tokio::test]
async fn point_in_time_bad_time_is_400() {
  let (status, body) = send(
    engine(),
    "GET",
    "/point-in-time?first_name=John&last_name=Doe&code=1234-5&valid_time=soon",
    None,
  )
  .await;

  assert_eq!(status, StatusCode::BAD_REQUEST);
  assert!(body["error"].as_str().unwrap().contains("soon"));
}

#[tokio::test]
async fn point_in_time_missing_parameter_is_json_400() {
  let (status, body) = send(
    engine(),
    "GET",
    "/point-in-time?first_name=John&last_name=Doe&code=1234-5",
    None,
  )
  .await;

  assert_eq!(status, StatusCode::BAD_REQUEST);
  assert!(body["error"].as_str().unwrap().contains("valid_time"));
}

// ── History ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn history_returns_records_and_count() {
  let (status, body) = send(
    engine(),
    "GET",
    "/history?first_name=John&last_name=Doe&concept_name=glucose&code=",
    None,
  )
  .await;

  assert_eq!(status, StatusCode::OK);
  assert_eq!(body["count"], json!(2));
  assert_eq!(body["records"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn history_error_carries_zero_count() {
  let (status, body) = send(
    engine(),
    "GET",
    "/history?first_name=John&last_name=Doe&transaction_time=2023-06-01",
    None,
  )
  .await;

  assert_eq!(status, StatusCode::NOT_FOUND);
  assert_eq!(body["count"], json!(0));
  assert_eq!(
    body["error"],
    json!("No records were known to the system at 2023-06-01 00:00.")
  );
}

#[tokio::test]
async fn history_missing_parameter_is_json_400_with_zero_count() {
  let (status, body) = send(engine(), "GET", "/history?last_name=Doe", None).await;

  assert_eq!(status, StatusCode::BAD_REQUEST);
  assert_eq!(body["count"], json!(0));
  assert!(body["error"].as_str().unwrap().contains("first_name"));
}

// ── Append ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn append_is_visible_to_later_queries() {
  let engine = engine();
  let batch = json!({
    "columns": ["First Name", "Last Name", "LOINC-NUM", "Value", "Valid Start Time", "Transaction Time"],
    "rows": [["Jane", "Roe", "1234-5", 3, "2024-05-01", "2024-05-01"]]
  });

  let (status, body) = send(engine.clone(), "POST", "/facts", Some(batch)).await;
  assert_eq!(status, StatusCode::CREATED);
  assert_eq!(body["rows_added"], json!(1));

  let (status, body) = send(
    engine.clone(),
    "GET",
    "/point-in-time?first_name=Jane&last_name=Roe&code=1234-5&valid_time=2024-06-01",
    None,
  )
  .await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(body["value"], json!(3));

  let (_, stats) = send(engine, "GET", "/stats", None).await;
  assert_eq!(stats["facts"], json!(3));
}

#[tokio::test]
async fn append_without_required_column_is_422() {
  let engine = engine();
  let batch = json!({ "columns": ["loinc_code", "valid_start_time"], "rows": [] });

  let (status, body) = send(engine.clone(), "POST", "/facts", Some(batch)).await;
  assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
  assert!(body["error"].as_str().unwrap().contains("transaction_time"));

  let (_, stats) = send(engine, "GET", "/stats", None).await;
  assert_eq!(stats["facts"], json!(2));
}

// ── Concepts ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn concept_lookup_falls_back_to_sentinel() {
  let (status, body) = send(engine(), "GET", "/concepts/1234-5", None).await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(body["concept_name"], json!("Glucose"));

  let (_, body) = send(engine(), "GET", "/concepts/0000-0", None).await;
  assert_eq!(body["concept_name"], json!("Unknown LOINC Code"));
}

#[tokio::test(flavor = "current_thread")]
async fn stats_runs_alongside_appends() {
  let engine = engine();
  let batch = json!({
    "columns": ["first_name", "last_name", "loinc_code", "valid_start_time", "transaction_time"],
    "rows": [["Jane", "Roe", "1234-5", "2024-05-01", "2024-05-01"]]
  });

  let (appended, (status, stats)) = tokio::join!(
    send(engine.clone(), "POST", "/facts", Some(batch)),
    send(engine.clone(), "GET", "/stats", None),
  );
  assert_eq!(appended.0, StatusCode::CREATED);
  assert_eq!(status, StatusCode::OK);
  assert!(stats["facts"] == json!(2) || stats["facts"] == json!(3));
  assert_eq!(stats["codes"], json!(1));

  let (_, stats) = send(engine, "GET", "/stats", None).await;
  assert_eq!(stats["facts"], json!(3));
}
