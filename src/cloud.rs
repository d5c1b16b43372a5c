//! Client for the cloud record store (primary online question source).
//!
//! Questions live as `Question` records in a public database. For large
//! datasets we avoid full scans: every record carries a `sortOrder` in
//! `0..=9999`, and a fetch samples a random window of that range.
//!
//! NOTE: The API token is never logged.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use rand::seq::SliceRandom;
use rand::Rng;
use reqwest::header::{CONTENT_TYPE, USER_AGENT};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::config::CloudConfig;
use crate::domain::{Difficulty, Question, SourceTag};
use crate::sources::RandomQuestionSource;
use crate::util::trunc_for_log;

const MAX_SORT_ORDER: i64 = 9999;
const SAMPLE_WINDOW: i64 = 1000;
/// Server-side cap on records per query.
const MAX_RESULTS_PER_QUERY: usize = 400;

#[derive(Debug, Error)]
pub enum CloudError {
  #[error("cloud request failed: {0}")]
  Network(#[from] reqwest::Error),
  #[error("cloud HTTP {status}: {message}")]
  Http { status: u16, message: String },
  #[error("cloud response could not be decoded: {0}")]
  Decode(String),
  #[error("no questions available")]
  NoResults,
}

#[derive(Clone)]
pub struct CloudClient {
  client: reqwest::Client,
  base_url: String,
  container: String,
  environment: String,
  record_type: String,
  api_token: String,
}

impl CloudClient {
  /// Construct the client if an API token is configured; otherwise return None.
  /// A client that cannot be built is logged and also yields None.
  pub fn from_config(cfg: &CloudConfig, timeout: Duration) -> Option<Self> {
    let api_token = cfg.api_token.clone().filter(|t| !t.trim().is_empty())?;
    let client = match reqwest::Client::builder().timeout(timeout).build() {
      Ok(c) => c,
      Err(e) => {
        warn!(target: "remote", error = %e, "Failed to build cloud HTTP client; source disabled");
        return None;
      }
    };
    Some(Self {
      client,
      base_url: cfg.base_url.trim_end_matches('/').to_string(),
      container: cfg.container.clone(),
      environment: cfg.environment.clone(),
      record_type: cfg.record_type.clone(),
      api_token,
    })
  }

  pub fn base_url(&self) -> &str {
    &self.base_url
  }

  #[instrument(level = "debug", skip(self, request), fields(limit = request.results_limit))]
  async fn query(&self, request: &QueryRequest) -> Result<Vec<Record>, CloudError> {
    let url = format!(
      "{}/database/1/{}/{}/public/records/query",
      self.base_url, self.container, self.environment
    );
    let res = self.client.post(&url)
      .query(&[("ckAPIToken", self.api_token.as_str())])
      .header(USER_AGENT, "retro-trivia-backend/0.1")
      .header(CONTENT_TYPE, "application/json")
      .json(request)
      .send()
      .await?;

    if !res.status().is_success() {
      let status = res.status().as_u16();
      let body = res.text().await.unwrap_or_default();
      let message = extract_cloud_error(&body).unwrap_or_else(|| trunc_for_log(&body, 200));
      return Err(CloudError::Http { status, message });
    }

    let body: QueryResponse = res.json().await.map_err(|e| CloudError::Decode(e.to_string()))?;
    Ok(body.records)
  }

  /// Standard (non-random) fetch: newest first, excluded ids filtered client-side.
  #[instrument(level = "info", skip_all, fields(count = count, difficulty = %difficulty, excluded = exclude.len()))]
  pub async fn fetch_questions(
    &self,
    count: usize,
    difficulty: Difficulty,
    exclude: &HashSet<String>,
  ) -> Result<Vec<Question>, CloudError> {
    let request = QueryRequest {
      query: Query {
        record_type: self.record_type.clone(),
        filter_by: base_filters(difficulty),
        sort_by: vec![Sort { field_name: "createdAt", ascending: false }],
      },
      results_limit: standard_fetch_limit(count, exclude.len()),
    };
    let records = self.query(&request).await?;
    let questions = pick(records, exclude, count);
    info!(target: "remote", returned = questions.len(), "Cloud standard fetch");
    if questions.is_empty() {
      return Err(CloudError::NoResults);
    }
    Ok(questions)
  }
}

#[async_trait]
impl RandomQuestionSource for CloudClient {
  #[instrument(level = "info", skip_all, fields(count = count, difficulty = %difficulty, excluded = exclude.len()))]
  async fn fetch_random(
    &self,
    count: usize,
    difficulty: Difficulty,
    exclude: &HashSet<String>,
  ) -> Result<Vec<Question>, CloudError> {
    let (start, end, ascending) = {
      let mut rng = rand::thread_rng();
      let start = rng.gen_range(0..=MAX_SORT_ORDER - SAMPLE_WINDOW);
      (start, start + SAMPLE_WINDOW, rng.gen_bool(0.5))
    };

    let mut filters = base_filters(difficulty);
    filters.push(Filter::new("sortOrder", "GREATER_THAN_OR_EQUALS", json!(start)));
    filters.push(Filter::new("sortOrder", "LESS_THAN_OR_EQUALS", json!(end)));
    let request = QueryRequest {
      query: Query {
        record_type: self.record_type.clone(),
        filter_by: filters,
        sort_by: vec![Sort { field_name: "sortOrder", ascending }],
      },
      results_limit: random_fetch_limit(count),
    };

    match self.query(&request).await {
      Ok(records) => {
        let questions = pick(records, exclude, count);
        info!(target: "remote", returned = questions.len(), range_start = start, range_end = end, "Cloud random fetch");
        if !questions.is_empty() {
          return Ok(questions);
        }
        debug!(target: "remote", "Random window returned nothing; using standard fetch");
      }
      Err(e) => {
        warn!(target: "remote", error = %e, "Cloud random fetch failed; using standard fetch");
      }
    }
    self.fetch_questions(count, difficulty, exclude).await
  }
}

fn base_filters(difficulty: Difficulty) -> Vec<Filter> {
  let mut filters = vec![Filter::new("isActive", "EQUALS", json!(1))];
  if let Some(d) = difficulty.api_value() {
    filters.push(Filter::new("difficulty", "EQUALS", json!(d)));
  }
  filters
}

/// Over-fetch so exclusions and shuffling still leave enough.
fn random_fetch_limit(count: usize) -> usize {
  (count * 3).min(MAX_RESULTS_PER_QUERY)
}

fn standard_fetch_limit(count: usize, excluded: usize) -> usize {
  if excluded < 100 {
    (count + excluded + 10).min(MAX_RESULTS_PER_QUERY)
  } else {
    MAX_RESULTS_PER_QUERY
  }
}

/// Decode, drop excluded/invalid records, shuffle, keep `count`.
fn pick(records: Vec<Record>, exclude: &HashSet<String>, count: usize) -> Vec<Question> {
  let mut questions: Vec<Question> = records
    .into_iter()
    .filter(|r| !exclude.contains(&r.record_name))
    .filter_map(record_to_question)
    .collect();
  questions.shuffle(&mut rand::thread_rng());
  questions.truncate(count);
  questions
}

fn record_to_question(record: Record) -> Option<Question> {
  if let Some(code) = &record.server_error_code {
    debug!(target: "remote", record = %record.record_name, %code, "Skipping failed record");
    return None;
  }
  let f = record.fields;
  let (Some(text), Some(options), Some(correct)) = (f.question_text, f.options, f.correct_index) else {
    debug!(target: "remote", record = %record.record_name, "Skipping record with missing fields");
    return None;
  };
  let correct_index = usize::try_from(correct.value).ok()?;
  match Question::new(
    record.record_name.clone(),
    text.value,
    options.value,
    correct_index,
    f.category.map(|w| w.value),
    f.difficulty.map(|w| w.value),
    SourceTag::Cloud,
  ) {
    Ok(q) => Some(q),
    Err(e) => {
      debug!(target: "remote", record = %record.record_name, error = %e, "Skipping invalid record");
      None
    }
  }
}

/// Try to extract a clean error message from a cloud error body.
fn extract_cloud_error(body: &str) -> Option<String> {
  #[derive(Deserialize)]
  #[serde(rename_all = "camelCase")]
  struct EObj {
    server_error_code: String,
    #[serde(default)]
    reason: Option<String>,
  }
  let e: EObj = serde_json::from_str(body).ok()?;
  Some(match e.reason {
    Some(r) => format!("{}: {}", e.server_error_code, r),
    None => e.server_error_code,
  })
}

// --- Query DTOs ---

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest {
  query: Query,
  results_limit: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Query {
  record_type: String,
  filter_by: Vec<Filter>,
  sort_by: Vec<Sort>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Filter {
  field_name: &'static str,
  comparator: &'static str,
  field_value: Wrapped<serde_json::Value>,
}

impl Filter {
  fn new(field_name: &'static str, comparator: &'static str, value: serde_json::Value) -> Self {
    Self { field_name, comparator, field_value: Wrapped { value } }
  }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Sort {
  field_name: &'static str,
  ascending: bool,
}

#[derive(Serialize, Deserialize)]
struct Wrapped<T> {
  value: T,
}

#[derive(Deserialize)]
struct QueryResponse {
  #[serde(default)]
  records: Vec<Record>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Record {
  record_name: String,
  #[serde(default)]
  fields: RecordFields,
  #[serde(default)]
  server_error_code: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct RecordFields {
  question_text: Option<Wrapped<String>>,
  options: Option<Wrapped<Vec<String>>>,
  correct_index: Option<Wrapped<i64>>,
  category: Option<Wrapped<String>>,
  difficulty: Option<Wrapped<String>>,
}

#[cfg(test)]
mod tests {
  use super::*;

  fn records(json: &str) -> Vec<Record> {
    serde_json::from_str::<QueryResponse>(json).unwrap().records
  }

  const BODY: &str = r#"{
    "records": [
      {"recordName": "r1", "fields": {
        "questionText": {"value": "Which band released 'Rumours'?"},
        "options": {"value": ["Fleetwood Mac", "Eagles", "Queen", "ABBA"]},
        "correctIndex": {"value": 0},
        "category": {"value": "Song Trivia"},
        "difficulty": {"value": "easy"},
        "sortOrder": {"value": 42}
      }},
      {"recordName": "r2", "fields": {
        "questionText": {"value": "Three options only"},
        "options": {"value": ["a", "b", "c"]},
        "correctIndex": {"value": 0}
      }},
      {"recordName": "r3", "fields": {
        "questionText": {"value": "Bad index"},
        "options": {"value": ["a", "b", "c", "d"]},
        "correctIndex": {"value": 7}
      }},
      {"recordName": "r4", "serverErrorCode": "NOT_FOUND"},
      {"recordName": "r5", "fields": {
        "questionText": {"value": "Negative index"},
        "options": {"value": ["a", "b", "c", "d"]},
        "correctIndex": {"value": -1}
      }}
    ]
  }"#;

  #[test]
  fn test_record_decoding_keeps_only_valid_questions() {
    let qs: Vec<_> = records(BODY).into_iter().filter_map(record_to_question).collect();
    assert_eq!(qs.len(), 1);
    let q = &qs[0];
    assert_eq!(q.id, "r1");
    assert_eq!(q.source, SourceTag::Cloud);
    assert_eq!(q.correct_index, 0);
    assert_eq!(q.category.as_deref(), Some("Song Trivia"));
    assert_eq!(q.difficulty.as_deref(), Some("easy"));
  }

  #[test]
  fn test_pick_drops_excluded_and_caps_count() {
    let exclude = HashSet::from(["r1".to_string()]);
    assert!(pick(records(BODY), &exclude, 10).is_empty());
    assert_eq!(pick(records(BODY), &HashSet::new(), 0).len(), 0);
    assert_eq!(pick(records(BODY), &HashSet::new(), 10).len(), 1);
  }

  #[test]
  fn test_fetch_limits() {
    assert_eq!(random_fetch_limit(25), 75);
    assert_eq!(random_fetch_limit(200), MAX_RESULTS_PER_QUERY);
    assert_eq!(standard_fetch_limit(25, 5), 40);
    assert_eq!(standard_fetch_limit(25, 150), MAX_RESULTS_PER_QUERY);
    assert_eq!(standard_fetch_limit(395, 50), MAX_RESULTS_PER_QUERY);
  }

  #[test]
  fn test_query_body_shape() {
    let request = QueryRequest {
      query: Query {
        record_type: "Question".into(),
        filter_by: base_filters(Difficulty::Hard),
        sort_by: vec![Sort { field_name: "createdAt", ascending: false }],
      },
      results_limit: 40,
    };
    let v = serde_json::to_value(&request).unwrap();
    assert_eq!(v["resultsLimit"], 40);
    assert_eq!(v["query"]["recordType"], "Question");
    assert_eq!(v["query"]["filterBy"][0]["fieldName"], "isActive");
    assert_eq!(v["query"]["filterBy"][1]["fieldValue"]["value"], "hard");
    assert_eq!(v["query"]["sortBy"][0]["ascending"], false);
    assert_eq!(base_filters(Difficulty::Any).len(), 1);
  }

  #[test]
  fn test_extract_cloud_error() {
    let body = r#"{"serverErrorCode":"AUTHENTICATION_FAILED","reason":"bad token"}"#;
    assert_eq!(extract_cloud_error(body).as_deref(), Some("AUTHENTICATION_FAILED: bad token"));
    assert_eq!(extract_cloud_error("<html>"), None);
  }

  #[test]
  fn test_client_requires_token() {
    let mut cfg = CloudConfig::default();
    cfg.api_token = None;
    assert!(CloudClient::from_config(&cfg, Duration::from_secs(1)).is_none());
    cfg.api_token = Some("  ".into());
    assert!(CloudClient::from_config(&cfg, Duration::from_secs(1)).is_none());
    cfg.api_token = Some("tok".into());
    assert!(CloudClient::from_config(&cfg, Duration::from_secs(1)).is_some());
  }

  // --- Against a local stand-in for the record store ---

  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::sync::Arc;

  use axum::extract::State;
  use axum::http::StatusCode as HttpStatus;
  use axum::response::{IntoResponse, Response};
  use axum::routing::post;
  use axum::{Json, Router};

  /// What the random window answers with; the standard query always gets `BODY`.
  #[derive(Clone, Copy)]
  enum Window {
    Empty,
    Failing,
  }

  struct Server {
    window: Window,
    random_calls: AtomicUsize,
    standard_calls: AtomicUsize,
  }

  async fn records_query(State(srv): State<Arc<Server>>, Json(body): Json<serde_json::Value>) -> Response {
    if body["query"]["sortBy"][0]["fieldName"] == "sortOrder" {
      srv.random_calls.fetch_add(1, Ordering::SeqCst);
      return match srv.window {
        Window::Empty => Json(json!({ "records": [] })).into_response(),
        Window::Failing => (
          HttpStatus::SERVICE_UNAVAILABLE,
          r#"{"serverErrorCode":"SERVICE_UNAVAILABLE","reason":"try later"}"#,
        ).into_response(),
      };
    }
    srv.standard_calls.fetch_add(1, Ordering::SeqCst);
    assert_eq!(body["query"]["sortBy"][0]["fieldName"], "createdAt");
    let records: serde_json::Value = serde_json::from_str(BODY).unwrap();
    Json(records).into_response()
  }

  async fn serve(window: Window) -> (CloudClient, Arc<Server>) {
    let srv = Arc::new(Server { window, random_calls: AtomicUsize::new(0), standard_calls: AtomicUsize::new(0) });
    let app = Router::new()
      .route("/database/1/:container/:environment/public/records/query", post(records_query))
      .with_state(srv.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

    let mut cfg = CloudConfig::default();
    cfg.api_token = Some("tok".into());
    cfg.base_url = format!("http://{addr}/");
    (CloudClient::from_config(&cfg, Duration::from_secs(5)).unwrap(), srv)
  }

  #[tokio::test]
  async fn test_empty_random_window_falls_back_to_standard_query() {
    let (client, srv) = serve(Window::Empty).await;
    let qs = client.fetch_random(10, Difficulty::Any, &HashSet::new()).await.unwrap();
    assert_eq!(qs.len(), 1);
    assert_eq!(qs[0].id, "r1");
    assert_eq!(srv.random_calls.load(Ordering::SeqCst), 1);
    assert_eq!(srv.standard_calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_failing_random_window_falls_back_to_standard_query() {
    let (client, srv) = serve(Window::Failing).await;
    let qs = client.fetch_random(10, Difficulty::Easy, &HashSet::new()).await.unwrap();
    assert_eq!(qs[0].id, "r1");
    assert_eq!(srv.standard_calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_standard_query_with_everything_excluded_is_no_results() {
    let (client, srv) = serve(Window::Empty).await;
    let exclude = HashSet::from(["r1".to_string()]);
    let err = client.fetch_random(10, Difficulty::Any, &exclude).await.unwrap_err();
    assert!(matches!(err, CloudError::NoResults));
    assert_eq!(srv.standard_calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_http_error_carries_server_reason() {
    let (client, _srv) = serve(Window::Failing).await;
    let request = QueryRequest {
      query: Query {
        record_type: "Question".into(),
        filter_by: base_filters(Difficulty::Any),
        sort_by: vec![Sort { field_name: "sortOrder", ascending: true }],
      },
      results_limit: 30,
    };
    match client.query(&request).await {
      Err(CloudError::Http { status, message }) => {
        assert_eq!(status, 503);
        assert_eq!(message, "SERVICE_UNAVAILABLE: try later");
      }
      other => panic!("expected HTTP error, got {:?}", other.map(|r| r.len())),
    }
  }
}
