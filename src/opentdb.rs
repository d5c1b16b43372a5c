//! Client for the public trivia REST API (secondary online question source).
//!
//! The API hands out session tokens so a client does not see the same
//! question twice, and asks for at most one request every few seconds. We keep
//! both pieces of state behind one async mutex, which also serializes calls.
//!
//! Payloads are HTML-entity encoded and always list the correct answer
//! separately, so every question is decoded and its options shuffled here.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::seq::SliceRandom;
use reqwest::header::USER_AGENT;
use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::config::OpenTriviaConfig;
use crate::domain::{Difficulty, Question, SourceTag};
use crate::sources::CategoryQuestionSource;
use crate::util::decode_html_entities;

#[derive(Debug, Error)]
pub enum TriviaApiError {
  #[error("network error: {0}")]
  Network(#[from] reqwest::Error),
  #[error("invalid API response: {0}")]
  InvalidResponse(String),
  #[error("no questions available with current filters")]
  NoResults,
  #[error("invalid API parameter")]
  InvalidParameter,
  #[error("session token not found")]
  TokenNotFound,
  #[error("all questions in session have been used")]
  TokenExhausted,
  #[error("API rate limit exceeded")]
  RateLimited,
  #[error("failed to decode response: {0}")]
  Decode(String),
}

#[derive(Default)]
struct Session {
  token: Option<String>,
  next_allowed: Option<Instant>,
}

#[derive(Clone)]
pub struct OpenTriviaClient {
  client: reqwest::Client,
  base_url: String,
  cooldown: Duration,
  session: Arc<Mutex<Session>>,
}

impl OpenTriviaClient {
  pub fn from_config(cfg: &OpenTriviaConfig, timeout: Duration) -> Option<Self> {
    if !cfg.enabled {
      return None;
    }
    let client = match reqwest::Client::builder().timeout(timeout).build() {
      Ok(c) => c,
      Err(e) => {
        warn!(target: "remote", error = %e, "Failed to build trivia API HTTP client; source disabled");
        return None;
      }
    };
    Some(Self {
      client,
      base_url: cfg.base_url.trim_end_matches('/').to_string(),
      cooldown: Duration::from_secs(cfg.cooldown_secs),
      session: Arc::new(Mutex::new(Session::default())),
    })
  }

  pub fn base_url(&self) -> &str {
    &self.base_url
  }

  #[instrument(level = "debug", skip(self))]
  async fn request_token(&self) -> Result<String, TriviaApiError> {
    let url = format!("{}/api_token.php", self.base_url);
    let res = self.client.get(&url)
      .query(&[("command", "request")])
      .header(USER_AGENT, "retro-trivia-backend/0.1")
      .send()
      .await?;
    let body: TokenResponse = res.json().await.map_err(|e| TriviaApiError::Decode(e.to_string()))?;
    match (body.response_code, body.token) {
      (0, Some(token)) => {
        info!(target: "remote", "Acquired new trivia session token");
        Ok(token)
      }
      (code, _) => Err(TriviaApiError::InvalidResponse(format!("token request response_code {code}"))),
    }
  }

  /// Ask the API to forget which questions this token has already served.
  #[instrument(level = "debug", skip_all)]
  async fn reset_token(&self, token: String) -> Result<(), TriviaApiError> {
    let url = format!("{}/api_token.php", self.base_url);
    let res = self.client.get(&url)
      .query(&[("command", "reset"), ("token", token.as_str())])
      .header(USER_AGENT, "retro-trivia-backend/0.1")
      .send()
      .await?;
    let body: TokenResponse = res.json().await.map_err(|e| TriviaApiError::Decode(e.to_string()))?;
    if body.response_code == 0 {
      info!(target: "remote", "Trivia session token reset");
      Ok(())
    } else {
      Err(TriviaApiError::InvalidResponse(format!("token reset response_code {}", body.response_code)))
    }
  }

  /// Token bookkeeping for API-level failures.
  fn handle_error(&self, session: &mut Session, err: &TriviaApiError) {
    match err {
      TriviaApiError::TokenNotFound => {
        session.token = None;
      }
      TriviaApiError::TokenExhausted => {
        if let Some(token) = session.token.clone() {
          let this = self.clone();
          tokio::spawn(async move {
            if let Err(e) = this.reset_token(token).await {
              warn!(target: "remote", error = %e, "Trivia token reset failed; dropping token");
              this.session.lock().await.token = None;
            }
          });
        }
      }
      TriviaApiError::RateLimited => {
        // Start over with a fresh session once the extended cooldown passes.
        session.token = None;
        session.next_allowed = Some(Instant::now() + self.cooldown * 2);
      }
      _ => {}
    }
  }
}

#[async_trait]
impl CategoryQuestionSource for OpenTriviaClient {
  #[instrument(level = "info", skip_all, fields(amount = amount, category_id = category_id, difficulty = %difficulty))]
  async fn fetch(
    &self,
    amount: usize,
    category_id: u32,
    difficulty: Difficulty,
  ) -> Result<Vec<Question>, TriviaApiError> {
    let mut session = self.session.lock().await;

    if let Some(at) = session.next_allowed {
      if at > Instant::now() {
        debug!(target: "remote", wait_ms = (at - Instant::now()).as_millis() as u64, "Waiting out trivia API cooldown");
      }
      tokio::time::sleep_until(at).await;
    }

    if session.token.is_none() {
      match self.request_token().await {
        Ok(token) => session.token = Some(token),
        Err(e) => warn!(target: "remote", error = %e, "Could not acquire trivia session token; fetching without one"),
      }
    }

    let mut params: Vec<(&str, String)> = vec![
      ("amount", amount.to_string()),
      ("category", category_id.to_string()),
      ("type", "multiple".to_string()),
    ];
    if let Some(d) = difficulty.api_value() {
      params.push(("difficulty", d.to_string()));
    }
    if let Some(token) = &session.token {
      params.push(("token", token.clone()));
    }

    let url = format!("{}/api.php", self.base_url);
    let sent = self.client.get(&url)
      .query(&params)
      .header(USER_AGENT, "retro-trivia-backend/0.1")
      .send()
      .await;
    session.next_allowed = Some(Instant::now() + self.cooldown);
    let res = sent?;

    let outcome = match res.status() {
      StatusCode::TOO_MANY_REQUESTS => Err(TriviaApiError::RateLimited),
      s if s.is_success() => {
        let bytes = res.bytes().await?;
        parse_response(&bytes)
      }
      s => Err(TriviaApiError::InvalidResponse(format!("HTTP {s}"))),
    };

    match &outcome {
      Ok(questions) => info!(target: "remote", returned = questions.len(), "Trivia API fetch"),
      Err(e) => self.handle_error(&mut session, e),
    }
    outcome
  }
}

/// Map the API's response_code and normalize every usable result.
fn parse_response(bytes: &[u8]) -> Result<Vec<Question>, TriviaApiError> {
  let body: ApiResponse = serde_json::from_slice(bytes).map_err(|e| TriviaApiError::Decode(e.to_string()))?;
  match body.response_code {
    0 => {}
    1 => return Err(TriviaApiError::NoResults),
    2 => return Err(TriviaApiError::InvalidParameter),
    3 => return Err(TriviaApiError::TokenNotFound),
    4 => return Err(TriviaApiError::TokenExhausted),
    5 => return Err(TriviaApiError::RateLimited),
    other => return Err(TriviaApiError::InvalidResponse(format!("response_code {other}"))),
  }

  let questions: Vec<Question> = body.results.unwrap_or_default().into_iter().filter_map(normalize).collect();
  if questions.is_empty() {
    return Err(TriviaApiError::NoResults);
  }
  Ok(questions)
}

/// Decode entities, shuffle the correct answer in among the others, and assign a fresh id.
fn normalize(raw: ApiQuestion) -> Option<Question> {
  let mut options: Vec<(bool, String)> = raw
    .incorrect_answers
    .iter()
    .map(|a| (false, decode_html_entities(a)))
    .collect();
  options.push((true, decode_html_entities(&raw.correct_answer)));
  options.shuffle(&mut rand::thread_rng());

  let correct_index = options.iter().position(|(correct, _)| *correct)?;
  let options = options.into_iter().map(|(_, text)| text).collect();
  match Question::new(
    Uuid::new_v4().to_string(),
    decode_html_entities(&raw.question),
    options,
    correct_index,
    Some(decode_html_entities(&raw.category)),
    Some(raw.difficulty),
    SourceTag::OpenTrivia,
  ) {
    Ok(q) => Some(q),
    Err(e) => {
      debug!(target: "remote", kind = %raw.kind, error = %e, "Skipping unusable trivia result");
      None
    }
  }
}

// --- Response DTOs ---

#[derive(Deserialize)]
struct TokenResponse {
  response_code: i64,
  #[serde(default)]
  token: Option<String>,
}

#[derive(Deserialize)]
struct ApiResponse {
  response_code: i64,
  #[serde(default)]
  results: Option<Vec<ApiQuestion>>,
}

#[derive(Deserialize)]
struct ApiQuestion {
  #[serde(rename = "type", default)]
  kind: String,
  difficulty: String,
  category: String,
  question: String,
  correct_answer: String,
  incorrect_answers: Vec<String>,
}
