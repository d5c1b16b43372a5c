//! Core behaviors shared by both HTTP and WebSocket handlers.
//!
//! This includes:
//!   - Serving the next question without its answer
//!   - Checking a submitted answer (and marking the question asked)
//!   - Merging partial settings updates into stored preferences

use std::sync::Arc;

use thiserror::Error;
use tracing::{info, instrument};

use crate::domain::{Difficulty, OPTION_COUNT};
use crate::protocol::{AnswerOut, QuestionOut, SettingsIn};
use crate::settings::FilterConfiguration;
use crate::state::AppState;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum LogicError {
  #[error("unknown question id: {0}")]
  UnknownQuestion(String),
  #[error("option index {0} out of range")]
  InvalidOption(usize),
  #[error("{0}")]
  InvalidDifficulty(String),
  #[error(transparent)]
  Store(#[from] StoreError),
  #[error("background task failed: {0}")]
  Background(#[from] tokio::task::JoinError),
}

/// `None` means the pool has nothing unasked right now.
pub async fn next_question(state: &AppState) -> Option<QuestionOut> {
  let q = state.manager.next_question().await?;
  info!(target: "supply", id = %q.id, source = %q.source, "Question served");
  Some(QuestionOut::from(&q))
}

#[instrument(level = "info", skip(state))]
pub async fn submit_answer(state: &AppState, question_id: &str, selected_index: usize) -> Result<AnswerOut, LogicError> {
  if selected_index >= OPTION_COUNT {
    return Err(LogicError::InvalidOption(selected_index));
  }
  let q = state
    .manager
    .find(question_id)
    .await
    .ok_or_else(|| LogicError::UnknownQuestion(question_id.to_string()))?;
  state.manager.mark_asked(&q.id).await;
  let correct = q.correct_index == selected_index;
  info!(target: "supply", id = %q.id, correct, "Answer checked");
  Ok(AnswerOut { correct, correct_index: q.correct_index })
}

/// Apply the fields present in `update`, persist, and return the result.
/// Takes effect on the next load or refill.
pub async fn update_settings(state: &AppState, update: SettingsIn) -> Result<FilterConfiguration, LogicError> {
  let mut cfg = state.prefs.load();
  if let Some(d) = update.difficulty {
    cfg.difficulty = d.parse::<Difficulty>().map_err(LogicError::InvalidDifficulty)?;
  }
  if let Some(online) = update.enable_online_questions {
    cfg.enable_online_questions = online;
  }
  if let Some(force) = update.force_bundle_mode {
    cfg.force_bundle_mode = force;
  }
  let prefs = Arc::clone(&state.prefs);
  tokio::task::spawn_blocking(move || prefs.save(&cfg)).await??;
  Ok(cfg)
}
