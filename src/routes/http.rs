//! HTTP endpoint handlers. These are thin wrappers that forward to the manager or core logic.
//! Each handler is instrumented and logs its parameters and basic result info.

use std::sync::Arc;
use axum::{extract::{Path, State}, http::StatusCode, Json, response::IntoResponse};
use tracing::{info, instrument};

use crate::logic::{next_question, submit_answer, update_settings};
use crate::protocol::*;
use crate::routes::error::ApiError;
use crate::settings::FilterConfiguration;
use crate::state::AppState;

#[instrument(level = "info", skip(state))]
pub async fn http_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
  Json(HealthOut {
    ok: true,
    bundled: state.bundled.len(),
    cloud: state.cloud.is_some(),
    open_trivia: state.trivia_api.is_some(),
    cached: state.cache.count(),
  })
}

#[instrument(level = "info", skip(state))]
pub async fn http_post_load(State(state): State<Arc<AppState>>) -> Json<PoolStatusOut> {
  state.manager.load_questions().await;
  let status = state.manager.status().await;
  info!(target: "supply", %status, "HTTP load served");
  Json(status.into())
}

#[instrument(level = "info", skip(state))]
pub async fn http_get_next(State(state): State<Arc<AppState>>) -> Result<Json<QuestionOut>, ApiError> {
  next_question(&state)
    .await
    .map(Json)
    .ok_or_else(|| ApiError::NotFound("pool exhausted".into()))
}

#[instrument(level = "info", skip(state))]
pub async fn http_post_asked(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> StatusCode {
  state.manager.mark_asked(&id).await;
  StatusCode::NO_CONTENT
}

#[instrument(level = "info", skip(state, body), fields(question_id = %body.question_id, selected = body.selected_index))]
pub async fn http_post_answer(
  State(state): State<Arc<AppState>>,
  Json(body): Json<AnswerIn>,
) -> Result<Json<AnswerOut>, ApiError> {
  let out = submit_answer(&state, &body.question_id, body.selected_index).await?;
  Ok(Json(out))
}

#[instrument(level = "info", skip(state))]
pub async fn http_post_reset(State(state): State<Arc<AppState>>) -> StatusCode {
  state.manager.reset_session().await;
  StatusCode::NO_CONTENT
}

#[instrument(level = "info", skip(state))]
pub async fn http_get_status(State(state): State<Arc<AppState>>) -> Json<PoolStatusOut> {
  Json(state.manager.status().await.into())
}

#[instrument(level = "info", skip(state))]
pub async fn http_delete_cache(State(state): State<Arc<AppState>>) -> StatusCode {
  state.manager.clear_cache().await;
  StatusCode::NO_CONTENT
}

#[instrument(level = "info", skip(state))]
pub async fn http_get_settings(State(state): State<Arc<AppState>>) -> Json<FilterConfiguration> {
  Json(state.prefs.load())
}

#[instrument(level = "info", skip(state, body))]
pub async fn http_put_settings(
  State(state): State<Arc<AppState>>,
  Json(body): Json<SettingsIn>,
) -> Result<Json<FilterConfiguration>, ApiError> {
  let cfg = update_settings(&state, body).await?;
  Ok(Json(cfg))
}
