//! WebSocket upgrade + message loop. Each client message is parsed as JSON and
//! forwarded to the manager or core logic, with one JSON reply per request.
//! Pool events are pushed to the client as they happen.

use std::sync::Arc;
use axum::{
  extract::{
    ws::{Message, WebSocket},
    State, WebSocketUpgrade,
  },
  response::IntoResponse,
};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, error, instrument, debug, warn};

use crate::logic::{next_question, submit_answer, update_settings};
use crate::protocol::{ClientWsMessage, ServerWsMessage};
use crate::state::AppState;

#[instrument(level = "info", skip(ws, state))]
pub async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
  info!(target: "trivia_backend", "WebSocket upgrade requested");
  ws.on_upgrade(move |socket| handle_ws(socket, state))
}

#[instrument(level = "info", skip(socket, state))]
async fn handle_ws(mut socket: WebSocket, state: Arc<AppState>) {
  info!(target: "trivia_backend", "WebSocket connected");
  let mut events = state.manager.subscribe();

  loop {
    let reply_msg = tokio::select! {
      incoming = socket.recv() => match incoming {
        Some(Ok(Message::Text(txt))) => match serde_json::from_str::<ClientWsMessage>(&txt) {
          Ok(msg) => {
            debug!(target: "trivia_backend", "WS received: {:?}", &msg);
            handle_client_ws(msg, &state).await
          }
          Err(e) => ServerWsMessage::Error { message: format!("Invalid JSON: {}", e) },
        },
        Some(Ok(Message::Ping(payload))) => {
          let _ = socket.send(Message::Pong(payload)).await;
          continue;
        }
        Some(Ok(Message::Close(_))) | None => break,
        Some(Ok(_)) => continue,
        Some(Err(e)) => {
          warn!(target: "trivia_backend", error = %e, "WS receive error");
          break;
        }
      },
      event = events.recv() => match event {
        Ok(event) => ServerWsMessage::PoolEvent { event },
        Err(RecvError::Lagged(skipped)) => {
          warn!(target: "trivia_backend", skipped, "WS client lagging behind pool events");
          continue;
        }
        Err(RecvError::Closed) => break,
      },
    };

    let out = serde_json::to_string(&reply_msg).unwrap_or_else(|e| {
      serde_json::json!({ "type": "error", "message": format!("Serialization error: {}", e) }).to_string()
    });

    if let Err(e) = socket.send(Message::Text(out)).await {
      error!(target: "trivia_backend", error = %e, "WS send error");
      break;
    }
  }
  info!(target: "trivia_backend", "WebSocket disconnected");
}

#[instrument(level = "info", skip(state))]
async fn handle_client_ws(msg: ClientWsMessage, state: &AppState) -> ServerWsMessage {
  match msg {
    ClientWsMessage::Ping => ServerWsMessage::Pong,

    ClientWsMessage::LoadQuestions => {
      state.manager.load_questions().await;
      ServerWsMessage::PoolStatus { status: state.manager.status().await.into() }
    }

    ClientWsMessage::NextQuestion => match next_question(state).await {
      Some(question) => ServerWsMessage::Question { question },
      None => ServerWsMessage::PoolExhausted,
    },

    ClientWsMessage::MarkAsked { question_id } => {
      state.manager.mark_asked(&question_id).await;
      ServerWsMessage::Marked { question_id }
    }

    ClientWsMessage::SubmitAnswer { question_id, selected_index } => {
      match submit_answer(state, &question_id, selected_index).await {
        Ok(out) => ServerWsMessage::AnswerResult { correct: out.correct, correct_index: out.correct_index },
        Err(e) => ServerWsMessage::Error { message: e.to_string() },
      }
    }

    ClientWsMessage::ResetSession => {
      state.manager.reset_session().await;
      ServerWsMessage::SessionReset
    }

    ClientWsMessage::PoolStatus => ServerWsMessage::PoolStatus { status: state.manager.status().await.into() },

    ClientWsMessage::ClearCache => {
      state.manager.clear_cache().await;
      ServerWsMessage::CacheCleared
    }

    ClientWsMessage::GetSettings => ServerWsMessage::Settings { settings: state.prefs.load() },

    ClientWsMessage::SaveSettings { settings } => match update_settings(state, settings).await {
      Ok(settings) => ServerWsMessage::Settings { settings },
      Err(e) => ServerWsMessage::Error { message: e.to_string() },
    },
  }
}
