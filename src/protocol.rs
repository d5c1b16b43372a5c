//! Public protocol structs for WebSocket and HTTP endpoints (serde ready).
//! The correct option index never leaves the server except in an answer result.

use serde::{Deserialize, Serialize};

use crate::domain::{Question, SourceTag};
use crate::manager::{PoolEvent, PoolStatus};
use crate::settings::FilterConfiguration;

/// Messages the client can send over WebSocket.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientWsMessage {
    Ping,
    LoadQuestions,
    NextQuestion,
    MarkAsked {
        #[serde(rename = "questionId")]
        question_id: String,
    },
    SubmitAnswer {
        #[serde(rename = "questionId")]
        question_id: String,
        #[serde(rename = "selectedIndex")]
        selected_index: usize,
    },
    ResetSession,
    PoolStatus,
    ClearCache,
    GetSettings,
    SaveSettings {
        settings: SettingsIn,
    },
}

/// Messages the server sends back over WebSocket.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerWsMessage {
    Pong,
    Question {
        question: QuestionOut,
    },
    PoolExhausted,
    Marked {
        #[serde(rename = "questionId")]
        question_id: String,
    },
    AnswerResult {
        correct: bool,
        #[serde(rename = "correctIndex")]
        correct_index: usize,
    },
    SessionReset,
    PoolStatus {
        status: PoolStatusOut,
    },
    CacheCleared,
    Settings {
        settings: FilterConfiguration,
    },
    /// Unsolicited, forwarded from the manager's event channel.
    PoolEvent {
        event: PoolEvent,
    },
    Error {
        message: String,
    },
}

/// Question as shown to the player.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionOut {
    pub id: String,
    pub question: String,
    pub options: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub difficulty: Option<String>,
    pub source: SourceTag,
}

impl From<&Question> for QuestionOut {
    fn from(q: &Question) -> Self {
        Self {
            id: q.id.clone(),
            question: q.question.clone(),
            options: q.options.clone(),
            category: q.category.clone(),
            difficulty: q.difficulty.clone(),
            source: q.source,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolStatusOut {
    pub total: usize,
    pub unanswered: usize,
    pub asked: usize,
    pub source: Option<SourceTag>,
    pub cached: usize,
    pub cache_valid: bool,
    pub summary: String,
}

impl From<PoolStatus> for PoolStatusOut {
    fn from(s: PoolStatus) -> Self {
        let summary = s.to_string();
        Self {
            total: s.total,
            unanswered: s.unanswered,
            asked: s.asked,
            source: s.source,
            cached: s.cached,
            cache_valid: s.cache_valid,
            summary,
        }
    }
}

//
// HTTP request/response DTOs
//

#[derive(Debug, Deserialize)]
pub struct AnswerIn {
    #[serde(rename = "questionId")]
    pub question_id: String,
    #[serde(rename = "selectedIndex")]
    pub selected_index: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AnswerOut {
    pub correct: bool,
    #[serde(rename = "correctIndex")]
    pub correct_index: usize,
}

/// Partial update; absent fields keep their stored value.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsIn {
    pub difficulty: Option<String>,
    pub enable_online_questions: Option<bool>,
    pub force_bundle_mode: Option<bool>,
}

#[derive(Serialize)]
pub struct HealthOut {
    pub ok: bool,
    pub bundled: usize,
    pub cloud: bool,
    #[serde(rename = "openTrivia")]
    pub open_trivia: bool,
    pub cached: usize,
}
