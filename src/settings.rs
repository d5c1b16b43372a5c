//! Persisted player preferences that steer question loading.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::domain::Difficulty;
use crate::store::{KvStore, StoreError};

const DIFFICULTY_KEY: &str = "trivia.filter.difficulty";
const ONLINE_QUESTIONS_KEY: &str = "trivia.filter.onlineQuestions";
const FORCE_BUNDLE_KEY: &str = "trivia.filter.forceBundle";

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FilterConfiguration {
  #[serde(default)]
  pub difficulty: Difficulty,
  #[serde(default = "default_true")]
  pub enable_online_questions: bool,
  /// Everyone draws from the bundled set (no remote, no cache); used for fair leaderboard runs.
  #[serde(default)]
  pub force_bundle_mode: bool,
}

fn default_true() -> bool {
  true
}

impl Default for FilterConfiguration {
  fn default() -> Self {
    Self { difficulty: Difficulty::Any, enable_online_questions: true, force_bundle_mode: false }
  }
}

impl FilterConfiguration {
  pub fn allows_online(&self) -> bool {
    self.enable_online_questions && !self.force_bundle_mode
  }
}

pub struct Preferences {
  store: Arc<dyn KvStore>,
}

impl Preferences {
  pub fn new(store: Arc<dyn KvStore>) -> Self {
    Self { store }
  }

  /// Unknown or missing stored values fall back to defaults.
  pub fn load(&self) -> FilterConfiguration {
    let defaults = FilterConfiguration::default();
    let difficulty = self
      .store
      .get(DIFFICULTY_KEY)
      .and_then(|s| s.parse().ok())
      .unwrap_or(defaults.difficulty);
    let enable_online_questions = self
      .store
      .get(ONLINE_QUESTIONS_KEY)
      .and_then(|s| s.parse().ok())
      .unwrap_or(defaults.enable_online_questions);
    let force_bundle_mode = self
      .store
      .get(FORCE_BUNDLE_KEY)
      .and_then(|s| s.parse().ok())
      .unwrap_or(defaults.force_bundle_mode);
    FilterConfiguration { difficulty, enable_online_questions, force_bundle_mode }
  }

  pub fn save(&self, cfg: &FilterConfiguration) -> Result<(), StoreError> {
    let online = cfg.enable_online_questions.to_string();
    let force_bundle = cfg.force_bundle_mode.to_string();
    let written = self.store.set_many(&[
      (DIFFICULTY_KEY, cfg.difficulty.as_str()),
      (ONLINE_QUESTIONS_KEY, online.as_str()),
      (FORCE_BUNDLE_KEY, force_bundle.as_str()),
    ]);
    match &written {
      Ok(()) => info!(target: "trivia_backend", difficulty = %cfg.difficulty, online = cfg.enable_online_questions, force_bundle = cfg.force_bundle_mode, "Saved preferences"),
      Err(e) => error!(target: "trivia_backend", error = %e, "Failed to save preferences"),
    }
    written
  }
}
