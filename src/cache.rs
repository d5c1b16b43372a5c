//! Local question cache on top of the key-value store.
//!
//! The cache is one flat list plus a single `cachedAt` timestamp for the whole
//! batch. Any write refreshes the timestamp, so a fresh partial update keeps
//! older entries valid too.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rand::seq::SliceRandom;
use tracing::{debug, error, info, warn};

use crate::domain::{Difficulty, Question};
use crate::store::KvStore;

const CACHE_KEY: &str = "cachedQuestions";
const CACHE_TIMESTAMP_KEY: &str = "cachedQuestionsTimestamp";
const CACHE_DIFFICULTY_KEY: &str = "cachedQuestionsDifficulty";

pub trait Clock: Send + Sync {
  fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
  fn now(&self) -> DateTime<Utc> {
    Utc::now()
  }
}

#[derive(Clone, Copy, Debug)]
pub struct CacheLimits {
  pub max_age: Duration,
  pub max_size: usize,
}

impl Default for CacheLimits {
  fn default() -> Self {
    Self { max_age: Duration::hours(24), max_size: 100 }
  }
}

pub struct QuestionCache {
  store: Arc<dyn KvStore>,
  clock: Arc<dyn Clock>,
  limits: CacheLimits,
}

impl QuestionCache {
  pub fn new(store: Arc<dyn KvStore>, clock: Arc<dyn Clock>, limits: CacheLimits) -> Self {
    Self { store, clock, limits }
  }

  /// Merge `questions` into the cache (dedup by id), keep the newest
  /// `max_size` entries, and stamp the batch with "now".
  pub fn put(&self, questions: &[Question], difficulty: Difficulty) {
    if questions.is_empty() {
      return;
    }

    let mut all = self.load_all();
    let before = all.len();
    for q in questions {
      if !all.iter().any(|c| c.id == q.id) {
        all.push(q.clone());
      }
    }
    let added = all.len() - before;

    if all.len() > self.limits.max_size {
      let excess = all.len() - self.limits.max_size;
      all.drain(..excess);
    }

    let json = match serde_json::to_string(&all) {
      Ok(j) => j,
      Err(e) => {
        error!(target: "cache", error = %e, "Failed to encode cached questions");
        return;
      }
    };
    let stamp = self.clock.now().to_rfc3339();
    let writes = self.store.set_many(&[
      (CACHE_KEY, json.as_str()),
      (CACHE_TIMESTAMP_KEY, stamp.as_str()),
      (CACHE_DIFFICULTY_KEY, difficulty.as_str()),
    ]);
    match writes {
      Ok(()) => info!(target: "cache", added, total = all.len(), %difficulty, "Cached questions"),
      Err(e) => error!(target: "cache", error = %e, "Failed to persist question cache"),
    }
  }

  /// Up to `count` shuffled entries matching `difficulty`; empty when stale.
  pub fn get(&self, count: usize, difficulty: Difficulty) -> Vec<Question> {
    if !self.is_valid() {
      debug!(target: "cache", "Cache is stale or empty");
      return Vec::new();
    }

    let mut questions: Vec<Question> = self
      .load_all()
      .into_iter()
      .filter(|q| difficulty.matches(q.difficulty.as_deref()))
      .collect();
    questions.shuffle(&mut rand::thread_rng());
    questions.truncate(count);
    debug!(target: "cache", returned = questions.len(), %difficulty, "Serving cached questions");
    questions
  }

  /// True iff a timestamp exists and is younger than `max_age`. Ignores entry count.
  pub fn is_valid(&self) -> bool {
    let Some(stamp) = self.timestamp() else {
      return false;
    };
    let age = self.clock.now() - stamp;
    let valid = age < self.limits.max_age;
    if !valid {
      debug!(target: "cache", age_hours = age.num_hours(), "Cache is stale");
    }
    valid
  }

  pub fn clear(&self) {
    let removed = self.store.remove_many(&[CACHE_KEY, CACHE_TIMESTAMP_KEY, CACHE_DIFFICULTY_KEY]);
    match removed {
      Ok(()) => info!(target: "cache", "Cache cleared"),
      Err(e) => error!(target: "cache", error = %e, "Failed to clear question cache"),
    }
  }

  /// Number of stored entries, regardless of staleness.
  pub fn count(&self) -> usize {
    self.load_all().len()
  }

  pub fn timestamp(&self) -> Option<DateTime<Utc>> {
    let raw = self.store.get(CACHE_TIMESTAMP_KEY)?;
    match DateTime::parse_from_rfc3339(&raw) {
      Ok(ts) => Some(ts.with_timezone(&Utc)),
      Err(e) => {
        warn!(target: "cache", error = %e, "Unparseable cache timestamp");
        None
      }
    }
  }

  /// Difficulty filter recorded by the last `put`.
  pub fn difficulty_tag(&self) -> Option<Difficulty> {
    self.store.get(CACHE_DIFFICULTY_KEY)?.parse().ok()
  }

  fn load_all(&self) -> Vec<Question> {
    let Some(raw) = self.store.get(CACHE_KEY) else {
      return Vec::new();
    };
    match serde_json::from_str::<Vec<Question>>(&raw) {
      Ok(list) => list.into_iter().filter(|q| q.validate().is_ok()).collect(),
      Err(e) => {
        error!(target: "cache", error = %e, "Failed to decode cached questions");
        Vec::new()
      }
    }
  }
}
