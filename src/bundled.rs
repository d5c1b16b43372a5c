//! Bundled question set: the fallback of last resort.
//!
//! Compiled into the binary from `data/questions.json` unless a bundle file is
//! configured. Loaded once at startup; an empty set is a packaging defect and
//! refuses to start.

use std::path::Path;

use anyhow::{bail, Context, Result};
use rand::seq::SliceRandom;
use tracing::{info, warn};

use crate::domain::{Difficulty, Question};

const BUILTIN_QUESTIONS: &str = include_str!("../data/questions.json");

#[derive(Debug)]
pub struct BundledQuestions {
  all: Vec<Question>,
}

impl BundledQuestions {
  /// Built-in set, or the file at `path` when given.
  pub fn load(path: Option<&Path>) -> Result<Self> {
    let set = match path {
      Some(p) => {
        let raw = std::fs::read_to_string(p).with_context(|| format!("reading bundle file {}", p.display()))?;
        Self::from_json(&raw).with_context(|| format!("parsing bundle file {}", p.display()))?
      }
      None => Self::from_json(BUILTIN_QUESTIONS).context("parsing built-in questions")?,
    };
    if set.is_empty() {
      bail!("bundled question set is empty");
    }
    info!(target: "trivia_backend", count = set.all.len(), custom = path.is_some(), "Loaded bundled questions");
    Ok(set)
  }

  /// Decode a JSON array of questions, skipping entries that break the invariants.
  pub fn from_json(raw: &str) -> Result<Self> {
    let decoded: Vec<Question> = serde_json::from_str(raw)?;
    let all = decoded
      .into_iter()
      .filter(|q| match q.validate() {
        Ok(()) => true,
        Err(e) => {
          warn!(target: "trivia_backend", id = %q.id, error = %e, "Skipping invalid bundled question");
          false
        }
      })
      .collect();
    Ok(Self { all })
  }

  pub fn from_questions(all: Vec<Question>) -> Self {
    Self { all }
  }

  pub fn len(&self) -> usize {
    self.all.len()
  }

  pub fn is_empty(&self) -> bool {
    self.all.is_empty()
  }

  /// Shuffled questions matching `difficulty`; the whole set when nothing matches.
  pub fn select(&self, difficulty: Difficulty) -> Vec<Question> {
    let mut questions: Vec<Question> = self
      .all
      .iter()
      .filter(|q| difficulty.matches(q.difficulty.as_deref()))
      .cloned()
      .collect();
    if questions.is_empty() {
      info!(target: "supply", %difficulty, "No bundled questions match filter; using all bundled questions");
      questions = self.all.clone();
    }
    questions.shuffle(&mut rand::thread_rng());
    questions
  }
}
