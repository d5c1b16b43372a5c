//! Domain models: questions, where they came from, and the difficulty filter.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Every source we know of serves four-option multiple choice.
pub const OPTION_COUNT: usize = 4;

/// Where did a question (or the current pool) come from? Diagnostics only.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum SourceTag {
  #[default]
  Bundled,     // shipped with the binary (or the configured bundle file)
  Cache,       // served from the local on-device cache
  Cloud,       // cloud record store (primary online source)
  OpenTrivia,  // public trivia REST API (secondary online source)
}

impl SourceTag {
  pub fn as_str(&self) -> &'static str {
    match self {
      SourceTag::Bundled => "bundled",
      SourceTag::Cache => "cache",
      SourceTag::Cloud => "cloud",
      SourceTag::OpenTrivia => "open_trivia",
    }
  }
}

impl fmt::Display for SourceTag {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QuestionError {
  #[error("expected {OPTION_COUNT} options, got {0}")]
  OptionCount(usize),
  #[error("correct index {index} out of range for {len} options")]
  CorrectIndex { index: usize, len: usize },
}

/// A single multiple-choice question. Immutable once decoded.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Question {
  pub id: String,
  pub question: String,
  pub options: Vec<String>,
  pub correct_index: usize,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub category: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub difficulty: Option<String>,
  #[serde(default)]
  pub source: SourceTag,
}

impl Question {
  /// Build a question, enforcing the option-count and correct-index invariants.
  pub fn new(
    id: impl Into<String>,
    question: impl Into<String>,
    options: Vec<String>,
    correct_index: usize,
    category: Option<String>,
    difficulty: Option<String>,
    source: SourceTag,
  ) -> Result<Self, QuestionError> {
    let q = Self {
      id: id.into(),
      question: question.into(),
      options,
      correct_index,
      category,
      difficulty,
      source,
    };
    q.validate()?;
    Ok(q)
  }

  /// Payloads decoded with serde bypass `new`, so every source re-checks here.
  pub fn validate(&self) -> Result<(), QuestionError> {
    if self.options.len() != OPTION_COUNT {
      return Err(QuestionError::OptionCount(self.options.len()));
    }
    if self.correct_index >= self.options.len() {
      return Err(QuestionError::CorrectIndex { index: self.correct_index, len: self.options.len() });
    }
    Ok(())
  }
}

/// User-selected difficulty. `Any` means "no filter" when forwarded to a source.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
  #[default]
  Any,
  Easy,
  Medium,
  Hard,
}

impl Difficulty {
  pub fn as_str(&self) -> &'static str {
    match self {
      Difficulty::Any => "any",
      Difficulty::Easy => "easy",
      Difficulty::Medium => "medium",
      Difficulty::Hard => "hard",
    }
  }

  /// Value forwarded to remote sources (`None` for `Any`).
  pub fn api_value(&self) -> Option<&'static str> {
    match self {
      Difficulty::Any => None,
      other => Some(other.as_str()),
    }
  }

  /// Case-insensitive label match. `Any` matches everything, including unlabeled questions.
  pub fn matches(&self, label: Option<&str>) -> bool {
    match self.api_value() {
      None => true,
      Some(want) => label.is_some_and(|l| l.eq_ignore_ascii_case(want)),
    }
  }
}

impl fmt::Display for Difficulty {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for Difficulty {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_ascii_lowercase().as_str() {
      "" | "any" => Ok(Difficulty::Any),
      "easy" => Ok(Difficulty::Easy),
      "medium" => Ok(Difficulty::Medium),
      "hard" => Ok(Difficulty::Hard),
      other => Err(format!("unknown difficulty: {other}")),
    }
  }
}

#[cfg(test)]
pub(crate) fn sample_question(id: &str, difficulty: Option<&str>) -> Question {
  Question {
    id: id.to_string(),
    question: format!("Test question {id}?"),
    options: vec!["A".into(), "B".into(), "C".into(), "D".into()],
    correct_index: 0,
    category: None,
    difficulty: difficulty.map(str::to_string),
    source: SourceTag::Bundled,
  }
}
