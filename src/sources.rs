//! Seams between the supply manager and its online sources.
//!
//! The manager only depends on these traits; the real HTTP clients live in
//! `cloud` and `opentdb`, and tests plug in scripted fakes.

use std::collections::HashSet;

use async_trait::async_trait;

use crate::cloud::CloudError;
use crate::domain::{Difficulty, Question};
use crate::opentdb::TriviaApiError;

/// Primary online source: random sampling with an exclusion set.
#[async_trait]
pub trait RandomQuestionSource: Send + Sync {
  async fn fetch_random(
    &self,
    count: usize,
    difficulty: Difficulty,
    exclude: &HashSet<String>,
  ) -> Result<Vec<Question>, CloudError>;
}

/// Secondary online source: category-scoped batches.
#[async_trait]
pub trait CategoryQuestionSource: Send + Sync {
  async fn fetch(
    &self,
    amount: usize,
    category_id: u32,
    difficulty: Difficulty,
  ) -> Result<Vec<Question>, TriviaApiError>;
}
