//! Question supply: the in-memory pool and the source priority chain behind it.
//!
//! Sources are tried in a fixed order, stopping at the first non-empty result:
//!   1. cloud record store (random sample, excluding asked ids)
//!   2. public trivia API (music category)
//!   3. local cache (only while fresh)
//!   4. bundled set (filtered, or the whole set if nothing matches)
//! Online results are written through to the cache. Every failure falls
//! through to the next source; nothing here returns an error to the caller.
//!
//! Locking: `fetch_lock` serializes whole load/refill operations (so they never
//! interleave pool mutations), while `state` is only held for short, non-I/O
//! critical sections so the read path never waits on the network.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{broadcast, Mutex};
use tokio::time::timeout;
use tracing::{debug, error, info, instrument, warn};

use crate::bundled::BundledQuestions;
use crate::cache::QuestionCache;
use crate::domain::{Difficulty, Question, SourceTag};
use crate::settings::{FilterConfiguration, Preferences};
use crate::sources::{CategoryQuestionSource, RandomQuestionSource};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PoolLimits {
  /// Below this many entries, reads trigger a background refill.
  pub min_size: usize,
  /// Requested per fetch.
  pub target_size: usize,
  /// Refills trim the oldest entries beyond this.
  pub max_size: usize,
}

impl Default for PoolLimits {
  fn default() -> Self {
    Self { min_size: 10, target_size: 25, max_size: 30 }
  }
}

#[derive(Clone, Debug)]
pub struct SupplyOptions {
  pub limits: PoolLimits,
  pub remote_timeout: Duration,
  pub category_id: u32,
}

impl Default for SupplyOptions {
  fn default() -> Self {
    Self { limits: PoolLimits::default(), remote_timeout: Duration::from_secs(12), category_id: 12 }
  }
}

/// Collaborators, injected by whoever builds the application context.
pub struct SupplyDeps {
  pub cache: Arc<QuestionCache>,
  pub cloud: Option<Arc<dyn RandomQuestionSource>>,
  pub trivia_api: Option<Arc<dyn CategoryQuestionSource>>,
  pub bundled: Arc<BundledQuestions>,
  pub prefs: Arc<Preferences>,
}

/// Pushed to subscribers whenever the pool or session changes.
#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PoolEvent {
  Loaded { source: SourceTag, count: usize },
  Refilled { added: usize, total: usize },
  Exhausted,
  SessionReset,
  CacheCleared,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PoolStatus {
  pub total: usize,
  pub unanswered: usize,
  pub asked: usize,
  pub source: Option<SourceTag>,
  pub cached: usize,
  pub cache_valid: bool,
}

impl fmt::Display for PoolStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let source = self.source.map(|s| s.as_str()).unwrap_or("none");
    write!(
      f,
      "Pool: {} total, {} unanswered, {} asked (source: {})",
      self.total, self.unanswered, self.asked, source
    )
  }
}

#[derive(Default)]
struct PoolState {
  pool: Vec<Question>,
  asked: HashSet<String>,
  /// Handed out but not yet asked. Refill trimming may drop these from `pool`.
  served: HashMap<String, Question>,
  source: Option<SourceTag>,
}

pub struct QuestionManager {
  cache: Arc<QuestionCache>,
  cloud: Option<Arc<dyn RandomQuestionSource>>,
  trivia_api: Option<Arc<dyn CategoryQuestionSource>>,
  bundled: Arc<BundledQuestions>,
  prefs: Arc<Preferences>,
  opts: SupplyOptions,
  state: Mutex<PoolState>,
  fetch_lock: Mutex<()>,
  refill_in_flight: AtomicBool,
  events: broadcast::Sender<PoolEvent>,
}

impl QuestionManager {
  pub fn new(deps: SupplyDeps, opts: SupplyOptions) -> Self {
    let (events, _) = broadcast::channel(32);
    Self {
      cache: deps.cache,
      cloud: deps.cloud,
      trivia_api: deps.trivia_api,
      bundled: deps.bundled,
      prefs: deps.prefs,
      opts,
      state: Mutex::new(PoolState::default()),
      fetch_lock: Mutex::new(()),
      refill_in_flight: AtomicBool::new(false),
      events,
    }
  }

  pub fn subscribe(&self) -> broadcast::Receiver<PoolEvent> {
    self.events.subscribe()
  }

  fn publish(&self, event: PoolEvent) {
    // No subscribers is fine.
    let _ = self.events.send(event);
  }

  /// Replace the pool with the first non-empty result of the priority chain.
  #[instrument(level = "info", skip(self))]
  pub async fn load_questions(&self) {
    let _fetching = self.fetch_lock.lock().await;
    let filter = self.prefs.load();
    info!(target: "supply", difficulty = %filter.difficulty, online = filter.enable_online_questions, force_bundle = filter.force_bundle_mode, "Loading questions");

    let exclude = { self.state.lock().await.asked.clone() };
    let (questions, source) = match self.fetch_online(&filter, &exclude).await {
      Some((questions, source)) => {
        self.write_through(&questions, filter.difficulty).await;
        (questions, source)
      }
      None => self.fetch_local(&filter),
    };

    let count = {
      let mut st = self.state.lock().await;
      st.pool = dedup_by_id(questions);
      st.source = if st.pool.is_empty() { None } else { Some(source) };
      st.pool.len()
    };

    if count == 0 {
      error!(target: "supply", "Every question source is empty, including the bundled set");
      self.publish(PoolEvent::Exhausted);
    } else {
      info!(target: "supply", %source, count, "Loaded question pool");
      self.publish(PoolEvent::Loaded { source, count });
    }
  }

  /// First unasked question in pool order. Kicks off a background refill
  /// (without waiting for it) when the pool is below the low-water mark.
  pub async fn next_question(self: &Arc<Self>) -> Option<Question> {
    let mut st = self.state.lock().await;
    if st.pool.len() < self.opts.limits.min_size {
      self.spawn_refill();
    }
    let next = st.pool.iter().find(|q| !st.asked.contains(&q.id)).cloned();
    if let Some(q) = &next {
      st.served.insert(q.id.clone(), q.clone());
    } else {
      debug!(target: "supply", pool = st.pool.len(), asked = st.asked.len(), "No unanswered questions available in pool");
    }
    next
  }

  /// Idempotent.
  pub async fn mark_asked(&self, id: &str) {
    let mut st = self.state.lock().await;
    st.served.remove(id);
    if st.asked.insert(id.to_string()) {
      debug!(target: "supply", %id, asked = st.asked.len(), "Marked question as asked");
    }
  }

  /// Forget asked ids. Pool and cache are left alone.
  pub async fn reset_session(&self) {
    let cleared = {
      let mut st = self.state.lock().await;
      let n = st.asked.len();
      st.asked.clear();
      st.served.clear();
      n
    };
    info!(target: "supply", cleared, "Session reset");
    self.publish(PoolEvent::SessionReset);
  }

  /// Pool entry, or a served question that a refill has since trimmed away.
  pub async fn find(&self, id: &str) -> Option<Question> {
    let st = self.state.lock().await;
    st.served
      .get(id)
      .or_else(|| st.pool.iter().find(|q| q.id == id))
      .cloned()
  }

  pub async fn status(&self) -> PoolStatus {
    let st = self.state.lock().await;
    let unanswered = st.pool.iter().filter(|q| !st.asked.contains(&q.id)).count();
    PoolStatus {
      total: st.pool.len(),
      unanswered,
      asked: st.asked.len(),
      source: st.source,
      cached: self.cache.count(),
      cache_valid: self.cache.is_valid(),
    }
  }

  pub async fn pool_status(&self) -> String {
    self.status().await.to_string()
  }

  pub async fn clear_cache(&self) {
    let cache = Arc::clone(&self.cache);
    if let Err(e) = tokio::task::spawn_blocking(move || cache.clear()).await {
      error!(target: "supply", error = %e, "Cache clear task failed");
    }
    self.publish(PoolEvent::CacheCleared);
  }

  /// The store fsyncs on write, so persistence runs on the blocking pool.
  async fn write_through(&self, questions: &[Question], difficulty: Difficulty) {
    let cache = Arc::clone(&self.cache);
    let batch = questions.to_vec();
    if let Err(e) = tokio::task::spawn_blocking(move || cache.put(&batch, difficulty)).await {
      error!(target: "supply", error = %e, "Cache write task failed");
    }
  }

  fn spawn_refill(self: &Arc<Self>) {
    if self.refill_in_flight.swap(true, Ordering::AcqRel) {
      return;
    }
    let this = Arc::clone(self);
    tokio::spawn(async move {
      this.refill_pool().await;
      this.refill_in_flight.store(false, Ordering::Release);
    });
  }

  /// Append fresh online results (dedup by id, trim oldest beyond max).
  /// Local sources are only consulted if the pool is still empty afterwards.
  #[instrument(level = "info", skip(self))]
  async fn refill_pool(&self) {
    let _fetching = self.fetch_lock.lock().await;
    let filter = self.prefs.load();
    let exclude = {
      let st = self.state.lock().await;
      debug!(target: "supply", current = st.pool.len(), "Refilling question pool");
      st.asked.clone()
    };

    let fetched = self.fetch_online(&filter, &exclude).await;
    if let Some((questions, _)) = &fetched {
      self.write_through(questions, filter.difficulty).await;
    }

    let mut st = self.state.lock().await;
    if let Some((questions, source)) = fetched {
      let added = merge_into(&mut st.pool, questions, self.opts.limits.max_size);
      if added > 0 {
        st.source = Some(source);
      }
      let total = st.pool.len();
      drop(st);
      info!(target: "supply", %source, added, total, "Refilled question pool");
      self.publish(PoolEvent::Refilled { added, total });
      return;
    }

    if st.pool.is_empty() {
      let (questions, source) = self.fetch_local(&filter);
      st.pool = dedup_by_id(questions);
      st.source = if st.pool.is_empty() { None } else { Some(source) };
      let total = st.pool.len();
      drop(st);
      if total == 0 {
        self.publish(PoolEvent::Exhausted);
      } else {
        warn!(target: "supply", %source, total, "Pool was empty; refilled from local source");
        self.publish(PoolEvent::Refilled { added: total, total });
      }
    }
  }

  /// Steps 1 and 2 of the chain. `None` means "fall through".
  async fn fetch_online(
    &self,
    filter: &FilterConfiguration,
    exclude: &HashSet<String>,
  ) -> Option<(Vec<Question>, SourceTag)> {
    if !filter.allows_online() {
      debug!(target: "supply", "Online sources disabled by preferences");
      return None;
    }
    let count = self.opts.limits.target_size;
    let budget = self.opts.remote_timeout;

    if let Some(cloud) = &self.cloud {
      match timeout(budget, cloud.fetch_random(count, filter.difficulty, exclude)).await {
        Ok(Ok(questions)) => {
          let questions = keep_valid(questions);
          if !questions.is_empty() {
            return Some((questions, SourceTag::Cloud));
          }
          warn!(target: "supply", source = "cloud", "Cloud returned no usable questions; trying next source");
        }
        Ok(Err(e)) => warn!(target: "supply", source = "cloud", error = %e, "Cloud fetch failed; trying next source"),
        Err(_) => warn!(target: "supply", source = "cloud", timeout_secs = budget.as_secs(), "Cloud fetch timed out; trying next source"),
      }
    }

    if let Some(api) = &self.trivia_api {
      match timeout(budget, api.fetch(count, self.opts.category_id, filter.difficulty)).await {
        Ok(Ok(questions)) => {
          let questions = keep_valid(questions);
          if !questions.is_empty() {
            return Some((questions, SourceTag::OpenTrivia));
          }
          warn!(target: "supply", source = "open_trivia", "Trivia API returned no usable questions; trying next source");
        }
        Ok(Err(e)) => warn!(target: "supply", source = "open_trivia", error = %e, "Trivia API fetch failed; trying next source"),
        Err(_) => warn!(target: "supply", source = "open_trivia", timeout_secs = budget.as_secs(), "Trivia API fetch timed out; trying next source"),
      }
    }
    None
  }

  /// Steps 3 and 4 of the chain.
  fn fetch_local(&self, filter: &FilterConfiguration) -> (Vec<Question>, SourceTag) {
    if !filter.force_bundle_mode {
      let cached = self.cache.get(self.opts.limits.target_size, filter.difficulty);
      if !cached.is_empty() {
        return (cached, SourceTag::Cache);
      }
      debug!(target: "supply", "Cache unusable; falling back to bundled questions");
    }
    (self.bundled.select(filter.difficulty), SourceTag::Bundled)
  }
}

fn keep_valid(mut questions: Vec<Question>) -> Vec<Question> {
  questions.retain(|q| match q.validate() {
    Ok(()) => true,
    Err(e) => {
      warn!(target: "supply", id = %q.id, error = %e, "Dropping invalid question");
      false
    }
  });
  questions
}

fn dedup_by_id(questions: Vec<Question>) -> Vec<Question> {
  let mut seen = HashSet::new();
  questions.into_iter().filter(|q| seen.insert(q.id.clone())).collect()
}

/// Append unseen ids, then drop from the front down to `max`. Returns how many were appended.
fn merge_into(pool: &mut Vec<Question>, incoming: Vec<Question>, max: usize) -> usize {
  let mut seen: HashSet<String> = pool.iter().map(|q| q.id.clone()).collect();
  let before = pool.len();
  for q in incoming {
    if seen.insert(q.id.clone()) {
      pool.push(q);
    }
  }
  let added = pool.len() - before;
  if pool.len() > max {
    let excess = pool.len() - max;
    pool.drain(..excess);
  }
  added
}

#[cfg(test)]
mod tests {
  use std::collections::VecDeque;
  use std::sync::atomic::AtomicUsize;
  use std::sync::Mutex as StdMutex;

  use async_trait::async_trait;
  use tokio::sync::Notify;

  use super::*;
  use crate::cache::tests::ManualClock;
  use crate::cache::CacheLimits;
  use crate::cloud::CloudError;
  use crate::domain::{sample_question, Difficulty};
  use crate::opentdb::TriviaApiError;
  use crate::store::MemoryStore;

  /// Source fake: answers from a script, optionally parking on a gate first.
  struct Scripted<E> {
    script: StdMutex<VecDeque<Result<Vec<Question>, E>>>,
    calls: AtomicUsize,
    excludes: StdMutex<Vec<HashSet<String>>>,
    gate: StdMutex<Option<Arc<Notify>>>,
    entered: Notify,
  }

  impl<E> Scripted<E> {
    fn new(script: Vec<Result<Vec<Question>, E>>) -> Arc<Self> {
      Arc::new(Self {
        script: StdMutex::new(script.into()),
        calls: AtomicUsize::new(0),
        excludes: StdMutex::new(Vec::new()),
        gate: StdMutex::new(None),
        entered: Notify::new(),
      })
    }

    fn calls(&self) -> usize {
      self.calls.load(Ordering::SeqCst)
    }

    fn push(&self, answer: Result<Vec<Question>, E>) {
      self.script.lock().unwrap().push_back(answer);
    }

    fn hold(&self) -> Arc<Notify> {
      let gate = Arc::new(Notify::new());
      *self.gate.lock().unwrap() = Some(gate.clone());
      gate
    }

    async fn answer(&self, exclude: Option<&HashSet<String>>, empty: E) -> Result<Vec<Question>, E> {
      self.calls.fetch_add(1, Ordering::SeqCst);
      if let Some(ex) = exclude {
        self.excludes.lock().unwrap().push(ex.clone());
      }
      let gate = self.gate.lock().unwrap().clone();
      if let Some(gate) = gate {
        self.entered.notify_one();
        gate.notified().await;
      }
      self.script.lock().unwrap().pop_front().unwrap_or(Err(empty))
    }
  }

  #[async_trait]
  impl RandomQuestionSource for Scripted<CloudError> {
    async fn fetch_random(&self, _count: usize, _d: Difficulty, exclude: &HashSet<String>) -> Result<Vec<Question>, CloudError> {
      self.answer(Some(exclude), CloudError::NoResults).await
    }
  }

  #[async_trait]
  impl CategoryQuestionSource for Scripted<TriviaApiError> {
    async fn fetch(&self, _amount: usize, _category: u32, _d: Difficulty) -> Result<Vec<Question>, TriviaApiError> {
      self.answer(None, TriviaApiError::NoResults).await
    }
  }

  struct Harness {
    mgr: Arc<QuestionManager>,
    cache: Arc<QuestionCache>,
    clock: Arc<ManualClock>,
    prefs: Arc<Preferences>,
    cloud: Arc<Scripted<CloudError>>,
    api: Arc<Scripted<TriviaApiError>>,
  }

  fn batch(prefix: &str, n: usize, difficulty: Option<&str>) -> Vec<Question> {
    (0..n).map(|i| sample_question(&format!("{prefix}{i}"), difficulty)).collect()
  }

  fn harness(
    cloud: Vec<Result<Vec<Question>, CloudError>>,
    api: Vec<Result<Vec<Question>, TriviaApiError>>,
    bundled: Vec<Question>,
  ) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::new());
    let cache = Arc::new(QuestionCache::new(store.clone(), clock.clone(), CacheLimits::default()));
    let prefs = Arc::new(Preferences::new(store));
    let cloud = Scripted::new(cloud);
    let api = Scripted::new(api);
    let deps = SupplyDeps {
      cache: cache.clone(),
      cloud: Some(cloud.clone() as Arc<dyn RandomQuestionSource>),
      trivia_api: Some(api.clone() as Arc<dyn CategoryQuestionSource>),
      bundled: Arc::new(BundledQuestions::from_questions(bundled)),
      prefs: prefs.clone(),
    };
    let mgr = Arc::new(QuestionManager::new(deps, SupplyOptions::default()));
    Harness { mgr, cache, clock, prefs, cloud, api }
  }

  fn set_difficulty(h: &Harness, difficulty: Difficulty) {
    let mut cfg = h.prefs.load();
    cfg.difficulty = difficulty;
    h.prefs.save(&cfg).unwrap();
  }

  #[tokio::test]
  async fn test_cloud_failure_falls_through_to_trivia_api_and_caches() {
    let h = harness(
      vec![Err(CloudError::Decode("boom".into()))],
      vec![Ok(batch("api", 5, Some("easy")))],
      batch("b", 3, None),
    );
    set_difficulty(&h, Difficulty::Easy);

    h.mgr.load_questions().await;

    let status = h.mgr.status().await;
    assert_eq!(status.total, 5);
    assert_eq!(status.source, Some(SourceTag::OpenTrivia));
    assert_eq!(h.cache.count(), 5);
    assert_eq!(h.cache.difficulty_tag(), Some(Difficulty::Easy));
    assert_eq!(h.cache.get(10, Difficulty::Easy).len(), 5);
  }

  #[tokio::test]
  async fn test_stale_cache_falls_back_to_whole_bundle_when_filter_matches_nothing() {
    let mut bundle = batch("easy", 120, Some("easy"));
    bundle.extend(batch("med", 80, Some("medium")));
    let h = harness(vec![], vec![Err(TriviaApiError::RateLimited)], bundle);
    h.cache.put(&batch("c", 10, Some("hard")), Difficulty::Hard);
    h.clock.advance(chrono::Duration::hours(25));
    set_difficulty(&h, Difficulty::Hard);

    h.mgr.load_questions().await;

    let status = h.mgr.status().await;
    assert_eq!(status.total, 200);
    assert_eq!(status.source, Some(SourceTag::Bundled));
  }

  #[tokio::test]
  async fn test_fresh_cache_serves_when_remotes_fail() {
    let h = harness(vec![], vec![], batch("b", 3, None));
    h.cache.put(&batch("c", 4, Some("medium")), Difficulty::Medium);
    h.cache.put(&batch("x", 2, Some("easy")), Difficulty::Easy);
    set_difficulty(&h, Difficulty::Medium);

    h.mgr.load_questions().await;

    let status = h.mgr.status().await;
    assert_eq!(status.source, Some(SourceTag::Cache));
    assert_eq!(status.total, 4);
  }

  #[tokio::test]
  async fn test_cloud_success_wins_and_receives_exclusion_set() {
    let h = harness(vec![Ok(batch("cl", 25, None))], vec![Ok(batch("api", 5, None))], batch("b", 3, None));
    h.mgr.mark_asked("seen-1").await;

    h.mgr.load_questions().await;

    let status = h.mgr.status().await;
    assert_eq!(status.source, Some(SourceTag::Cloud));
    assert_eq!(status.total, 25);
    assert_eq!(h.api.calls(), 0);
    assert_eq!(h.cache.count(), 25);
    let excludes = h.cloud.excludes.lock().unwrap();
    assert!(excludes[0].contains("seen-1"));
  }

  #[tokio::test]
  async fn test_invalid_remote_questions_are_dropped() {
    let mut broken = sample_question("bad", None);
    broken.options.pop();
    let mut answers = batch("cl", 2, None);
    answers.push(broken);
    let h = harness(vec![Ok(answers)], vec![], batch("b", 3, None));

    h.mgr.load_questions().await;

    assert_eq!(h.mgr.status().await.total, 2);
    assert!(h.mgr.find("bad").await.is_none());
  }

  #[tokio::test]
  async fn test_next_question_skips_asked_and_reset_restores() {
    let h = harness(vec![Ok(batch("q", 12, None))], vec![], batch("b", 3, None));
    h.mgr.load_questions().await;

    let first = h.mgr.next_question().await.unwrap();
    assert_eq!(first.id, "q0");
    h.mgr.mark_asked(&first.id).await;
    h.mgr.mark_asked(&first.id).await;
    assert_eq!(h.mgr.status().await.asked, 1, "marking twice counts once");

    let second = h.mgr.next_question().await.unwrap();
    assert_eq!(second.id, "q1");

    for i in 1..12 {
      h.mgr.mark_asked(&format!("q{i}")).await;
    }
    assert!(h.mgr.next_question().await.is_none(), "pool exhausted");

    let cached_before = h.cache.count();
    h.mgr.reset_session().await;
    let status = h.mgr.status().await;
    assert_eq!(status.asked, 0);
    assert_eq!(status.total, 12, "pool untouched");
    assert_eq!(h.cache.count(), cached_before, "cache untouched");
    assert_eq!(h.mgr.next_question().await.unwrap().id, "q0");
  }

  #[tokio::test]
  async fn test_next_question_never_returns_asked_ids() {
    let h = harness(vec![Ok(batch("q", 20, None))], vec![], batch("b", 3, None));
    h.mgr.load_questions().await;
    let mut served = HashSet::new();
    while let Some(q) = h.mgr.next_question().await {
      assert!(served.insert(q.id.clone()), "{} served twice", q.id);
      h.mgr.mark_asked(&q.id).await;
    }
    assert_eq!(served.len(), 20);
  }

  #[tokio::test]
  async fn test_low_pool_read_returns_immediately_and_refills_in_background() {
    let h = harness(vec![Ok(batch("q", 8, None))], vec![], batch("b", 3, None));
    h.mgr.load_questions().await;
    let mut events = h.mgr.subscribe();

    let gate = h.cloud.hold();
    h.cloud.push(Ok(batch("r", 10, None)));
    let next = timeout(Duration::from_millis(500), h.mgr.next_question())
      .await
      .expect("read path must not wait for the refill");
    assert_eq!(next.unwrap().id, "q0");

    tokio::time::timeout(Duration::from_secs(5), h.cloud.entered.notified()).await.unwrap();
    assert_eq!(h.cloud.calls(), 2, "refill reached the primary source");
    assert_eq!(h.mgr.status().await.total, 8, "nothing merged before the fetch finishes");

    gate.notify_one();
    let event = tokio::time::timeout(Duration::from_secs(5), events.recv()).await.unwrap().unwrap();
    assert_eq!(event, PoolEvent::Refilled { added: 10, total: 18 });
    assert_eq!(h.mgr.status().await.total, 18);
  }

  #[tokio::test]
  async fn test_served_question_stays_answerable_after_refill_trims_it() {
    let h = harness(vec![Ok(batch("old", 8, None)), Ok(batch("new", 25, None))], vec![], batch("b", 3, None));
    h.mgr.load_questions().await;
    let mut events = h.mgr.subscribe();

    let served = h.mgr.next_question().await.unwrap();
    assert_eq!(served.id, "old0");
    let event = tokio::time::timeout(Duration::from_secs(5), events.recv()).await.unwrap().unwrap();
    assert_eq!(event, PoolEvent::Refilled { added: 25, total: 30 });

    let status = h.mgr.status().await;
    assert_eq!(status.total, 30);
    let found = h.mgr.find(&served.id).await.expect("served question is still answerable");
    assert_eq!(found.correct_index, served.correct_index);

    h.mgr.mark_asked(&served.id).await;
    assert!(h.mgr.find(&served.id).await.is_none(), "trimmed and asked, so gone");
    assert_eq!(h.mgr.next_question().await.unwrap().id, "old3");
  }

  #[tokio::test]
  async fn test_reset_session_forgets_served_questions() {
    let h = harness(vec![Ok(batch("old", 8, None)), Ok(batch("new", 25, None))], vec![], batch("b", 3, None));
    h.mgr.load_questions().await;
    let mut events = h.mgr.subscribe();
    let served = h.mgr.next_question().await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), events.recv()).await.unwrap().unwrap();

    h.mgr.reset_session().await;
    assert!(h.mgr.find(&served.id).await.is_none(), "a new session does not answer old questions");
  }

  #[tokio::test]
  async fn test_refill_trims_oldest_beyond_max() {
    let h = harness(vec![Ok(batch("old", 8, None)), Ok(batch("new", 25, None))], vec![], batch("b", 3, None));
    h.mgr.load_questions().await;

    h.mgr.refill_pool().await;

    let status = h.mgr.status().await;
    assert_eq!(status.total, 30);
    assert!(h.mgr.find("old0").await.is_none());
    assert!(h.mgr.find("old2").await.is_none());
    assert!(h.mgr.find("old3").await.is_some());
    assert!(h.mgr.find("new24").await.is_some());
    assert_eq!(h.cache.count(), 33);
  }

  #[tokio::test]
  async fn test_refill_dedups_against_pool() {
    let mut overlap = batch("q", 4, None);
    overlap.extend(batch("fresh", 2, None));
    let h = harness(vec![Ok(batch("q", 5, None)), Ok(overlap)], vec![], batch("b", 3, None));
    h.mgr.load_questions().await;

    h.mgr.refill_pool().await;

    let status = h.mgr.status().await;
    assert_eq!(status.total, 7);
  }

  #[tokio::test]
  async fn test_refill_failure_keeps_non_empty_pool() {
    let h = harness(vec![Ok(batch("q", 5, None))], vec![], batch("b", 3, None));
    h.mgr.load_questions().await;

    h.mgr.refill_pool().await;

    let status = h.mgr.status().await;
    assert_eq!(status.total, 5);
    assert_eq!(status.source, Some(SourceTag::Cloud));
  }

  #[tokio::test]
  async fn test_refill_of_empty_pool_uses_local_sources() {
    let h = harness(vec![], vec![], batch("b", 3, None));

    h.mgr.refill_pool().await;

    let status = h.mgr.status().await;
    assert_eq!(status.total, 3);
    assert_eq!(status.source, Some(SourceTag::Bundled));
  }

  #[tokio::test]
  async fn test_total_exhaustion_is_a_quiet_terminal_state() {
    let h = harness(vec![], vec![], Vec::new());
    let mut events = h.mgr.subscribe();

    h.mgr.load_questions().await;

    assert_eq!(events.recv().await.unwrap(), PoolEvent::Exhausted);
    assert!(h.mgr.next_question().await.is_none());
    assert!(h.mgr.next_question().await.is_none());
    assert_eq!(h.mgr.status().await.source, None);
  }

  #[tokio::test(start_paused = true)]
  async fn test_hung_remote_times_out_and_falls_through() {
    let h = harness(vec![], vec![Ok(batch("api", 5, None))], batch("b", 3, None));
    let _never = h.cloud.hold();

    h.mgr.load_questions().await;

    assert_eq!(h.mgr.status().await.source, Some(SourceTag::OpenTrivia));
  }

  #[tokio::test]
  async fn test_force_bundle_mode_skips_remotes_and_cache() {
    let h = harness(vec![Ok(batch("cl", 5, None))], vec![Ok(batch("api", 5, None))], batch("b", 3, None));
    h.cache.put(&batch("c", 5, None), Difficulty::Any);
    let mut cfg = h.prefs.load();
    cfg.force_bundle_mode = true;
    h.prefs.save(&cfg).unwrap();

    h.mgr.load_questions().await;

    let status = h.mgr.status().await;
    assert_eq!(status.source, Some(SourceTag::Bundled));
    assert_eq!(status.total, 3);
    assert_eq!(h.cloud.calls(), 0);
    assert_eq!(h.api.calls(), 0);
  }

  #[tokio::test]
  async fn test_offline_preference_uses_cache() {
    let h = harness(vec![Ok(batch("cl", 5, None))], vec![], batch("b", 3, None));
    h.cache.put(&batch("c", 5, None), Difficulty::Any);
    let mut cfg = h.prefs.load();
    cfg.enable_online_questions = false;
    h.prefs.save(&cfg).unwrap();

    h.mgr.load_questions().await;

    assert_eq!(h.mgr.status().await.source, Some(SourceTag::Cache));
    assert_eq!(h.cloud.calls(), 0);
  }

  #[tokio::test]
  async fn test_pool_status_string_and_clear_cache() {
    let h = harness(vec![Ok(batch("q", 12, None))], vec![], batch("b", 3, None));
    h.mgr.load_questions().await;
    h.mgr.mark_asked("q0").await;
    h.mgr.mark_asked("q1").await;

    assert_eq!(h.mgr.pool_status().await, "Pool: 12 total, 10 unanswered, 2 asked (source: cloud)");

    let mut events = h.mgr.subscribe();
    h.mgr.clear_cache().await;
    assert_eq!(events.recv().await.unwrap(), PoolEvent::CacheCleared);
    let status = h.mgr.status().await;
    assert_eq!(status.cached, 0);
    assert!(!status.cache_valid);
    assert_eq!(status.total, 12);
  }

  #[test]
  fn test_merge_into_caps_and_counts() {
    let mut pool = batch("a", 3, None);
    let added = merge_into(&mut pool, batch("a", 5, None), 4);
    assert_eq!(added, 2);
    assert_eq!(pool.len(), 4);
    assert_eq!(pool[0].id, "a1");
  }
}
