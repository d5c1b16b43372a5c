//! Application context: everything the handlers share, wired by hand.
//!
//! This module owns:
//!   - the persisted key-value store (one JSON file under the data dir)
//!   - preferences and the local question cache on top of it
//!   - the optional remote clients (cloud store, public trivia API)
//!   - the bundled set
//!   - the question supply manager built from all of the above

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, instrument};

use crate::bundled::BundledQuestions;
use crate::cache::{QuestionCache, SystemClock};
use crate::cloud::CloudClient;
use crate::config::AppConfig;
use crate::manager::{QuestionManager, SupplyDeps, SupplyOptions};
use crate::opentdb::OpenTriviaClient;
use crate::settings::Preferences;
use crate::sources::{CategoryQuestionSource, RandomQuestionSource};
use crate::store::{JsonFileStore, KvStore};

pub struct AppState {
    pub prefs: Arc<Preferences>,
    pub cache: Arc<QuestionCache>,
    pub cloud: Option<Arc<dyn RandomQuestionSource>>,
    pub trivia_api: Option<Arc<dyn CategoryQuestionSource>>,
    pub bundled: Arc<BundledQuestions>,
    pub manager: Arc<QuestionManager>,
}

impl AppState {
    /// Open the data dir, load the bundle, build the clients the config enables.
    #[instrument(level = "info", skip_all)]
    pub fn new(cfg: &AppConfig) -> Result<Self> {
        let data_dir = cfg.data_dir();
        let store = JsonFileStore::open(&data_dir)
            .with_context(|| format!("opening data dir {}", data_dir.display()))?;
        info!(target: "trivia_backend", path = %data_dir.display(), "Opened key-value store");

        let bundled = BundledQuestions::load(cfg.bundle.path.as_deref())?;

        let cloud = CloudClient::from_config(&cfg.cloud, cfg.remote_timeout());
        match &cloud {
            Some(c) => info!(target: "trivia_backend", base_url = %c.base_url(), container = %cfg.cloud.container, "Cloud source enabled"),
            None => info!(target: "trivia_backend", "Cloud source disabled"),
        }
        let trivia_api = OpenTriviaClient::from_config(&cfg.open_trivia, cfg.remote_timeout());
        match &trivia_api {
            Some(c) => info!(target: "trivia_backend", base_url = %c.base_url(), "Trivia API source enabled"),
            None => info!(target: "trivia_backend", "Trivia API source disabled"),
        }

        Ok(Self::from_parts(
            cfg,
            Arc::new(store),
            bundled,
            cloud.map(|c| Arc::new(c) as Arc<dyn RandomQuestionSource>),
            trivia_api.map(|c| Arc::new(c) as Arc<dyn CategoryQuestionSource>),
        ))
    }

    /// Assemble from already-built parts (tests inject an in-memory store and fakes).
    pub fn from_parts(
        cfg: &AppConfig,
        store: Arc<dyn KvStore>,
        bundled: BundledQuestions,
        cloud: Option<Arc<dyn RandomQuestionSource>>,
        trivia_api: Option<Arc<dyn CategoryQuestionSource>>,
    ) -> Self {
        let prefs = Arc::new(Preferences::new(store.clone()));
        let cache = Arc::new(QuestionCache::new(store, Arc::new(SystemClock), cfg.cache_limits()));
        let bundled = Arc::new(bundled);

        let deps = SupplyDeps {
            cache: cache.clone(),
            cloud: cloud.clone(),
            trivia_api: trivia_api.clone(),
            bundled: bundled.clone(),
            prefs: prefs.clone(),
        };
        let opts = SupplyOptions {
            limits: cfg.pool_limits(),
            remote_timeout: cfg.remote_timeout(),
            category_id: cfg.remote.music_category_id,
        };
        let manager = Arc::new(QuestionManager::new(deps, opts));

        Self { prefs, cache, cloud, trivia_api, bundled, manager }
    }
}
