//! Loading service configuration (pool sizes, cache policy, remote sources) from TOML.
//!
//! See `AppConfig` for the expected schema. Every field has a default, so an
//! empty file (or no file at all) yields a working offline-capable setup.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use tracing::{error, info, warn};

use crate::cache::CacheLimits;
use crate::manager::PoolLimits;

#[derive(Clone, Debug, Deserialize, Default)]
pub struct AppConfig {
  #[serde(default)]
  pub pool: PoolConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub remote: RemoteConfig,
  #[serde(default)]
  pub cloud: CloudConfig,
  #[serde(default)]
  pub open_trivia: OpenTriviaConfig,
  #[serde(default)]
  pub bundle: BundleConfig,
  #[serde(default)]
  pub data_dir: Option<PathBuf>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct PoolConfig {
  #[serde(default = "default_min_size")]
  pub min_size: usize,
  #[serde(default = "default_target_size")]
  pub target_size: usize,
  #[serde(default = "default_max_size")]
  pub max_size: usize,
}

fn default_min_size() -> usize {
  10
}
fn default_target_size() -> usize {
  25
}
fn default_max_size() -> usize {
  30
}

impl Default for PoolConfig {
  fn default() -> Self {
    Self { min_size: default_min_size(), target_size: default_target_size(), max_size: default_max_size() }
  }
}

#[derive(Clone, Debug, Deserialize)]
pub struct CacheConfig {
  #[serde(default = "default_cache_max_age_secs")]
  pub max_age_secs: i64,
  #[serde(default = "default_cache_max_size")]
  pub max_size: usize,
}

fn default_cache_max_age_secs() -> i64 {
  24 * 60 * 60
}
fn default_cache_max_size() -> usize {
  100
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self { max_age_secs: default_cache_max_age_secs(), max_size: default_cache_max_size() }
  }
}

#[derive(Clone, Debug, Deserialize)]
pub struct RemoteConfig {
  /// Per-call budget for either online source.
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
  #[serde(default = "default_music_category_id")]
  pub music_category_id: u32,
}

fn default_timeout_secs() -> u64 {
  12
}
fn default_music_category_id() -> u32 {
  12
}

impl Default for RemoteConfig {
  fn default() -> Self {
    Self { timeout_secs: default_timeout_secs(), music_category_id: default_music_category_id() }
  }
}

#[derive(Clone, Debug, Deserialize)]
pub struct CloudConfig {
  #[serde(default = "default_cloud_base_url")]
  pub base_url: String,
  #[serde(default = "default_cloud_container")]
  pub container: String,
  #[serde(default = "default_cloud_environment")]
  pub environment: String,
  #[serde(default = "default_cloud_record_type")]
  pub record_type: String,
  /// The primary source stays disabled until this is set.
  #[serde(default)]
  pub api_token: Option<String>,
}

fn default_cloud_base_url() -> String {
  "https://api.apple-cloudkit.com".to_string()
}
fn default_cloud_container() -> String {
  "iCloud.com.oak-tech.RetroTrivia".to_string()
}
fn default_cloud_environment() -> String {
  "production".to_string()
}
fn default_cloud_record_type() -> String {
  "Question".to_string()
}

impl Default for CloudConfig {
  fn default() -> Self {
    Self {
      base_url: default_cloud_base_url(),
      container: default_cloud_container(),
      environment: default_cloud_environment(),
      record_type: default_cloud_record_type(),
      api_token: None,
    }
  }
}

#[derive(Clone, Debug, Deserialize)]
pub struct OpenTriviaConfig {
  #[serde(default = "default_open_trivia_base_url")]
  pub base_url: String,
  #[serde(default = "default_cooldown_secs")]
  pub cooldown_secs: u64,
  #[serde(default = "default_true")]
  pub enabled: bool,
}

fn default_open_trivia_base_url() -> String {
  "https://opentdb.com".to_string()
}
fn default_cooldown_secs() -> u64 {
  5
}
fn default_true() -> bool {
  true
}

impl Default for OpenTriviaConfig {
  fn default() -> Self {
    Self { base_url: default_open_trivia_base_url(), cooldown_secs: default_cooldown_secs(), enabled: true }
  }
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct BundleConfig {
  /// Overrides the questions compiled into the binary.
  #[serde(default)]
  pub path: Option<PathBuf>,
}

impl AppConfig {
  /// Clamp pool limits into a consistent shape: `1 <= target <= max`, `min <= max`.
  pub fn normalize(&mut self) {
    let p = &mut self.pool;
    if p.max_size == 0 {
      warn!(target: "trivia_backend", "pool.max_size = 0 is not usable; using 1");
      p.max_size = 1;
    }
    p.target_size = p.target_size.clamp(1, p.max_size);
    p.min_size = p.min_size.min(p.max_size);
    if self.cache.max_size == 0 {
      self.cache.max_size = 1;
    }
    if self.remote.timeout_secs == 0 {
      self.remote.timeout_secs = default_timeout_secs();
    }
  }

  /// Environment variables win over the file.
  pub fn apply_overrides(&mut self, get: impl Fn(&str) -> Option<String>) {
    if let Some(token) = get("CLOUD_API_TOKEN") {
      self.cloud.api_token = Some(token);
    }
    if let Some(url) = get("CLOUD_BASE_URL") {
      self.cloud.base_url = url;
    }
    if let Some(url) = get("OPEN_TRIVIA_BASE_URL") {
      self.open_trivia.base_url = url;
    }
    if let Some(dir) = get("TRIVIA_DATA_DIR") {
      self.data_dir = Some(PathBuf::from(dir));
    }
  }

  pub fn pool_limits(&self) -> PoolLimits {
    PoolLimits { min_size: self.pool.min_size, target_size: self.pool.target_size, max_size: self.pool.max_size }
  }

  pub fn cache_limits(&self) -> CacheLimits {
    CacheLimits { max_age: chrono::Duration::seconds(self.cache.max_age_secs), max_size: self.cache.max_size }
  }

  pub fn remote_timeout(&self) -> Duration {
    Duration::from_secs(self.remote.timeout_secs)
  }

  pub fn data_dir(&self) -> PathBuf {
    self.data_dir.clone().unwrap_or_else(|| {
      dirs::data_dir().unwrap_or_else(|| PathBuf::from(".")).join("retro-trivia")
    })
  }
}

/// Load `AppConfig` from TRIVIA_CONFIG_PATH (defaults on any IO/parse error), then
/// apply environment overrides and normalize.
pub fn load_config_from_env() -> AppConfig {
  let mut cfg = match std::env::var("TRIVIA_CONFIG_PATH") {
    Ok(path) => match std::fs::read_to_string(&path) {
      Ok(s) => match toml::from_str::<AppConfig>(&s) {
        Ok(cfg) => {
          info!(target: "trivia_backend", %path, "Loaded config (TOML)");
          cfg
        }
        Err(e) => {
          error!(target: "trivia_backend", %path, error = %e, "Failed to parse TOML config; using defaults");
          AppConfig::default()
        }
      },
      Err(e) => {
        error!(target: "trivia_backend", %path, error = %e, "Failed to read TOML config file; using defaults");
        AppConfig::default()
      }
    },
    Err(_) => AppConfig::default(),
  };
  cfg.apply_overrides(|k| std::env::var(k).ok().filter(|v| !v.is_empty()));
  cfg.normalize();
  cfg
}
