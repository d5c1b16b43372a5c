//! Persisted key-value store used for preferences and the question cache.
//!
//! `JsonFileStore` keeps a single JSON object on disk and mirrors it in memory.
//! Every write is flushed with write-tmp / fsync / rename so a crash never
//! leaves a half-written file behind.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use thiserror::Error;
use tracing::{error, info};

#[derive(Debug, Error)]
pub enum StoreError {
  #[error("store I/O failed: {0}")]
  Io(#[from] std::io::Error),
  #[error("store encoding failed: {0}")]
  Json(#[from] serde_json::Error),
}

/// Generic string key/value persistence.
pub trait KvStore: Send + Sync {
  fn get(&self, key: &str) -> Option<String>;
  /// All pairs land together or none do.
  fn set_many(&self, pairs: &[(&str, &str)]) -> Result<(), StoreError>;
  fn remove_many(&self, keys: &[&str]) -> Result<(), StoreError>;

  fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
    self.set_many(&[(key, value)])
  }

  fn remove(&self, key: &str) -> Result<(), StoreError> {
    self.remove_many(&[key])
  }
}

const STORE_FILE: &str = "store.json";

pub struct JsonFileStore {
  path: PathBuf,
  entries: Mutex<BTreeMap<String, String>>,
}

impl JsonFileStore {
  /// Open (or create) the store under `base_dir`. A corrupt file starts empty.
  pub fn open(base_dir: &Path) -> Result<Self, StoreError> {
    fs::create_dir_all(base_dir)?;
    let path = base_dir.join(STORE_FILE);
    let entries = if path.exists() {
      match fs::read_to_string(&path) {
        Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
          error!(target: "trivia_backend", path = %path.display(), error = %e, "Corrupt store file; starting empty");
          BTreeMap::new()
        }),
        Err(e) => {
          error!(target: "trivia_backend", path = %path.display(), error = %e, "Unreadable store file; starting empty");
          BTreeMap::new()
        }
      }
    } else {
      BTreeMap::new()
    };
    info!(target: "trivia_backend", path = %path.display(), keys = entries.len(), "Opened key-value store");
    Ok(Self { path, entries: Mutex::new(entries) })
  }

  fn flush(&self, entries: &BTreeMap<String, String>) -> Result<(), StoreError> {
    let tmp_path = self.path.with_extension("json.tmp");
    let json = serde_json::to_string_pretty(entries)?;
    let mut file = fs::File::create(&tmp_path)?;
    file.write_all(json.as_bytes())?;
    file.sync_all()?;
    fs::rename(&tmp_path, &self.path)?;
    Ok(())
  }
}

impl KvStore for JsonFileStore {
  fn get(&self, key: &str) -> Option<String> {
    let entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
    entries.get(key).cloned()
  }

  fn set_many(&self, pairs: &[(&str, &str)]) -> Result<(), StoreError> {
    let mut entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
    let mut next = entries.clone();
    for (key, value) in pairs {
      next.insert(key.to_string(), value.to_string());
    }
    // Memory only changes once the file does.
    self.flush(&next)?;
    *entries = next;
    Ok(())
  }

  fn remove_many(&self, keys: &[&str]) -> Result<(), StoreError> {
    let mut entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
    if !keys.iter().any(|k| entries.contains_key(*k)) {
      return Ok(());
    }
    let mut next = entries.clone();
    for key in keys {
      next.remove(*key);
    }
    self.flush(&next)?;
    *entries = next;
    Ok(())
  }
}

/// Volatile store; nothing survives the process.
#[derive(Default)]
pub struct MemoryStore {
  entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }
}

impl KvStore for MemoryStore {
  fn get(&self, key: &str) -> Option<String> {
    self.entries.lock().unwrap_or_else(|p| p.into_inner()).get(key).cloned()
  }

  fn set_many(&self, pairs: &[(&str, &str)]) -> Result<(), StoreError> {
    let mut entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
    for (key, value) in pairs {
      entries.insert(key.to_string(), value.to_string());
    }
    Ok(())
  }

  fn remove_many(&self, keys: &[&str]) -> Result<(), StoreError> {
    let mut entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
    for key in keys {
      entries.remove(*key);
    }
    Ok(())
  }
}
