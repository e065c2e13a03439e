//! Durable key-value storage for session credentials.
//!
//! The contract is deliberately forgiving: any backend failure is treated
//! as "absent" rather than an error, so a corrupt or unreadable store
//! degrades to the anonymous state instead of crashing the host.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Storage keys for the credential triple.
pub const ACCESS_TOKEN_KEY: &str = "access_token";
pub const REFRESH_TOKEN_KEY: &str = "refresh_token";
pub const USER_KEY: &str = "user";

/// Key-value persistence for credentials. All operations swallow backend
/// failures: `get` returns `None`, `set`/`remove` log and move on.
pub trait CredentialStorage: Send + Sync {
  fn get(&self, key: &str) -> Option<String>;
  fn set(&self, key: &str, value: &str);
  fn remove(&self, key: &str);
}

/// In-memory storage, used in tests and as a no-persistence fallback.
#[derive(Default)]
pub struct MemoryStorage {
  values: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
  pub fn new() -> Self {
    Self::default()
  }
}

impl CredentialStorage for MemoryStorage {
  fn get(&self, key: &str) -> Option<String> {
    self.values.lock().ok()?.get(key).cloned()
  }

  fn set(&self, key: &str, value: &str) {
    if let Ok(mut values) = self.values.lock() {
      values.insert(key.to_string(), value.to_string());
    }
  }

  fn remove(&self, key: &str) {
    if let Ok(mut values) = self.values.lock() {
      values.remove(key);
    }
  }
}

/// On-disk file format: the stored values plus a write timestamp.
#[derive(Debug, Default, Serialize, Deserialize)]
struct FilePayload {
  values: HashMap<String, String>,
  saved_at: Option<DateTime<Utc>>,
}

/// JSON-file-backed storage under the platform data directory.
pub struct FileStorage {
  path: PathBuf,
}

impl FileStorage {
  /// Open storage at the default location
  /// (e.g. `~/.local/share/shopsync/session.json`).
  pub fn open() -> Option<Self> {
    let path = Self::default_path()?;
    Some(Self::at(path))
  }

  pub fn at(path: PathBuf) -> Self {
    Self { path }
  }

  fn default_path() -> Option<PathBuf> {
    let data_dir = dirs::data_dir().or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))?;
    Some(data_dir.join("shopsync").join("session.json"))
  }

  fn load(&self) -> FilePayload {
    let contents = match std::fs::read_to_string(&self.path) {
      Ok(c) => c,
      Err(_) => return FilePayload::default(),
    };
    match serde_json::from_str(&contents) {
      Ok(payload) => payload,
      Err(e) => {
        warn!(path = %self.path.display(), error = %e, "corrupt session file, treating as empty");
        FilePayload::default()
      }
    }
  }

  fn save(&self, mut payload: FilePayload) {
    payload.saved_at = Some(Utc::now());

    if let Some(parent) = self.path.parent() {
      if let Err(e) = std::fs::create_dir_all(parent) {
        warn!(path = %parent.display(), error = %e, "failed to create session directory");
        return;
      }
    }

    let serialized = match serde_json::to_string_pretty(&payload) {
      Ok(s) => s,
      Err(e) => {
        warn!(error = %e, "failed to serialize session file");
        return;
      }
    };

    if let Err(e) = std::fs::write(&self.path, serialized) {
      warn!(path = %self.path.display(), error = %e, "failed to write session file");
    }
  }
}

impl CredentialStorage for FileStorage {
  fn get(&self, key: &str) -> Option<String> {
    self.load().values.get(key).cloned()
  }

  fn set(&self, key: &str, value: &str) {
    let mut payload = self.load();
    payload.values.insert(key.to_string(), value.to_string());
    self.save(payload);
  }

  fn remove(&self, key: &str) {
    let mut payload = self.load();
    payload.values.remove(key);
    self.save(payload);
  }
}
