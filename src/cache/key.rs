//! Stable cache keys derived from endpoint name and serialized arguments.

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Unique identifier for one query's cached result.
///
/// Two queries share an entry exactly when they hit the same endpoint with
/// equal arguments. Arguments are serialized through `serde_json::Value`,
/// whose object keys are ordered, so equal argument sets always produce the
/// same key regardless of field declaration order.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
  pub fn new(endpoint: &str, args: &Value) -> Self {
    let input = format!("{}:{}", endpoint, args);

    // SHA256 hash for stable, fixed-length keys
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    Self(hex::encode(hasher.finalize()))
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl std::fmt::Display for CacheKey {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(&self.0)
  }
}
