//! A single cached query result and its published state.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::watch;

use crate::error::ApiError;

use super::engine::QuerySpec;
use super::tag::Tag;

/// Lifecycle status of a cache entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueryStatus {
  /// No fetch has started (fresh entry, or subscription with skip set).
  Uninitialized,
  /// First fetch in progress, no data yet.
  Loading,
  /// Last fetch succeeded; `data` holds the payload.
  Success,
  /// Last fetch failed; `error` holds the failure, `data` keeps the
  /// last-known payload if any.
  Error,
}

/// Point-in-time view of a cache entry, delivered to subscribers through a
/// watch channel. Failures are fields here, never panics: callers branch on
/// `error` instead of catching anything.
#[derive(Clone, Debug)]
pub struct QuerySnapshot {
  pub status: QueryStatus,
  pub data: Option<Value>,
  /// Auxiliary response metadata (e.g. pagination), passed through
  /// uninterpreted.
  pub metadata: Option<Value>,
  pub error: Option<ApiError>,
  /// True during any fetch, including background refetches.
  pub is_fetching: bool,
}

impl QuerySnapshot {
  pub fn uninitialized() -> Self {
    Self {
      status: QueryStatus::Uninitialized,
      data: None,
      metadata: None,
      error: None,
      is_fetching: false,
    }
  }

  /// True only for the first fetch, when no data has ever arrived.
  pub fn is_loading(&self) -> bool {
    self.status == QueryStatus::Loading && self.is_fetching
  }
}

/// Pre-mutation state saved before an optimistic patch.
#[derive(Clone, Debug)]
pub(crate) struct RestorePoint {
  data: Option<Value>,
  metadata: Option<Value>,
}

/// One cache entry. All fields are mutated under the engine lock, so every
/// state transition is observed whole or not at all.
pub(crate) struct Entry {
  pub spec: Arc<QuerySpec>,
  pub snapshot: QuerySnapshot,
  pub tags: Vec<Tag>,
  pub subscribers: usize,
  /// Set when the subscriber count drops to zero; drives GC grace.
  pub released_at: Option<Instant>,
  pub fetched_at: Option<Instant>,
  /// At most one in-flight request per key at any time.
  pub inflight: bool,
  /// The in-flight fetch was started by a tag invalidation, so further
  /// invalidations for this key coalesce with it.
  pub inflight_for_invalidation: bool,
  /// An invalidation arrived while a non-invalidation fetch was in flight;
  /// the superseded result gets one follow-up fetch when it settles.
  pub needs_refetch: bool,
  /// Bumped on every fetch start. A completing fetch writes its result only
  /// if its generation still matches, so superseded results are discarded.
  pub generation: u64,
  restore_point: Option<RestorePoint>,
  tx: watch::Sender<QuerySnapshot>,
}

impl Entry {
  pub fn new(spec: Arc<QuerySpec>) -> Self {
    let (tx, _rx) = watch::channel(QuerySnapshot::uninitialized());
    Self {
      spec,
      snapshot: QuerySnapshot::uninitialized(),
      tags: Vec::new(),
      subscribers: 0,
      released_at: None,
      fetched_at: None,
      inflight: false,
      inflight_for_invalidation: false,
      needs_refetch: false,
      generation: 0,
      restore_point: None,
      tx,
    }
  }

  pub fn watch(&self) -> watch::Receiver<QuerySnapshot> {
    self.tx.subscribe()
  }

  /// Push the current snapshot to all subscribers.
  pub fn publish(&self) {
    self.tx.send_replace(self.snapshot.clone());
  }

  /// Transition into a fetch. Returns the generation the fetch must present
  /// when settling.
  pub fn begin_fetch(&mut self) -> u64 {
    self.generation += 1;
    self.inflight = true;
    self.inflight_for_invalidation = false;
    self.needs_refetch = false;
    self.snapshot.is_fetching = true;
    if self.snapshot.data.is_none() {
      self.snapshot.status = QueryStatus::Loading;
    }
    self.publish();
    self.generation
  }

  pub fn settle_success(&mut self, data: Value, metadata: Option<Value>, tags: Vec<Tag>) {
    self.inflight = false;
    self.tags = tags;
    self.fetched_at = Some(Instant::now());
    self.restore_point = None;
    self.snapshot.status = QueryStatus::Success;
    self.snapshot.data = Some(data);
    self.snapshot.metadata = metadata;
    self.snapshot.error = None;
    self.snapshot.is_fetching = false;
    self.publish();
  }

  pub fn settle_error(&mut self, error: ApiError) {
    self.inflight = false;
    self.snapshot.status = QueryStatus::Error;
    self.snapshot.error = Some(error);
    self.snapshot.is_fetching = false;
    self.publish();
  }

  pub fn is_stale(&self, stale_time: Duration) -> bool {
    match self.snapshot.status {
      QueryStatus::Success => self
        .fetched_at
        .map(|t| t.elapsed() >= stale_time)
        .unwrap_or(true),
      // Error entries are always worth retrying for a new subscriber.
      QueryStatus::Error => true,
      _ => false,
    }
  }

  pub fn matches_any(&self, tags: &[Tag]) -> bool {
    self.tags.iter().any(|t| tags.contains(t))
  }

  /// Apply a tentative patch to the cached payload, saving a restore point.
  /// Returns false when there is no payload to patch.
  pub fn apply_optimistic(&mut self, patch: impl FnOnce(&mut Value)) -> bool {
    let Some(data) = self.snapshot.data.as_mut() else {
      return false;
    };
    if self.restore_point.is_none() {
      self.restore_point = Some(RestorePoint {
        data: Some(data.clone()),
        metadata: self.snapshot.metadata.clone(),
      });
    }
    patch(data);
    self.publish();
    true
  }

  /// Reapply the pre-mutation snapshot after a rejected mutation.
  pub fn rollback(&mut self) {
    if let Some(point) = self.restore_point.take() {
      self.snapshot.data = point.data;
      self.snapshot.metadata = point.metadata;
      self.publish();
    }
  }

  /// Keep the optimistic patch and drop the restore point.
  pub fn commit(&mut self) {
    self.restore_point = None;
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;
  use std::sync::Arc;

  fn spec() -> Arc<QuerySpec> {
    Arc::new(QuerySpec::get("test", "test", Value::Null))
  }

  #[test]
  fn test_begin_fetch_sets_loading_only_without_data() {
    let mut entry = Entry::new(spec());
    entry.begin_fetch();
    assert_eq!(entry.snapshot.status, QueryStatus::Loading);
    assert!(entry.snapshot.is_fetching);
    assert!(entry.snapshot.is_loading());

    entry.settle_success(json!({ "id": 1 }), None, Vec::new());
    entry.begin_fetch();
    // Refetch with data present: still Success, fetching in background.
    assert_eq!(entry.snapshot.status, QueryStatus::Success);
    assert!(entry.snapshot.is_fetching);
    assert!(!entry.snapshot.is_loading());
  }

  #[test]
  fn test_settle_error_keeps_last_data() {
    let mut entry = Entry::new(spec());
    entry.begin_fetch();
    entry.settle_success(json!(42), None, Vec::new());

    entry.begin_fetch();
    entry.settle_error(ApiError::Network("boom".into()));
    assert_eq!(entry.snapshot.status, QueryStatus::Error);
    assert_eq!(entry.snapshot.data, Some(json!(42)));
    assert!(entry.snapshot.error.is_some());
    assert!(!entry.snapshot.is_fetching);
  }

  #[test]
  fn test_generation_increments_per_fetch() {
    let mut entry = Entry::new(spec());
    assert_eq!(entry.begin_fetch(), 1);
    entry.settle_success(Value::Null, None, Vec::new());
    assert_eq!(entry.begin_fetch(), 2);
  }

  #[test]
  fn test_staleness() {
    let mut entry = Entry::new(spec());
    assert!(!entry.is_stale(Duration::ZERO), "uninitialized is not stale");

    entry.begin_fetch();
    entry.settle_success(json!(1), None, Vec::new());
    assert!(entry.is_stale(Duration::ZERO));
    assert!(!entry.is_stale(Duration::from_secs(3600)));

    entry.begin_fetch();
    entry.settle_error(ApiError::Network("down".into()));
    assert!(
      entry.is_stale(Duration::from_secs(3600)),
      "errors are retried for new subscribers"
    );
  }

  #[test]
  fn test_optimistic_rollback_restores_data() {
    let mut entry = Entry::new(spec());
    entry.begin_fetch();
    entry.settle_success(json!({ "avatarUrl": "old.png" }), None, Vec::new());

    let applied = entry.apply_optimistic(|data| {
      data["avatarUrl"] = json!("new.png");
    });
    assert!(applied);
    assert_eq!(entry.snapshot.data, Some(json!({ "avatarUrl": "new.png" })));

    entry.rollback();
    assert_eq!(entry.snapshot.data, Some(json!({ "avatarUrl": "old.png" })));
  }

  #[test]
  fn test_optimistic_commit_discards_restore_point() {
    let mut entry = Entry::new(spec());
    entry.begin_fetch();
    entry.settle_success(json!({ "n": 1 }), None, Vec::new());

    entry.apply_optimistic(|data| data["n"] = json!(2));
    entry.commit();
    entry.rollback(); // no-op after commit
    assert_eq!(entry.snapshot.data, Some(json!({ "n": 2 })));
  }

  #[test]
  fn test_optimistic_without_data_is_rejected() {
    let mut entry = Entry::new(spec());
    assert!(!entry.apply_optimistic(|data| *data = json!(1)));
  }

  #[test]
  fn test_tag_matching() {
    use crate::cache::tag::{Entity, Tag};

    let mut entry = Entry::new(spec());
    entry.begin_fetch();
    entry.settle_success(
      Value::Null,
      None,
      vec![Tag::list(Entity::Order), Tag::id(Entity::Order, "o1")],
    );

    assert!(entry.matches_any(&[Tag::id(Entity::Order, "o1")]));
    assert!(entry.matches_any(&[Tag::list(Entity::Order)]));
    assert!(!entry.matches_any(&[Tag::id(Entity::Order, "o2")]));
    assert!(!entry.matches_any(&[Tag::list(Entity::Cart)]));
  }
}
