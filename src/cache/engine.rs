//! The entity cache engine.
//!
//! One engine owns the whole cache table. Every operation on it (insert,
//! status update, subscriber counting, invalidation by tag) runs inside a
//! single synchronous critical section, so no reader ever observes a
//! half-applied invalidation. Fetches themselves run on spawned tasks and
//! report back through [`CacheEngine::settle`], which re-checks that the
//! result is still wanted before writing it.

use std::collections::hash_map::Entry as MapEntry;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::{debug, info};

use crate::config::CacheConfig;
use crate::error::ApiError;
use crate::transport::{ApiRequest, Envelope, Transport};

use super::entry::{Entry, QuerySnapshot, QueryStatus};
use super::key::CacheKey;
use super::subscription::QuerySubscription;
use super::tag::Tag;

/// Computes the tags a query provides or a mutation invalidates, given the
/// response payload. Kept as a plain function of the payload so tag logic
/// is unit-testable without any network.
pub type TagsFn = Arc<dyn Fn(&Value) -> Vec<Tag> + Send + Sync>;

fn no_tags() -> TagsFn {
  Arc::new(|_| Vec::new())
}

/// Declarative description of one query endpoint invocation.
pub struct QuerySpec {
  /// Stable endpoint identifier, half of the cache key.
  pub endpoint: &'static str,
  /// Request path relative to the base URL, with arguments baked in.
  pub path: String,
  /// Serialized arguments, the other half of the cache key.
  pub args: Value,
  /// Tags this query's result provides.
  pub provides: TagsFn,
}

impl QuerySpec {
  pub fn get(endpoint: &'static str, path: impl Into<String>, args: Value) -> Self {
    Self {
      endpoint,
      path: path.into(),
      args,
      provides: no_tags(),
    }
  }

  pub fn providing(mut self, provides: TagsFn) -> Self {
    self.provides = provides;
    self
  }

  pub fn cache_key(&self) -> CacheKey {
    CacheKey::new(self.endpoint, &self.args)
  }
}

/// Declarative description of one mutation invocation.
pub struct MutationSpec {
  pub endpoint: &'static str,
  pub request: ApiRequest,
  /// Tags to invalidate on success, computed from the response payload
  /// (a created entity's id is only known afterwards).
  pub invalidates: TagsFn,
}

impl MutationSpec {
  pub fn new(endpoint: &'static str, request: ApiRequest) -> Self {
    Self {
      endpoint,
      request,
      invalidates: no_tags(),
    }
  }

  pub fn invalidating(mut self, invalidates: TagsFn) -> Self {
    self.invalidates = invalidates;
    self
  }
}

/// Per-subscription options.
#[derive(Clone, Copy, Debug, Default)]
pub struct QueryOptions {
  /// Suspend all fetching for this subscription without clearing any
  /// cached data. Used to gate queries on authentication.
  pub skip: bool,
}

struct EngineState {
  /// Bumped by `reset_all`; fetches started under an older epoch discard
  /// their results instead of leaking data across sessions.
  epoch: u64,
  entries: HashMap<CacheKey, Entry>,
}

impl EngineState {
  fn collect_garbage(&mut self, grace: Duration) {
    self.entries.retain(|_, entry| {
      entry.subscribers > 0
        || entry.inflight
        || entry
          .released_at
          .map(|released| released.elapsed() < grace)
          .unwrap_or(true)
    });
  }
}

/// Keyed cache of query results with tag-based invalidation, request
/// deduplication and mutation-triggered refetch.
///
/// Explicitly constructed with its transport and config; create one per
/// process (or per test) and share it by cloning.
#[derive(Clone)]
pub struct CacheEngine {
  inner: Arc<Mutex<EngineState>>,
  transport: Arc<dyn Transport>,
  config: CacheConfig,
}

impl CacheEngine {
  pub fn new(transport: Arc<dyn Transport>, config: CacheConfig) -> Self {
    Self {
      inner: Arc::new(Mutex::new(EngineState {
        epoch: 0,
        entries: HashMap::new(),
      })),
      transport,
      config,
    }
  }

  fn state(&self) -> MutexGuard<'_, EngineState> {
    // Entry transitions are single synchronous blocks; a poisoned lock
    // still guards a consistent table.
    self.inner.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Register a subscriber for a query, triggering a fetch when the entry
  /// is uninitialized or stale, unless `options.skip` is set, which
  /// suspends fetching while still exposing whatever is cached.
  ///
  /// Two simultaneous subscriptions with the same key share one request:
  /// the second sees the first one in flight and waits on the same entry.
  pub fn subscribe<T>(&self, spec: QuerySpec, options: QueryOptions) -> QuerySubscription<T> {
    let key = spec.cache_key();
    let spec = Arc::new(spec);

    let mut state = self.state();
    state.collect_garbage(self.config.gc_grace());

    let entry = state
      .entries
      .entry(key.clone())
      .or_insert_with(|| Entry::new(spec.clone()));
    entry.subscribers += 1;
    entry.released_at = None;
    let rx = entry.watch();

    let should_fetch = !options.skip
      && !entry.inflight
      && (entry.snapshot.status == QueryStatus::Uninitialized
        || entry.is_stale(self.config.stale_time()));
    if should_fetch {
      self.start_fetch_locked(&mut state, &key, false);
    }
    let epoch = state.epoch;
    drop(state);

    QuerySubscription::new(self.clone(), key, spec, rx, epoch)
  }

  /// Force a refetch for a subscribed key. Coalesces with any request
  /// already in flight. Returns a receiver for the entry's state plus the
  /// current epoch: when the entry had been evicted (e.g. by `reset_all`)
  /// it is re-registered here and the calling handle counted again, so the
  /// channel may be fresh.
  pub(crate) fn refetch(
    &self,
    key: &CacheKey,
    spec: &Arc<QuerySpec>,
    handle_epoch: u64,
  ) -> (tokio::sync::watch::Receiver<QuerySnapshot>, u64) {
    let mut state = self.state();
    let epoch = state.epoch;
    // Handles registered under an older epoch are no longer counted in
    // the current table; count them exactly once on re-registration.
    let uncounted = handle_epoch != epoch;

    let entry = match state.entries.entry(key.clone()) {
      MapEntry::Occupied(occupied) => {
        let entry = occupied.into_mut();
        if uncounted {
          entry.subscribers += 1;
          entry.released_at = None;
        }
        entry
      }
      MapEntry::Vacant(vacant) => {
        // The handle outlived its entry; re-register it.
        let mut entry = Entry::new(spec.clone());
        entry.subscribers = 1;
        vacant.insert(entry)
      }
    };
    let rx = entry.watch();
    let inflight = entry.inflight;

    if !inflight {
      self.start_fetch_locked(&mut state, key, false);
    }
    (rx, epoch)
  }

  pub(crate) fn release(&self, key: &CacheKey, handle_epoch: u64) {
    let mut state = self.state();
    // A handle from an older epoch was never counted in this table;
    // decrementing here would steal another handle's reference.
    if state.epoch != handle_epoch {
      return;
    }
    if let Some(entry) = state.entries.get_mut(key) {
      entry.subscribers = entry.subscribers.saturating_sub(1);
      if entry.subscribers == 0 {
        entry.released_at = Some(Instant::now());
      }
    }
  }

  /// Issue a mutation. Every call is one request; mutations are never
  /// deduplicated. On success the declared tag set is invalidated before
  /// the result is returned; the refetches it schedules are not awaited.
  pub async fn mutate(&self, spec: MutationSpec) -> Result<Envelope, ApiError> {
    debug!(endpoint = spec.endpoint, "mutation start");
    let response = self.transport.request(spec.request.clone()).await?;
    let envelope = response.into_envelope()?;

    let tags = (spec.invalidates)(&envelope.data);
    if !tags.is_empty() {
      debug!(endpoint = spec.endpoint, count = tags.len(), "mutation invalidates tags");
      self.invalidate(&tags);
    }

    Ok(envelope)
  }

  /// Mark every entry carrying any of `tags` as stale: entries with live
  /// subscribers get a refetch scheduled, entries with none are dropped.
  /// Runs in one critical section, so the whole invalidation is applied
  /// atomically.
  pub fn invalidate(&self, tags: &[Tag]) {
    if tags.is_empty() {
      return;
    }

    let mut state = self.state();
    let mut to_refetch = Vec::new();
    let mut to_drop = Vec::new();
    let mut deferred = 0;

    let matching: Vec<CacheKey> = state
      .entries
      .iter()
      .filter(|(_, entry)| entry.matches_any(tags))
      .map(|(key, _)| key.clone())
      .collect();

    for key in matching {
      let Some(entry) = state.entries.get_mut(&key) else {
        continue;
      };
      if entry.subscribers == 0 {
        to_drop.push(key);
      } else if !entry.inflight {
        to_refetch.push(key);
      } else if entry.inflight_for_invalidation {
        // A refetch already in flight satisfies this invalidation too.
      } else {
        // The in-flight fetch predates this invalidation and may carry
        // pre-mutation data; settle schedules one follow-up fetch.
        entry.needs_refetch = true;
        deferred += 1;
      }
    }

    for key in &to_drop {
      state.entries.remove(key);
    }
    for key in &to_refetch {
      self.start_fetch_locked(&mut state, key, true);
    }

    debug!(
      refetched = to_refetch.len(),
      dropped = to_drop.len(),
      deferred,
      "invalidation applied"
    );
  }

  /// Clear every entry and discard in-flight results. Registered as a
  /// sign-out hook so no cached data survives across sessions.
  pub fn reset_all(&self) {
    let mut state = self.state();
    state.epoch += 1;
    for entry in state.entries.values_mut() {
      entry.snapshot = QuerySnapshot::uninitialized();
      entry.publish();
    }
    state.entries.clear();
    info!("cache reset");
  }

  /// Apply a tentative patch to a cached payload, saving a restore point.
  /// Returns false when no payload exists under the key.
  pub fn apply_optimistic(&self, key: &CacheKey, patch: impl FnOnce(&mut Value)) -> bool {
    let mut state = self.state();
    match state.entries.get_mut(key) {
      Some(entry) => entry.apply_optimistic(patch),
      None => false,
    }
  }

  /// Reapply the pre-mutation snapshot after a rejected mutation.
  pub fn rollback_optimistic(&self, key: &CacheKey) {
    let mut state = self.state();
    if let Some(entry) = state.entries.get_mut(key) {
      entry.rollback();
    }
  }

  /// Keep an optimistic patch after the mutation succeeded.
  pub fn commit_optimistic(&self, key: &CacheKey) {
    let mut state = self.state();
    if let Some(entry) = state.entries.get_mut(key) {
      entry.commit();
    }
  }

  /// Number of live cache entries (diagnostics and tests).
  pub fn entry_count(&self) -> usize {
    self.state().entries.len()
  }

  fn start_fetch_locked(&self, state: &mut EngineState, key: &CacheKey, for_invalidation: bool) {
    let epoch = state.epoch;
    let Some(entry) = state.entries.get_mut(key) else {
      return;
    };

    let generation = entry.begin_fetch();
    entry.inflight_for_invalidation = for_invalidation;
    let spec = entry.spec.clone();
    debug!(endpoint = spec.endpoint, key = %key, generation, "fetch start");

    let engine = self.clone();
    let transport = self.transport.clone();
    let key = key.clone();
    tokio::spawn(async move {
      let result = match transport.request(ApiRequest::get(spec.path.clone())).await {
        Ok(response) => response.into_envelope(),
        Err(e) => Err(e),
      };
      engine.settle(&key, epoch, generation, result, &spec);
    });
  }

  /// Write a fetch result back, unless it was superseded: by a newer fetch
  /// for the key, by the entry being evicted, or by a cache reset. Stale
  /// results are discarded rather than interrupted mid-flight.
  fn settle(
    &self,
    key: &CacheKey,
    epoch: u64,
    generation: u64,
    result: Result<Envelope, ApiError>,
    spec: &QuerySpec,
  ) {
    let mut state = self.state();
    if state.epoch != epoch {
      debug!(endpoint = spec.endpoint, "discarding fetch result from reset cache");
      return;
    }
    let Some(entry) = state.entries.get_mut(key) else {
      return;
    };
    if entry.generation != generation {
      return;
    }

    let follow_up = entry.needs_refetch;
    match result {
      Ok(envelope) => {
        let tags = (spec.provides)(&envelope.data);
        entry.settle_success(envelope.data, envelope.metadata, tags);
        debug!(endpoint = spec.endpoint, "fetch success");
      }
      Err(e) => {
        debug!(endpoint = spec.endpoint, error = %e, "fetch failed");
        entry.settle_error(e);
      }
    }

    // An invalidation arrived mid-flight; the settled payload may predate
    // the mutation, so fetch once more.
    if follow_up {
      self.start_fetch_locked(&mut state, key, true);
    }
  }
}
