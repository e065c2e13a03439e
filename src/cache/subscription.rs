//! Subscriber handle for a cached query.

use std::marker::PhantomData;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::watch;

use crate::error::ApiError;

use super::engine::{CacheEngine, QuerySpec};
use super::entry::{QuerySnapshot, QueryStatus};
use super::key::CacheKey;

/// Typed view of a query's state, with the payload decoded into `T`.
///
/// A payload that fails to decode surfaces as `error` with `data` unset;
/// nothing panics on a malformed body.
#[derive(Clone, Debug)]
pub struct QueryState<T> {
  pub data: Option<T>,
  pub metadata: Option<Value>,
  pub error: Option<ApiError>,
  pub status: QueryStatus,
  /// First fetch in progress, no data yet.
  pub is_loading: bool,
  /// Any fetch in progress, including background refetches.
  pub is_fetching: bool,
}

impl<T: DeserializeOwned> QueryState<T> {
  fn from_snapshot(snapshot: &QuerySnapshot) -> Self {
    let mut error = snapshot.error.clone();
    let data = match &snapshot.data {
      Some(value) => match serde_json::from_value(value.clone()) {
        Ok(decoded) => Some(decoded),
        Err(e) => {
          error = Some(ApiError::Decode(e.to_string()));
          None
        }
      },
      None => None,
    };

    Self {
      data,
      metadata: snapshot.metadata.clone(),
      error,
      status: snapshot.status,
      is_loading: snapshot.is_loading(),
      is_fetching: snapshot.is_fetching,
    }
  }
}

/// Live subscription to one cache entry.
///
/// Holding the handle keeps the entry referenced and its background
/// refetches flowing; dropping it releases the reference and starts the GC
/// grace period. Subscriptions are read-only views: all writes go through
/// the engine.
pub struct QuerySubscription<T = Value> {
  engine: CacheEngine,
  key: CacheKey,
  spec: Arc<QuerySpec>,
  rx: watch::Receiver<QuerySnapshot>,
  /// Engine epoch under which this handle's reference is counted; a cache
  /// reset bumps the engine's epoch and orphans the handle until `refetch`
  /// re-registers it.
  epoch: u64,
  _marker: PhantomData<fn() -> T>,
}

impl<T> QuerySubscription<T> {
  pub(crate) fn new(
    engine: CacheEngine,
    key: CacheKey,
    spec: Arc<QuerySpec>,
    rx: watch::Receiver<QuerySnapshot>,
    epoch: u64,
  ) -> Self {
    Self {
      engine,
      key,
      spec,
      rx,
      epoch,
      _marker: PhantomData,
    }
  }

  pub fn key(&self) -> &CacheKey {
    &self.key
  }

  /// Untyped view of the entry's current state.
  pub fn snapshot(&self) -> QuerySnapshot {
    self.rx.borrow().clone()
  }

  /// Wait for the next published state. Returns false once the entry is
  /// gone and no further updates will arrive.
  pub async fn changed(&mut self) -> bool {
    self.rx.changed().await.is_ok()
  }

  /// Force a refetch, coalescing with any request already in flight. Also
  /// works after a cache reset evicted the entry: the entry is
  /// re-registered with this handle counted as its subscriber and fetched
  /// fresh.
  pub fn refetch(&mut self) {
    let (rx, epoch) = self.engine.refetch(&self.key, &self.spec, self.epoch);
    self.rx = rx;
    self.epoch = epoch;
  }
}

impl<T: DeserializeOwned> QuerySubscription<T> {
  /// Typed view of the entry's current state.
  pub fn state(&self) -> QueryState<T> {
    QueryState::from_snapshot(&self.rx.borrow())
  }
}

impl<T> Drop for QuerySubscription<T> {
  fn drop(&mut self) {
    self.engine.release(&self.key, self.epoch);
  }
}
