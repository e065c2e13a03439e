//! Scripted transport for deterministic tests.
//!
//! `MockTransport` is shared between the code under test and the test body:
//! clone it, hand one copy to the client or engine, and use the other to
//! script responses and assert on the requests that went out.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::future::BoxFuture;
use serde_json::{json, Value};

use crate::error::ApiError;

use super::{ApiRequest, Method, RawResponse, Transport};

type Scripted = Result<RawResponse, ApiError>;

#[derive(Default)]
struct Route {
  once: VecDeque<Scripted>,
  sticky: Option<Scripted>,
}

#[derive(Default)]
struct MockState {
  routes: HashMap<(Method, String), Route>,
  log: Vec<ApiRequest>,
  latency: Option<Duration>,
}

/// A transport that replays scripted responses and records every request.
#[derive(Clone, Default)]
pub struct MockTransport {
  inner: Arc<Mutex<MockState>>,
}

impl MockTransport {
  pub fn new() -> Self {
    Self::default()
  }

  /// Add artificial latency to every response, for tests that need
  /// requests to overlap.
  pub fn with_latency(self, latency: Duration) -> Self {
    self.state().latency = Some(latency);
    self
  }

  fn state(&self) -> std::sync::MutexGuard<'_, MockState> {
    self.inner.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Script a sticky response: returned for every matching request.
  pub fn respond(&self, method: Method, path: &str, response: RawResponse) {
    self
      .state()
      .routes
      .entry((method, path.to_string()))
      .or_default()
      .sticky = Some(Ok(response));
  }

  /// Script a response consumed by exactly one matching request; queued in
  /// order ahead of any sticky response.
  pub fn respond_once(&self, method: Method, path: &str, response: RawResponse) {
    self
      .state()
      .routes
      .entry((method, path.to_string()))
      .or_default()
      .once
      .push_back(Ok(response));
  }

  /// Script a sticky transport failure.
  pub fn fail(&self, method: Method, path: &str, error: ApiError) {
    self
      .state()
      .routes
      .entry((method, path.to_string()))
      .or_default()
      .sticky = Some(Err(error));
  }

  /// Script a transport failure consumed by exactly one matching request.
  pub fn fail_once(&self, method: Method, path: &str, error: ApiError) {
    self
      .state()
      .routes
      .entry((method, path.to_string()))
      .or_default()
      .once
      .push_back(Err(error));
  }

  /// Script a sticky 200 response with `data` wrapped in the API envelope.
  pub fn ok(&self, method: Method, path: &str, data: Value) {
    self.respond(method, path, envelope(data, None));
  }

  /// Like [`ok`](Self::ok) but consumed by a single request.
  pub fn ok_once(&self, method: Method, path: &str, data: Value) {
    self.respond_once(method, path, envelope(data, None));
  }

  /// Script a sticky 200 envelope carrying pagination metadata.
  pub fn ok_with_metadata(&self, method: Method, path: &str, data: Value, metadata: Value) {
    self.respond(method, path, envelope(data, Some(metadata)));
  }

  /// All requests seen so far, in order.
  pub fn requests(&self) -> Vec<ApiRequest> {
    self.state().log.clone()
  }

  /// Number of requests issued to one route.
  pub fn request_count(&self, method: Method, path: &str) -> usize {
    self
      .state()
      .log
      .iter()
      .filter(|r| r.method == method && r.path == path)
      .count()
  }
}

/// Wrap a payload in the standard response envelope.
pub fn envelope(data: Value, metadata: Option<Value>) -> RawResponse {
  let mut body = json!({
    "status": 200,
    "message": "OK",
    "timestamp": "2024-03-01T10:00:00Z",
    "data": data,
  });
  if let Some(metadata) = metadata {
    body["metadata"] = metadata;
  }
  RawResponse { status: 200, body }
}

impl Transport for MockTransport {
  fn request(&self, req: ApiRequest) -> BoxFuture<'static, Result<RawResponse, ApiError>> {
    let inner = self.inner.clone();

    Box::pin(async move {
      let (latency, scripted) = {
        let mut state = inner.lock().unwrap_or_else(PoisonError::into_inner);
        state.log.push(req.clone());
        let scripted = state
          .routes
          .get_mut(&(req.method, req.path.clone()))
          .and_then(|route| route.once.pop_front().or_else(|| route.sticky.clone()));
        (state.latency, scripted)
      };

      if let Some(latency) = latency {
        tokio::time::sleep(latency).await;
      }

      scripted.unwrap_or_else(|| {
        Err(ApiError::Network(format!(
          "no scripted response for {} {}",
          req.method.as_str(),
          req.path
        )))
      })
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn test_sticky_response_repeats() {
    let mock = MockTransport::new();
    mock.ok(Method::Get, "products", json!([1, 2]));

    for _ in 0..3 {
      let response = mock
        .request(ApiRequest::get("products"))
        .await
        .expect("scripted");
      assert_eq!(response.status, 200);
    }
    assert_eq!(mock.request_count(Method::Get, "products"), 3);
  }

  #[tokio::test]
  async fn test_once_responses_consumed_in_order() {
    let mock = MockTransport::new();
    mock.ok_once(Method::Get, "carts/me", json!({ "total": 1 }));
    mock.ok_once(Method::Get, "carts/me", json!({ "total": 2 }));

    let first = mock
      .request(ApiRequest::get("carts/me"))
      .await
      .expect("scripted");
    let second = mock
      .request(ApiRequest::get("carts/me"))
      .await
      .expect("scripted");
    assert_eq!(first.body["data"]["total"], json!(1));
    assert_eq!(second.body["data"]["total"], json!(2));
  }

  #[tokio::test]
  async fn test_unscripted_route_is_a_network_error() {
    let mock = MockTransport::new();
    let err = mock
      .request(ApiRequest::get("nowhere"))
      .await
      .expect_err("unscripted");
    assert!(matches!(err, ApiError::Network(_)));
  }
}
