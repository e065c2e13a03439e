//! HTTP transport abstraction.
//!
//! The cache engine talks to the API through the [`Transport`] trait, so
//! the wire layer is swappable: [`HttpTransport`] for production,
//! [`mock::MockTransport`] for tests. [`AuthTransport`] wraps either one to
//! attach the bearer token and intercept authorization failures.

mod authed;
mod http;
pub mod mock;

pub use authed::AuthTransport;
pub use http::HttpTransport;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::Deserialize;
use serde_json::Value;

use crate::error::ApiError;

/// HTTP methods used by the storefront API. Queries are idempotent GETs;
/// mutations are POST/PATCH/PUT/DELETE.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Method {
  Get,
  Post,
  Patch,
  Put,
  Delete,
}

impl Method {
  pub fn as_str(&self) -> &'static str {
    match self {
      Method::Get => "GET",
      Method::Post => "POST",
      Method::Patch => "PATCH",
      Method::Put => "PUT",
      Method::Delete => "DELETE",
    }
  }
}

/// One request against the API, with a path relative to the base URL.
#[derive(Clone, Debug)]
pub struct ApiRequest {
  pub method: Method,
  pub path: String,
  pub body: Option<Value>,
  pub headers: Vec<(String, String)>,
}

impl ApiRequest {
  pub fn new(method: Method, path: impl Into<String>) -> Self {
    Self {
      method,
      path: path.into(),
      body: None,
      headers: Vec::new(),
    }
  }

  pub fn get(path: impl Into<String>) -> Self {
    Self::new(Method::Get, path)
  }

  pub fn post(path: impl Into<String>, body: Value) -> Self {
    Self::new(Method::Post, path).with_body(body)
  }

  pub fn patch(path: impl Into<String>, body: Value) -> Self {
    Self::new(Method::Patch, path).with_body(body)
  }

  pub fn delete(path: impl Into<String>) -> Self {
    Self::new(Method::Delete, path)
  }

  pub fn with_body(mut self, body: Value) -> Self {
    self.body = Some(body);
    self
  }

  pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
    self.headers.push((name.into(), value.into()));
    self
  }
}

/// A settled HTTP response: status code plus the parsed JSON body.
/// Connection-level failures never produce one of these; they surface as
/// [`ApiError::Network`] instead.
#[derive(Clone, Debug)]
pub struct RawResponse {
  pub status: u16,
  pub body: Value,
}

impl RawResponse {
  /// Classify the response and unwrap the API envelope.
  pub fn into_envelope(self) -> Result<Envelope, ApiError> {
    if !(200..300).contains(&self.status) {
      return Err(ApiError::from_status(self.status, &self.body));
    }
    serde_json::from_value(self.body).map_err(|e| ApiError::Decode(e.to_string()))
  }
}

/// Response envelope used by every endpoint:
/// `{ status, message, timestamp, data: <payload>, metadata? }`.
///
/// The cache engine treats `data` as the cached value and passes `metadata`
/// (e.g. pagination info) through uninterpreted.
#[derive(Clone, Debug, Deserialize)]
pub struct Envelope {
  #[serde(default)]
  pub status: Option<u16>,
  #[serde(default)]
  pub message: Option<String>,
  #[serde(default)]
  pub timestamp: Option<DateTime<Utc>>,
  #[serde(default)]
  pub data: Value,
  #[serde(default)]
  pub metadata: Option<Value>,
}

/// The request function the rest of the crate is written against.
pub trait Transport: Send + Sync {
  fn request(&self, req: ApiRequest) -> BoxFuture<'static, Result<RawResponse, ApiError>>;
}
