//! Authenticated transport wrapper.

use std::sync::Arc;

use futures::future::BoxFuture;

use crate::error::ApiError;
use crate::session::SessionStore;

use super::{ApiRequest, RawResponse, Transport};

/// Wraps any transport to attach the bearer credential and intercept
/// authorization failures.
///
/// On a 401/403 the session is cleared *before* the error is returned, so
/// queries issued afterwards already observe `is_authenticated = false`
/// instead of racing the caller. No automatic retry with a refreshed token
/// happens here; token refresh is an explicit mutation.
#[derive(Clone)]
pub struct AuthTransport {
  inner: Arc<dyn Transport>,
  session: SessionStore,
}

impl AuthTransport {
  pub fn new(inner: Arc<dyn Transport>, session: SessionStore) -> Self {
    Self { inner, session }
  }
}

impl Transport for AuthTransport {
  fn request(&self, mut req: ApiRequest) -> BoxFuture<'static, Result<RawResponse, ApiError>> {
    if let Some(token) = self.session.access_token() {
      req = req.with_header("Authorization", format!("Bearer {}", token));
    }

    let inner = self.inner.clone();
    let session = self.session.clone();

    Box::pin(async move {
      let response = inner.request(req).await?;

      if response.status == 401 || response.status == 403 {
        session.force_logout();
        return Err(ApiError::from_status(response.status, &response.body));
      }

      Ok(response)
    })
  }
}
