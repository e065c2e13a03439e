//! Default `reqwest`-backed transport.

use futures::future::BoxFuture;
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::config::ApiConfig;
use crate::error::ApiError;

use super::{ApiRequest, Method, RawResponse, Transport};

/// Transport that issues real HTTP requests against the configured base URL.
#[derive(Clone)]
pub struct HttpTransport {
  client: reqwest::Client,
  base_url: Url,
}

impl HttpTransport {
  pub fn new(config: &ApiConfig) -> Result<Self, url::ParseError> {
    let base_url = Url::parse(&config.base_url)?;
    Ok(Self {
      client: reqwest::Client::new(),
      base_url,
    })
  }
}

impl Transport for HttpTransport {
  fn request(&self, req: ApiRequest) -> BoxFuture<'static, Result<RawResponse, ApiError>> {
    let client = self.client.clone();
    let url = self.base_url.join(&req.path);

    Box::pin(async move {
      let url = url.map_err(|e| ApiError::Network(format!("invalid request url: {}", e)))?;
      debug!(method = req.method.as_str(), url = %url, "http request");

      let method = match req.method {
        Method::Get => reqwest::Method::GET,
        Method::Post => reqwest::Method::POST,
        Method::Patch => reqwest::Method::PATCH,
        Method::Put => reqwest::Method::PUT,
        Method::Delete => reqwest::Method::DELETE,
      };

      let mut builder = client.request(method, url);
      for (name, value) in &req.headers {
        builder = builder.header(name, value);
      }
      if let Some(body) = &req.body {
        builder = builder.json(body);
      }

      // Failures before a response settles are network errors; settled
      // responses are classified by status further up.
      let response = builder
        .send()
        .await
        .map_err(|e| ApiError::Network(e.to_string()))?;

      let status = response.status().as_u16();
      // Empty or non-JSON bodies (e.g. 204 on delete) decode as null.
      let body = response.json::<Value>().await.unwrap_or(Value::Null);

      debug!(status, "http response");
      Ok(RawResponse { status, body })
    })
  }
}
