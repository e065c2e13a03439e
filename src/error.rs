//! Error taxonomy for transport and cache operations.
//!
//! Errors are plain cloneable values: query failures live inside cache
//! entries and are handed to every subscriber, so they cannot own
//! non-clonable sources. Classification drives side effects upstream:
//! only `Unauthorized` triggers a forced logout, and only at the
//! transport layer.

use serde_json::Value;
use thiserror::Error;

/// Error returned by transport requests and surfaced in query snapshots.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ApiError {
  /// The request never reached the server (DNS, connect, timeout).
  /// Never triggers a forced logout.
  #[error("network error: {0}")]
  Network(String),

  /// 401/403 from the server. The authenticated transport clears the
  /// session before returning this.
  #[error("unauthorized ({status}): {message}")]
  Unauthorized { status: u16, message: String },

  /// Any other 4xx with a structured message body. Surfaced verbatim for
  /// the caller to display; never retried automatically.
  #[error("request failed ({status}): {message}")]
  Api { status: u16, message: String },

  /// 5xx response. Surfaced like a validation error; retry policy is a
  /// caller concern.
  #[error("server error ({status}): {message}")]
  Server { status: u16, message: String },

  /// The response body did not match the expected envelope or payload shape.
  #[error("failed to decode response: {0}")]
  Decode(String),
}

impl ApiError {
  /// Classify a settled HTTP response by status code.
  ///
  /// The message is pulled from the envelope's `message` field when
  /// present, falling back to the raw body.
  pub fn from_status(status: u16, body: &Value) -> Self {
    let message = body
      .get("message")
      .and_then(Value::as_str)
      .map(String::from)
      .unwrap_or_else(|| body.to_string());

    match status {
      401 | 403 => ApiError::Unauthorized { status, message },
      500..=599 => ApiError::Server { status, message },
      _ => ApiError::Api { status, message },
    }
  }

  /// Whether this error should force the session into the anonymous state.
  pub fn is_auth_failure(&self) -> bool {
    matches!(self, ApiError::Unauthorized { .. })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_from_status_classification() {
    let body = json!({ "message": "nope" });

    assert!(matches!(
      ApiError::from_status(401, &body),
      ApiError::Unauthorized { status: 401, .. }
    ));
    assert!(matches!(
      ApiError::from_status(403, &body),
      ApiError::Unauthorized { status: 403, .. }
    ));
    assert!(matches!(
      ApiError::from_status(422, &body),
      ApiError::Api { status: 422, .. }
    ));
    assert!(matches!(
      ApiError::from_status(500, &body),
      ApiError::Server { status: 500, .. }
    ));
  }

  #[test]
  fn test_message_extracted_from_envelope() {
    let body = json!({ "message": "Cart item not found" });
    let err = ApiError::from_status(404, &body);
    assert_eq!(
      err,
      ApiError::Api {
        status: 404,
        message: "Cart item not found".to_string()
      }
    );
  }

  #[test]
  fn test_message_falls_back_to_raw_body() {
    let body = json!({ "detail": "unstructured" });
    if let ApiError::Api { message, .. } = ApiError::from_status(400, &body) {
      assert!(message.contains("unstructured"));
    } else {
      panic!("expected Api error");
    }
  }

  #[test]
  fn test_only_unauthorized_is_auth_failure() {
    let body = json!({ "message": "x" });
    assert!(ApiError::from_status(401, &body).is_auth_failure());
    assert!(!ApiError::from_status(404, &body).is_auth_failure());
    assert!(!ApiError::from_status(500, &body).is_auth_failure());
    assert!(!ApiError::Network("connection refused".into()).is_auth_failure());
  }
}
