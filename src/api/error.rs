//! Error types surfaced by the API client.
//!
//! Transport failures (`Network`, `Aborted`) are kept apart from server
//! responses (`Http`) so calling code can tell "offline" from "rejected".

use std::fmt;

use reqwest::Method;
use serde_json::Value;
use thiserror::Error;

use super::tokens::TokenStoreError;

/// Fallback message when a failed response carries nothing usable.
pub const GENERIC_ERROR_MESSAGE: &str = "API error";

/// Per-call diagnostics. Lives only as long as the call (and its single
/// retry) that created it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    pub method: Method,
    /// Normalized path, always starting with `/`.
    pub path: String,
    pub url: String,
    pub api_base: String,
    /// Client identity sent as `X-Client-Type`.
    pub origin: String,
}

impl fmt::Display for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} (path {}, API base {}, origin {})",
            self.method, self.url, self.path, self.api_base, self.origin
        )
    }
}

/// A non-2xx response, normalized.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message} (HTTP {status})")]
pub struct HttpError {
    pub message: String,
    pub status: u16,
    /// Parsed JSON body, the raw text when it was not JSON, or `null` when empty.
    pub body: Value,
}

impl HttpError {
    /// Build the normalized error from a failed response's status and body.
    pub fn from_response(status: u16, body: Value, raw: &str) -> Self {
        Self {
            message: error_message(&body, raw),
            status,
            body,
        }
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Network request failed: {context}: {source}")]
    Network {
        context: Box<RequestContext>,
        #[source]
        source: reqwest::Error,
    },

    #[error("Request aborted: {context}")]
    Aborted { context: Box<RequestContext> },

    #[error(transparent)]
    Http(#[from] HttpError),

    #[error("Failed to encode request body: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("Unexpected response shape (HTTP {status}): {source}")]
    Decode {
        status: u16,
        body: Value,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    TokenStore(#[from] TokenStoreError),

    #[error("Failed to build HTTP client: {0}")]
    Setup(#[source] reqwest::Error),
}

impl ApiError {
    /// HTTP status for server-side failures.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Http(e) => Some(e.status),
            ApiError::Decode { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// The transport never completed.
    pub fn is_network(&self) -> bool {
        matches!(self, ApiError::Network { .. } | ApiError::Aborted { .. })
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self, ApiError::Aborted { .. })
    }

    /// A 401 that survived the refresh-and-retry; the token store has been
    /// cleared and the caller should send the user back to login.
    pub fn is_session_expired(&self) -> bool {
        matches!(self, ApiError::Http(e) if e.status == 401)
    }

    pub fn as_http(&self) -> Option<&HttpError> {
        match self {
            ApiError::Http(e) => Some(e),
            _ => None,
        }
    }

    /// Message suitable for showing next to a form.
    pub fn message(&self) -> String {
        match self {
            ApiError::Http(e) => e.message.clone(),
            other => other.to_string(),
        }
    }
}

/// Pick a human-readable message out of a failed response body.
///
/// Objects use `detail` then `message`; arrays use their first element's
/// `detail`/`message`/`msg`. Anything else falls back to the raw text.
pub fn error_message(body: &Value, raw: &str) -> String {
    let picked = match body {
        Value::Object(map) => map
            .get("detail")
            .or_else(|| map.get("message"))
            .and_then(message_from_field),
        Value::Array(items) => items.first().and_then(first_item_message),
        _ => None,
    };

    match picked {
        Some(message) => message,
        None if !raw.trim().is_empty() => raw.to_string(),
        None => GENERIC_ERROR_MESSAGE.to_string(),
    }
}

fn message_from_field(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        // FastAPI validation errors: {"detail": [{"msg": ...}, ...]}
        Value::Array(items) => items.first().and_then(first_item_message),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

fn first_item_message(item: &Value) -> Option<String> {
    match item {
        Value::String(s) => Some(s.clone()),
        Value::Object(map) => ["detail", "message", "msg"]
            .iter()
            .filter_map(|key| map.get(*key))
            .find_map(|v| v.as_str().map(str::to_string)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn detail_field_wins() {
        let body = json!({"detail": "Forbidden", "message": "other"});
        assert_eq!(error_message(&body, "ignored"), "Forbidden");
    }

    #[test]
    fn message_field_is_used_without_detail() {
        let body = json!({"message": "Out of stock"});
        assert_eq!(error_message(&body, "ignored"), "Out of stock");
    }

    #[test]
    fn array_body_uses_first_element() {
        let body = json!([{"msg": "bad field"}, {"msg": "second"}]);
        assert_eq!(error_message(&body, "ignored"), "bad field");
    }

    #[test]
    fn validation_detail_array_uses_first_msg() {
        let body = json!({"detail": [{"loc": ["body", "qty"], "msg": "must be positive", "type": "value_error"}]});
        assert_eq!(error_message(&body, "ignored"), "must be positive");
    }

    #[test]
    fn raw_text_is_the_fallback() {
        let raw = "<html>Bad Gateway</html>";
        let body = Value::String(raw.to_string());
        assert_eq!(error_message(&body, raw), raw);

        let body = json!({"error": "x"});
        assert_eq!(error_message(&body, r#"{"error":"x"}"#), r#"{"error":"x"}"#);
    }

    #[test]
    fn empty_body_gets_generic_message() {
        assert_eq!(error_message(&Value::Null, ""), GENERIC_ERROR_MESSAGE);
        assert_eq!(error_message(&json!([]), "[]"), "[]");
    }

    #[test]
    fn http_error_exposes_status_and_body() {
        let body = json!({"detail": "Forbidden"});
        let err = ApiError::from(HttpError::from_response(403, body.clone(), "{}"));
        assert_eq!(err.status(), Some(403));
        assert_eq!(err.message(), "Forbidden");
        assert!(!err.is_network());
        assert!(!err.is_session_expired());
        assert_eq!(err.as_http().map(|e| &e.body), Some(&body));
    }
}
