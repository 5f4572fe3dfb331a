use std::fmt;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

use crate::auth::StorageError;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("Unauthorized - session expired{}", message_suffix(.server_message))]
    AuthExpired {
        body: Value,
        server_message: Option<String>,
    },

    #[error("Client error {status}{}", message_suffix(.server_message))]
    Client {
        status: u16,
        body: Value,
        server_message: Option<String>,
    },

    #[error("Server error {status}{}", message_suffix(.server_message))]
    Server {
        status: u16,
        body: Value,
        server_message: Option<String>,
    },

    #[error("Invalid response: {0}")]
    Parse(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Coarse error classes callers branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Network,
    Timeout,
    HttpClient,
    HttpAuthExpired,
    HttpServer,
    Parse,
    Storage,
    InvalidInput,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Network => "NETWORK",
            ErrorKind::Timeout => "TIMEOUT",
            ErrorKind::HttpClient => "HTTP_CLIENT",
            ErrorKind::HttpAuthExpired => "HTTP_AUTH_EXPIRED",
            ErrorKind::HttpServer => "HTTP_SERVER",
            ErrorKind::Parse => "PARSE",
            ErrorKind::Storage => "STORAGE",
            ErrorKind::InvalidInput => "INVALID_INPUT",
        };
        f.write_str(name)
    }
}

fn message_suffix(message: &Option<String>) -> String {
    message
        .as_deref()
        .map(|m| format!(": {}", m))
        .unwrap_or_default()
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

impl ApiError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ApiError::Network(_) => ErrorKind::Network,
            ApiError::Timeout(_) => ErrorKind::Timeout,
            ApiError::AuthExpired { .. } => ErrorKind::HttpAuthExpired,
            ApiError::Client { .. } => ErrorKind::HttpClient,
            ApiError::Server { .. } => ErrorKind::HttpServer,
            ApiError::Parse(_) => ErrorKind::Parse,
            ApiError::Storage(_) => ErrorKind::Storage,
            ApiError::InvalidInput(_) => ErrorKind::InvalidInput,
        }
    }

    /// Failures expected to clear up if the same request is sent again.
    pub fn is_transient(&self) -> bool {
        matches!(self, ApiError::Network(_) | ApiError::Timeout(_))
    }

    pub fn is_auth_expired(&self) -> bool {
        matches!(self, ApiError::AuthExpired { .. })
    }

    /// HTTP status, for errors that came from a response.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::AuthExpired { .. } => Some(401),
            ApiError::Client { status, .. } | ApiError::Server { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn server_message(&self) -> Option<&str> {
        match self {
            ApiError::AuthExpired { server_message, .. }
            | ApiError::Client { server_message, .. }
            | ApiError::Server { server_message, .. } => server_message.as_deref(),
            _ => None,
        }
    }

    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            body.to_string()
        } else {
            let mut end = MAX_ERROR_BODY_LENGTH;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
        }
    }

    /// Decode an error body: JSON if it parses, otherwise the truncated text.
    fn decode_body(body: &str) -> Value {
        if body.trim().is_empty() {
            return Value::Null;
        }
        serde_json::from_str(body).unwrap_or_else(|_| Value::String(Self::truncate_body(body)))
    }

    /// Pull a human-readable message out of an error body.
    ///
    /// Accepts `{"message": "..."}`, `{"message": ["...", "..."]}` and
    /// `{"error": "..."}`; anything else yields `None`.
    fn extract_message(body: &Value) -> Option<String> {
        let object = body.as_object()?;
        match object.get("message") {
            Some(Value::String(message)) if !message.is_empty() => {
                return Some(message.clone());
            }
            Some(Value::Array(items)) => {
                let parts: Vec<&str> = items.iter().filter_map(Value::as_str).collect();
                if !parts.is_empty() {
                    return Some(parts.join("; "));
                }
            }
            _ => {}
        }
        match object.get("error") {
            Some(Value::String(error)) if !error.is_empty() => Some(error.clone()),
            _ => None,
        }
    }

    pub fn from_status(status: u16, body: &str) -> Self {
        let body = Self::decode_body(body);
        let server_message = Self::extract_message(&body);
        match status {
            401 => ApiError::AuthExpired {
                body,
                server_message,
            },
            400..=499 => ApiError::Client {
                status,
                body,
                server_message,
            },
            500..=599 => ApiError::Server {
                status,
                body,
                server_message,
            },
            // Redirects and informational codes are never a valid answer.
            _ => ApiError::Parse(format!("Unexpected HTTP status {}", status)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_status_classifies() {
        assert_eq!(ApiError::from_status(401, "").kind(), ErrorKind::HttpAuthExpired);
        assert_eq!(ApiError::from_status(403, "").kind(), ErrorKind::HttpClient);
        assert_eq!(ApiError::from_status(404, "").kind(), ErrorKind::HttpClient);
        assert_eq!(ApiError::from_status(429, "").kind(), ErrorKind::HttpClient);
        assert_eq!(ApiError::from_status(500, "").kind(), ErrorKind::HttpServer);
        assert_eq!(ApiError::from_status(503, "").kind(), ErrorKind::HttpServer);
    }

    #[test]
    fn test_non_error_status_is_parse() {
        for status in [101, 204, 304, 307, 600] {
            let err = ApiError::from_status(status, "");
            assert_eq!(err.kind(), ErrorKind::Parse, "status {status}");
            assert_eq!(err.status(), None);
            assert!(!err.is_transient());
        }
        assert!(ApiError::from_status(302, "").to_string().contains("302"));
    }

    #[test]
    fn test_server_message_from_string() {
        let err = ApiError::from_status(400, r#"{"message": "Username taken"}"#);
        assert_eq!(err.server_message(), Some("Username taken"));
        assert_eq!(err.to_string(), "Client error 400: Username taken");
    }

    #[test]
    fn test_server_message_from_list() {
        let err = ApiError::from_status(422, r#"{"message": ["email is invalid", "password too short"]}"#);
        assert_eq!(err.server_message(), Some("email is invalid; password too short"));
    }

    #[test]
    fn test_server_message_falls_back_to_error_field() {
        let err = ApiError::from_status(401, r#"{"statusCode": 401, "error": "Unauthorized"}"#);
        assert_eq!(err.server_message(), Some("Unauthorized"));
        assert_eq!(err.status(), Some(401));
    }

    #[test]
    fn test_non_json_body_is_kept_as_text() {
        let err = ApiError::from_status(502, "<html>Bad Gateway</html>");
        match err {
            ApiError::Server { body, server_message, .. } => {
                assert_eq!(body, json!("<html>Bad Gateway</html>"));
                assert!(server_message.is_none());
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_long_body_is_truncated() {
        let long = "é".repeat(400);
        let err = ApiError::from_status(500, &long);
        let ApiError::Server { body, .. } = err else {
            panic!("expected server error");
        };
        let text = body.as_str().unwrap();
        assert!(text.contains("truncated, 800 total bytes"));
    }

    #[test]
    fn test_only_network_and_timeout_are_transient() {
        assert!(ApiError::Network("reset".into()).is_transient());
        assert!(ApiError::Timeout(Duration::from_secs(30)).is_transient());
        assert!(!ApiError::from_status(401, "").is_transient());
        assert!(!ApiError::from_status(503, "").is_transient());
        assert!(!ApiError::Parse("bad".into()).is_transient());
    }
}
