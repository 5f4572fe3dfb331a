use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::multipart::{Form, Part};
use reqwest::Method;
use serde::Serialize;
use serde_json::Value;

use super::ApiError;

/// One file or text field of a multipart upload.
#[derive(Debug, Clone)]
pub struct MultipartPart {
    pub name: String,
    pub data: Vec<u8>,
    pub file_name: Option<String>,
    pub mime: Option<String>,
}

impl MultipartPart {
    pub fn text(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data: value.into().into_bytes(),
            file_name: None,
            mime: None,
        }
    }

    pub fn file(
        name: impl Into<String>,
        file_name: impl Into<String>,
        mime: impl Into<String>,
        data: Vec<u8>,
    ) -> Self {
        Self {
            name: name.into(),
            data,
            file_name: Some(file_name.into()),
            mime: Some(mime.into()),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub enum RequestBody {
    #[default]
    Empty,
    Json(Value),
    Multipart(Vec<MultipartPart>),
}

impl RequestBody {
    pub fn is_multipart(&self) -> bool {
        matches!(self, RequestBody::Multipart(_))
    }

    /// Build a fresh multipart form. `reqwest` consumes forms on send, so
    /// every attempt gets its own.
    pub(crate) fn to_form(parts: &[MultipartPart]) -> Result<Form, ApiError> {
        let mut form = Form::new();
        for part in parts {
            let mut p = Part::bytes(part.data.clone());
            if let Some(ref file_name) = part.file_name {
                p = p.file_name(file_name.clone());
            }
            if let Some(ref mime) = part.mime {
                p = p
                    .mime_str(mime)
                    .map_err(|e| ApiError::InvalidInput(format!("Invalid MIME type {}: {}", mime, e)))?;
            }
            form = form.part(part.name.clone(), p);
        }
        Ok(form)
    }
}

/// Description of one outgoing call. Cheap to clone and never shared
/// between calls.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    /// Path relative to the base URL, or an absolute URL.
    pub path: String,
    pub headers: HeaderMap,
    pub body: RequestBody,
    /// Per-call timeout. `None` uses the configured default.
    pub timeout: Option<Duration>,
    /// Whether the bearer token is attached and 401s trigger a refresh.
    pub authenticated: bool,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: HeaderMap::new(),
            body: RequestBody::Empty,
            timeout: None,
            authenticated: true,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    /// Attach a JSON body.
    pub fn json<B: Serialize>(mut self, body: &B) -> Result<Self, ApiError> {
        let value = serde_json::to_value(body)
            .map_err(|e| ApiError::InvalidInput(format!("Failed to serialize request body: {}", e)))?;
        self.body = RequestBody::Json(value);
        Ok(self)
    }

    pub fn json_value(mut self, body: Value) -> Self {
        self.body = RequestBody::Json(body);
        self
    }

    pub fn multipart(mut self, parts: Vec<MultipartPart>) -> Self {
        self.body = RequestBody::Multipart(parts);
        self
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Send without a bearer token and never attempt a refresh.
    pub fn without_auth(mut self) -> Self {
        self.authenticated = false;
        self
    }

    /// Whether a success changes server state.
    pub fn is_mutation(&self) -> bool {
        matches!(
            self.method,
            Method::POST | Method::PUT | Method::PATCH | Method::DELETE
        )
    }

    /// Resolve the request path against a base URL.
    pub fn url(&self, base_url: &str) -> String {
        if self.path.starts_with("http://") || self.path.starts_with("https://") {
            return self.path.clone();
        }
        format!(
            "{}/{}",
            base_url.trim_end_matches('/'),
            self.path.trim_start_matches('/')
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_url_joins_base_and_path() {
        let req = ApiRequest::get("/users/me");
        assert_eq!(req.url("https://api.example.com/"), "https://api.example.com/users/me");
        assert_eq!(req.url("https://api.example.com"), "https://api.example.com/users/me");

        let req = ApiRequest::get("challenges");
        assert_eq!(req.url("https://api.example.com/v1"), "https://api.example.com/v1/challenges");
    }

    #[test]
    fn test_url_keeps_absolute_paths() {
        let req = ApiRequest::get("https://cdn.example.com/a.png");
        assert_eq!(req.url("https://api.example.com"), "https://cdn.example.com/a.png");
    }

    #[test]
    fn test_mutations() {
        assert!(!ApiRequest::get("/x").is_mutation());
        assert!(ApiRequest::post("/x").is_mutation());
        assert!(ApiRequest::put("/x").is_mutation());
        assert!(ApiRequest::patch("/x").is_mutation());
        assert!(ApiRequest::delete("/x").is_mutation());
    }

    #[test]
    fn test_builder_defaults() {
        let req = ApiRequest::post("/auth/signin")
            .json(&json!({"username": "bob"}))
            .unwrap()
            .without_auth();
        assert!(!req.authenticated);
        assert!(req.timeout.is_none());
        assert!(matches!(req.body, RequestBody::Json(_)));
    }

    #[test]
    fn test_bad_mime_is_rejected() {
        let parts = vec![MultipartPart::file("avatar", "a.png", "not a mime", vec![1, 2, 3])];
        assert!(RequestBody::to_form(&parts).is_err());
    }
}
