//! Single-attempt HTTP execution.
//!
//! `RequestExecutor` sends exactly one request and classifies the outcome.
//! It never retries and never refreshes; that is the pipeline's job.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::{header, Client};
use serde_json::Value;
use tracing::debug;

use crate::auth::TokenStore;
use crate::config::Config;

use super::request::{ApiRequest, RequestBody};
use super::ApiError;

/// Sends one request over the wire.
///
/// `bearer` is the access token to attach, if any. Implementations perform
/// a single attempt.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &ApiRequest, bearer: Option<&str>) -> Result<Value, ApiError>;
}

/// One executed call: the outcome plus the access token it carried.
pub(crate) struct Attempt {
    pub bearer: Option<String>,
    pub outcome: Result<Value, ApiError>,
}

/// Attaches the current access token and performs one call.
/// Clone is cheap - the transport and token store are shared.
#[derive(Clone)]
pub struct RequestExecutor {
    transport: Arc<dyn Transport>,
    tokens: Arc<TokenStore>,
}

impl RequestExecutor {
    pub fn new(transport: Arc<dyn Transport>, tokens: Arc<TokenStore>) -> Self {
        Self { transport, tokens }
    }

    /// Executor over HTTP for the configured backend
    pub fn http(config: &Config, tokens: Arc<TokenStore>) -> Result<Self> {
        Ok(Self::new(Arc::new(HttpTransport::new(config)?), tokens))
    }

    pub fn tokens(&self) -> &Arc<TokenStore> {
        &self.tokens
    }

    /// Perform one call, attaching the current access token from TokenStore
    /// when the request is authenticated.
    pub async fn execute(&self, request: &ApiRequest) -> Result<Value, ApiError> {
        self.dispatch(request).await.outcome
    }

    /// Like `execute`, but also reports which token went out.
    pub(crate) async fn dispatch(&self, request: &ApiRequest) -> Attempt {
        let bearer = if request.authenticated {
            self.tokens.current_access_token()
        } else {
            None
        };
        let outcome = self.transport.send(request, bearer.as_deref()).await;
        Attempt { bearer, outcome }
    }
}

/// HTTP transport backed by `reqwest`.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: String,
    default_timeout: Duration,
}

impl HttpTransport {
    /// Create a new transport for the configured backend
    pub fn new(config: &Config) -> Result<Self> {
        let client = Client::builder().use_rustls_tls().build()?;
        Ok(Self::with_client(client, config.base_url.clone(), config.request_timeout()))
    }

    /// Create a transport that shares an existing connection pool.
    pub fn with_client(client: Client, base_url: impl Into<String>, default_timeout: Duration) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            default_timeout,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn build_headers(request: &ApiRequest, bearer: Option<&str>) -> Result<header::HeaderMap, ApiError> {
        let mut headers = header::HeaderMap::new();
        // Multipart requests get their boundary content type from reqwest.
        if !request.body.is_multipart() {
            headers.insert(
                header::CONTENT_TYPE,
                header::HeaderValue::from_static("application/json"),
            );
            headers.insert(
                header::ACCEPT,
                header::HeaderValue::from_static("application/json"),
            );
        }
        for (name, value) in request.headers.iter() {
            headers.insert(name.clone(), value.clone());
        }
        if let Some(token) = bearer {
            let value = header::HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|_| ApiError::InvalidInput("Access token is not a valid header value".to_string()))?;
            headers.insert(header::AUTHORIZATION, value);
        }
        Ok(headers)
    }

    /// Only connection, request and body failures are transient. A request
    /// that can't be built or a redirect loop fails the same way every time.
    fn classify(err: reqwest::Error, timeout: Duration) -> ApiError {
        if err.is_timeout() {
            ApiError::Timeout(timeout)
        } else if err.is_builder() {
            ApiError::InvalidInput(format!("Failed to build request: {}", err))
        } else if err.is_redirect() {
            ApiError::Parse(format!("Unexpected redirect: {}", err))
        } else if err.is_decode() {
            ApiError::Parse(err.to_string())
        } else {
            // is_connect / is_request / is_body
            ApiError::Network(err.to_string())
        }
    }

    /// Turn a response into a JSON payload or a classified HTTP error.
    async fn read_response(response: reqwest::Response, timeout: Duration) -> Result<Value, ApiError> {
        let status = response.status();
        if status.is_success() {
            let bytes = response
                .bytes()
                .await
                .map_err(|e| Self::classify(e, timeout))?;
            if bytes.iter().all(u8::is_ascii_whitespace) {
                return Ok(Value::Null);
            }
            serde_json::from_slice(&bytes)
                .map_err(|e| ApiError::Parse(format!("Failed to parse JSON response: {}", e)))
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status.as_u16(), &body))
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: &ApiRequest, bearer: Option<&str>) -> Result<Value, ApiError> {
        let url = request.url(&self.base_url);
        let timeout = request.timeout.unwrap_or(self.default_timeout);

        let mut builder = self
            .client
            .request(request.method.clone(), &url)
            .headers(Self::build_headers(request, bearer)?)
            .timeout(timeout);

        builder = match request.body {
            RequestBody::Empty => builder,
            RequestBody::Json(ref value) => builder.body(value.to_string()),
            RequestBody::Multipart(ref parts) => builder.multipart(RequestBody::to_form(parts)?),
        };

        debug!(method = %request.method, url = %url, authenticated = bearer.is_some(), "Sending request");

        let response = builder
            .send()
            .await
            .map_err(|e| Self::classify(e, timeout))?;

        debug!(method = %request.method, url = %url, status = response.status().as_u16(), "Response received");

        Self::read_response(response, timeout).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use crate::api::{ErrorKind, MultipartPart};
    use crate::auth::{SessionData, UserSummary};

    /// Records the bearer token of every call and answers `null`.
    #[derive(Default)]
    struct RecordingTransport {
        bearers: Mutex<Vec<Option<String>>>,
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        async fn send(&self, _request: &ApiRequest, bearer: Option<&str>) -> Result<Value, ApiError> {
            self.bearers.lock().unwrap().push(bearer.map(str::to_string));
            Ok(Value::Null)
        }
    }

    fn session(access: &str) -> SessionData {
        SessionData::new(access, "R1", UserSummary::new("1", "bob"))
    }

    #[tokio::test]
    async fn test_execute_reads_token_store_on_every_call() {
        let transport = Arc::new(RecordingTransport::default());
        let tokens = Arc::new(TokenStore::new());
        let executor = RequestExecutor::new(transport.clone(), tokens.clone());

        executor.execute(&ApiRequest::get("/me")).await.unwrap();
        tokens.set_session(session("A1"));
        executor.execute(&ApiRequest::get("/me")).await.unwrap();
        tokens.set_session(session("A2"));
        executor.execute(&ApiRequest::get("/me")).await.unwrap();
        executor.execute(&ApiRequest::post("/auth/signin").without_auth()).await.unwrap();
        tokens.clear_session();
        executor.execute(&ApiRequest::get("/me")).await.unwrap();

        assert_eq!(
            *transport.bearers.lock().unwrap(),
            vec![None, Some("A1".to_string()), Some("A2".to_string()), None, None]
        );
    }

    #[tokio::test]
    async fn test_malformed_url_is_invalid_input() {
        let transport = HttpTransport::with_client(Client::new(), "http://[::1", Duration::from_secs(1));
        let err = transport.send(&ApiRequest::get("/me"), None).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert!(!err.is_transient());
    }

    #[test]
    fn test_json_headers_and_bearer() {
        let req = ApiRequest::get("/me");
        let headers = HttpTransport::build_headers(&req, Some("A1")).unwrap();

        assert_eq!(headers[header::AUTHORIZATION], "Bearer A1");
        assert_eq!(headers[header::CONTENT_TYPE], "application/json");
        assert_eq!(headers[header::ACCEPT], "application/json");
    }

    #[test]
    fn test_no_bearer_without_token() {
        let req = ApiRequest::get("/me");
        let headers = HttpTransport::build_headers(&req, None).unwrap();
        assert!(headers.get(header::AUTHORIZATION).is_none());
    }

    #[test]
    fn test_multipart_leaves_content_type_alone() {
        let req = ApiRequest::post("/avatar")
            .multipart(vec![MultipartPart::file("file", "a.png", "image/png", vec![0x89])]);
        let headers = HttpTransport::build_headers(&req, Some("A1")).unwrap();

        assert!(headers.get(header::CONTENT_TYPE).is_none());
        assert!(headers.get(header::ACCEPT).is_none());
        assert_eq!(headers[header::AUTHORIZATION], "Bearer A1");
    }

    #[test]
    fn test_caller_headers_are_kept() {
        let req = ApiRequest::get("/export").header(
            header::ACCEPT,
            header::HeaderValue::from_static("text/csv"),
        );
        let headers = HttpTransport::build_headers(&req, None).unwrap();
        assert_eq!(headers[header::ACCEPT], "text/csv");
    }

    #[test]
    fn test_unprintable_token_is_rejected() {
        let req = ApiRequest::get("/me");
        let err = HttpTransport::build_headers(&req, Some("bad\ntoken")).unwrap_err();
        assert!(matches!(err, ApiError::InvalidInput(_)));
    }
}
