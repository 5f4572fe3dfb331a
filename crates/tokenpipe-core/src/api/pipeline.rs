//! Resilient request pipeline.
//!
//! Wraps a [`RequestExecutor`] with two recovery protocols:
//!
//! 1. Transient failures (`NETWORK`, `TIMEOUT`) are retried up to
//!    `retry_attempts` times with linear backoff (`retry_delay_ms * n`).
//! 2. A 401 on an authenticated request triggers a single refresh through
//!    `POST /auth/refresh-token`, then one reissue of the original request.
//!    If there is no refresh token or the refresh fails, the session is
//!    logged out and the 401 is returned.
//!
//! Concurrent 401s share one refresh: the refresh gate is held for the
//! duration of the refresh call, and requests that queued behind it reissue
//! with the new token instead of refreshing again.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::auth::{SessionData, SessionLifecycle, TokenStore};
use crate::config::RetryPolicy;

use super::executor::{Attempt, RequestExecutor};
use super::request::ApiRequest;
use super::ApiError;

/// Endpoint exchanging a refresh token for a new session
pub const REFRESH_PATH: &str = "/auth/refresh-token";

/// Runs after a successful authenticated mutation, in registration order.
///
/// Handlers see the raw JSON payload before [`ResilientPipeline::send`]
/// decodes it, so they still run when the caller's type doesn't match. An
/// error is logged and does not change what the caller receives. Sign-in,
/// sign-up and refresh calls carry no auth and never reach handlers.
pub trait PostCommitHandler: Send + Sync {
    fn on_commit(&self, request: &ApiRequest, response: &Value) -> anyhow::Result<()>;
}

impl<F> PostCommitHandler for F
where
    F: Fn(&ApiRequest, &Value) -> anyhow::Result<()> + Send + Sync,
{
    fn on_commit(&self, request: &ApiRequest, response: &Value) -> anyhow::Result<()> {
        self(request, response)
    }
}

pub struct ResilientPipeline {
    executor: RequestExecutor,
    lifecycle: Arc<SessionLifecycle>,
    retry: RetryPolicy,
    refresh_gate: Mutex<()>,
    post_commit: Vec<Arc<dyn PostCommitHandler>>,
}

impl ResilientPipeline {
    /// The executor and the lifecycle must share one `TokenStore`.
    pub fn new(
        executor: RequestExecutor,
        lifecycle: Arc<SessionLifecycle>,
        retry: RetryPolicy,
    ) -> Self {
        debug_assert!(Arc::ptr_eq(executor.tokens(), lifecycle.tokens()));
        Self {
            executor,
            lifecycle,
            retry,
            refresh_gate: Mutex::new(()),
            post_commit: Vec::new(),
        }
    }

    /// Register a handler to run after successful mutations.
    pub fn with_post_commit(mut self, handler: Arc<dyn PostCommitHandler>) -> Self {
        self.post_commit.push(handler);
        self
    }

    pub fn tokens(&self) -> &Arc<TokenStore> {
        self.lifecycle.tokens()
    }

    /// Single-attempt access, bypassing retry and refresh.
    pub fn executor(&self) -> &RequestExecutor {
        &self.executor
    }

    pub fn lifecycle(&self) -> &Arc<SessionLifecycle> {
        &self.lifecycle
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Send a request and decode the JSON payload into `T`.
    ///
    /// Post-commit handlers have already run on the raw payload by the time
    /// decoding happens.
    pub async fn send<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T, ApiError> {
        let value = self.send_value(request).await?;
        serde_json::from_value(value)
            .map_err(|e| ApiError::Parse(format!("Unexpected response shape: {}", e)))
    }

    /// Send a request and return the raw JSON payload.
    pub async fn send_value(&self, request: ApiRequest) -> Result<Value, ApiError> {
        let issued = self.issue_with_retry(&request).await;

        let outcome = match issued.outcome {
            Err(err) if err.is_auth_expired() && request.authenticated => {
                self.recover(&request, issued.bearer, err).await
            }
            other => other,
        };

        if let Ok(ref value) = outcome {
            if request.authenticated && request.is_mutation() {
                self.run_post_commit(&request, value);
            }
        }
        outcome
    }

    fn should_retry(&self, err: &ApiError) -> bool {
        err.is_transient() || (self.retry.retry_server_errors && matches!(err, ApiError::Server { .. }))
    }

    /// Issue the request, retrying transient failures with linear backoff.
    async fn issue_with_retry(&self, request: &ApiRequest) -> Attempt {
        let mut attempt: u32 = 0;
        loop {
            let Attempt { bearer, outcome } = self.executor.dispatch(request).await;

            match outcome {
                Err(ref err) if self.should_retry(err) && attempt < self.retry.retry_attempts => {
                    attempt += 1;
                    let delay = self.retry.delay_for(attempt);
                    warn!(
                        path = %request.path,
                        attempt = attempt,
                        max_retries = self.retry.retry_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Transient failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                outcome => return Attempt { bearer, outcome },
            }
        }
    }

    /// Handle a 401: refresh once (or reuse a peer's refresh) and reissue once.
    async fn recover(
        &self,
        request: &ApiRequest,
        failed_bearer: Option<String>,
        original: ApiError,
    ) -> Result<Value, ApiError> {
        let gate = self.refresh_gate.lock().await;

        let session = match self.tokens().snapshot() {
            Some(session) => session,
            None => {
                debug!(path = %request.path, "401 with no refresh token, logging out");
                self.lifecycle.logout();
                return Err(original);
            }
        };

        if failed_bearer.as_deref() != Some(session.access_token.as_str()) {
            // Someone refreshed (or signed in) after our attempt went out.
            drop(gate);
            debug!(path = %request.path, "Session changed since 401, reissuing");
            return self.reissue(request).await;
        }

        match self.refresh(&session.refresh_token).await {
            Ok(fresh) => {
                self.lifecycle.establish(fresh);
                drop(gate);
                info!("Access token refreshed");
                self.reissue(request).await
            }
            Err(e) => {
                warn!(error = %e, "Token refresh failed, logging out");
                self.lifecycle.logout();
                Err(original)
            }
        }
    }

    /// One refresh call, straight to the executor: never retried and never
    /// routed back through the pipeline.
    async fn refresh(&self, refresh_token: &str) -> Result<SessionData, ApiError> {
        let request = ApiRequest::post(REFRESH_PATH)
            .json_value(json!({ "refreshToken": refresh_token }))
            .without_auth();
        let value = self.executor.execute(&request).await?;
        serde_json::from_value(value)
            .map_err(|e| ApiError::Parse(format!("Unexpected refresh response: {}", e)))
    }

    /// Send the original request once more with whatever session is current.
    async fn reissue(&self, request: &ApiRequest) -> Result<Value, ApiError> {
        self.executor.execute(request).await
    }

    fn run_post_commit(&self, request: &ApiRequest, response: &Value) {
        for handler in &self.post_commit {
            if let Err(e) = handler.on_commit(request, response) {
                warn!(path = %request.path, error = %e, "Post-commit handler failed");
            }
        }
    }
}
