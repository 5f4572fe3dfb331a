//! Sign-in, sign-up and sign-out against the backend's `/auth` endpoints.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::auth::{SessionData, UserSummary};

use super::pipeline::ResilientPipeline;
use super::request::ApiRequest;
use super::ApiError;

const SIGNIN_PATH: &str = "/auth/signin";
const SIGNUP_PATH: &str = "/auth/signup";
const LOGOUT_PATH: &str = "/auth/logout";

#[derive(Serialize)]
struct SignInRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
struct SignUpRequest<'a> {
    username: &'a str,
    email: &'a str,
    password: &'a str,
}

/// Auth endpoints client. Shares the pipeline with every other API client.
#[derive(Clone)]
pub struct AuthApi {
    pipeline: Arc<ResilientPipeline>,
}

impl AuthApi {
    pub fn new(pipeline: Arc<ResilientPipeline>) -> Self {
        Self { pipeline }
    }

    fn require(field: &str, value: &str) -> Result<(), ApiError> {
        if value.trim().is_empty() {
            return Err(ApiError::InvalidInput(format!("{} is required", field)));
        }
        Ok(())
    }

    /// Sign in and make the returned session current.
    pub async fn login(&self, username: &str, password: &str) -> Result<UserSummary, ApiError> {
        Self::require("username", username)?;
        Self::require("password", password)?;

        let request = ApiRequest::post(SIGNIN_PATH)
            .json(&SignInRequest { username, password })?
            .without_auth();
        let session: SessionData = self.pipeline.send(request).await?;
        let user = session.user.clone();
        self.pipeline.lifecycle().establish(session);

        info!(user = %user.username, "Login successful");
        Ok(user)
    }

    /// Create an account and make the returned session current.
    pub async fn signup(&self, username: &str, email: &str, password: &str) -> Result<UserSummary, ApiError> {
        Self::require("username", username)?;
        Self::require("email", email)?;
        Self::require("password", password)?;

        let request = ApiRequest::post(SIGNUP_PATH)
            .json(&SignUpRequest {
                username,
                email,
                password,
            })?
            .without_auth();
        let session: SessionData = self.pipeline.send(request).await?;
        let user = session.user.clone();
        self.pipeline.lifecycle().establish(session);

        info!(user = %user.username, "Signup successful");
        Ok(user)
    }

    /// Tell the server we're leaving, then clear the local session whatever
    /// the server said.
    ///
    /// The logout call is a single attempt: a 401 here means the session is
    /// already dead, so it never triggers a refresh.
    pub async fn sign_out(&self) {
        if self.pipeline.tokens().is_authenticated() {
            let request = ApiRequest::post(LOGOUT_PATH);
            if let Err(e) = self.pipeline.executor().execute(&request).await {
                warn!(error = %e, "Server logout failed, clearing local session anyway");
            }
        }
        self.pipeline.lifecycle().logout();
    }
}
