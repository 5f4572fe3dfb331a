//! Wiring for one backend: a single token store, persistence, executor and
//! pipeline, shared by every API client built from it.

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::api::{AuthApi, PostCommitHandler, RequestExecutor, ResilientPipeline};
use crate::auth::{SecretStore, SecureTokenPersistence, SessionLifecycle, TokenStore};
use crate::config::Config;

/// Builds a [`SessionClient`].
pub struct SessionClientBuilder {
    config: Config,
    persistence: Option<SecureTokenPersistence>,
    post_commit: Vec<Arc<dyn PostCommitHandler>>,
}

impl SessionClientBuilder {
    /// Keep the session bundle in `store` instead of the OS keychain.
    pub fn secret_store(mut self, store: impl SecretStore + 'static) -> Self {
        self.persistence = Some(SecureTokenPersistence::new(store));
        self
    }

    pub fn post_commit(mut self, handler: Arc<dyn PostCommitHandler>) -> Self {
        self.post_commit.push(handler);
        self
    }

    pub fn build(self) -> Result<SessionClient> {
        self.config.validate()?;

        let persistence = match self.persistence {
            Some(persistence) => persistence,
            None => SecureTokenPersistence::keyring(
                &self.config.keyring_service,
                &self.config.keyring_account,
            )
            .context("Failed to open secure storage")?,
        };

        let tokens = Arc::new(TokenStore::new());
        let lifecycle = Arc::new(SessionLifecycle::new(tokens.clone(), persistence));
        let executor = RequestExecutor::http(&self.config, tokens)
            .context("Failed to create HTTP client")?;

        let pipeline = self
            .post_commit
            .into_iter()
            .fold(
                ResilientPipeline::new(executor, lifecycle, self.config.retry_policy()),
                |pipeline, handler| pipeline.with_post_commit(handler),
            );

        Ok(SessionClient {
            pipeline: Arc::new(pipeline),
        })
    }
}

/// Entry point for apps: restore the session, then hand `pipeline()` to
/// domain API clients.
#[derive(Clone)]
pub struct SessionClient {
    pipeline: Arc<ResilientPipeline>,
}

impl SessionClient {
    pub fn builder(config: Config) -> SessionClientBuilder {
        SessionClientBuilder {
            config,
            persistence: None,
            post_commit: Vec::new(),
        }
    }

    /// Client backed by the OS keychain.
    pub fn new(config: Config) -> Result<Self> {
        Self::builder(config).build()
    }

    pub fn pipeline(&self) -> &Arc<ResilientPipeline> {
        &self.pipeline
    }

    pub fn tokens(&self) -> &Arc<TokenStore> {
        self.pipeline.tokens()
    }

    pub fn auth(&self) -> AuthApi {
        AuthApi::new(self.pipeline.clone())
    }

    /// Load the stored session, if any. See [`SessionLifecycle::restore_session`].
    pub fn restore_session(&self) -> bool {
        self.pipeline.lifecycle().restore_session()
    }

    pub fn logout(&self) {
        self.pipeline.lifecycle().logout();
    }
}
