//! Client configuration management.
//!
//! This module handles loading the client configuration: the
//! backend base URL, the retry policy, the per-call timeout, and where the
//! session bundle lives in the keychain.
//!
//! Configuration is stored at `~/.config/tokenpipe/config.json`, and a few
//! fields can be overridden from the environment.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::auth::credentials::{DEFAULT_ACCOUNT_NAME, DEFAULT_SERVICE_NAME};

/// Application name used for config directory paths
const APP_NAME: &str = "tokenpipe";

/// Config file name
const CONFIG_FILE: &str = "config.json";

pub const ENV_BASE_URL: &str = "TOKENPIPE_BASE_URL";
pub const ENV_RETRY_ATTEMPTS: &str = "TOKENPIPE_RETRY_ATTEMPTS";
pub const ENV_RETRY_DELAY_MS: &str = "TOKENPIPE_RETRY_DELAY_MS";

/// HTTP request timeout in milliseconds.
/// 30s allows for slow mobile links while failing fast enough for good UX.
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;

const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
const DEFAULT_RETRY_DELAY_MS: u64 = 1000;

/// How transient failures are retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub retry_attempts: u32,
    pub retry_delay_ms: u64,
    /// Also retry 5xx responses.
    pub retry_server_errors: bool,
}

impl RetryPolicy {
    pub fn new(retry_attempts: u32, retry_delay_ms: u64) -> Self {
        Self {
            retry_attempts,
            retry_delay_ms,
            retry_server_errors: false,
        }
    }

    /// Wait before retry number `attempt` (1-based). Linear backoff.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.retry_delay_ms.saturating_mul(u64::from(attempt)))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_RETRY_ATTEMPTS, DEFAULT_RETRY_DELAY_MS)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub base_url: String,
    pub retry_attempts: u32,
    pub retry_delay_ms: u64,
    pub request_timeout_ms: u64,
    pub retry_server_errors: bool,
    pub keyring_service: String,
    pub keyring_account: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            retry_server_errors: false,
            keyring_service: DEFAULT_SERVICE_NAME.to_string(),
            keyring_account: DEFAULT_ACCOUNT_NAME.to_string(),
        }
    }
}

impl Config {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    /// Load from the default config file, then apply environment overrides.
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        let mut config = Self::load_from(&path)?;
        config.apply_env()?;
        Ok(config)
    }

    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse config file {}", path.display()))
        } else {
            Ok(Self::default())
        }
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Apply `TOKENPIPE_*` overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(url) = lookup(ENV_BASE_URL) {
            self.base_url = url;
        }
        if let Some(attempts) = lookup(ENV_RETRY_ATTEMPTS) {
            self.retry_attempts = attempts
                .trim()
                .parse()
                .with_context(|| format!("{} must be a non-negative integer", ENV_RETRY_ATTEMPTS))?;
        }
        if let Some(delay) = lookup(ENV_RETRY_DELAY_MS) {
            self.retry_delay_ms = delay
                .trim()
                .parse()
                .with_context(|| format!("{} must be a non-negative integer", ENV_RETRY_DELAY_MS))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let url = self.base_url.trim();
        if url.is_empty() {
            anyhow::bail!("base_url is not set (config file or {})", ENV_BASE_URL);
        }
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            anyhow::bail!("base_url must start with http:// or https://, got {}", url);
        }
        if self.request_timeout_ms == 0 {
            anyhow::bail!("request_timeout_ms must be greater than zero");
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            retry_attempts: self.retry_attempts,
            retry_delay_ms: self.retry_delay_ms,
            retry_server_errors: self.retry_server_errors,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}
