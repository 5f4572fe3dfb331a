use std::collections::BTreeMap;
use std::sync::RwLock;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// The signed-in user as returned by the auth endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserSummary {
    pub id: String,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Fields the server sends that we don't model; kept so round-trips are lossless.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl UserSummary {
    pub fn new(id: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            username: username.into(),
            email: None,
            extra: BTreeMap::new(),
        }
    }
}

/// One complete authenticated session.
///
/// This is also the persisted credential bundle: it serializes to
/// `{accessToken, refreshToken, user}` (plus `issuedAt` once stamped).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionData {
    pub access_token: String,
    pub refresh_token: String,
    pub user: UserSummary,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issued_at: Option<DateTime<Utc>>,
}

impl SessionData {
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>, user: UserSummary) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
            user,
            issued_at: None,
        }
    }

    /// Stamp the session with the current time if the server didn't.
    pub fn stamped(mut self) -> Self {
        if self.issued_at.is_none() {
            self.issued_at = Some(Utc::now());
        }
        self
    }

    /// Time since the session was issued, if known.
    pub fn age(&self) -> Option<Duration> {
        self.issued_at.map(|issued| Utc::now() - issued)
    }

    /// Get minutes since issue (for display)
    pub fn age_minutes(&self) -> Option<i64> {
        self.age().map(|age| age.num_minutes().max(0))
    }
}

/// In-memory holder of the current session.
///
/// The access token, refresh token and user are stored as one `Option`, so
/// they are always set together or cleared together.
#[derive(Debug, Default)]
pub struct TokenStore {
    data: RwLock<Option<SessionData>>,
}

impl TokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_session(session: SessionData) -> Self {
        Self {
            data: RwLock::new(Some(session)),
        }
    }

    /// Replace the whole session.
    pub fn set_session(&self, session: SessionData) {
        *self.write() = Some(session);
    }

    /// Drop the session. Safe to call when already empty.
    pub fn clear_session(&self) {
        *self.write() = None;
    }

    /// Get the bearer token if a session exists
    pub fn current_access_token(&self) -> Option<String> {
        self.read().as_ref().map(|d| d.access_token.clone())
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.read().as_ref().map(|d| d.refresh_token.clone())
    }

    pub fn user(&self) -> Option<UserSummary> {
        self.read().as_ref().map(|d| d.user.clone())
    }

    /// Clone of the whole session, read under a single lock.
    pub fn snapshot(&self) -> Option<SessionData> {
        self.read().clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.read().is_some()
    }

    // Poisoning only means a writer panicked mid-assignment of a plain value,
    // so the inner data is still coherent.
    fn read(&self) -> std::sync::RwLockReadGuard<'_, Option<SessionData>> {
        self.data.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Option<SessionData>> {
        self.data.write().unwrap_or_else(|e| e.into_inner())
    }
}
