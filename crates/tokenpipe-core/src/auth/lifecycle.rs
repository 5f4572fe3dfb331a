use std::sync::Arc;

use tracing::{debug, info, warn};

use super::{SecureTokenPersistence, SessionData, TokenStore};

/// Owns the transitions of the session: restore at startup, establish on
/// sign-in or refresh, and logout.
///
/// TokenStore is the source of truth for the running process; storage
/// writes are best-effort and only logged when they fail.
pub struct SessionLifecycle {
    tokens: Arc<TokenStore>,
    persistence: SecureTokenPersistence,
}

impl SessionLifecycle {
    pub fn new(tokens: Arc<TokenStore>, persistence: SecureTokenPersistence) -> Self {
        Self { tokens, persistence }
    }

    pub fn tokens(&self) -> &Arc<TokenStore> {
        &self.tokens
    }

    /// Load the persisted bundle into TokenStore.
    ///
    /// Returns whether a session was restored. Never fails.
    pub fn restore_session(&self) -> bool {
        match self.persistence.load() {
            Some(session) => {
                debug!(
                    user = %session.user.username,
                    age_minutes = ?session.age_minutes(),
                    "Session restored from secure storage"
                );
                self.tokens.set_session(session);
                true
            }
            None => {
                debug!("No session to restore");
                false
            }
        }
    }

    /// Persist a fresh session, then make it current.
    pub fn establish(&self, session: SessionData) {
        let session = session.stamped();
        if let Err(e) = self.persistence.save(&session) {
            warn!(error = %e, "Failed to persist session");
        }
        self.tokens.set_session(session);
    }

    /// Remove the stored bundle and clear the in-memory session. Idempotent.
    pub fn logout(&self) {
        if let Err(e) = self.persistence.delete() {
            warn!(error = %e, "Failed to delete stored session");
        }
        if self.tokens.is_authenticated() {
            info!("Logged out");
        }
        self.tokens.clear_session();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{MemorySecretStore, UserSummary};

    fn lifecycle(store: &MemorySecretStore) -> SessionLifecycle {
        SessionLifecycle::new(
            Arc::new(TokenStore::new()),
            SecureTokenPersistence::new(store.clone()),
        )
    }

    fn session() -> SessionData {
        SessionData::new("A1", "R1", UserSummary::new("1", "bob"))
    }

    #[test]
    fn test_restore_without_bundle() {
        let store = MemorySecretStore::new();
        let lifecycle = lifecycle(&store);

        assert!(!lifecycle.restore_session());
        assert!(!lifecycle.tokens().is_authenticated());
    }

    #[test]
    fn test_restore_loads_saved_session() {
        let store = MemorySecretStore::new();
        lifecycle(&store).establish(session());

        let fresh = lifecycle(&store);
        assert!(fresh.restore_session());
        assert_eq!(fresh.tokens().current_access_token().as_deref(), Some("A1"));
        assert_eq!(fresh.tokens().refresh_token().as_deref(), Some("R1"));
    }

    #[test]
    fn test_restore_corrupt_bundle_degrades_to_logged_out() {
        let store = MemorySecretStore::new();
        store.put_raw("not json");
        let lifecycle = lifecycle(&store);

        assert!(!lifecycle.restore_session());
        assert!(!lifecycle.tokens().is_authenticated());
    }

    #[test]
    fn test_establish_updates_memory_even_when_storage_fails() {
        let store = MemorySecretStore::new();
        store.fail_writes(true);
        let lifecycle = lifecycle(&store);

        lifecycle.establish(session());
        assert_eq!(lifecycle.tokens().current_access_token().as_deref(), Some("A1"));
        assert!(store.raw().is_none());
    }

    #[test]
    fn test_logout_twice_matches_logout_once() {
        let store = MemorySecretStore::new();
        let lifecycle = lifecycle(&store);
        lifecycle.establish(session());

        lifecycle.logout();
        assert!(!lifecycle.tokens().is_authenticated());
        assert!(store.raw().is_none());

        lifecycle.logout();
        assert!(!lifecycle.tokens().is_authenticated());
        assert!(store.raw().is_none());
    }

    #[test]
    fn test_logout_clears_memory_when_delete_fails() {
        let store = MemorySecretStore::new();
        let lifecycle = lifecycle(&store);
        lifecycle.establish(session());
        store.fail_writes(true);

        lifecycle.logout();
        assert!(!lifecycle.tokens().is_authenticated());
    }
}
