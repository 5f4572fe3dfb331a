use std::sync::{Arc, Mutex};

use keyring::Entry;
use thiserror::Error;
use tracing::{debug, warn};

use super::SessionData;

/// Default keychain service name for the credential bundle
pub const DEFAULT_SERVICE_NAME: &str = "tokenpipe";

/// Default keychain account the bundle is filed under
pub const DEFAULT_ACCOUNT_NAME: &str = "session";

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Secure storage rejected the operation: {0}")]
    Backend(String),

    #[error("Failed to serialize credential bundle: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// A single secret string slot in some secure store.
pub trait SecretStore: Send + Sync {
    /// Read the secret. `Ok(None)` when nothing is stored.
    fn get(&self) -> Result<Option<String>, StorageError>;

    fn set(&self, secret: &str) -> Result<(), StorageError>;

    /// Remove the secret. Removing a missing secret is not an error.
    fn delete(&self) -> Result<(), StorageError>;
}

/// OS keychain slot (Keychain on macOS/iOS, Credential Manager on Windows,
/// kernel keyutils on Linux).
pub struct KeyringSecretStore {
    entry: Entry,
}

impl KeyringSecretStore {
    pub fn new(service: &str, account: &str) -> Result<Self, StorageError> {
        let entry = Entry::new(service, account)
            .map_err(|e| StorageError::Backend(format!("Failed to create keyring entry: {}", e)))?;
        Ok(Self { entry })
    }
}

impl SecretStore for KeyringSecretStore {
    fn get(&self) -> Result<Option<String>, StorageError> {
        match self.entry.get_password() {
            Ok(secret) => Ok(Some(secret)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(StorageError::Backend(format!(
                "Failed to retrieve credential from keychain: {}",
                e
            ))),
        }
    }

    fn set(&self, secret: &str) -> Result<(), StorageError> {
        self.entry
            .set_password(secret)
            .map_err(|e| StorageError::Backend(format!("Failed to store credential in keychain: {}", e)))
    }

    fn delete(&self) -> Result<(), StorageError> {
        match self.entry.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(StorageError::Backend(format!(
                "Failed to delete credential from keychain: {}",
                e
            ))),
        }
    }
}

#[derive(Debug, Default)]
struct MemorySlot {
    secret: Option<String>,
    fail_reads: bool,
    fail_writes: bool,
}

/// Process-local secret slot. Clones share the same slot.
///
/// Used by tests and by headless hosts without a keychain. Reads and writes
/// can be made to fail to exercise storage error handling.
#[derive(Debug, Clone, Default)]
pub struct MemorySecretStore {
    slot: Arc<Mutex<MemorySlot>>,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Put a raw value in the slot, bypassing serialization.
    pub fn put_raw(&self, raw: impl Into<String>) {
        self.lock().secret = Some(raw.into());
    }

    pub fn raw(&self) -> Option<String> {
        self.lock().secret.clone()
    }

    pub fn fail_reads(&self, fail: bool) {
        self.lock().fail_reads = fail;
    }

    pub fn fail_writes(&self, fail: bool) {
        self.lock().fail_writes = fail;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemorySlot> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl SecretStore for MemorySecretStore {
    fn get(&self) -> Result<Option<String>, StorageError> {
        let slot = self.lock();
        if slot.fail_reads {
            return Err(StorageError::Backend("read rejected".to_string()));
        }
        Ok(slot.secret.clone())
    }

    fn set(&self, secret: &str) -> Result<(), StorageError> {
        let mut slot = self.lock();
        if slot.fail_writes {
            return Err(StorageError::Backend("write rejected".to_string()));
        }
        slot.secret = Some(secret.to_string());
        Ok(())
    }

    fn delete(&self) -> Result<(), StorageError> {
        let mut slot = self.lock();
        if slot.fail_writes {
            return Err(StorageError::Backend("delete rejected".to_string()));
        }
        slot.secret = None;
        Ok(())
    }
}

/// Saves, loads and deletes the serialized session bundle in secure storage.
pub struct SecureTokenPersistence {
    store: Box<dyn SecretStore>,
}

impl SecureTokenPersistence {
    pub fn new(store: impl SecretStore + 'static) -> Self {
        Self {
            store: Box::new(store),
        }
    }

    /// Persistence backed by the OS keychain entry `(service, account)`.
    pub fn keyring(service: &str, account: &str) -> Result<Self, StorageError> {
        Ok(Self::new(KeyringSecretStore::new(service, account)?))
    }

    /// Serialize the bundle and overwrite the stored entry
    pub fn save(&self, bundle: &SessionData) -> Result<(), StorageError> {
        let contents = serde_json::to_string(bundle)?;
        self.store.set(&contents)
    }

    /// Load the stored bundle.
    ///
    /// A missing, unreadable or corrupt entry all yield `None`; startup must
    /// never be blocked by storage.
    pub fn load(&self) -> Option<SessionData> {
        let contents = match self.store.get() {
            Ok(Some(contents)) => contents,
            Ok(None) => {
                debug!("No stored credential bundle");
                return None;
            }
            Err(e) => {
                warn!(error = %e, "Failed to read credential bundle");
                return None;
            }
        };

        match serde_json::from_str(&contents) {
            Ok(bundle) => Some(bundle),
            Err(e) => {
                warn!(error = %e, "Stored credential bundle is corrupt, ignoring");
                None
            }
        }
    }

    /// Delete the stored bundle. Idempotent.
    pub fn delete(&self) -> Result<(), StorageError> {
        self.store.delete()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::UserSummary;

    fn bundle() -> SessionData {
        SessionData::new("A1", "R1", UserSummary::new("1", "bob")).stamped()
    }

    #[test]
    fn test_save_then_load_round_trips() {
        let persistence = SecureTokenPersistence::new(MemorySecretStore::new());
        let saved = bundle();
        persistence.save(&saved).unwrap();

        assert_eq!(persistence.load(), Some(saved));
    }

    #[test]
    fn test_load_missing_entry_is_none() {
        let persistence = SecureTokenPersistence::new(MemorySecretStore::new());
        assert_eq!(persistence.load(), None);
    }

    #[test]
    fn test_load_corrupt_entry_is_none() {
        let store = MemorySecretStore::new();
        store.put_raw("{\"accessToken\": \"A1\", \"refresh");
        let persistence = SecureTokenPersistence::new(store);

        assert_eq!(persistence.load(), None);
    }

    #[test]
    fn test_load_wrong_shape_is_none() {
        let store = MemorySecretStore::new();
        store.put_raw(r#"{"accessToken": "A1"}"#);
        let persistence = SecureTokenPersistence::new(store);

        assert_eq!(persistence.load(), None);
    }

    #[test]
    fn test_load_backend_failure_is_none() {
        let store = MemorySecretStore::new();
        store.put_raw(serde_json::to_string(&bundle()).unwrap());
        store.fail_reads(true);
        let persistence = SecureTokenPersistence::new(store);

        assert_eq!(persistence.load(), None);
    }

    #[test]
    fn test_load_bundle_without_issue_time() {
        let store = MemorySecretStore::new();
        store.put_raw(
            r#"{"accessToken":"A1","refreshToken":"R1","user":{"id":"1","username":"bob"}}"#,
        );
        let persistence = SecureTokenPersistence::new(store);

        let loaded = persistence.load().unwrap();
        assert_eq!(loaded.access_token, "A1");
        assert!(loaded.issued_at.is_none());
    }

    #[test]
    fn test_save_rejected_by_store() {
        let store = MemorySecretStore::new();
        store.fail_writes(true);
        let persistence = SecureTokenPersistence::new(store.clone());

        let err = persistence.save(&bundle()).unwrap_err();
        assert!(matches!(err, StorageError::Backend(_)));
        assert!(store.raw().is_none());
    }

    #[test]
    fn test_delete_is_idempotent() {
        let store = MemorySecretStore::new();
        let persistence = SecureTokenPersistence::new(store.clone());
        persistence.save(&bundle()).unwrap();

        persistence.delete().unwrap();
        persistence.delete().unwrap();
        assert!(store.raw().is_none());
    }
}
