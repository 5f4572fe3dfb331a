//! Authentication module for managing the user session and its storage.
//!
//! This module provides:
//! - `TokenStore`: In-memory holder of the current session
//! - `SecureTokenPersistence`: Credential bundle storage via the OS keyring
//! - `SessionLifecycle`: Restore at startup, establish, and logout
//!
//! A session is the access token, refresh token and user together; there is
//! never a partially populated session.

pub mod credentials;
pub mod lifecycle;
pub mod session;

pub use credentials::{
    KeyringSecretStore, MemorySecretStore, SecretStore, SecureTokenPersistence, StorageError,
};
pub use lifecycle::SessionLifecycle;
pub use session::{SessionData, TokenStore, UserSummary};
