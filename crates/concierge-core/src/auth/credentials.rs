use std::fmt;

use keyring::Entry;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::StorageError;

/// Keychain account under which the credential pair is stored
const ACCOUNT_NAME: &str = "session";

/// An access/refresh token pair. Both values are opaque bearer secrets.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub access_token: String,
    pub refresh_token: String,
}

impl Credential {
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
        }
    }

    pub fn has_refresh_token(&self) -> bool {
        !self.refresh_token.is_empty()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .finish()
    }
}

/// Who the session belongs to. Never persisted: derived from the login
/// response or the profile endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: i64,
    pub username: String,
}

/// At-rest storage for the credential pair.
///
/// Implementations hold no business logic and make no network calls.
/// `save` replaces any previous pair as a whole; `load` after `clear`
/// returns `None`.
pub trait CredentialStore: Send + Sync {
    fn save(&self, credential: &Credential) -> Result<(), StorageError>;

    fn load(&self) -> Result<Option<Credential>, StorageError>;

    fn clear(&self) -> Result<(), StorageError>;
}

/// Credential pair in the OS keychain.
///
/// Both tokens are written as a single JSON secret so one keychain write
/// replaces the pair.
pub struct KeyringStore {
    service: String,
}

impl KeyringStore {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self) -> Result<Entry, StorageError> {
        Ok(Entry::new(&self.service, ACCOUNT_NAME)?)
    }
}

impl CredentialStore for KeyringStore {
    fn save(&self, credential: &Credential) -> Result<(), StorageError> {
        let secret = serde_json::to_string(credential)?;
        self.entry()?.set_password(&secret)?;
        debug!(service = %self.service, "Credential stored in keychain");
        Ok(())
    }

    fn load(&self) -> Result<Option<Credential>, StorageError> {
        match self.entry()?.get_password() {
            Ok(secret) => serde_json::from_str(&secret)
                .map(Some)
                .map_err(|e| StorageError::Corrupt(e.to_string())),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn clear(&self) -> Result<(), StorageError> {
        match self.entry()?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => {
                debug!(service = %self.service, "Credential removed from keychain");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Process-local store, for tests and sessions that should not survive
/// the process.
#[derive(Default)]
pub struct MemoryStore {
    slot: Mutex<Option<Credential>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_credential(credential: Credential) -> Self {
        Self {
            slot: Mutex::new(Some(credential)),
        }
    }
}

impl CredentialStore for MemoryStore {
    fn save(&self, credential: &Credential) -> Result<(), StorageError> {
        *self.slot.lock() = Some(credential.clone());
        Ok(())
    }

    fn load(&self) -> Result<Option<Credential>, StorageError> {
        Ok(self.slot.lock().clone())
    }

    fn clear(&self) -> Result<(), StorageError> {
        self.slot.lock().take();
        Ok(())
    }
}
