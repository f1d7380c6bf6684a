//! Authentication module for credentials and their at-rest storage.
//!
//! This module provides:
//! - `Credential` / `Identity`: the token pair and who it belongs to
//! - `CredentialStore`: storage contract with keychain, encrypted file and
//!   in-memory implementations
//!
//! Only the two tokens are ever persisted.

pub mod credentials;
pub mod encrypted;

pub use credentials::{Credential, CredentialStore, Identity, KeyringStore, MemoryStore};
pub use encrypted::EncryptedFileStore;
