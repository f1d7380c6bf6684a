//! Passphrase-encrypted credential file for platforms without a keychain.
//!
//! File layout: `CCS1 | salt (16) | nonce (12) | ciphertext`. The key is
//! derived from the passphrase with Argon2 and the JSON credential pair is
//! sealed with ChaCha20-Poly1305. Every save uses a fresh nonce and replaces
//! the file through a rename, so readers see either the old pair or the new
//! one.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use argon2::Argon2;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use parking_lot::Mutex;
use rand::rngs::OsRng;
use rand::RngCore;
use tracing::{debug, warn};

use super::credentials::{Credential, CredentialStore};
use crate::error::StorageError;

const MAGIC: &[u8; 4] = b"CCS1";
const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;
const HEADER_LEN: usize = MAGIC.len() + SALT_LEN + NONCE_LEN;

pub struct EncryptedFileStore {
    path: PathBuf,
    salt: [u8; SALT_LEN],
    cipher: ChaCha20Poly1305,
    // Serializes writers so two saves never race on the temp file
    write_lock: Mutex<()>,
}

impl EncryptedFileStore {
    /// Open (or prepare to create) the credential file at `path`.
    ///
    /// An existing file keeps its salt so the same passphrase can read it
    /// back; otherwise a new random salt is generated.
    pub fn open(path: impl Into<PathBuf>, passphrase: &str) -> Result<Self, StorageError> {
        let path = path.into();
        if passphrase.is_empty() {
            return Err(StorageError::Crypto("passphrase must not be empty".to_string()));
        }

        let salt = match fs::read(&path) {
            Ok(bytes) if bytes.len() >= HEADER_LEN && &bytes[..MAGIC.len()] == MAGIC => {
                let mut salt = [0u8; SALT_LEN];
                salt.copy_from_slice(&bytes[MAGIC.len()..MAGIC.len() + SALT_LEN]);
                salt
            }
            Ok(_) => {
                warn!(path = %path.display(), "Unrecognized credential file, it will be replaced on next save");
                Self::random_salt()
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Self::random_salt(),
            Err(e) => return Err(e.into()),
        };

        let key = Self::derive_key(passphrase, &salt)?;
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&key));

        Ok(Self {
            path,
            salt,
            cipher,
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn random_salt() -> [u8; SALT_LEN] {
        let mut salt = [0u8; SALT_LEN];
        OsRng.fill_bytes(&mut salt);
        salt
    }

    fn derive_key(passphrase: &str, salt: &[u8]) -> Result<[u8; KEY_LEN], StorageError> {
        let mut key = [0u8; KEY_LEN];
        Argon2::default()
            .hash_password_into(passphrase.as_bytes(), salt, &mut key)
            .map_err(|e| StorageError::Crypto(e.to_string()))?;
        Ok(key)
    }

    fn write_atomic(&self, contents: &[u8]) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp_path = self.path.with_extension("tmp");

        let mut options = OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        let mut file = options.open(&tmp_path)?;
        file.write_all(contents)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}

impl CredentialStore for EncryptedFileStore {
    fn save(&self, credential: &Credential) -> Result<(), StorageError> {
        let plaintext = serde_json::to_vec(credential)?;

        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);

        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext.as_slice())
            .map_err(|_| StorageError::Crypto("failed to seal credential".to_string()))?;

        let mut contents = Vec::with_capacity(HEADER_LEN + ciphertext.len());
        contents.extend_from_slice(MAGIC);
        contents.extend_from_slice(&self.salt);
        contents.extend_from_slice(&nonce);
        contents.extend_from_slice(&ciphertext);

        let _guard = self.write_lock.lock();
        self.write_atomic(&contents)?;
        debug!(path = %self.path.display(), "Credential file written");
        Ok(())
    }

    fn load(&self) -> Result<Option<Credential>, StorageError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        if bytes.len() < HEADER_LEN || &bytes[..MAGIC.len()] != MAGIC {
            return Err(StorageError::Corrupt("unrecognized file header".to_string()));
        }

        let (salt, rest) = bytes[MAGIC.len()..].split_at(SALT_LEN);
        if salt != self.salt {
            return Err(StorageError::Corrupt(
                "file was written with a different key".to_string(),
            ));
        }
        let (nonce, ciphertext) = rest.split_at(NONCE_LEN);

        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| StorageError::Corrupt("wrong passphrase or tampered file".to_string()))?;

        serde_json::from_slice(&plaintext)
            .map(Some)
            .map_err(|e| StorageError::Corrupt(e.to_string()))
    }

    fn clear(&self) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock();
        match fs::remove_file(&self.path) {
            Ok(()) => {
                debug!(path = %self.path.display(), "Credential file removed");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
