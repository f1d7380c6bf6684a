//! Application configuration management.
//!
//! This module handles loading and saving the client configuration: backend
//! URL, where credentials are stored, and network timeouts.
//!
//! Configuration is stored at `~/.config/concierge/config.json`. A few
//! values can be overridden from the environment (see [`Config::apply_env`]).

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::api::client::DEFAULT_RATE_LIMIT_RETRIES;
use crate::auth::{CredentialStore, EncryptedFileStore, KeyringStore};

/// Application name used for config/data directory paths
const APP_NAME: &str = "concierge";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Encrypted credential file name, used by the file store backend
const CREDENTIAL_FILE: &str = "credentials.bin";

/// Keychain service identifier
const DEFAULT_SERVICE_NAME: &str = "concierge-session";

const DEFAULT_BASE_URL: &str = "http://localhost:3030";

/// HTTP request timeout in seconds.
/// 30s allows for slow API responses while failing fast enough for good UX.
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Upper bound on a single refresh call. Waiters are released as a
/// transient failure when it elapses.
const DEFAULT_REFRESH_TIMEOUT_SECS: u64 = 15;

pub const ENV_BASE_URL: &str = "CONCIERGE_BASE_URL";
pub const ENV_STORE: &str = "CONCIERGE_STORE";
pub const ENV_PASSPHRASE: &str = "CONCIERGE_PASSPHRASE";

/// Where the credential pair lives at rest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// OS keychain
    #[default]
    Keyring,
    /// Passphrase-encrypted file
    File,
}

impl FromStr for StoreBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "keyring" | "keychain" => Ok(StoreBackend::Keyring),
            "file" => Ok(StoreBackend::File),
            other => Err(anyhow::anyhow!("Unknown credential store: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub base_url: String,
    pub service_name: String,
    pub store: StoreBackend,
    pub request_timeout_secs: u64,
    pub refresh_timeout_secs: u64,
    pub rate_limit_retries: u32,
    pub last_username: Option<String>,
    pub credential_file: Option<PathBuf>,
    pub log_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            service_name: DEFAULT_SERVICE_NAME.to_string(),
            store: StoreBackend::default(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            refresh_timeout_secs: DEFAULT_REFRESH_TIMEOUT_SECS,
            rate_limit_retries: DEFAULT_RATE_LIMIT_RETRIES,
            last_username: None,
            credential_file: None,
            log_dir: None,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse config file {}", path.display()))
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Apply `CONCIERGE_BASE_URL` and `CONCIERGE_STORE` overrides
    pub fn apply_env(&mut self) -> Result<()> {
        if let Ok(url) = std::env::var(ENV_BASE_URL) {
            if !url.is_empty() {
                self.base_url = url;
            }
        }
        if let Ok(store) = std::env::var(ENV_STORE) {
            self.store = store.parse()?;
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn refresh_timeout(&self) -> Duration {
        Duration::from_secs(self.refresh_timeout_secs)
    }

    pub fn credential_path(&self) -> Result<PathBuf> {
        if let Some(ref path) = self.credential_file {
            return Ok(path.clone());
        }
        let data_dir = dirs::data_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find data directory"))?;
        Ok(data_dir.join(APP_NAME).join(CREDENTIAL_FILE))
    }

    /// Build the configured credential store. The file backend reads its
    /// passphrase from `CONCIERGE_PASSPHRASE`.
    pub fn open_store(&self) -> Result<Arc<dyn CredentialStore>> {
        match self.store {
            StoreBackend::Keyring => Ok(Arc::new(KeyringStore::new(&self.service_name))),
            StoreBackend::File => {
                let passphrase = std::env::var(ENV_PASSPHRASE).with_context(|| {
                    format!("{} must be set to use the file credential store", ENV_PASSPHRASE)
                })?;
                let path = self.credential_path()?;
                let store = EncryptedFileStore::open(&path, &passphrase)
                    .with_context(|| format!("Failed to open credential file {}", path.display()))?;
                Ok(Arc::new(store))
            }
        }
    }
}
