//! Session-level error types.
//!
//! Network failures stay as [`ApiError`]; the types here classify what a
//! failure means for the session:
//! - `RefreshError::Transient` never clears credentials
//! - `RefreshError::TokenInvalid` always ends the session
//! - `ExecError::AuthenticationExpired` is the terminal outcome of a request
//! - `StorageError` is logged and never blocks in-memory state

use thiserror::Error;

use crate::api::ApiError;

/// Outcome of a failed refresh attempt. Cloned to every waiter of the
/// attempt, so it carries messages rather than the underlying errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RefreshError {
    #[error("Credential refresh failed temporarily: {0}")]
    Transient(String),

    #[error("Refresh token rejected: {0}")]
    TokenInvalid(String),
}

impl RefreshError {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RefreshError::TokenInvalid(_))
    }

    /// Classify a refresh endpoint failure. Only an explicit rejection of
    /// the token counts as terminal.
    pub fn from_api(err: &ApiError) -> Self {
        match err {
            ApiError::Unauthorized(msg) | ApiError::AccessDenied(msg) | ApiError::BadRequest(msg) => {
                RefreshError::TokenInvalid(msg.clone())
            }
            other => RefreshError::Transient(other.to_string()),
        }
    }
}

#[derive(Error, Debug)]
pub enum ExecError {
    #[error("Not signed in")]
    NotAuthenticated,

    #[error("Authentication expired - sign in again")]
    AuthenticationExpired,

    #[error("Credential refresh unavailable: {0}")]
    RefreshUnavailable(String),

    #[error(transparent)]
    Api(#[from] ApiError),
}

impl ExecError {
    /// Whether the caller may retry the same request later.
    pub fn is_transient(&self) -> bool {
        match self {
            ExecError::RefreshUnavailable(_) => true,
            ExecError::Api(err) => err.is_transient(),
            ExecError::NotAuthenticated | ExecError::AuthenticationExpired => false,
        }
    }
}

#[derive(Error, Debug)]
pub enum LoginError {
    #[error("Invalid username or password: {0}")]
    InvalidCredentials(String),

    #[error("Two-factor code required")]
    TwoFactorRequired,

    #[error("Username and password required")]
    MissingCredentials,

    #[error(transparent)]
    Api(#[from] ApiError),
}

impl LoginError {
    /// Map a login endpoint failure. The backend answers 401 for every
    /// rejection and spells out the 2FA case in the message.
    pub fn from_api(err: ApiError) -> Self {
        match err {
            ApiError::Unauthorized(msg) if msg.contains("2FA required") => {
                LoginError::TwoFactorRequired
            }
            ApiError::Unauthorized(msg) => LoginError::InvalidCredentials(msg),
            other => LoginError::Api(other),
        }
    }
}

/// Credential storage failure. Warning class: the in-memory session keeps
/// working when persistence fails.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Keychain error: {0}")]
    Keyring(#[from] keyring::Error),

    #[error("Credential file error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Stored credential is unreadable: {0}")]
    Corrupt(String),

    #[error("Credential encryption failed: {0}")]
    Crypto(String),

    #[error("Credential serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}
