//! Core library for concierge.
//!
//! Concierge owns the authenticated session of a hotel-management client:
//! it stores the access/refresh token pair, keeps one in-memory session as
//! the source of truth, collapses concurrent token refreshes into a single
//! network call, and retries rejected requests once with a fresh credential.
//!
//! The UI and business-entity fetchers only see two things:
//! - [`SessionManager::execute`] to reach the backend
//! - [`SessionManager::subscribe`] to learn about sign-in/sign-out

pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod executor;
pub mod manager;
pub mod session;

pub use api::{ApiClient, ApiError, ApiResponse, LoginRequest, RequestDescriptor};
pub use auth::{
    Credential, CredentialStore, EncryptedFileStore, Identity, KeyringStore, MemoryStore,
};
pub use config::{Config, StoreBackend};
pub use error::{ExecError, LoginError, RefreshError, StorageError};
pub use executor::AuthenticatedExecutor;
pub use manager::SessionManager;
pub use session::{
    RefreshCoordinator, Session, SessionEvent, SessionState, SessionStatus, SessionTransition,
    SignOutReason, Subscription, TransitionOutcome,
};
