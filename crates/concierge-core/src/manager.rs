//! The process-wide session manager.
//!
//! Constructed once at startup and shared by reference. It owns the session
//! state, the refresh coordinator and the authenticated executor, and is the
//! only place that performs login and logout.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::api::client::{identity_from_profile, PROFILE_PATH};
use crate::api::{ApiClient, ApiError, ApiResponse, LoginRequest, RequestDescriptor};
use crate::auth::{Credential, CredentialStore, Identity};
use crate::config::Config;
use crate::error::{ExecError, LoginError, RefreshError};
use crate::executor::AuthenticatedExecutor;
use crate::session::{
    RefreshCoordinator, Session, SessionState, SessionTransition, SignOutReason, Subscription,
};

pub struct SessionManager {
    api: ApiClient,
    state: Arc<SessionState>,
    coordinator: Arc<RefreshCoordinator>,
    executor: AuthenticatedExecutor,
}

impl SessionManager {
    /// Build a manager for `config`, restoring any stored session from `store`.
    pub fn new(config: &Config, store: Arc<dyn CredentialStore>) -> Result<Self, ApiError> {
        let api = ApiClient::new(config.base_url.clone(), config.request_timeout())?
            .with_rate_limit_retries(config.rate_limit_retries);
        Ok(Self::with_client(api, store, config.refresh_timeout()))
    }

    /// Build a manager using the credential store named by `config`.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let store = config.open_store()?;
        Ok(Self::new(config, store)?)
    }

    pub fn with_client(
        api: ApiClient,
        store: Arc<dyn CredentialStore>,
        refresh_timeout: Duration,
    ) -> Self {
        let state = Arc::new(SessionState::restore(store));
        let coordinator = Arc::new(RefreshCoordinator::new(
            api.clone(),
            Arc::clone(&state),
            refresh_timeout,
        ));
        let executor =
            AuthenticatedExecutor::new(api.clone(), Arc::clone(&state), Arc::clone(&coordinator));

        Self {
            api,
            state,
            coordinator,
            executor,
        }
    }

    /// Sign in with username and password, replacing any current session.
    pub async fn login(&self, request: LoginRequest) -> Result<Identity, LoginError> {
        if request.username.trim().is_empty() || request.password.is_empty() {
            return Err(LoginError::MissingCredentials);
        }

        let grant = self
            .api
            .authenticate(&request)
            .await
            .map_err(LoginError::from_api)?;

        if grant.is_first_login {
            info!(username = %grant.identity.username, "First login for this account");
        }

        let outcome = self.state.transition(SessionTransition::SignIn {
            credential: grant.credential,
            identity: grant.identity.clone(),
        });
        if outcome.storage_error.is_some() {
            warn!("Signed in, but the session will not survive a restart");
        }

        info!(user_id = grant.identity.user_id, "Signed in");
        Ok(grant.identity)
    }

    /// Sign out. The refresh token is revoked server-side when possible;
    /// a failed revoke never keeps the session alive.
    pub async fn logout(&self) {
        let session = self.state.current();
        if let Some(Credential { refresh_token, .. }) = session.credential {
            if !refresh_token.is_empty() {
                match self.api.revoke(&refresh_token).await {
                    Ok(()) => debug!("Refresh token revoked"),
                    Err(e) => warn!(error = %e, "Failed to revoke refresh token"),
                }
            }
        }

        self.state.transition(SessionTransition::SignOut {
            reason: SignOutReason::UserLogout,
            expected_generation: None,
        });
    }

    pub async fn execute(&self, descriptor: &RequestDescriptor) -> Result<ApiResponse, ExecError> {
        self.executor.execute(descriptor).await
    }

    pub async fn ensure_fresh_credential(&self) -> Result<Credential, RefreshError> {
        self.coordinator.ensure_fresh_credential().await
    }

    /// Look up who the current credential belongs to. Needed after a restart,
    /// when the session is restored without an identity.
    pub async fn refresh_identity(&self) -> Result<Identity, ExecError> {
        let generation = self.state.current().generation;
        let response = self.execute(&RequestDescriptor::get(PROFILE_PATH)).await?;
        let identity = identity_from_profile(&response)?;

        // A profile fetched across a refresh still belongs to this session;
        // a sign-out or new login in the meantime makes it stale.
        let resolved = self.state.transition(SessionTransition::IdentityResolved {
            generation,
            identity: identity.clone(),
        });
        if !resolved.applied {
            debug!("Session changed while fetching profile, identity not recorded");
        }
        Ok(identity)
    }

    pub fn current(&self) -> Session {
        self.state.current()
    }

    pub fn subscribe(&self) -> Subscription {
        self.state.subscribe()
    }

    pub fn is_refreshing(&self) -> bool {
        self.coordinator.is_refreshing()
    }

    /// A handle for fetchers that only need to send requests.
    pub fn executor(&self) -> AuthenticatedExecutor {
        self.executor.clone()
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }
}
