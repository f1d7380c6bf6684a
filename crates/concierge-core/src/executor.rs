//! Authenticated request execution.
//!
//! The executor is the only path from business-entity fetchers to the
//! network. It attaches the current access token, and when the server answers
//! 401 it asks the refresh coordinator for a new credential and resends the
//! request once. A second 401 ends the session.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::api::{ApiClient, ApiError, ApiResponse, RequestDescriptor};
use crate::error::{ExecError, RefreshError};
use crate::session::{RefreshCoordinator, SessionState, SessionTransition, SignOutReason};

/// Retries allowed after an authorization failure, per logical request.
const MAX_AUTH_RETRIES: u32 = 1;

/// Cheap to clone; hand a copy to every fetcher that needs the network.
#[derive(Clone)]
pub struct AuthenticatedExecutor {
    api: ApiClient,
    state: Arc<SessionState>,
    coordinator: Arc<RefreshCoordinator>,
}

impl AuthenticatedExecutor {
    pub fn new(
        api: ApiClient,
        state: Arc<SessionState>,
        coordinator: Arc<RefreshCoordinator>,
    ) -> Self {
        Self {
            api,
            state,
            coordinator,
        }
    }

    pub async fn execute(&self, descriptor: &RequestDescriptor) -> Result<ApiResponse, ExecError> {
        if !descriptor.requires_auth {
            return Ok(self.api.send(descriptor, None).await?);
        }

        let session = self.state.current();
        let generation = session.generation;
        let mut credential = session.credential.ok_or(ExecError::NotAuthenticated)?;
        let mut retries = 0;

        loop {
            match self.api.send(descriptor, Some(&credential.access_token)).await {
                Err(ApiError::Unauthorized(msg)) => {
                    if retries >= MAX_AUTH_RETRIES {
                        warn!(path = %descriptor.target, reason = %msg, "Request rejected after refresh, signing out");
                        self.state.transition(SessionTransition::SignOut {
                            reason: SignOutReason::AuthenticationExpired,
                            expected_generation: Some(generation),
                        });
                        return Err(ExecError::AuthenticationExpired);
                    }
                    retries += 1;

                    debug!(path = %descriptor.target, "Access token rejected, refreshing");
                    credential = match self
                        .coordinator
                        .ensure_fresh_credential_since(&credential.access_token)
                        .await
                    {
                        Ok(fresh) => fresh,
                        // The coordinator has already signed the session out
                        Err(RefreshError::TokenInvalid(_)) => {
                            return Err(ExecError::AuthenticationExpired)
                        }
                        Err(RefreshError::Transient(reason)) => {
                            return Err(ExecError::RefreshUnavailable(reason))
                        }
                    };
                }
                other => return other.map_err(ExecError::from),
            }
        }
    }
}
