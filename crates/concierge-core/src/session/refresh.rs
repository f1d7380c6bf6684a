//! Single-flight credential refresh.
//!
//! The first caller that needs a refresh registers an attempt and spawns the
//! task that talks to the refresh endpoint; everyone arriving while it runs
//! subscribes to the same completion signal. The attempt record is removed
//! when the refresh resolves, right before its outcome is published, so at
//! most one refresh request is in flight at any time.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::events::SignOutReason;
use super::state::{SessionState, SessionStatus, SessionTransition};
use crate::api::ApiClient;
use crate::auth::Credential;
use crate::error::RefreshError;

pub type RefreshOutcome = Result<Credential, RefreshError>;

/// Message used when there is nothing to refresh with
const NO_REFRESH_TOKEN: &str = "no refresh token stored";

struct InFlight {
    id: u64,
    rx: watch::Receiver<Option<RefreshOutcome>>,
}

enum Joined {
    Ready(Credential),
    Waiting(watch::Receiver<Option<RefreshOutcome>>),
}

pub struct RefreshCoordinator {
    api: ApiClient,
    state: Arc<SessionState>,
    refresh_timeout: Duration,
    in_flight: Mutex<Option<InFlight>>,
    next_attempt: AtomicU64,
}

/// Removes the attempt record when the owning task ends, including when it
/// is cancelled or panics.
struct Registration<'a> {
    coordinator: &'a RefreshCoordinator,
    id: u64,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        let mut slot = self.coordinator.in_flight.lock();
        if slot.as_ref().is_some_and(|attempt| attempt.id == self.id) {
            *slot = None;
        }
    }
}

impl RefreshCoordinator {
    pub fn new(api: ApiClient, state: Arc<SessionState>, refresh_timeout: Duration) -> Self {
        Self {
            api,
            state,
            refresh_timeout,
            in_flight: Mutex::new(None),
            next_attempt: AtomicU64::new(1),
        }
    }

    /// Obtain a freshly rotated credential, performing the refresh or
    /// joining the one already running.
    pub async fn ensure_fresh_credential(self: &Arc<Self>) -> RefreshOutcome {
        match self.join_or_start(None) {
            Joined::Ready(credential) => Ok(credential),
            Joined::Waiting(rx) => Self::await_outcome(rx).await,
        }
    }

    /// Like [`ensure_fresh_credential`](Self::ensure_fresh_credential), for a
    /// caller whose `rejected_access_token` was refused by the server. If the
    /// session already moved on to a different token, that token is returned
    /// without another refresh.
    pub async fn ensure_fresh_credential_since(
        self: &Arc<Self>,
        rejected_access_token: &str,
    ) -> RefreshOutcome {
        match self.join_or_start(Some(rejected_access_token)) {
            Joined::Ready(credential) => Ok(credential),
            Joined::Waiting(rx) => Self::await_outcome(rx).await,
        }
    }

    /// Whether a refresh is currently running.
    pub fn is_refreshing(&self) -> bool {
        self.in_flight.lock().is_some()
    }

    fn join_or_start(self: &Arc<Self>, rejected_access_token: Option<&str>) -> Joined {
        let mut slot = self.in_flight.lock();

        if let Some(attempt) = slot.as_ref() {
            debug!(attempt = attempt.id, "Joining in-flight refresh");
            return Joined::Waiting(attempt.rx.clone());
        }

        // With no attempt registered, any completed refresh is already
        // reflected in the session.
        if let Some(rejected) = rejected_access_token {
            let session = self.state.current();
            if let (SessionStatus::SignedIn, Some(credential)) = (session.status, session.credential)
            {
                if credential.access_token != rejected {
                    debug!("Credential already rotated, skipping refresh");
                    return Joined::Ready(credential);
                }
            }
        }

        let id = self.next_attempt.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = watch::channel(None);
        *slot = Some(InFlight { id, rx: rx.clone() });
        drop(slot);

        debug!(attempt = id, "Starting refresh");
        let coordinator = Arc::clone(self);
        tokio::spawn(async move {
            coordinator.run_attempt(id, tx).await;
        });

        Joined::Waiting(rx)
    }

    async fn run_attempt(self: Arc<Self>, id: u64, tx: watch::Sender<Option<RefreshOutcome>>) {
        let registration = Registration {
            coordinator: &*self,
            id,
        };
        let outcome = self.perform_refresh().await;

        // Unregister first so a woken waiter never observes a finished
        // attempt as still running.
        drop(registration);
        tx.send_replace(Some(outcome));
    }

    async fn await_outcome(mut rx: watch::Receiver<Option<RefreshOutcome>>) -> RefreshOutcome {
        match rx.wait_for(|outcome| outcome.is_some()).await {
            Ok(outcome) => (*outcome)
                .clone()
                .unwrap_or_else(|| Err(RefreshError::Transient("refresh produced no outcome".to_string()))),
            // The owning task went away without publishing
            Err(_) => Err(RefreshError::Transient("refresh attempt was abandoned".to_string())),
        }
    }

    async fn perform_refresh(&self) -> RefreshOutcome {
        let begun = self.state.transition(SessionTransition::BeginRefresh);
        let generation = begun.session.generation;

        let credential = match begun.session.credential {
            Some(credential) if begun.applied && credential.has_refresh_token() => credential,
            _ => return self.reject(generation, NO_REFRESH_TOKEN.to_string()),
        };

        info!(timeout_secs = self.refresh_timeout.as_secs(), "Refreshing access token");
        let result = match tokio::time::timeout(
            self.refresh_timeout,
            self.api.refresh(&credential.refresh_token),
        )
        .await
        {
            Ok(Ok(rotated)) => Ok(rotated),
            Ok(Err(e)) => Err(RefreshError::from_api(&e)),
            Err(_) => Err(RefreshError::Transient(format!(
                "refresh timed out after {}s",
                self.refresh_timeout.as_secs()
            ))),
        };

        match result {
            Ok(rotated) => self.commit(generation, rotated),
            Err(RefreshError::TokenInvalid(msg)) => self.reject(generation, msg),
            Err(transient) => {
                warn!(error = %transient, "Refresh failed, keeping current credential");
                self.state.transition(SessionTransition::RefreshAborted {
                    generation,
                    reason: transient.clone(),
                });
                Err(transient)
            }
        }
    }

    fn commit(&self, generation: u64, rotated: Credential) -> RefreshOutcome {
        let outcome = self.state.transition(SessionTransition::RefreshSucceeded {
            generation,
            credential: rotated.clone(),
        });

        if outcome.applied {
            info!("Access token refreshed");
            return Ok(rotated);
        }

        // The session was replaced while the refresh was running. A newer
        // sign-in wins; otherwise the session is gone.
        match outcome.session.credential {
            Some(current) if outcome.session.status == SessionStatus::SignedIn => {
                debug!("Session replaced during refresh, using the newer credential");
                Ok(current)
            }
            _ => {
                warn!("Session ended during refresh, discarding rotated credential");
                Err(RefreshError::TokenInvalid(
                    "session ended during refresh".to_string(),
                ))
            }
        }
    }

    fn reject(&self, generation: u64, msg: String) -> RefreshOutcome {
        warn!(reason = %msg, "Refresh token rejected, signing out");
        self.state.transition(SessionTransition::SignOut {
            reason: SignOutReason::RefreshTokenInvalid(msg.clone()),
            expected_generation: Some(generation),
        });
        Err(RefreshError::TokenInvalid(msg))
    }
}
