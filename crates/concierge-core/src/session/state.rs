use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::events::{EventChannel, SessionEvent, SignOutReason, Subscription};
use crate::auth::{Credential, CredentialStore, Identity};
use crate::error::{RefreshError, StorageError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionStatus {
    SignedOut,
    SignedIn,
    Refreshing,
}

/// Snapshot of the process-wide session.
///
/// `credential` is present exactly when `status` is `SignedIn` or
/// `Refreshing`. `generation` changes on every sign-in and sign-out, so a
/// result computed against an older session can be recognized as stale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub status: SessionStatus,
    pub credential: Option<Credential>,
    pub identity: Option<Identity>,
    pub generation: u64,
}

impl Session {
    fn signed_out(generation: u64) -> Self {
        Self {
            status: SessionStatus::SignedOut,
            credential: None,
            identity: None,
            generation,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.status != SessionStatus::SignedOut
    }

    pub fn access_token(&self) -> Option<&str> {
        self.credential.as_ref().map(|c| c.access_token.as_str())
    }
}

/// A requested state change. Changes carrying a `generation` only apply
/// while the session is still the one they were computed against.
#[derive(Debug, Clone)]
pub enum SessionTransition {
    SignIn {
        credential: Credential,
        identity: Identity,
    },
    BeginRefresh,
    RefreshSucceeded {
        generation: u64,
        credential: Credential,
    },
    RefreshAborted {
        generation: u64,
        reason: RefreshError,
    },
    IdentityResolved {
        generation: u64,
        identity: Identity,
    },
    SignOut {
        reason: SignOutReason,
        expected_generation: Option<u64>,
    },
}

/// Result of [`SessionState::transition`].
#[derive(Debug)]
pub struct TransitionOutcome {
    /// The session after the transition (unchanged if not applied)
    pub session: Session,
    pub applied: bool,
    /// Persistence failure; the in-memory change still happened
    pub storage_error: Option<StorageError>,
}

/// Store work left over once the in-memory change is made
enum StoreWrite {
    Save(Credential),
    Clear,
}

/// The single, synchronized owner of the session.
///
/// Every read and write of the session goes through one mutex, which is
/// never held during store I/O. A transition that touches the credential
/// store takes `store_order` before releasing the session lock and writes
/// after, so store writes happen in the same order as state changes while
/// `current()` never waits on the store.
pub struct SessionState {
    session: Mutex<Session>,
    store_order: Mutex<()>,
    store: Arc<dyn CredentialStore>,
    events: EventChannel,
}

impl SessionState {
    /// Start signed out.
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        Self {
            session: Mutex::new(Session::signed_out(0)),
            store_order: Mutex::new(()),
            store,
            events: EventChannel::new(),
        }
    }

    /// Seed the session from the credential store without any network I/O.
    /// A stored pair yields `SignedIn`; `Refreshing` is never restored.
    pub fn restore(store: Arc<dyn CredentialStore>) -> Self {
        let session = match store.load() {
            Ok(Some(credential)) => {
                info!("Restored session from credential store");
                Session {
                    status: SessionStatus::SignedIn,
                    credential: Some(credential),
                    identity: None,
                    generation: 1,
                }
            }
            Ok(None) => {
                debug!("No stored credential found");
                Session::signed_out(0)
            }
            Err(e) => {
                warn!(error = %e, "Failed to load stored credential, starting signed out");
                Session::signed_out(0)
            }
        };

        Self {
            session: Mutex::new(session),
            store_order: Mutex::new(()),
            store,
            events: EventChannel::new(),
        }
    }

    pub fn current(&self) -> Session {
        self.session.lock().clone()
    }

    pub fn subscribe(&self) -> Subscription {
        self.events.subscribe()
    }

    pub fn transition(&self, change: SessionTransition) -> TransitionOutcome {
        let mut session = self.session.lock();
        let mut write = None;

        let applied = match change {
            SessionTransition::SignIn {
                credential,
                identity,
            } => {
                session.generation += 1;
                session.status = SessionStatus::SignedIn;
                session.credential = Some(credential.clone());
                session.identity = Some(identity.clone());
                write = Some(StoreWrite::Save(credential));
                self.events.publish(SessionEvent::SignedIn(identity));
                true
            }

            SessionTransition::BeginRefresh => match session.status {
                SessionStatus::SignedOut => false,
                SessionStatus::SignedIn | SessionStatus::Refreshing => {
                    session.status = SessionStatus::Refreshing;
                    true
                }
            },

            SessionTransition::RefreshSucceeded {
                generation,
                credential,
            } => {
                if session.generation == generation && session.is_authenticated() {
                    session.status = SessionStatus::SignedIn;
                    session.credential = Some(credential.clone());
                    write = Some(StoreWrite::Save(credential));
                    true
                } else {
                    false
                }
            }

            SessionTransition::RefreshAborted { generation, reason } => {
                if session.generation == generation && session.status == SessionStatus::Refreshing {
                    session.status = SessionStatus::SignedIn;
                    self.events.publish(SessionEvent::RefreshFailed(reason));
                    true
                } else {
                    false
                }
            }

            SessionTransition::IdentityResolved {
                generation,
                identity,
            } => {
                if session.generation == generation && session.is_authenticated() {
                    // Only a newly learned identity is announced
                    if session.identity.as_ref() != Some(&identity) {
                        session.identity = Some(identity.clone());
                        self.events.publish(SessionEvent::SignedIn(identity));
                    }
                    true
                } else {
                    false
                }
            }

            SessionTransition::SignOut {
                reason,
                expected_generation,
            } => {
                if expected_generation.is_some_and(|g| g != session.generation) {
                    false
                } else {
                    if session.is_authenticated() {
                        info!(?reason, "Signing out");
                        let next = session.generation + 1;
                        *session = Session::signed_out(next);
                    }
                    write = Some(StoreWrite::Clear);
                    if let SignOutReason::RefreshTokenInvalid(msg) = &reason {
                        self.events
                            .publish(SessionEvent::RefreshFailed(RefreshError::TokenInvalid(
                                msg.clone(),
                            )));
                    }
                    self.events.publish(SessionEvent::SignedOut { reason });
                    true
                }
            }
        };

        let snapshot = session.clone();
        let storage_error = match write {
            Some(write) => {
                let _order = self.store_order.lock();
                drop(session);
                match write {
                    StoreWrite::Save(credential) => self.persist(&credential),
                    StoreWrite::Clear => self.wipe(),
                }
            }
            None => None,
        };

        TransitionOutcome {
            session: snapshot,
            applied,
            storage_error,
        }
    }

    fn persist(&self, credential: &Credential) -> Option<StorageError> {
        match self.store.save(credential) {
            Ok(()) => None,
            Err(e) => {
                warn!(error = %e, "Failed to persist credential, continuing in memory");
                Some(e)
            }
        }
    }

    fn wipe(&self) -> Option<StorageError> {
        match self.store.clear() {
            Ok(()) => None,
            Err(e) => {
                warn!(error = %e, "Failed to clear stored credential");
                Some(e)
            }
        }
    }
}
