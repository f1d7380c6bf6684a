use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

use crate::auth::Identity;
use crate::error::RefreshError;

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignOutReason {
    /// Explicit logout from the UI
    UserLogout,
    /// The refresh token was rejected or missing
    RefreshTokenInvalid(String),
    /// A request was rejected again after a successful refresh
    AuthenticationExpired,
}

/// Session-state transitions observed by the UI and background fetchers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    SignedIn(Identity),
    SignedOut { reason: SignOutReason },
    RefreshFailed(RefreshError),
}

/// Fan-out of session events to any number of subscribers.
///
/// Every subscriber has its own unbounded queue, so publishing never waits
/// on a slow reader and each reader sees every event in publish order.
#[derive(Default)]
pub struct EventChannel {
    subscribers: Mutex<Vec<mpsc::UnboundedSender<SessionEvent>>>,
}

impl EventChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().push(tx);
        Subscription { rx }
    }

    /// Deliver an event to all live subscribers, dropping the ones whose
    /// receiver has gone away.
    pub fn publish(&self, event: SessionEvent) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
        debug!(?event, subscribers = subscribers.len(), "Session event published");
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

/// A stream of [`SessionEvent`]s for one observer.
pub struct Subscription {
    rx: mpsc::UnboundedReceiver<SessionEvent>,
}

impl Subscription {
    /// Wait for the next event. Returns `None` once the session manager
    /// has been dropped.
    pub async fn recv(&mut self) -> Option<SessionEvent> {
        self.rx.recv().await
    }

    /// Take the next event if one is already queued.
    pub fn try_recv(&mut self) -> Option<SessionEvent> {
        self.rx.try_recv().ok()
    }
}

impl Stream for Subscription {
    type Item = SessionEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}
