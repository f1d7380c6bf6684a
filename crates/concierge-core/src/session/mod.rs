//! Session management: the in-memory session, its event channel and the
//! single-flight refresh coordinator.

pub mod events;
pub mod refresh;
pub mod state;

pub use events::{EventChannel, SessionEvent, SignOutReason, Subscription};
pub use refresh::{RefreshCoordinator, RefreshOutcome};
pub use state::{Session, SessionState, SessionStatus, SessionTransition, TransitionOutcome};
