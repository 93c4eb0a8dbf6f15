//! Fan-out of notifications to every registered session.

use std::sync::{Arc, PoisonError, RwLock};

use super::frame::Frame;
use super::registry::{SessionId, SessionRegistry};
use super::session::Session;

/// Why a frame could not be handed to a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum SendFailure {
    /// The session is closing or its channel is gone.
    #[error("session channel closed")]
    Closed,
    /// The session's outbound queue is full.
    #[error("session outbound queue full")]
    Full,
}

/// Per-session delivery capability.
///
/// `deliver` must not block: it is called from the watcher thread for every
/// session in turn.
pub trait Recipient: Send + Sync {
    /// Session identifier.
    fn id(&self) -> SessionId;

    /// Hand one frame to the session.
    fn deliver(&self, frame: Frame) -> Result<(), SendFailure>;
}

/// Outcome of one broadcast.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Sessions present in the snapshot.
    pub attempted: usize,
    /// Sessions that accepted the frame.
    pub delivered: usize,
    /// Sessions whose delivery failed.
    pub failed: usize,
}

/// Delivers one frame to every session in a registry snapshot.
///
/// The dispatcher has a gate. Once [`close`](Self::close) returns, every
/// in-flight broadcast has finished and later broadcasts are no-ops.
pub struct NotificationDispatcher<T: ?Sized = Session> {
    registry: Arc<SessionRegistry<T>>,
    open: RwLock<bool>,
}

impl<T: Recipient + ?Sized> NotificationDispatcher<T> {
    /// Create a dispatcher over `registry`.
    #[must_use]
    pub fn new(registry: Arc<SessionRegistry<T>>) -> Self {
        Self {
            registry,
            open: RwLock::new(true),
        }
    }

    /// Deliver `frame` to every session registered right now.
    ///
    /// A failing session never aborts delivery to the others; it is reported
    /// through `on_failure` so the caller can close it.
    pub fn broadcast<F>(&self, frame: &Frame, mut on_failure: F) -> BroadcastReport
    where
        F: FnMut(&T, SendFailure),
    {
        let open = self.open.read().unwrap_or_else(PoisonError::into_inner);
        if !*open {
            return BroadcastReport::default();
        }

        let mut report = BroadcastReport::default();
        self.registry.for_each(|session| {
            report.attempted += 1;
            match session.deliver(frame.clone()) {
                Ok(()) => report.delivered += 1,
                Err(failure) => {
                    report.failed += 1;
                    tracing::warn!(session_id = %session.id(), %failure, "Delivery failed");
                    on_failure(session, failure);
                }
            }
        });
        report
    }

    /// Close the gate, waiting for in-flight broadcasts to finish.
    pub fn close(&self) {
        *self.open.write().unwrap_or_else(PoisonError::into_inner) = false;
    }
}
