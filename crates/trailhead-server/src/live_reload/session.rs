//! A single connected client.

use std::sync::atomic::{AtomicU8, Ordering};

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;

use super::dispatcher::{Recipient, SendFailure};
use super::frame::Frame;
use super::registry::SessionId;

/// Liveness of a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    /// Accepted, not yet registered.
    Connecting = 0,
    /// Registered and receiving notifications.
    Open = 1,
    /// Draining; no new frames are accepted.
    Closing = 2,
    /// Released and out of the registry.
    Closed = 3,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Connecting,
            1 => Self::Open,
            2 => Self::Closing,
            _ => Self::Closed,
        }
    }
}

/// Connected client as seen by the broker.
///
/// Frames are queued on a bounded channel whose only consumer is the
/// session's writer task, so the transport always has a single writer.
pub struct Session {
    id: SessionId,
    state: AtomicU8,
    outbound: mpsc::Sender<Frame>,
    cancel: CancellationToken,
    connected_at: DateTime<Utc>,
}

impl Session {
    /// Create a session in the `Connecting` state and the receiving end of
    /// its outbound queue.
    pub(crate) fn new(capacity: usize) -> (Self, mpsc::Receiver<Frame>) {
        let (outbound, outbound_rx) = mpsc::channel(capacity);
        let session = Self {
            id: SessionId::new(),
            state: AtomicU8::new(SessionState::Connecting as u8),
            outbound,
            cancel: CancellationToken::new(),
            connected_at: Utc::now(),
        };
        (session, outbound_rx)
    }

    /// Session identifier.
    #[must_use]
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// When the session was accepted.
    #[must_use]
    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    /// `Connecting -> Open`.
    pub(crate) fn open(&self) -> bool {
        self.transition(SessionState::Connecting, SessionState::Open)
    }

    /// Move to `Closing` and signal the session's tasks.
    ///
    /// Returns `true` only for the call that performed the transition.
    pub(crate) fn begin_close(&self) -> bool {
        let closing = self.transition(SessionState::Open, SessionState::Closing)
            || self.transition(SessionState::Connecting, SessionState::Closing);
        if closing {
            tracing::debug!(session_id = %self.id, "Session closing");
        }
        self.cancel.cancel();
        closing
    }

    /// Final state, after the session left the registry.
    pub(crate) fn mark_closed(&self) {
        self.state
            .store(SessionState::Closed as u8, Ordering::Release);
    }

    pub(crate) fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Queue a reply, waiting for room in the outbound queue.
    pub(crate) async fn reply(&self, frame: Frame) -> Result<(), SendFailure> {
        if self.state() != SessionState::Open {
            return Err(SendFailure::Closed);
        }
        self.outbound
            .send(frame)
            .await
            .map_err(|_| SendFailure::Closed)
    }

    fn transition(&self, from: SessionState, to: SessionState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl Recipient for Session {
    fn id(&self) -> SessionId {
        self.id
    }

    fn deliver(&self, frame: Frame) -> Result<(), SendFailure> {
        if self.state() != SessionState::Open {
            return Err(SendFailure::Closed);
        }
        self.outbound.try_send(frame).map_err(|e| match e {
            TrySendError::Full(_) => SendFailure::Full,
            TrySendError::Closed(_) => SendFailure::Closed,
        })
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("connected_at", &self.connected_at)
            .finish_non_exhaustive()
    }
}
