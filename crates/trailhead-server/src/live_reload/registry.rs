//! Session registry.
//!
//! Id-keyed map of connected sessions. Iteration always works on a
//! point-in-time snapshot: the lock is held only to mutate the map or to copy
//! its values, never while a caller is delivering to a session.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use uuid::Uuid;

use super::dispatcher::Recipient;
use super::session::Session;

/// Unique session identifier, assigned at accept.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Generate a fresh random identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Registry of connected sessions.
pub struct SessionRegistry<T: ?Sized = Session> {
    sessions: RwLock<HashMap<SessionId, Arc<T>>>,
}

impl<T: Recipient + ?Sized> SessionRegistry<T> {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Register a session under its own id.
    pub fn add(&self, session: Arc<T>) -> SessionId {
        let id = session.id();
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, session);
        id
    }

    /// Remove a session. Unknown ids are ignored.
    pub fn remove(&self, id: SessionId) -> Option<Arc<T>> {
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
    }

    /// Look up a session by id.
    #[must_use]
    pub fn get(&self, id: SessionId) -> Option<Arc<T>> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .map(Arc::clone)
    }

    /// Copy the current membership.
    ///
    /// The returned list is unaffected by later `add`/`remove` calls.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Arc<T>> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(Arc::clone)
            .collect()
    }

    /// Apply `f` to every session in a snapshot taken at call time.
    pub fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(&T),
    {
        for session in self.snapshot() {
            f(&session);
        }
    }

    /// Number of registered sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether no session is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every session, returning the ones that were still registered.
    pub fn clear(&self) -> Vec<Arc<T>> {
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, session)| session)
            .collect()
    }
}

impl<T: Recipient + ?Sized> Default for SessionRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}
