//! Per-message controller.
//!
//! Every text frame a client sends is handed to a [`Controller`]; any reply
//! is written back on the same session.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;

use super::registry::SessionId;
use super::session::Session;

/// What a controller knows about the session a message came from.
#[derive(Clone, Debug)]
pub struct SessionContext {
    id: SessionId,
    connected_at: DateTime<Utc>,
}

impl SessionContext {
    /// Build a context for a session.
    #[must_use]
    pub fn new(id: SessionId, connected_at: DateTime<Utc>) -> Self {
        Self { id, connected_at }
    }

    /// Originating session.
    #[must_use]
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// When the session was accepted.
    #[must_use]
    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }
}

impl From<&Session> for SessionContext {
    fn from(session: &Session) -> Self {
        Self::new(session.id(), session.connected_at())
    }
}

/// Handles inbound client messages.
#[async_trait]
pub trait Controller: Send + Sync {
    /// Handle one text message, optionally returning a reply.
    async fn handle(&self, session: &SessionContext, message: &str) -> Option<String>;
}

/// Message envelope sent by the browser client.
#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
}

/// Controller for the `{"type": ..., "data": ...}` envelope.
///
/// Answers `PING` with `PONG`. Anything else gets an `ERROR` reply.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultController;

impl DefaultController {
    fn error(message: &str) -> String {
        json!({ "type": "ERROR", "data": { "message": message } }).to_string()
    }
}

#[async_trait]
impl Controller for DefaultController {
    async fn handle(&self, session: &SessionContext, message: &str) -> Option<String> {
        let envelope = match serde_json::from_str::<Envelope>(message) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::debug!(session_id = %session.id(), error = %e, "Malformed client message");
                return Some(Self::error(&format!("malformed message: {e}")));
            }
        };

        match envelope.kind.as_str() {
            "PING" => Some(json!({ "type": "PONG" }).to_string()),
            other => {
                tracing::debug!(session_id = %session.id(), kind = other, "Unsupported client message");
                Some(Self::error(&format!("unsupported message type: {other}")))
            }
        }
    }
}
