//! Live reload broker.
//!
//! - [`SessionRegistry`] tracks connected sessions
//! - [`NotificationDispatcher`] fans a frame out to a registry snapshot
//! - [`LiveReloadManager`] runs the session lifecycle, the watcher and the
//!   two-phase stop
//! - [`Controller`] handles messages sent by clients

mod controller;
mod dispatcher;
mod frame;
mod manager;
mod registry;
mod session;
mod websocket;

pub use controller::{Controller, DefaultController, SessionContext};
pub use dispatcher::{BroadcastReport, NotificationDispatcher, Recipient, SendFailure};
pub use frame::Frame;
pub use manager::{AcceptError, LiveReloadManager, LiveReloadOptions};
pub use registry::{SessionId, SessionRegistry};
pub use session::{Session, SessionState};
pub(crate) use websocket::ws_handler;
