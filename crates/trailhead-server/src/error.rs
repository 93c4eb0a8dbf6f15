//! Server error types.

use std::net::{AddrParseError, SocketAddr};

use trailhead_watch::WatchSetupError;

/// Error returned by [`run_server`](crate::run_server).
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// The watched root could not be set up.
    #[error("Failed to start file watcher: {0}")]
    Watch(#[from] WatchSetupError),
    /// Host and port do not form a socket address.
    #[error("Invalid listen address {address}: {source}")]
    Address {
        /// The rejected `host:port` string.
        address: String,
        /// Parse failure.
        source: AddrParseError,
    },
    /// The listener could not be bound.
    #[error("Failed to bind {address}: {source}")]
    Bind {
        /// Address that was requested.
        address: SocketAddr,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// The server failed while running.
    #[error("Server error: {0}")]
    Io(#[from] std::io::Error),
}
