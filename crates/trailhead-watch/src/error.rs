//! Watcher setup errors.

use std::path::PathBuf;

/// Error returned when a [`FilesystemWatcher`](crate::FilesystemWatcher)
/// cannot be started.
///
/// Setup failures are fatal to server startup and are never retried.
#[derive(Debug, thiserror::Error)]
pub enum WatchSetupError {
    /// The watch root does not exist.
    #[error("watch root does not exist: {}", .0.display())]
    RootNotFound(PathBuf),

    /// The watch root exists but is not a directory.
    #[error("watch root is not a directory: {}", .0.display())]
    NotADirectory(PathBuf),

    /// The watch root could not be inspected (e.g. permission denied).
    #[error("cannot access watch root {}: {source}", path.display())]
    Io {
        /// Root that was being inspected.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A watch or ignore pattern is not a valid glob.
    #[error("invalid watch pattern `{pattern}`: {source}")]
    InvalidPattern {
        /// Offending pattern.
        pattern: String,
        /// Parser error.
        #[source]
        source: glob::PatternError,
    },

    /// The OS-level watch subscription could not be created.
    #[error("failed to watch {}: {source}", path.display())]
    Backend {
        /// Root that was being subscribed.
        path: PathBuf,
        /// Backend error.
        #[source]
        source: notify::Error,
    },
}
