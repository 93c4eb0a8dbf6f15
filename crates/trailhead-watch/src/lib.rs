//! Filesystem watching for the Trailhead development server.
//!
//! This crate turns OS-level change notifications for a directory subtree into
//! a single ordered stream of [`ChangeEvent`]s delivered to a callback. It
//! knows nothing about clients: the server wires the callback to its
//! notification broker.
//!
//! # Architecture
//!
//! ```text
//! notify backend thread ──raw events──► drain thread ──ChangeEvent──► on_change
//!                                            │
//!                                            └─► EventDebouncer (optional)
//! ```
//!
//! - [`FilesystemWatcher`] owns the `notify` subscription and the drain thread
//! - [`WatchOptions`] selects the root, glob filters and debounce window
//! - [`WatchSetupError`] is returned when the root cannot be watched
//!
//! # Example
//!
//! ```ignore
//! use trailhead_watch::{FilesystemWatcher, WatchOptions};
//!
//! let watcher = FilesystemWatcher::start(&WatchOptions::new("src"), |event| {
//!     println!("{} {}", event.kind.as_str(), event.path.display());
//! })?;
//! // ...
//! watcher.stop();
//! ```

mod debouncer;
mod error;
mod event;
mod watcher;

pub use error::WatchSetupError;
pub use event::{ChangeEvent, ChangeKind};
pub use watcher::{FilesystemWatcher, WatchOptions, default_ignore};
