//! Change event types.

use std::path::PathBuf;
use std::time::SystemTime;

use notify::EventKind;
use notify::event::ModifyKind;

/// Kind of filesystem change.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    /// A file or directory was created.
    Created,
    /// File content or metadata changed.
    Modified,
    /// A file or directory was removed.
    Removed,
    /// A file or directory was renamed (either side of the rename).
    Renamed,
}

impl ChangeKind {
    /// Lowercase name used on the wire and in logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Modified => "modified",
            Self::Removed => "removed",
            Self::Renamed => "renamed",
        }
    }

    /// Map a `notify` event kind; access and unknown events are dropped.
    pub(crate) fn from_notify(kind: &EventKind) -> Option<Self> {
        match kind {
            EventKind::Create(_) => Some(Self::Created),
            EventKind::Modify(ModifyKind::Name(_)) => Some(Self::Renamed),
            EventKind::Modify(_) => Some(Self::Modified),
            EventKind::Remove(_) => Some(Self::Removed),
            EventKind::Access(_) | EventKind::Any | EventKind::Other => None,
        }
    }
}

/// Something changed under the watched root.
///
/// Consumers that only care that a change happened can ignore every field;
/// `sequence` is strictly increasing for the lifetime of one watcher.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChangeEvent {
    /// Emission order, starting at 1.
    pub sequence: u64,
    /// When the event was emitted.
    pub timestamp: SystemTime,
    /// Path relative to the watch root (empty for the root itself).
    pub path: PathBuf,
    /// Kind of change.
    pub kind: ChangeKind,
}
