//! Per-path event coalescing.
//!
//! Editors typically emit several events for one save (truncate, write,
//! chmod, or write-temp-then-rename). When a debounce window is configured,
//! events for the same path are merged until the path has been quiet for the
//! whole window.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use crate::event::ChangeKind;

/// A change that survived coalescing and passed its deadline.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct SettledChange {
    /// Path relative to the watch root.
    pub path: PathBuf,
    /// Coalesced kind.
    pub kind: ChangeKind,
}

#[derive(Clone, Copy)]
struct PendingChange {
    kind: ChangeKind,
    deadline: Instant,
    /// Arrival order of the latest contributing event, breaks deadline ties.
    arrival: u64,
}

/// Event debouncer.
///
/// Owned by the watcher's drain thread, so it needs no interior locking.
pub(crate) struct EventDebouncer {
    pending: HashMap<PathBuf, PendingChange>,
    window: Duration,
    arrivals: u64,
}

impl EventDebouncer {
    pub(crate) fn new(window: Duration) -> Self {
        Self {
            pending: HashMap::new(),
            window,
            arrivals: 0,
        }
    }

    pub(crate) fn window(&self) -> Duration {
        self.window
    }

    /// Record an event, merging it with any pending change for the same path.
    pub(crate) fn record(&mut self, path: PathBuf, kind: ChangeKind) {
        self.record_at(path, kind, Instant::now());
    }

    fn record_at(&mut self, path: PathBuf, kind: ChangeKind, now: Instant) {
        self.arrivals += 1;
        let deadline = now + self.window;
        let arrival = self.arrivals;

        match self.pending.entry(path) {
            Entry::Vacant(entry) => {
                entry.insert(PendingChange {
                    kind,
                    deadline,
                    arrival,
                });
            }
            Entry::Occupied(mut entry) => match Self::coalesce(entry.get().kind, kind) {
                Some(merged) => {
                    let pending = entry.get_mut();
                    pending.kind = merged;
                    pending.deadline = deadline;
                    pending.arrival = arrival;
                }
                // Created then removed inside one window: nothing to report.
                None => {
                    entry.remove();
                }
            },
        }
    }

    /// Merge two kinds observed for one path, `None` drops the path.
    #[allow(clippy::match_same_arms)]
    fn coalesce(existing: ChangeKind, new: ChangeKind) -> Option<ChangeKind> {
        use ChangeKind::{Created, Modified, Removed, Renamed};

        match (existing, new) {
            (Created, Removed) => None,
            (Created, _) => Some(Created),

            (Modified, Modified) => Some(Modified),
            (Modified, other) => Some(other),

            (Renamed, Created) => Some(Created),
            (Renamed, Removed) => Some(Removed),
            (Renamed, Modified | Renamed) => Some(Renamed),

            (Removed, Created) => Some(Modified),
            (Removed, Modified | Renamed | Removed) => Some(Removed),
        }
    }

    /// Remove and return every change whose deadline has passed, oldest first.
    pub(crate) fn drain_ready(&mut self) -> Vec<SettledChange> {
        self.drain_ready_at(Instant::now())
    }

    fn drain_ready_at(&mut self, now: Instant) -> Vec<SettledChange> {
        let mut ready: Vec<(PathBuf, PendingChange)> = Vec::new();
        self.pending.retain(|path, pending| {
            if pending.deadline <= now {
                ready.push((path.clone(), *pending));
                false
            } else {
                true
            }
        });

        ready.sort_by_key(|(_, pending)| (pending.deadline, pending.arrival));
        ready
            .into_iter()
            .map(|(path, pending)| SettledChange {
                path,
                kind: pending.kind,
            })
            .collect()
    }

    #[cfg(test)]
    fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const WINDOW: Duration = Duration::from_millis(50);

    fn path(name: &str) -> PathBuf {
        PathBuf::from(name)
    }

    #[test]
    fn test_change_held_until_deadline() {
        let mut debouncer = EventDebouncer::new(WINDOW);
        let start = Instant::now();

        debouncer.record_at(path("app.py"), ChangeKind::Modified, start);

        assert!(debouncer.drain_ready_at(start).is_empty());
        let ready = debouncer.drain_ready_at(start + WINDOW);
        assert_eq!(
            ready,
            vec![SettledChange {
                path: path("app.py"),
                kind: ChangeKind::Modified,
            }]
        );
        assert!(debouncer.is_empty());
    }

    #[test]
    fn test_burst_on_one_path_emits_once() {
        let mut debouncer = EventDebouncer::new(WINDOW);
        let start = Instant::now();

        debouncer.record_at(path("app.py"), ChangeKind::Modified, start);
        debouncer.record_at(path("app.py"), ChangeKind::Modified, start);
        debouncer.record_at(path("app.py"), ChangeKind::Modified, start);

        assert_eq!(debouncer.drain_ready_at(start + WINDOW).len(), 1);
    }

    #[test]
    fn test_late_event_extends_deadline() {
        let mut debouncer = EventDebouncer::new(WINDOW);
        let start = Instant::now();

        debouncer.record_at(path("app.py"), ChangeKind::Modified, start);
        debouncer.record_at(path("app.py"), ChangeKind::Modified, start + WINDOW / 2);

        assert!(debouncer.drain_ready_at(start + WINDOW).is_empty());
        assert_eq!(debouncer.drain_ready_at(start + WINDOW * 2).len(), 1);
    }

    #[test]
    fn test_created_then_removed_is_dropped() {
        let mut debouncer = EventDebouncer::new(WINDOW);
        let start = Instant::now();

        debouncer.record_at(path("tmp.swp"), ChangeKind::Created, start);
        debouncer.record_at(path("tmp.swp"), ChangeKind::Removed, start);

        assert!(debouncer.drain_ready_at(start + WINDOW).is_empty());
    }

    #[test]
    fn test_drain_preserves_arrival_order() {
        let mut debouncer = EventDebouncer::new(WINDOW);
        let start = Instant::now();

        debouncer.record_at(path("b.py"), ChangeKind::Modified, start);
        debouncer.record_at(path("a.py"), ChangeKind::Created, start);
        debouncer.record_at(path("c.py"), ChangeKind::Removed, start);

        let ready: Vec<_> = debouncer
            .drain_ready_at(start + WINDOW)
            .into_iter()
            .map(|change| change.path)
            .collect();
        assert_eq!(ready, vec![path("b.py"), path("a.py"), path("c.py")]);
    }

    #[test]
    fn test_coalesce_matrix() {
        use ChangeKind::{Created, Modified, Removed, Renamed};

        assert_eq!(EventDebouncer::coalesce(Created, Created), Some(Created));
        assert_eq!(EventDebouncer::coalesce(Created, Modified), Some(Created));
        assert_eq!(EventDebouncer::coalesce(Created, Renamed), Some(Created));
        assert_eq!(EventDebouncer::coalesce(Created, Removed), None);

        assert_eq!(EventDebouncer::coalesce(Modified, Created), Some(Created));
        assert_eq!(EventDebouncer::coalesce(Modified, Modified), Some(Modified));
        assert_eq!(EventDebouncer::coalesce(Modified, Renamed), Some(Renamed));
        assert_eq!(EventDebouncer::coalesce(Modified, Removed), Some(Removed));

        assert_eq!(EventDebouncer::coalesce(Renamed, Created), Some(Created));
        assert_eq!(EventDebouncer::coalesce(Renamed, Modified), Some(Renamed));
        assert_eq!(EventDebouncer::coalesce(Renamed, Renamed), Some(Renamed));
        assert_eq!(EventDebouncer::coalesce(Renamed, Removed), Some(Removed));

        assert_eq!(EventDebouncer::coalesce(Removed, Created), Some(Modified));
        assert_eq!(EventDebouncer::coalesce(Removed, Modified), Some(Removed));
        assert_eq!(EventDebouncer::coalesce(Removed, Renamed), Some(Removed));
        assert_eq!(EventDebouncer::coalesce(Removed, Removed), Some(Removed));
    }
}
