//! Recursive filesystem watcher.
//!
//! Provides [`FilesystemWatcher`], which subscribes to OS change
//! notifications for a directory subtree and reports every relevant change to
//! a callback running on a dedicated drain thread.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime};

use glob::Pattern;
use notify::{RecommendedWatcher, RecursiveMode, Watcher};

use crate::debouncer::EventDebouncer;
use crate::error::WatchSetupError;
use crate::event::{ChangeEvent, ChangeKind};

/// Upper bound between debouncer polls.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Directories that are never interesting to a browser reload.
const IGNORED_DIRS: &[&str] = &[".git", "__pycache__", "node_modules", ".trailhead"];

/// Default ignore patterns: every [`IGNORED_DIRS`] entry and its contents.
#[must_use]
pub fn default_ignore() -> Vec<String> {
    IGNORED_DIRS
        .iter()
        .flat_map(|dir| [format!("**/{dir}"), format!("**/{dir}/**")])
        .collect()
}

/// Watcher configuration.
#[derive(Clone, Debug)]
pub struct WatchOptions {
    /// Directory to watch recursively.
    pub root: PathBuf,
    /// Glob patterns (relative to `root`) a path must match. Empty matches all.
    pub patterns: Vec<String>,
    /// Glob patterns (relative to `root`) excluded from reporting.
    pub ignore: Vec<String>,
    /// Per-path debounce window. Zero forwards every raw event.
    pub debounce: Duration,
}

impl WatchOptions {
    /// Watch `root` with no pattern filter, the default ignore list and no
    /// debouncing.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            patterns: Vec::new(),
            ignore: default_ignore(),
            debounce: Duration::ZERO,
        }
    }

    /// Replace the match patterns.
    #[must_use]
    pub fn with_patterns(mut self, patterns: Vec<String>) -> Self {
        self.patterns = patterns;
        self
    }

    /// Replace the ignore patterns.
    #[must_use]
    pub fn with_ignore(mut self, ignore: Vec<String>) -> Self {
        self.ignore = ignore;
        self
    }

    /// Set the debounce window.
    #[must_use]
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }
}

/// Decides which raw paths are reported, and how they are named.
struct PathFilter {
    root: PathBuf,
    /// Backends may report canonical paths (e.g. `/private/var` on macOS).
    canonical_root: Option<PathBuf>,
    patterns: Vec<Pattern>,
    ignore: Vec<Pattern>,
}

impl PathFilter {
    fn new(options: &WatchOptions) -> Result<Self, WatchSetupError> {
        Ok(Self {
            root: options.root.clone(),
            canonical_root: fs::canonicalize(&options.root).ok(),
            patterns: compile(&options.patterns)?,
            ignore: compile(&options.ignore)?,
        })
    }

    /// Relative path for `path` if it lies under the root and passes the filters.
    fn accept(&self, path: &Path) -> Option<PathBuf> {
        let relative = path
            .strip_prefix(&self.root)
            .ok()
            .or_else(|| {
                self.canonical_root
                    .as_deref()
                    .and_then(|root| path.strip_prefix(root).ok())
            })?;

        if self.ignore.iter().any(|p| p.matches_path(relative)) {
            return None;
        }
        let matches =
            self.patterns.is_empty() || self.patterns.iter().any(|p| p.matches_path(relative));
        matches.then(|| relative.to_path_buf())
    }
}

fn compile(patterns: &[String]) -> Result<Vec<Pattern>, WatchSetupError> {
    patterns
        .iter()
        .map(|pattern| {
            Pattern::new(pattern).map_err(|source| WatchSetupError::InvalidPattern {
                pattern: pattern.clone(),
                source,
            })
        })
        .collect()
}

/// Message to the drain thread.
enum Signal {
    Raw(notify::Event),
    Shutdown,
}

/// Invokes the user callback, numbering events.
struct Emitter<F> {
    on_change: F,
    sequence: u64,
    stopped: Arc<AtomicBool>,
}

impl<F: FnMut(ChangeEvent)> Emitter<F> {
    fn emit(&mut self, path: PathBuf, kind: ChangeKind) {
        // Set by `stop()`, possibly from inside the callback itself.
        if self.stopped.load(Ordering::Acquire) {
            return;
        }
        self.sequence += 1;
        tracing::debug!(
            sequence = self.sequence,
            path = %path.display(),
            kind = kind.as_str(),
            "Filesystem change"
        );
        (self.on_change)(ChangeEvent {
            sequence: self.sequence,
            timestamp: SystemTime::now(),
            path,
            kind,
        });
    }
}

/// Live subscription: released exactly once by [`FilesystemWatcher::stop`].
struct Running {
    backend: RecommendedWatcher,
    signal_tx: mpsc::Sender<Signal>,
    drain: JoinHandle<()>,
    stopped: Arc<AtomicBool>,
}

/// Recursive filesystem watcher.
///
/// Between [`start`](Self::start) and [`stop`](Self::stop) a background
/// thread forwards every detected change under the root to `on_change`.
/// Dropping the watcher stops it.
///
/// # Example
///
/// ```ignore
/// let watcher = FilesystemWatcher::start(&WatchOptions::new("."), |event| {
///     tracing::info!(sequence = event.sequence, "changed");
/// })?;
/// watcher.stop();
/// watcher.stop(); // no-op
/// ```
pub struct FilesystemWatcher {
    root: PathBuf,
    running: Mutex<Option<Running>>,
}

impl FilesystemWatcher {
    /// Start watching `options.root`.
    ///
    /// `on_change` runs on the watcher's own thread, one event at a time, in
    /// emission order.
    ///
    /// # Errors
    ///
    /// Returns [`WatchSetupError`] if the root is missing, not a directory,
    /// unreadable, a pattern is invalid, or the OS subscription fails.
    pub fn start<F>(options: &WatchOptions, on_change: F) -> Result<Self, WatchSetupError>
    where
        F: FnMut(ChangeEvent) + Send + 'static,
    {
        let root = options.root.clone();
        check_root(&root)?;
        let filter = PathFilter::new(options)?;

        let (signal_tx, signal_rx) = mpsc::channel();
        let backend_tx = signal_tx.clone();
        let mut backend = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            match res {
                // Fails only once the drain thread is gone.
                Ok(event) => {
                    let _ = backend_tx.send(Signal::Raw(event));
                }
                Err(e) => tracing::warn!(error = %e, "Filesystem watcher backend error"),
            }
        })
        .map_err(|source| WatchSetupError::Backend {
            path: root.clone(),
            source,
        })?;

        backend
            .watch(&root, RecursiveMode::Recursive)
            .map_err(|source| WatchSetupError::Backend {
                path: root.clone(),
                source,
            })?;

        let stopped = Arc::new(AtomicBool::new(false));
        let emitter = Emitter {
            on_change,
            sequence: 0,
            stopped: Arc::clone(&stopped),
        };
        let debouncer = (!options.debounce.is_zero()).then(|| EventDebouncer::new(options.debounce));

        let drain = thread::Builder::new()
            .name("trailhead-watch".to_owned())
            .spawn(move || run_drain(&signal_rx, &filter, debouncer, emitter))
            .map_err(|source| WatchSetupError::Io {
                path: root.clone(),
                source,
            })?;

        tracing::info!(
            root = %root.display(),
            debounce_ms = options.debounce.as_millis(),
            "Filesystem watcher started"
        );

        Ok(Self {
            root,
            running: Mutex::new(Some(Running {
                backend,
                signal_tx,
                drain,
                stopped,
            })),
        })
    }

    /// Watched root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Whether the subscription is still live.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Release the OS subscription and wait for the drain thread to exit.
    ///
    /// No `on_change` invocation starts after this returns. Safe to call any
    /// number of times, and from inside `on_change`.
    pub fn stop(&self) {
        let running = self
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(Running {
            backend,
            signal_tx,
            drain,
            stopped,
        }) = running
        else {
            return;
        };

        stopped.store(true, Ordering::Release);
        drop(backend);
        let _ = signal_tx.send(Signal::Shutdown);
        drop(signal_tx);

        // Joining ourselves would deadlock; the stopped flag already holds.
        if drain.thread().id() != thread::current().id() && drain.join().is_err() {
            tracing::warn!(root = %self.root.display(), "Watcher drain thread panicked");
        }

        tracing::info!(root = %self.root.display(), "Filesystem watcher stopped");
    }
}

impl Drop for FilesystemWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for FilesystemWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilesystemWatcher")
            .field("root", &self.root)
            .field("running", &self.is_running())
            .finish()
    }
}

fn check_root(root: &Path) -> Result<(), WatchSetupError> {
    match fs::metadata(root) {
        Ok(metadata) if metadata.is_dir() => Ok(()),
        Ok(_) => Err(WatchSetupError::NotADirectory(root.to_path_buf())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(WatchSetupError::RootNotFound(root.to_path_buf()))
        }
        Err(source) => Err(WatchSetupError::Io {
            path: root.to_path_buf(),
            source,
        }),
    }
}

/// Drain thread body: filter raw events, debounce if configured, emit.
fn run_drain<F: FnMut(ChangeEvent)>(
    signals: &mpsc::Receiver<Signal>,
    filter: &PathFilter,
    mut debouncer: Option<EventDebouncer>,
    mut emitter: Emitter<F>,
) {
    let poll = debouncer
        .as_ref()
        .map_or(POLL_INTERVAL, |d| d.window().min(POLL_INTERVAL));

    loop {
        let signal = if debouncer.is_some() {
            match signals.recv_timeout(poll) {
                Ok(signal) => Some(signal),
                Err(RecvTimeoutError::Timeout) => None,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        } else {
            match signals.recv() {
                Ok(signal) => Some(signal),
                Err(_) => break,
            }
        };

        match signal {
            Some(Signal::Shutdown) => break,
            Some(Signal::Raw(event)) => {
                let Some(kind) = ChangeKind::from_notify(&event.kind) else {
                    continue;
                };
                for path in event.paths.iter().filter_map(|p| filter.accept(p)) {
                    match debouncer.as_mut() {
                        Some(debouncer) => debouncer.record(path, kind),
                        None => emitter.emit(path, kind),
                    }
                }
            }
            None => {}
        }

        if let Some(debouncer) = debouncer.as_mut() {
            for change in debouncer.drain_ready() {
                emitter.emit(change.path, change.kind);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc::Receiver;

    fn create_test_dir() -> tempfile::TempDir {
        tempfile::tempdir().unwrap()
    }

    fn collecting_watcher(options: &WatchOptions) -> (FilesystemWatcher, Receiver<ChangeEvent>) {
        let (tx, rx) = mpsc::channel();
        let watcher = FilesystemWatcher::start(options, move |event| {
            let _ = tx.send(event);
        })
        .unwrap();
        (watcher, rx)
    }

    #[test]
    fn test_watcher_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<FilesystemWatcher>();
    }

    #[test]
    fn test_start_missing_root_fails() {
        let temp_dir = create_test_dir();
        let missing = temp_dir.path().join("does-not-exist");

        let result = FilesystemWatcher::start(&WatchOptions::new(&missing), |_| {});

        match result {
            Err(WatchSetupError::RootNotFound(path)) => assert_eq!(path, missing),
            other => panic!("Expected RootNotFound, got {other:?}"),
        }
    }

    #[test]
    fn test_start_file_root_fails() {
        let temp_dir = create_test_dir();
        let file = temp_dir.path().join("app.py");
        fs::write(&file, "print('hi')").unwrap();

        let result = FilesystemWatcher::start(&WatchOptions::new(&file), |_| {});

        assert!(matches!(result, Err(WatchSetupError::NotADirectory(_))));
    }

    #[test]
    fn test_start_invalid_pattern_fails() {
        let temp_dir = create_test_dir();
        let options = WatchOptions::new(temp_dir.path()).with_patterns(vec!["src/***".to_owned()]);

        let err = FilesystemWatcher::start(&options, |_| {}).unwrap_err();

        assert!(matches!(err, WatchSetupError::InvalidPattern { .. }));
        assert!(err.to_string().contains("src/***"));
    }

    #[test]
    fn test_stop_without_events_is_idempotent() {
        let temp_dir = create_test_dir();
        let (watcher, _rx) = collecting_watcher(&WatchOptions::new(temp_dir.path()));
        assert!(watcher.is_running());

        watcher.stop();
        assert!(!watcher.is_running());

        watcher.stop();
        watcher.stop();
        assert!(!watcher.is_running());
    }

    #[test]
    fn test_stop_drops_callback() {
        let temp_dir = create_test_dir();
        let (watcher, rx) = collecting_watcher(&WatchOptions::new(temp_dir.path()));

        watcher.stop();

        // The callback (and its sender) is dropped with the drain thread.
        assert!(matches!(
            rx.try_recv(),
            Err(mpsc::TryRecvError::Disconnected)
        ));
    }

    #[test]
    fn test_drop_stops_watcher() {
        let temp_dir = create_test_dir();
        let (watcher, rx) = collecting_watcher(&WatchOptions::new(temp_dir.path()));

        drop(watcher);

        assert!(matches!(
            rx.try_recv(),
            Err(mpsc::TryRecvError::Disconnected)
        ));
    }

    #[test]
    fn test_filter_strips_root() {
        let options = WatchOptions::new("/project");
        let filter = PathFilter::new(&options).unwrap();

        assert_eq!(
            filter.accept(Path::new("/project/src/app.py")),
            Some(PathBuf::from("src/app.py"))
        );
        assert_eq!(filter.accept(Path::new("/elsewhere/app.py")), None);
    }

    #[test]
    fn test_filter_applies_patterns() {
        let options = WatchOptions::new("/project").with_patterns(vec!["**/*.py".to_owned()]);
        let filter = PathFilter::new(&options).unwrap();

        assert!(filter.accept(Path::new("/project/app.py")).is_some());
        assert!(filter.accept(Path::new("/project/pkg/mod.py")).is_some());
        assert!(filter.accept(Path::new("/project/notes.txt")).is_none());
    }

    #[test]
    fn test_filter_default_ignore() {
        let options = WatchOptions::new("/project");
        let filter = PathFilter::new(&options).unwrap();

        assert!(filter.accept(Path::new("/project/.git/HEAD")).is_none());
        assert!(
            filter
                .accept(Path::new("/project/pkg/__pycache__/mod.cpython-312.pyc"))
                .is_none()
        );
        assert!(filter.accept(Path::new("/project/node_modules")).is_none());
        assert!(filter.accept(Path::new("/project/pkg/mod.py")).is_some());
    }

    #[test]
    fn test_default_ignore_covers_dir_and_contents() {
        let ignore = default_ignore();
        assert!(ignore.contains(&"**/.git".to_owned()));
        assert!(ignore.contains(&"**/.git/**".to_owned()));
        assert_eq!(ignore.len(), IGNORED_DIRS.len() * 2);
    }

    // Real filesystem notifications are timing-sensitive on CI machines.
    #[test]
    #[ignore]
    fn test_detects_file_creation() {
        let temp_dir = create_test_dir();
        let (watcher, rx) = collecting_watcher(&WatchOptions::new(temp_dir.path()));
        thread::sleep(Duration::from_millis(100));

        fs::write(temp_dir.path().join("new.py"), "x = 1").unwrap();

        let event = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(event.sequence, 1);
        assert_eq!(event.path, PathBuf::from("new.py"));
        watcher.stop();
    }

    #[test]
    #[ignore]
    fn test_debounce_coalesces_writes() {
        let temp_dir = create_test_dir();
        let file = temp_dir.path().join("app.py");
        fs::write(&file, "v0").unwrap();
        let options = WatchOptions::new(temp_dir.path()).with_debounce(Duration::from_millis(100));
        let (watcher, rx) = collecting_watcher(&options);
        thread::sleep(Duration::from_millis(100));

        fs::write(&file, "v1").unwrap();
        fs::write(&file, "v2").unwrap();
        fs::write(&file, "v3").unwrap();

        let event = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(event.path, PathBuf::from("app.py"));
        assert!(rx.recv_timeout(Duration::from_millis(300)).is_err());
        watcher.stop();
    }

    #[test]
    #[ignore]
    fn test_no_events_after_stop() {
        let temp_dir = create_test_dir();
        let (watcher, rx) = collecting_watcher(&WatchOptions::new(temp_dir.path()));
        thread::sleep(Duration::from_millis(100));

        watcher.stop();
        fs::write(temp_dir.path().join("late.py"), "x = 1").unwrap();
        thread::sleep(Duration::from_millis(250));

        assert!(rx.try_recv().is_err());
    }
}
