//! Live reload manager.
//!
//! Owns the session lifecycle: accepting connections, running each
//! session's receive loop and writer, fanning change events out through the
//! dispatcher and the two-phase stop.

use std::fmt;
use std::path::{Component, Path};
use std::pin::pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};

use chrono::{DateTime, SecondsFormat, Utc};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use trailhead_watch::{ChangeEvent, FilesystemWatcher, WatchOptions, WatchSetupError};

use super::controller::{Controller, SessionContext};
use super::dispatcher::{BroadcastReport, NotificationDispatcher};
use super::frame::Frame;
use super::registry::{SessionId, SessionRegistry};
use super::session::Session;

/// Default per-session outbound queue capacity.
const DEFAULT_OUTBOUND_CAPACITY: usize = 64;

/// Default time allowed for a cooperative close.
const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Notification sent to clients when a watched file changes.
#[derive(Serialize)]
struct Notification<'a> {
    #[serde(rename = "type")]
    event_type: &'static str,
    data: NotificationData<'a>,
}

#[derive(Serialize)]
struct NotificationData<'a> {
    path: String,
    kind: &'a str,
    sequence: u64,
    timestamp: String,
}

/// Tuning for the live reload broker.
#[derive(Clone, Debug)]
pub struct LiveReloadOptions {
    /// Frames a session may have queued before it is considered stalled.
    pub outbound_capacity: usize,
    /// Time allowed for a cooperative close before local teardown.
    pub close_timeout: Duration,
}

impl Default for LiveReloadOptions {
    fn default() -> Self {
        Self {
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
        }
    }
}

/// Connection rejected by the manager.
#[derive(Debug, thiserror::Error)]
pub enum AcceptError {
    /// `stop` has begun.
    #[error("live reload is shutting down")]
    ShuttingDown,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum RunState {
    Running,
    Stopping,
    Stopped,
}

struct Lifecycle {
    state: RunState,
    tasks: JoinSet<()>,
}

struct Inner {
    registry: Arc<SessionRegistry>,
    dispatcher: NotificationDispatcher,
    controller: Arc<dyn Controller>,
    watcher: Mutex<Option<FilesystemWatcher>>,
    lifecycle: Mutex<Lifecycle>,
    options: LiveReloadOptions,
}

/// Why a session's receive loop ended.
#[derive(Clone, Copy, Debug)]
enum CloseReason {
    PeerClosed,
    ReceiveFailed,
    Local,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::PeerClosed => "peer closed",
            Self::ReceiveFailed => "receive failed",
            Self::Local => "closed locally",
        })
    }
}

/// Manages live reload sessions and the file watcher feeding them.
///
/// Cheap to clone; clones share the same registry and watcher.
#[derive(Clone)]
pub struct LiveReloadManager {
    inner: Arc<Inner>,
}

impl LiveReloadManager {
    /// Create a manager with no sessions and no watcher.
    #[must_use]
    pub fn new(controller: Arc<dyn Controller>, options: LiveReloadOptions) -> Self {
        let registry = Arc::new(SessionRegistry::new());
        let dispatcher = NotificationDispatcher::new(Arc::clone(&registry));
        Self {
            inner: Arc::new(Inner {
                registry,
                dispatcher,
                controller,
                watcher: Mutex::new(None),
                lifecycle: Mutex::new(Lifecycle {
                    state: RunState::Running,
                    tasks: JoinSet::new(),
                }),
                options,
            }),
        }
    }

    /// Start watching `options.root`; every change is broadcast to all
    /// sessions.
    ///
    /// Replaces any watcher started earlier. Does nothing once `stop` began.
    pub fn start_watching(&self, options: &WatchOptions) -> Result<(), WatchSetupError> {
        let lifecycle = self.inner.lock_lifecycle();
        if lifecycle.state != RunState::Running {
            tracing::debug!("Live reload stopping, not starting watcher");
            return Ok(());
        }

        let inner: Weak<Inner> = Arc::downgrade(&self.inner);
        let watcher = FilesystemWatcher::start(options, move |event| {
            if let Some(inner) = inner.upgrade() {
                inner.notify(&event);
            }
        })?;
        tracing::info!(root = %watcher.root().display(), "Watching for changes");

        let previous = self.inner.lock_watcher().replace(watcher);
        drop(lifecycle);
        if let Some(previous) = previous {
            previous.stop();
        }
        Ok(())
    }

    /// Register a connection and start its session tasks.
    ///
    /// `writer` receives every frame for the client, including a final
    /// [`Frame::Close`]. `reader` yields the client's frames; its end or
    /// error closes the session.
    pub fn accept<W, R, E>(&self, writer: W, reader: R) -> Result<SessionId, AcceptError>
    where
        W: Sink<Frame> + Send + 'static,
        W::Error: fmt::Display + Send,
        R: Stream<Item = Result<Frame, E>> + Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        let mut lifecycle = self.inner.lock_lifecycle();
        if lifecycle.state != RunState::Running {
            return Err(AcceptError::ShuttingDown);
        }
        while lifecycle.tasks.try_join_next().is_some() {}

        let (session, outbound_rx) = self.inner.open_session();
        let id = session.id();

        lifecycle.tasks.spawn(run_session(
            Arc::clone(&self.inner),
            session,
            outbound_rx,
            writer,
            reader,
        ));
        Ok(id)
    }

    /// Broadcast a change event to every registered session.
    pub fn notify(&self, event: &ChangeEvent) -> BroadcastReport {
        self.inner.notify(event)
    }

    /// Stop the watcher, then close every session and wait for it.
    ///
    /// Returns once the registry is empty. Later calls return immediately.
    pub async fn stop(&self) {
        let mut tasks = {
            let mut lifecycle = self.inner.lock_lifecycle();
            if lifecycle.state != RunState::Running {
                return;
            }
            lifecycle.state = RunState::Stopping;
            std::mem::take(&mut lifecycle.tasks)
        };
        let start = Instant::now();
        tracing::info!(sessions = self.session_count(), "Stopping live reload");

        // Producers first: no change event may start after this point.
        let watcher = self.inner.lock_watcher().take();
        if let Some(watcher) = watcher
            && let Err(e) = tokio::task::spawn_blocking(move || watcher.stop()).await
        {
            tracing::warn!(error = %e, "File watcher did not stop cleanly");
        }
        self.inner.dispatcher.close();

        // Then consumers.
        for session in self.inner.registry.snapshot() {
            session.begin_close();
        }

        let deadline = self.inner.options.close_timeout * 2;
        let joined = tokio::time::timeout(deadline, async {
            while tasks.join_next().await.is_some() {}
        })
        .await;
        if joined.is_err() {
            tracing::warn!(
                remaining = tasks.len(),
                timeout_ms = deadline.as_millis(),
                "Sessions did not close in time, aborting"
            );
            tasks.shutdown().await;
        }

        let leftover = self.inner.registry.clear();
        if !leftover.is_empty() {
            tracing::warn!(sessions = leftover.len(), "Dropped sessions left after shutdown");
        }
        for session in leftover {
            session.mark_closed();
        }

        self.inner.lock_lifecycle().state = RunState::Stopped;
        tracing::info!(
            elapsed_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Live reload stopped"
        );
    }

    /// Number of registered sessions.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.inner.registry.len()
    }

    /// Whether the manager still accepts connections.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.inner.lock_lifecycle().state == RunState::Running
    }
}

impl fmt::Debug for LiveReloadManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveReloadManager")
            .field("sessions", &self.session_count())
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl Inner {
    fn lock_lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_watcher(&self) -> MutexGuard<'_, Option<FilesystemWatcher>> {
        self.watcher.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create a session, open it and only then register it.
    ///
    /// A broadcast running concurrently either misses the session or finds it
    /// `Open`; it can never see it `Connecting`.
    fn open_session(&self) -> (Arc<Session>, mpsc::Receiver<Frame>) {
        let (session, outbound_rx) = Session::new(self.options.outbound_capacity);
        let opened = session.open();
        debug_assert!(opened, "fresh session must open");

        let session = Arc::new(session);
        let id = self.registry.add(Arc::clone(&session));
        tracing::debug!(session_id = %id, sessions = self.registry.len(), "Session opened");
        (session, outbound_rx)
    }

    fn notify(&self, event: &ChangeEvent) -> BroadcastReport {
        let Some(message) = notification_json(event) else {
            return BroadcastReport::default();
        };

        let report = self
            .dispatcher
            .broadcast(&Frame::Text(message), |session, failure| {
                if session.begin_close() {
                    tracing::warn!(session_id = %session.id(), %failure, "Closing stalled session");
                }
            });

        tracing::debug!(
            sequence = event.sequence,
            path = %event.path.display(),
            attempted = report.attempted,
            delivered = report.delivered,
            failed = report.failed,
            "Change broadcast"
        );
        report
    }
}

/// Render a change event as the `file_modified` message clients expect.
fn notification_json(event: &ChangeEvent) -> Option<String> {
    let notification = Notification {
        event_type: "file_modified",
        data: NotificationData {
            path: client_path(&event.path),
            kind: event.kind.as_str(),
            sequence: event.sequence,
            timestamp: DateTime::<Utc>::from(event.timestamp)
                .to_rfc3339_opts(SecondsFormat::Millis, true),
        },
    };

    match serde_json::to_string(&notification) {
        Ok(json) => Some(json),
        Err(e) => {
            tracing::warn!(sequence = event.sequence, error = %e, "Failed to serialize notification");
            None
        }
    }
}

/// `src/app.py` -> `./src/app.py`, with `/` separators on every platform.
fn client_path(relative: &Path) -> String {
    let segments: Vec<_> = relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy()),
            _ => None,
        })
        .collect();

    if segments.is_empty() {
        ".".to_owned()
    } else {
        format!("./{}", segments.join("/"))
    }
}

/// Drive one session from `Open` to `Closed`.
async fn run_session<W, R, E>(
    inner: Arc<Inner>,
    session: Arc<Session>,
    outbound: mpsc::Receiver<Frame>,
    writer: W,
    reader: R,
) where
    W: Sink<Frame> + Send + 'static,
    W::Error: fmt::Display + Send,
    R: Stream<Item = Result<Frame, E>> + Send + 'static,
    E: fmt::Display + Send + 'static,
{
    let id = session.id();
    let close_timeout = inner.options.close_timeout;

    let receive = async {
        let reason = receive_loop(inner.controller.as_ref(), &session, reader).await;
        tracing::debug!(session_id = %id, %reason, "Receive loop ended");
        session.begin_close();
    };
    tokio::join!(
        write_loop(&session, outbound, writer, close_timeout),
        receive
    );

    inner.registry.remove(id);
    session.mark_closed();
    tracing::debug!(session_id = %id, sessions = inner.registry.len(), "Session closed");
}

/// Forward client frames to the controller until the peer leaves or the
/// session is cancelled.
async fn receive_loop<R, E>(controller: &dyn Controller, session: &Session, reader: R) -> CloseReason
where
    R: Stream<Item = Result<Frame, E>>,
    E: fmt::Display,
{
    let mut reader = pin!(reader);
    let context = SessionContext::from(session);
    let cancel = session.cancellation();

    loop {
        let next = tokio::select! {
            biased;
            () = cancel.cancelled() => return CloseReason::Local,
            next = reader.next() => next,
        };

        match next {
            Some(Ok(Frame::Text(message))) => {
                if let Some(reply) = controller.handle(&context, &message).await
                    && session.reply(Frame::Text(reply)).await.is_err()
                {
                    return CloseReason::Local;
                }
            }
            Some(Ok(Frame::Close)) | None => return CloseReason::PeerClosed,
            Some(Err(e)) => {
                tracing::warn!(session_id = %session.id(), error = %e, "Receive failed");
                return CloseReason::ReceiveFailed;
            }
        }
    }
}

/// Single writer for a session's transport.
///
/// Once the session is cancelled, queued frames are flushed and a close frame
/// sent, all within `close_timeout`.
async fn write_loop<W>(
    session: &Session,
    mut outbound: mpsc::Receiver<Frame>,
    writer: W,
    close_timeout: Duration,
) where
    W: Sink<Frame>,
    W::Error: fmt::Display,
{
    let mut writer = pin!(writer);
    let cancel = session.cancellation();

    loop {
        let frame = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            frame = outbound.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };
        let sent = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            sent = writer.send(frame) => sent,
        };
        if let Err(e) = sent {
            tracing::warn!(session_id = %session.id(), error = %e, "Send failed");
            session.begin_close();
            return;
        }
    }

    outbound.close();
    let farewell = async {
        while let Some(frame) = outbound.recv().await {
            writer.send(frame).await?;
        }
        writer.send(Frame::Close).await?;
        writer.close().await
    };
    match tokio::time::timeout(close_timeout, farewell).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            tracing::debug!(session_id = %session.id(), error = %e, "Close handshake failed");
        }
        Err(_) => {
            tracing::warn!(
                session_id = %session.id(),
                timeout_ms = close_timeout.as_millis(),
                "Close timed out, tearing down"
            );
        }
    }
}
