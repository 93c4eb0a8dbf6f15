//! HTTP server and live reload broker for Trailhead.
//!
//! This crate serves a web front-end and pushes a notification to every
//! connected browser whenever a watched file changes:
//! - `GET /ws` upgrades to a WebSocket live reload session
//! - `GET /api/health` reports server and session status
//! - `/assets/*` and the SPA fallback serve the front-end
//!
//! # Quick Start
//!
//! ```ignore
//! use trailhead_server::{ServerConfig, run_server};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = ServerConfig {
//!         watch_root: "src".into(),
//!         ..ServerConfig::default()
//!     };
//!
//!     run_server(config).await.unwrap();
//! }
//! ```
//!
//! # Architecture
//!
//! ```text
//! Browser ──HTTP──► axum router
//!                        │
//!                        ├─► /ws ──► LiveReloadManager ──► SessionRegistry
//!                        │                 ▲                     │
//!                        │                 │             NotificationDispatcher
//!                        │        FilesystemWatcher
//!                        │        (trailhead-watch)
//!                        │
//!                        └─► Static files (index.html + assets/)
//! ```
//!
//! # Shutdown
//!
//! On Ctrl-C (or SIGTERM) the watcher is stopped first, then every session is
//! closed and awaited, then the HTTP server finishes.

mod app;
mod error;
mod handlers;
pub mod live_reload;
mod middleware;
mod state;
mod static_files;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use state::AppState;
use trailhead_watch::WatchOptions;

pub use error::ServerError;
pub use live_reload::{Controller, DefaultController, LiveReloadManager, LiveReloadOptions};

/// Server configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Host address to bind to.
    pub host: String,
    /// Port to listen on.
    pub port: u16,
    /// Directory holding `index.html` and `assets/`.
    pub static_dir: PathBuf,
    /// Directory watched for changes.
    pub watch_root: PathBuf,
    /// Glob patterns a changed path must match (`None`: every path).
    pub watch_patterns: Option<Vec<String>>,
    /// Glob patterns to ignore (`None`: built-in ignore list).
    pub watch_ignore: Option<Vec<String>>,
    /// Per-path debounce window (zero disables debouncing).
    pub debounce: Duration,
    /// Enable live reload.
    pub live_reload_enabled: bool,
    /// Live reload broker tuning.
    pub live_reload: LiveReloadOptions,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_owned(),
            port: 8000,
            static_dir: PathBuf::from("static"),
            watch_root: PathBuf::from("."),
            watch_patterns: None,
            watch_ignore: None,
            debounce: Duration::ZERO,
            live_reload_enabled: true,
            live_reload: LiveReloadOptions::default(),
        }
    }
}

impl ServerConfig {
    /// Watcher options derived from this configuration.
    #[must_use]
    pub fn watch_options(&self) -> WatchOptions {
        let mut options = WatchOptions::new(&self.watch_root).with_debounce(self.debounce);
        if let Some(patterns) = &self.watch_patterns {
            options = options.with_patterns(patterns.clone());
        }
        if let Some(ignore) = &self.watch_ignore {
            options = options.with_ignore(ignore.clone());
        }
        options
    }
}

/// Run the server with the default controller.
///
/// # Errors
///
/// Returns an error if the watcher cannot be started, the address is invalid
/// or the listener cannot be bound.
pub async fn run_server(config: ServerConfig) -> Result<(), ServerError> {
    run_server_with_controller(config, Arc::new(DefaultController)).await
}

/// Run the server, handing client messages to `controller`.
///
/// # Errors
///
/// Same as [`run_server`].
pub async fn run_server_with_controller(
    config: ServerConfig,
    controller: Arc<dyn Controller>,
) -> Result<(), ServerError> {
    let address = format!("{}:{}", config.host, config.port);
    let addr = SocketAddr::from_str(&address)
        .map_err(|source| ServerError::Address { address, source })?;

    let live_reload = if config.live_reload_enabled {
        let manager = LiveReloadManager::new(controller, config.live_reload.clone());
        manager.start_watching(&config.watch_options())?;
        Some(manager)
    } else {
        None
    };

    let state = Arc::new(AppState {
        static_dir: config.static_dir.clone(),
        live_reload: live_reload.clone(),
    });
    let app = app::create_router(state);

    tracing::info!(address = %addr, live_reload = config.live_reload_enabled, "Starting server");
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(source) => {
            if let Some(manager) = &live_reload {
                manager.stop().await;
            }
            return Err(ServerError::Bind {
                address: addr,
                source,
            });
        }
    };

    let shutdown_manager = live_reload.clone();
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            if let Some(manager) = shutdown_manager {
                manager.stop().await;
            }
        })
        .await;

    if let Some(manager) = &live_reload {
        manager.stop().await;
    }
    served?;

    tracing::info!("Server stopped");
    Ok(())
}

/// Wait for Ctrl-C, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
    tracing::info!("Shutdown signal received, stopping server...");
}

/// Create server configuration from Trailhead config.
#[must_use]
pub fn server_config_from_config(config: &trailhead_config::Config) -> ServerConfig {
    ServerConfig {
        host: config.server.host.clone(),
        port: config.server.port,
        static_dir: config.paths.static_dir.clone(),
        watch_root: config.watch_resolved.root.clone(),
        watch_patterns: config.watch_resolved.patterns.clone(),
        watch_ignore: config.watch_resolved.ignore.clone(),
        debounce: config.watch_resolved.debounce(),
        live_reload_enabled: config.live_reload.enabled,
        live_reload: LiveReloadOptions {
            outbound_capacity: config.live_reload.outbound_capacity,
            close_timeout: config.live_reload.close_timeout(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_server_config_from_config() {
        let config = trailhead_config::Config::default();

        let server = server_config_from_config(&config);

        assert_eq!(server.host, "127.0.0.1");
        assert_eq!(server.port, 8000);
        assert!(server.live_reload_enabled);
        assert_eq!(server.debounce, Duration::ZERO);
        assert_eq!(server.live_reload.outbound_capacity, 64);
        assert_eq!(server.live_reload.close_timeout, Duration::from_secs(2));
        assert!(server.static_dir.ends_with("static"));
    }

    #[test]
    fn test_watch_options_from_config() {
        let config = ServerConfig {
            watch_root: PathBuf::from("/project/src"),
            watch_patterns: Some(vec!["**/*.py".to_owned()]),
            debounce: Duration::from_millis(100),
            ..ServerConfig::default()
        };

        let options = config.watch_options();

        assert_eq!(options.root, PathBuf::from("/project/src"));
        assert_eq!(options.patterns, vec!["**/*.py".to_owned()]);
        assert_eq!(options.debounce, Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_run_server_fails_fast_on_missing_root() {
        let dir = tempfile::tempdir().unwrap();
        let config = ServerConfig {
            port: 0,
            watch_root: dir.path().join("missing"),
            static_dir: dir.path().to_path_buf(),
            ..ServerConfig::default()
        };

        let err = run_server(config).await.unwrap_err();

        assert!(matches!(err, ServerError::Watch(_)));
    }

    #[tokio::test]
    async fn test_run_server_rejects_bad_address() {
        let config = ServerConfig {
            host: "not a host".to_owned(),
            live_reload_enabled: false,
            ..ServerConfig::default()
        };

        let err = run_server(config).await.unwrap_err();

        assert!(matches!(err, ServerError::Address { .. }));
        assert!(err.to_string().contains("not a host"));
    }
}
