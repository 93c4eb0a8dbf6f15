//! `trailhead serve` command implementation.

use std::path::PathBuf;

use clap::Args;
use trailhead_config::{CliSettings, Config};
use trailhead_server::{run_server, server_config_from_config};

use crate::error::CliError;
use crate::output::Output;

/// Arguments for the serve command.
#[derive(Args)]
pub(crate) struct ServeArgs {
    /// Path to configuration file (default: auto-discover trailhead.toml).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory to watch for changes (overrides config).
    #[arg(short, long, env = "TRAILHEAD_ROOT")]
    root: Option<PathBuf>,

    /// Directory holding index.html and assets/ (overrides config).
    #[arg(long)]
    static_dir: Option<PathBuf>,

    /// Host to bind to (overrides config).
    #[arg(long, env = "TRAILHEAD_HOST")]
    host: Option<String>,

    /// Port to bind to (overrides config).
    #[arg(short, long, env = "TRAILHEAD_PORT")]
    port: Option<u16>,

    /// Enable verbose output (info-level logs).
    #[arg(short, long)]
    pub verbose: bool,

    /// Enable live reload (default: enabled).
    #[arg(long)]
    live_reload: Option<bool>,

    /// Disable live reload.
    #[arg(long, conflicts_with = "live_reload")]
    no_live_reload: bool,
}

impl ServeArgs {
    /// Execute the serve command.
    pub(crate) async fn execute(self, version: &str) -> Result<(), CliError> {
        let output = Output::new();
        let config = Config::load(self.config.as_deref(), Some(&self.cli_settings()))?;

        output.highlight(&format!("Trailhead {version}"));
        output.info(&format!(
            "Serving on http://{}:{}",
            config.server.host, config.server.port
        ));
        output.info(&format!(
            "Static directory: {}",
            config.paths.static_dir.display()
        ));
        if let Some(path) = &config.config_path {
            output.info(&format!("Config: {}", path.display()));
        }

        if config.live_reload.enabled {
            output.info(&format!(
                "Live reload: watching {}",
                config.watch_resolved.root.display()
            ));
        } else {
            output.warning("Live reload: disabled");
        }

        run_server(server_config_from_config(&config)).await?;

        Ok(())
    }

    fn cli_settings(&self) -> CliSettings {
        CliSettings {
            host: self.host.clone(),
            port: self.port,
            watch_root: self.root.clone(),
            static_dir: self.static_dir.clone(),
            live_reload_enabled: self.resolve_live_reload_enabled(),
        }
    }

    /// Resolve `live_reload_enabled` from --live-reload/--no-live-reload flags.
    fn resolve_live_reload_enabled(&self) -> Option<bool> {
        self.no_live_reload.then_some(false).or(self.live_reload)
    }
}
