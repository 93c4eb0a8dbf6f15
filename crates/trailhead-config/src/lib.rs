//! Configuration management for Trailhead.
//!
//! Parses `trailhead.toml` with serde and discovers the file in the current
//! directory or any parent. CLI settings are applied during load via
//! [`CliSettings`].
//!
//! ## Environment Variable Expansion
//!
//! `server.host` supports `${VAR}` and `${VAR:-default}`.
//!
//! ## Paths
//!
//! `server.static_dir` and `watch.root` are resolved relative to the directory
//! containing the config file (or the current directory when no file exists).

mod expand;

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

/// Configuration filename to search for.
const CONFIG_FILENAME: &str = "trailhead.toml";

/// Largest accepted debounce window.
const MAX_DEBOUNCE_MS: u64 = 10_000;

/// CLI settings that override configuration file values.
///
/// Only `Some` values override the loaded config.
#[derive(Debug, Default)]
pub struct CliSettings {
    /// Override server host.
    pub host: Option<String>,
    /// Override server port.
    pub port: Option<u16>,
    /// Override the watched root directory.
    pub watch_root: Option<PathBuf>,
    /// Override the static asset directory.
    pub static_dir: Option<PathBuf>,
    /// Override live reload enabled flag.
    pub live_reload_enabled: Option<bool>,
}

/// Application configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP server configuration.
    pub server: ServerConfig,
    /// Filesystem watch configuration (paths as written in TOML).
    watch: WatchConfigRaw,
    /// Live reload broker configuration.
    pub live_reload: LiveReloadConfig,

    /// Resolved paths (set after loading).
    #[serde(skip)]
    pub paths: ResolvedPaths,
    /// Resolved watch configuration (set after loading).
    #[serde(skip)]
    pub watch_resolved: WatchConfig,
    /// Path to the config file (set after loading).
    #[serde(skip)]
    pub config_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self::default_with_base(Path::new("."))
    }
}

/// HTTP server configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server host address.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Static asset directory as written in TOML.
    static_dir: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_owned(),
            port: 8000,
            static_dir: None,
        }
    }
}

/// Paths resolved against the config directory.
#[derive(Debug, Default)]
pub struct ResolvedPaths {
    /// Directory holding `index.html` and `assets/`.
    pub static_dir: PathBuf,
}

/// Raw watch configuration as parsed from TOML.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct WatchConfigRaw {
    root: Option<String>,
    patterns: Option<Vec<String>>,
    ignore: Option<Vec<String>>,
    debounce_ms: Option<u64>,
}

/// Resolved watch configuration.
#[derive(Debug, Default)]
pub struct WatchConfig {
    /// Directory watched recursively.
    pub root: PathBuf,
    /// Glob patterns a changed path must match (`None`: every path).
    pub patterns: Option<Vec<String>>,
    /// Glob patterns to ignore (`None`: built-in ignore list).
    pub ignore: Option<Vec<String>>,
    /// Debounce window in milliseconds (0 disables debouncing).
    pub debounce_ms: u64,
}

impl WatchConfig {
    /// Debounce window as a [`Duration`].
    #[must_use]
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

/// Live reload broker configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LiveReloadConfig {
    /// Whether live reload is enabled.
    pub enabled: bool,
    /// Per-session outbound queue capacity.
    pub outbound_capacity: usize,
    /// Time allowed for a cooperative close before local teardown.
    pub close_timeout_ms: u64,
}

impl Default for LiveReloadConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            outbound_capacity: 64,
            close_timeout_ms: 2000,
        }
    }
}

impl LiveReloadConfig {
    /// Close timeout as a [`Duration`].
    #[must_use]
    pub fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File not found.
    #[error("Configuration file not found: {}", .0.display())]
    NotFound(PathBuf),
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// TOML parsing error.
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),
    /// Validation error.
    #[error("Configuration error: {0}")]
    Validation(String),
    /// Environment variable error during expansion.
    #[error("Environment variable error in {field}: {message}")]
    EnvVar {
        /// Config field path (e.g., "`server.host`").
        field: String,
        /// Error message (e.g., "${`TRAILHEAD_HOST`} not set").
        message: String,
    },
}

fn require_non_empty(value: &str, field: &str) -> Result<(), ConfigError> {
    if value.is_empty() {
        return Err(ConfigError::Validation(format!("{field} cannot be empty")));
    }
    Ok(())
}

impl Config {
    /// Load configuration from file with optional CLI settings.
    ///
    /// If `config_path` is provided, loads from that file. Otherwise searches
    /// for `trailhead.toml` in the current directory and its parents, falling
    /// back to defaults relative to the current directory.
    ///
    /// CLI settings are applied after path resolution and take precedence.
    ///
    /// # Errors
    ///
    /// Returns an error if an explicit `config_path` doesn't exist, parsing
    /// fails, or the resulting configuration is invalid.
    pub fn load(
        config_path: Option<&Path>,
        cli_settings: Option<&CliSettings>,
    ) -> Result<Self, ConfigError> {
        let mut config = if let Some(path) = config_path {
            if !path.exists() {
                return Err(ConfigError::NotFound(path.to_path_buf()));
            }
            Self::load_from_file(path)?
        } else if let Some(discovered) = Self::discover_config() {
            Self::load_from_file(&discovered)?
        } else {
            Self::default_with_cwd()
        };

        if let Some(settings) = cli_settings {
            config.apply_cli_settings(settings);
            config.validate()?;
        }

        Ok(config)
    }

    fn apply_cli_settings(&mut self, settings: &CliSettings) {
        if let Some(host) = &settings.host {
            self.server.host.clone_from(host);
        }
        if let Some(port) = settings.port {
            self.server.port = port;
        }
        if let Some(root) = &settings.watch_root {
            self.watch_resolved.root.clone_from(root);
        }
        if let Some(static_dir) = &settings.static_dir {
            self.paths.static_dir.clone_from(static_dir);
        }
        if let Some(enabled) = settings.live_reload_enabled {
            self.live_reload.enabled = enabled;
        }
    }

    fn discover_config() -> Option<PathBuf> {
        let mut current = std::env::current_dir().ok()?;
        loop {
            let candidate = current.join(CONFIG_FILENAME);
            if candidate.exists() {
                return Some(candidate);
            }
            if !current.pop() {
                return None;
            }
        }
    }

    fn default_with_cwd() -> Self {
        let cwd = std::env::current_dir().unwrap_or_default();
        Self::default_with_base(&cwd)
    }

    fn default_with_base(base: &Path) -> Self {
        let mut config = Self {
            server: ServerConfig::default(),
            watch: WatchConfigRaw::default(),
            live_reload: LiveReloadConfig::default(),
            paths: ResolvedPaths::default(),
            watch_resolved: WatchConfig::default(),
            config_path: None,
        };
        config.resolve_paths(base);
        config
    }

    fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Self = toml::from_str(&content)?;

        config.expand_env_vars()?;

        let config_dir = path.parent().unwrap_or(Path::new("."));
        config.resolve_paths(config_dir);
        config.config_path = Some(path.to_path_buf());

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Validation` describing the first invalid field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_non_empty(&self.server.host, "server.host")?;
        if self.server.port == 0 {
            return Err(ConfigError::Validation(
                "server.port cannot be 0".to_owned(),
            ));
        }

        if self.watch_resolved.debounce_ms > MAX_DEBOUNCE_MS {
            return Err(ConfigError::Validation(format!(
                "watch.debounce_ms cannot exceed {MAX_DEBOUNCE_MS}"
            )));
        }
        for pattern in self
            .watch_resolved
            .patterns
            .iter()
            .chain(self.watch_resolved.ignore.iter())
            .flatten()
        {
            require_non_empty(pattern, "watch pattern")?;
        }

        if self.live_reload.outbound_capacity == 0 {
            return Err(ConfigError::Validation(
                "live_reload.outbound_capacity must be greater than 0".to_owned(),
            ));
        }
        if self.live_reload.close_timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "live_reload.close_timeout_ms must be greater than 0".to_owned(),
            ));
        }

        Ok(())
    }

    fn expand_env_vars(&mut self) -> Result<(), ConfigError> {
        self.server.host = expand::expand_env(&self.server.host, "server.host")?;
        Ok(())
    }

    /// Resolve relative paths against `config_dir`.
    fn resolve_paths(&mut self, config_dir: &Path) {
        self.paths = ResolvedPaths {
            static_dir: config_dir.join(self.server.static_dir.as_deref().unwrap_or("static")),
        };
        self.watch_resolved = WatchConfig {
            root: config_dir.join(self.watch.root.as_deref().unwrap_or(".")),
            patterns: self.watch.patterns.clone(),
            ignore: self.watch.ignore.clone(),
            debounce_ms: self.watch.debounce_ms.unwrap_or(0),
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_config() {
        let config = Config::default_with_base(Path::new("/project"));

        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.paths.static_dir, PathBuf::from("/project/static"));
        assert_eq!(config.watch_resolved.root, PathBuf::from("/project/."));
        assert_eq!(config.watch_resolved.patterns, None);
        assert_eq!(config.watch_resolved.debounce_ms, 0);
        assert!(config.live_reload.enabled);
        assert_eq!(config.live_reload.outbound_capacity, 64);
        assert_eq!(config.live_reload.close_timeout(), Duration::from_secs(2));
    }

    #[test]
    fn test_parse_minimal_config() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8000);
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
[server]
host = "0.0.0.0"
port = 9000
static_dir = "web/dist"

[watch]
root = "src"
patterns = ["**/*.py"]
ignore = ["**/build/**"]
debounce_ms = 150

[live_reload]
enabled = false
outbound_capacity = 8
close_timeout_ms = 500
"#;
        let mut config: Config = toml::from_str(toml).unwrap();
        config.resolve_paths(Path::new("/project"));

        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.paths.static_dir, PathBuf::from("/project/web/dist"));
        assert_eq!(config.watch_resolved.root, PathBuf::from("/project/src"));
        assert_eq!(
            config.watch_resolved.patterns,
            Some(vec!["**/*.py".to_owned()])
        );
        assert_eq!(
            config.watch_resolved.ignore,
            Some(vec!["**/build/**".to_owned()])
        );
        assert_eq!(
            config.watch_resolved.debounce(),
            Duration::from_millis(150)
        );
        assert!(!config.live_reload.enabled);
        assert_eq!(config.live_reload.outbound_capacity, 8);
        assert_eq!(config.live_reload.close_timeout_ms, 500);
    }

    #[test]
    fn test_load_from_file_resolves_against_config_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILENAME);
        std::fs::write(&path, "[watch]\nroot = \"app\"\n").unwrap();

        let config = Config::load(Some(&path), None).unwrap();

        assert_eq!(config.watch_resolved.root, dir.path().join("app"));
        assert_eq!(config.paths.static_dir, dir.path().join("static"));
        assert_eq!(config.config_path, Some(path));
    }

    #[test]
    fn test_load_missing_explicit_file() {
        let err = Config::load(Some(Path::new("/nonexistent/trailhead.toml")), None).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[test]
    fn test_load_invalid_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILENAME);
        std::fs::write(&path, "[server\nport = ").unwrap();

        let err = Config::load(Some(&path), None).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_apply_cli_settings() {
        let mut config = Config::default_with_base(Path::new("/project"));
        let overrides = CliSettings {
            host: Some("0.0.0.0".to_owned()),
            port: Some(9000),
            watch_root: Some(PathBuf::from("/elsewhere")),
            static_dir: Some(PathBuf::from("/assets")),
            live_reload_enabled: Some(false),
        };

        config.apply_cli_settings(&overrides);

        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.watch_resolved.root, PathBuf::from("/elsewhere"));
        assert_eq!(config.paths.static_dir, PathBuf::from("/assets"));
        assert!(!config.live_reload.enabled);
    }

    #[test]
    fn test_apply_cli_settings_empty() {
        let before = Config::default_with_base(Path::new("/project"));
        let mut config = Config::default_with_base(Path::new("/project"));

        config.apply_cli_settings(&CliSettings::default());

        assert_eq!(config.server.host, before.server.host);
        assert_eq!(config.server.port, before.server.port);
        assert_eq!(config.watch_resolved.root, before.watch_resolved.root);
    }

    #[test]
    fn test_expand_env_vars_server_host() {
        // SAFETY: test runs single-threaded per test function
        unsafe {
            std::env::set_var("TRAILHEAD_TEST_HOST", "0.0.0.0");
        }

        let mut config: Config = toml::from_str("[server]\nhost = \"${TRAILHEAD_TEST_HOST}\"\n").unwrap();
        config.expand_env_vars().unwrap();
        assert_eq!(config.server.host, "0.0.0.0");

        unsafe {
            std::env::remove_var("TRAILHEAD_TEST_HOST");
        }
    }

    /// Assert that validation fails with expected substrings in the message.
    fn assert_validation_error(config: &Config, expected: &[&str]) {
        let err = config.validate().unwrap_err();
        assert!(
            matches!(err, ConfigError::Validation(_)),
            "Expected ConfigError::Validation, got {err:?}"
        );
        let msg = err.to_string();
        for s in expected {
            assert!(msg.contains(s), "Expected error to contain '{s}', got: {msg}");
        }
    }

    #[test]
    fn test_validate_default_passes() {
        assert!(Config::default_with_base(Path::new("/project")).validate().is_ok());
    }

    #[test]
    fn test_validate_empty_host() {
        let mut config = Config::default_with_base(Path::new("/project"));
        config.server.host = String::new();
        assert_validation_error(&config, &["server.host", "empty"]);
    }

    #[test]
    fn test_validate_port_zero() {
        let mut config = Config::default_with_base(Path::new("/project"));
        config.server.port = 0;
        assert_validation_error(&config, &["server.port"]);
    }

    #[test]
    fn test_validate_debounce_too_large() {
        let mut config = Config::default_with_base(Path::new("/project"));
        config.watch_resolved.debounce_ms = 60_000;
        assert_validation_error(&config, &["debounce_ms", "10000"]);
    }

    #[test]
    fn test_validate_empty_pattern() {
        let mut config = Config::default_with_base(Path::new("/project"));
        config.watch_resolved.patterns = Some(vec![String::new()]);
        assert_validation_error(&config, &["pattern", "empty"]);
    }

    #[test]
    fn test_validate_zero_outbound_capacity() {
        let mut config = Config::default_with_base(Path::new("/project"));
        config.live_reload.outbound_capacity = 0;
        assert_validation_error(&config, &["outbound_capacity"]);
    }

    #[test]
    fn test_validate_zero_close_timeout() {
        let mut config = Config::default_with_base(Path::new("/project"));
        config.live_reload.close_timeout_ms = 0;
        assert_validation_error(&config, &["close_timeout_ms"]);
    }

    #[test]
    fn test_load_rejects_invalid_cli_port() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILENAME);
        std::fs::write(&path, "").unwrap();
        let overrides = CliSettings {
            port: Some(0),
            ..Default::default()
        };

        let err = Config::load(Some(&path), Some(&overrides)).unwrap_err();
        assert!(err.to_string().contains("server.port"));
    }
}
