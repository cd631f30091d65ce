/// Configuration module for the Media Gallery launcher.
///
/// This module provides functionality for:
/// - Default ports, timeouts and retry policy for the supervisor
/// - Loading overrides from a `launcher.json` file
/// - Applying command-line overrides (port, media folder, console)
/// - Determining the platform-specific config directory
///
/// The file lives in the platform config directory
/// (%APPDATA%/MediaGallery/config/ on Windows). Nothing is written back;
/// the launcher keeps no state across runs.
///
/// # Example
///
/// ```rust,no_run
/// use media_gallery_core::config::load_config;
///
/// let mut config = load_config();
/// config.apply_args(["8443", "/srv/photos"]);
/// assert_eq!(config.port, 8443);
/// ```
use crate::cleanup::RetryPolicy;
use crate::error::ConfigError;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 8987;
pub const HEADLESS_TOKEN: &str = "nobrowser";
const CONFIG_FILE_NAME: &str = "launcher.json";

/// Launcher configuration
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct LauncherConfig {
    /// Port handed to the service on first start
    pub port: u16,
    /// Folder served on first start (None = current directory)
    pub media_directory: Option<PathBuf>,
    /// Token appended to the service arguments so it never opens a browser itself
    pub headless_token: String,
    /// Show the service's console window instead of hiding it
    pub show_console: bool,
    pub graceful_stop_timeout_ms: u64,
    pub health_poll_interval_ms: u64,
    /// Delay before the browser is opened after a (re)start
    pub launch_delay_ms: u64,
    pub cleanup_attempts: u32,
    pub cleanup_retry_delay_ms: u64,
    /// Pause after the child exits before the first delete attempt
    pub cleanup_settle_delay_ms: u64,
    /// Ports offered by the "Change Port…" picker
    pub port_presets: Vec<u16>,
    /// Prefix of the per-run staging directory under the OS temp dir
    pub staging_prefix: String,
}

impl Default for LauncherConfig {
    fn default() -> Self {
        LauncherConfig {
            port: DEFAULT_PORT,
            media_directory: None,
            headless_token: HEADLESS_TOKEN.to_string(),
            show_console: false,
            graceful_stop_timeout_ms: 5_000,
            health_poll_interval_ms: 1_000,
            launch_delay_ms: 1_500,
            cleanup_attempts: 5,
            cleanup_retry_delay_ms: 200,
            cleanup_settle_delay_ms: 1_000,
            port_presets: vec![8987, 8443, 8080, 9443],
            staging_prefix: "MediaGallery_".to_string(),
        }
    }
}

impl LauncherConfig {
    pub fn graceful_stop_timeout(&self) -> Duration {
        Duration::from_millis(self.graceful_stop_timeout_ms)
    }

    pub fn health_poll_interval(&self) -> Duration {
        Duration::from_millis(self.health_poll_interval_ms)
    }

    pub fn launch_delay(&self) -> Duration {
        Duration::from_millis(self.launch_delay_ms)
    }

    pub fn cleanup_settle_delay(&self) -> Duration {
        Duration::from_millis(self.cleanup_settle_delay_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.cleanup_attempts,
            Duration::from_millis(self.cleanup_retry_delay_ms),
        )
    }

    /// Media directory to serve, falling back to the working directory
    pub fn resolve_media_directory(&self) -> PathBuf {
        self.media_directory
            .clone()
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Apply `[port] [media_directory] [--show-console]` overrides.
    /// Unparseable ports are ignored with a warning.
    pub fn apply_args<I, S>(&mut self, args: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut positional = 0;
        for arg in args {
            let arg = arg.as_ref();
            if arg == "--show-console" {
                self.show_console = true;
                continue;
            }
            match positional {
                0 => match parse_port(arg) {
                    Ok(port) => self.port = port,
                    Err(e) => tracing::warn!("Ignoring port argument {:?}: {}", arg, e),
                },
                1 => self.media_directory = Some(PathBuf::from(arg)),
                _ => tracing::warn!("Ignoring extra argument {:?}", arg),
            }
            positional += 1;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::Invalid {
                field: "port",
                reason: "must be between 1 and 65535".to_string(),
            });
        }
        if self.cleanup_attempts == 0 {
            return Err(ConfigError::Invalid {
                field: "cleanup_attempts",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.health_poll_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "health_poll_interval_ms",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.port_presets.iter().any(|p| *p == 0) {
            return Err(ConfigError::Invalid {
                field: "port_presets",
                reason: "ports must be between 1 and 65535".to_string(),
            });
        }
        if self.staging_prefix.contains(['/', '\\']) {
            return Err(ConfigError::Invalid {
                field: "staging_prefix",
                reason: "must not contain path separators".to_string(),
            });
        }
        Ok(())
    }
}

/// Parse a port argument, rejecting 0 and anything above 65535
pub fn parse_port(text: &str) -> Result<u16, ConfigError> {
    let value: u32 = text.trim().parse().map_err(|_| ConfigError::Invalid {
        field: "port",
        reason: format!("{:?} is not a number", text),
    })?;
    match u16::try_from(value) {
        Ok(port) if port != 0 => Ok(port),
        _ => Err(ConfigError::Invalid {
            field: "port",
            reason: format!("{} is outside 1-65535", value),
        }),
    }
}

/// Get the launcher's config directory
/// Returns %APPDATA%/MediaGallery/config/ on Windows
pub fn get_config_directory() -> Result<PathBuf, ConfigError> {
    let project_dirs =
        ProjectDirs::from("", "", "MediaGallery").ok_or(ConfigError::NoConfigDirectory)?;
    Ok(project_dirs.config_dir().to_path_buf())
}

/// Read and validate a config file
pub fn load_config_from(path: &Path) -> Result<LauncherConfig, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let config: LauncherConfig =
        serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
    config.validate()?;
    Ok(config)
}

/// Load launcher configuration from launcher.json
/// Returns default config if the file doesn't exist or is invalid
pub fn load_config() -> LauncherConfig {
    let Ok(config_dir) = get_config_directory() else {
        tracing::warn!("No config directory available, using defaults");
        return LauncherConfig::default();
    };

    let config_path = config_dir.join(CONFIG_FILE_NAME);
    if !config_path.exists() {
        return LauncherConfig::default();
    }

    match load_config_from(&config_path) {
        Ok(config) => {
            tracing::info!("Loaded launcher config from {:?}", config_path);
            config
        }
        Err(e) => {
            tracing::warn!("{}; using defaults", e);
            LauncherConfig::default()
        }
    }
}
