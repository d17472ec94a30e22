//! Login manager configuration.
//!
//! Loaded from a TOML file (default `/etc/elm/elm.toml`). Every field has a
//! default, so a missing file or a partial file both work:
//!
//! ```toml
//! preview = false
//!
//! [paths]
//! xsessions_dir = "/usr/share/xsessions"
//!
//! [compositor]
//! repeat_count = 200
//! timeout_ms = 5000
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::exit::ElmExit;

/// Default location of the configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/elm/elm.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid config value: {0}")]
    Invalid(String),
}

impl ConfigError {
    pub fn exit_code(&self) -> ElmExit {
        ElmExit::InvalidOption
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ElmConfig {
    /// Skip starting a display server and reuse the current `DISPLAY`.
    pub preview: bool,
    pub paths: PathsConfig,
    pub commands: CommandsConfig,
    pub compositor: CompositorConfig,
    pub session: SessionConfig,
}

impl Default for ElmConfig {
    fn default() -> Self {
        Self {
            preview: false,
            paths: PathsConfig::default(),
            commands: CommandsConfig::default(),
            compositor: CompositorConfig::default(),
            session: SessionConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub xsessions_dir: PathBuf,
    pub log_file: PathBuf,
    pub xserver_log: PathBuf,
    pub xauth_file: PathBuf,
    pub run_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            xsessions_dir: PathBuf::from("/usr/share/xsessions"),
            log_file: PathBuf::from("/var/log/elm/elm.log"),
            xserver_log: PathBuf::from("/var/log/elm/Xorg.log"),
            xauth_file: PathBuf::from("/var/run/elm/elm.auth"),
            run_dir: PathBuf::from("/var/run/elm"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandsConfig {
    pub xserver: String,
    pub compositor: String,
    pub shutdown: String,
    pub reboot: String,
    /// Run once the compositor step finishes (cursor, wallpaper, xrdb...).
    pub setup: Vec<String>,
}

impl Default for CommandsConfig {
    fn default() -> Self {
        Self {
            xserver: "/usr/bin/Xorg".to_string(),
            compositor: "/usr/bin/xcompmgr".to_string(),
            shutdown: "/usr/bin/poweroff".to_string(),
            reboot: "/usr/bin/reboot".to_string(),
            setup: vec!["/usr/bin/xsetroot -cursor_name left_ptr".to_string()],
        }
    }
}

/// Compositor readiness wait policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompositorConfig {
    /// Identical trailing log lines required before the server counts as settled.
    pub repeat_count: u32,
    pub timeout_ms: u64,
    pub initial_poll_ms: u64,
    pub max_poll_ms: u64,
}

impl Default for CompositorConfig {
    fn default() -> Self {
        Self {
            repeat_count: 200,
            timeout_ms: 5000,
            initial_poll_ms: 5,
            max_poll_ms: 25,
        }
    }
}

impl CompositorConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn initial_poll(&self) -> Duration {
        Duration::from_millis(self.initial_poll_ms)
    }

    pub fn max_poll(&self) -> Duration {
        Duration::from_millis(self.max_poll_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Helper that validates credentials read from its stdin.
    pub auth_helper: String,
    /// Optional command prefixed to every session launch (e.g. a setuid
    /// wrapper that opens the OS session).
    pub launch_wrapper: Option<String>,
    pub logout_grace_ms: u64,
    /// How long the auth helper may take before it is stopped.
    pub auth_timeout_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            auth_helper: "/usr/lib/elm/elm-auth".to_string(),
            launch_wrapper: None,
            logout_grace_ms: 3000,
            auth_timeout_ms: 10_000,
        }
    }
}

impl SessionConfig {
    pub fn logout_grace(&self) -> Duration {
        Duration::from_millis(self.logout_grace_ms)
    }

    pub fn auth_timeout(&self) -> Duration {
        Duration::from_millis(self.auth_timeout_ms)
    }
}

impl ElmConfig {
    /// Load configuration from `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::info!("No config at {}, using defaults", path.display());
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        let config: ElmConfig = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let compositor = &self.compositor;
        if compositor.initial_poll_ms == 0 {
            return Err(ConfigError::Invalid(
                "compositor.initial_poll_ms must be positive".to_string(),
            ));
        }
        if compositor.max_poll_ms < compositor.initial_poll_ms {
            return Err(ConfigError::Invalid(
                "compositor.max_poll_ms must not be below initial_poll_ms".to_string(),
            ));
        }
        if self.commands.xserver.trim().is_empty() {
            return Err(ConfigError::Invalid("commands.xserver is empty".to_string()));
        }
        if self.session.auth_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "session.auth_timeout_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
