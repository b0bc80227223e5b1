//! Minimal configuration loading for autopatch.
//!
//! Everything here seeds the daemon at startup. Command-line flags win over
//! anything loaded from disk or the environment.
//!
//! # Config File Locations
//!
//! Files are loaded in order (later wins):
//! 1. `/etc/autopatch/config.toml` (system)
//! 2. `~/.config/autopatch/config.toml` (user)
//! 3. `./autopatch.toml` (local override, replaced by `--config FILE`)
//! 4. Environment variables (`AUTOPATCH_*`)
//!
//! # Example Config
//!
//! ```toml
//! [session]
//! client_name = "autopatch"
//! connect_interval = 3.0
//! max_attempts = 0
//! poll_interval_ms = 1000
//!
//! [matching]
//! pattern_file = "~/.config/autopatch/patterns"
//! exact = false
//!
//! [logging]
//! level = "info"
//! ```

pub mod loader;

pub use loader::{discover_config_files, discover_config_files_with_override, expand_path, ConfigSources};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Default client name registered with the graph server.
pub const DEFAULT_CLIENT_NAME: &str = "autopatch";

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

/// Graph client session and reconnect policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Name to register with the graph server.
    /// Default: autopatch
    #[serde(default = "SessionConfig::default_client_name")]
    pub client_name: String,

    /// Seconds to wait between connection attempts.
    /// Default: 3.0
    #[serde(default = "SessionConfig::default_connect_interval")]
    pub connect_interval: f64,

    /// Connection attempts before giving up, 0 retries forever.
    /// Default: 0
    #[serde(default)]
    pub max_attempts: u32,

    /// Upper bound on how long the connection queue waits for work before
    /// re-checking for cancellation.
    /// Default: 1000
    #[serde(default = "SessionConfig::default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl SessionConfig {
    fn default_client_name() -> String {
        DEFAULT_CLIENT_NAME.to_string()
    }

    fn default_connect_interval() -> f64 {
        3.0
    }

    fn default_poll_interval_ms() -> u64 {
        1000
    }

    pub fn connect_interval(&self) -> Duration {
        Duration::try_from_secs_f64(self.connect_interval).unwrap_or(Duration::ZERO)
    }

    /// Never zero; a zero wait would busy-loop the session.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            client_name: Self::default_client_name(),
            connect_interval: Self::default_connect_interval(),
            max_attempts: 0,
            poll_interval_ms: Self::default_poll_interval_ms(),
        }
    }
}

/// Pattern source and matching mode.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MatchingConfig {
    /// File holding pattern pairs, re-read on the reload trigger.
    #[serde(default)]
    pub pattern_file: Option<PathBuf>,

    /// Treat patterns as literal names unless written as `/regex/`.
    #[serde(default)]
    pub exact: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    /// Default: info
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".to_string()
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
        }
    }
}

/// Complete autopatch configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AutopatchConfig {
    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub matching: MatchingConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AutopatchConfig {
    /// Load configuration from all standard sources.
    pub fn load() -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(None)?;
        Ok(config)
    }

    /// Load configuration, letting `config_path` replace `./autopatch.toml`.
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(config_path)?;
        Ok(config)
    }

    /// Load configuration from optional path and return information about sources.
    pub fn load_with_sources_from(
        config_path: Option<&Path>,
    ) -> Result<(Self, ConfigSources), ConfigError> {
        let mut sources = ConfigSources::default();
        let mut config = AutopatchConfig::default();

        for path in loader::discover_config_files_with_override(config_path) {
            loader::apply_file(&mut config, &path)?;
            sources.files.push(path);
        }

        loader::apply_env_overrides(&mut config, &mut sources);

        Ok((config, sources))
    }

    /// Serialize config to TOML string.
    pub fn to_toml(&self) -> String {
        let mut output = String::new();

        output.push_str("# autopatch configuration\n\n");

        output.push_str("[session]\n");
        output.push_str(&format!("client_name = \"{}\"\n", self.session.client_name));
        output.push_str(&format!(
            "connect_interval = {:?}\n",
            self.session.connect_interval
        ));
        output.push_str(&format!("max_attempts = {}\n", self.session.max_attempts));
        output.push_str(&format!(
            "poll_interval_ms = {}\n",
            self.session.poll_interval_ms
        ));

        output.push_str("\n[matching]\n");
        if let Some(ref path) = self.matching.pattern_file {
            output.push_str(&format!("pattern_file = \"{}\"\n", path.display()));
        }
        output.push_str(&format!("exact = {}\n", self.matching.exact));

        output.push_str("\n[logging]\n");
        output.push_str(&format!("level = \"{}\"\n", self.logging.level));

        output
    }
}
