//! Configuration management for Dump Fetcher
//!
//! This module provides TOML configuration with automatic first-run
//! initialization, a fixed search order and zero-config defaults. Each
//! section converts into the runtime settings of one component.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::app::shell::SessionConfig;
use crate::app::ssh::SshSettings;
use crate::app::transfer::{Strategy, TransferConfig};
use crate::constants::{logging, shell, ssh, workers};
use crate::errors::{ConfigError, ConfigResult};

/// File name looked up in the working directory
pub const LOCAL_CONFIG_FILE: &str = "dump-fetcher.toml";

/// Unified application configuration for TOML serialization
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    /// SSH connection settings
    pub connection: ConnectionConfigToml,
    /// Shell session settings
    pub shell: ShellConfigToml,
    /// Transfer engine settings
    pub transfer: TransferConfigToml,
    /// Crawl defaults
    pub crawl: CrawlConfigToml,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// TOML-friendly connection configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ConnectionConfigToml {
    /// SSH port
    pub port: u16,
    /// Default login user
    pub user: Option<String>,
    /// Private key tried after the agent
    pub identity: Option<PathBuf>,
    /// known_hosts file (defaults to ~/.ssh/known_hosts)
    pub known_hosts: Option<PathBuf>,
    /// TCP connect timeout in seconds
    pub connect_timeout_secs: u64,
}

impl Default for ConnectionConfigToml {
    fn default() -> Self {
        Self {
            port: ssh::DEFAULT_PORT,
            user: None,
            identity: None,
            known_hosts: None,
            connect_timeout_secs: ssh::CONNECT_TIMEOUT.as_secs(),
        }
    }
}

/// TOML-friendly shell configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ShellConfigToml {
    /// Handshake budget in seconds
    pub init_timeout_secs: u64,
    /// Per-command deadline in seconds
    pub command_timeout_secs: u64,
    /// Command that switches to the application user, e.g. "sudo -iu app"
    pub elevate_command: Option<String>,
    /// Directory for per-session transcripts
    pub transcript_dir: Option<PathBuf>,
}

impl Default for ShellConfigToml {
    fn default() -> Self {
        Self {
            init_timeout_secs: shell::DEFAULT_INIT_TIMEOUT.as_secs(),
            command_timeout_secs: shell::DEFAULT_COMMAND_TIMEOUT.as_secs(),
            elevate_command: None,
            transcript_dir: None,
        }
    }
}

/// TOML-friendly transfer configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TransferConfigToml {
    /// Pooled connections and worker threads
    pub parallel_degree: usize,
    /// Cap applied to the requested degree
    pub max_parallel_degree: usize,
    /// Wire protocol: "sftp" or "sink"
    pub protocol: Strategy,
}

impl Default for TransferConfigToml {
    fn default() -> Self {
        Self {
            parallel_degree: workers::DEFAULT_PARALLEL_DEGREE,
            max_parallel_degree: workers::MAX_PARALLEL_DEGREE,
            protocol: Strategy::default(),
        }
    }
}

/// TOML-friendly crawl defaults
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct CrawlConfigToml {
    /// Leave out trace, xml and sql folders
    pub skip_details: bool,
    /// List the whole dump root with one recursive listing first
    pub preload_tree: bool,
    /// Directory that receives the default dump_<start>_<end> folders
    pub output_root: Option<PathBuf>,
    /// UTC offset of the remote dates; queried from the host when unset
    pub time_zone: Option<String>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default log level for the application
    pub level: String,
    /// Enable colored output
    pub colored_output: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: logging::DEFAULT_LOG_LEVEL.to_string(),
            colored_output: true,
        }
    }
}

impl AppConfig {
    /// Convert TOML-friendly configuration to runtime configuration
    pub fn to_runtime_config(&self) -> (SessionConfig, TransferConfig) {
        let session = self.shell.to_runtime_config();
        let transfer = self.transfer.to_runtime_config(&session);
        (session, transfer)
    }

    /// Load configuration from the explicit file or the first file found
    ///
    /// Falls back to defaults when no file exists; an explicit file that is
    /// missing is an error.
    pub fn load(config_file_override: Option<&Path>) -> ConfigResult<Self> {
        let config_path = match config_file_override {
            Some(path) if !path.exists() => {
                return Err(ConfigError::NotFound {
                    path: path.to_path_buf(),
                })
            }
            Some(path) => Some(path.to_path_buf()),
            None => Self::find_config_file(),
        };

        match config_path {
            Some(path) => Self::load_from_file(&path),
            None => {
                debug!("No config file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Initialize configuration on first run
    ///
    /// Creates a default config file if none exists and returns its path
    /// together with whether it was just written.
    pub fn initialize_first_run() -> ConfigResult<(PathBuf, bool)> {
        let config_path = Self::default_config_path()?;
        Self::write_default_file(&config_path)
    }

    /// Write the commented default file unless `path` already exists
    pub fn write_default_file(path: &Path) -> ConfigResult<(PathBuf, bool)> {
        if path.exists() {
            return Ok((path.to_path_buf(), false));
        }

        info!("Creating default configuration file...");
        let io_error = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_error)?;
        }
        fs::write(path, Self::generate_default_config_content()).map_err(io_error)?;

        Ok((path.to_path_buf(), true))
    }

    /// Find configuration file in standard locations
    fn find_config_file() -> Option<PathBuf> {
        let mut search_paths = vec![PathBuf::from(LOCAL_CONFIG_FILE)];
        if let Ok(path) = Self::default_config_path() {
            search_paths.push(path);
        }

        let found = search_paths.into_iter().find(|path| path.exists());
        match &found {
            Some(path) => debug!("Found config file: {}", path.display()),
            None => debug!("No config file found in standard locations"),
        }
        found
    }

    /// Get the default config file path for the current user
    pub fn default_config_path() -> ConfigResult<PathBuf> {
        let config_dir = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
        Ok(config_dir.join("dump-fetcher").join("config.toml"))
    }

    /// Load configuration from a TOML file
    fn load_from_file(path: &Path) -> ConfigResult<Self> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let config: AppConfig = toml::from_str(&content).map_err(|e| ConfigError::InvalidFormat {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        info!("Loaded configuration from: {}", path.display());
        Ok(config)
    }

    /// Generate default configuration content with helpful comments
    fn generate_default_config_content() -> String {
        format!(
            r#"# Dump Fetcher Configuration
# This file was automatically generated on first run.
# Command line options override these settings.

[connection]
port = {}
# user = "deploy"
# identity = "~/.ssh/id_ed25519"
# known_hosts = "~/.ssh/known_hosts"
connect_timeout_secs = {}

[shell]
# Budget for the initial prompt synchronization
init_timeout_secs = {}
# Deadline for one remote command
command_timeout_secs = {}
# Switch user after login (sink protocol only)
# elevate_command = "sudo -iu app"
# Write one transcript per shell session into this directory
# transcript_dir = "/tmp/dump-fetcher-shells"

[transfer]
parallel_degree = {}
max_parallel_degree = {}
protocol = "sftp"  # sftp or sink

[crawl]
skip_details = false
preload_tree = false
# output_root = "/data/dumps"
# time_zone = "+03:00"  # queried from the host when unset

[logging]
level = "{}"  # error, warn, info, debug, trace
colored_output = true
"#,
            ssh::DEFAULT_PORT,
            ssh::CONNECT_TIMEOUT.as_secs(),
            shell::DEFAULT_INIT_TIMEOUT.as_secs(),
            shell::DEFAULT_COMMAND_TIMEOUT.as_secs(),
            workers::DEFAULT_PARALLEL_DEGREE,
            workers::MAX_PARALLEL_DEGREE,
            logging::DEFAULT_LOG_LEVEL,
        )
    }
}

impl ConnectionConfigToml {
    /// Build connection settings for `host` as `user`
    pub fn to_settings(&self, host: &str, user: &str) -> SshSettings {
        let settings = SshSettings::new(host, user)
            .with_port(self.port)
            .with_identity(self.identity.clone())
            .with_connect_timeout(Duration::from_secs(self.connect_timeout_secs));
        match &self.known_hosts {
            Some(path) => settings.with_known_hosts(Some(path.clone())),
            None => settings,
        }
    }
}

impl ShellConfigToml {
    /// Convert to runtime SessionConfig
    pub fn to_runtime_config(&self) -> SessionConfig {
        SessionConfig {
            init_timeout: Duration::from_secs(self.init_timeout_secs),
            command_timeout: Duration::from_secs(self.command_timeout_secs),
            elevate_command: self.elevate_command.clone(),
            raw: false,
            transcript_dir: self.transcript_dir.clone(),
        }
    }
}

impl TransferConfigToml {
    /// Convert to runtime TransferConfig sharing the shell settings
    pub fn to_runtime_config(&self, session: &SessionConfig) -> TransferConfig {
        TransferConfig {
            parallel_degree: self.parallel_degree,
            max_parallel_degree: self.max_parallel_degree,
            strategy: self.protocol,
            session: session.clone(),
        }
    }
}
