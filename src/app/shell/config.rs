//! Configuration for shell sessions

use std::path::PathBuf;
use std::time::Duration;

use crate::constants::shell;

/// Runtime settings for one shell session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Total budget for the synchronization handshake
    pub init_timeout: Duration,
    /// Deadline for a single command to return to the prompt
    pub command_timeout: Duration,
    /// Command run after the clean shell starts, e.g. `sudo -iu app`
    pub elevate_command: Option<String>,
    /// Switch the terminal to raw mode for the file sink protocol
    pub raw: bool,
    /// Directory receiving one transcript file per session
    pub transcript_dir: Option<PathBuf>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            init_timeout: shell::DEFAULT_INIT_TIMEOUT,
            command_timeout: shell::DEFAULT_COMMAND_TIMEOUT,
            elevate_command: None,
            raw: false,
            transcript_dir: None,
        }
    }
}

impl SessionConfig {
    /// Same settings with raw sink mode switched on
    pub fn raw(&self) -> Self {
        Self {
            raw: true,
            ..self.clone()
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.init_timeout < shell::INITIAL_SYNC_TIMEOUT * 2 {
            return Err(format!(
                "init timeout must be at least {:?}",
                shell::INITIAL_SYNC_TIMEOUT * 2
            ));
        }
        if self.command_timeout.is_zero() {
            return Err("command timeout must be greater than 0".to_string());
        }
        if let Some(cmd) = &self.elevate_command {
            if cmd.trim().is_empty() {
                return Err("elevate command cannot be blank".to_string());
            }
        }
        Ok(())
    }
}
