//! Error types for Dump Fetcher
//!
//! This module defines the error types for every component of the remote
//! synchronization engine. The split follows the failure taxonomy of a run:
//! shell protocol failures, remote filesystem failures, transfer failures,
//! and the configuration/credential errors raised before any connection
//! is made.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the interactive shell protocol
#[derive(Error, Debug)]
pub enum ShellError {
    /// The synchronization handshake never saw its label within the init budget
    #[error("Cannot initialize shell: no response to sync label after {seconds} seconds")]
    InitTimeout { seconds: u64 },

    /// A command did not return to the prompt within its deadline
    #[error("Shell command timed out after {seconds} seconds: {command}")]
    CommandTimeout { command: String, seconds: u64 },

    /// The channel reported end of stream in the middle of a read
    #[error("Unexpected end of shell input stream")]
    UnexpectedEof,

    /// Transport-level I/O failure
    #[error("Shell I/O error")]
    Io(#[from] std::io::Error),

    /// A command wrote to standard error; its effect must be treated as not applied
    #[error("Remote command failed: {message}")]
    Command { message: String },

    /// The file sink stream did not follow the expected framing
    #[error("File sink protocol violation: {reason}")]
    Protocol { reason: String },

    /// The remote sender reported a failure through a non-zero acknowledgement
    #[error("Remote sender error: {message}")]
    Remote { message: String },
}

/// Errors raised by the remote file manager and the crawl built on it
#[derive(Error, Debug)]
pub enum RemoteError {
    /// Underlying shell failure
    #[error(transparent)]
    Shell(#[from] ShellError),

    /// A listing row did not match the pinned long-format layout
    #[error("Unparseable listing line: {line:?}")]
    ListingParse { line: String },

    /// The remote listing tool does not honour the pinned flags
    #[error("Remote listing tool is not supported: {reason}")]
    UnsupportedListing { reason: String },

    /// A path that must exist was not found
    #[error("Remote path does not exist: {path}")]
    NotFound { path: String },

    /// A directory name that must be numeric was not
    #[error("Non-numeric date bucket name: {name}")]
    InvalidBucketName { name: String },

    /// Unexpected output from a remote query
    #[error("Unexpected remote output for {query}: {output:?}")]
    UnexpectedOutput { query: String, output: String },

    /// Local filesystem failure while comparing existing files
    #[error("Local I/O error")]
    Io(#[from] std::io::Error),
}

/// Errors raised while establishing connections or moving files
#[derive(Error, Debug)]
pub enum TransferError {
    /// Connection could not be established
    #[error("Failed to connect to {host}: {reason}")]
    Connect { host: String, reason: String },

    /// Authentication was rejected by every configured method
    #[error("Authentication failed for {user}@{host}: {reason}")]
    Authentication {
        user: String,
        host: String,
        reason: String,
    },

    /// Host key differs from the one recorded in known_hosts
    #[error("Host key for {host} does not match {known_hosts}")]
    HostKeyMismatch { host: String, known_hosts: PathBuf },

    /// libssh2 failure
    #[error("SSH error")]
    Ssh(#[from] ssh2::Error),

    /// Shell session failure on a sink connection
    #[error(transparent)]
    Shell(#[from] ShellError),

    /// Local filesystem failure
    #[error("Local file I/O error")]
    Io(#[from] std::io::Error),

    /// A pooled worker thread or connection went away
    #[error("Transfer pool unavailable: {reason}")]
    PoolUnavailable { reason: String },

    /// Invalid engine options
    #[error("Invalid transfer configuration: {0}")]
    Configuration(String),
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file could not be read or written
    #[error("Configuration file I/O error: {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Config file is not valid TOML for this schema
    #[error("Invalid configuration format in {path}: {reason}")]
    InvalidFormat { path: PathBuf, reason: String },

    /// Explicitly requested config file is missing
    #[error("Specified config file not found: {path}")]
    NotFound { path: PathBuf },

    /// Config directory cannot be determined
    #[error("Could not determine user config directory")]
    NoConfigDir,

    /// A value is out of range
    #[error("Invalid value for {field}: {value} ({reason})")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    /// A time instant or window could not be parsed
    #[error("Invalid time {input:?}: {reason}")]
    InvalidTime { input: String, reason: String },
}

/// Credential errors
#[derive(Error, Debug)]
pub enum AuthError {
    /// No password available and prompting is impossible
    #[error("No password supplied. Use --password, set DUMP_FETCHER_PASSWORD, or run interactively")]
    MissingCredentials,

    /// Interactive prompt failed
    #[error("Failed to read password")]
    Prompt(#[from] std::io::Error),

    /// Empty user name
    #[error("Invalid user name: {reason}")]
    InvalidUser { reason: String },
}

/// Top-level application error that can represent any error type
#[derive(Error, Debug)]
pub enum AppError {
    /// Shell protocol error
    #[error(transparent)]
    Shell(#[from] ShellError),

    /// Remote filesystem or crawl error
    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// Connection or transfer error
    #[error(transparent)]
    Transfer(#[from] TransferError),

    /// Configuration error
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Credential error
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// Generic I/O error
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Generic application error with context
    #[error("{message}")]
    Generic { message: String },
}

impl AppError {
    /// Create a generic application error with a message
    pub fn generic(message: impl Into<String>) -> Self {
        Self::Generic {
            message: message.into(),
        }
    }

    /// Check if the error is non-fatal to a run
    ///
    /// Remote command errors and per-file sink errors leave the session
    /// usable; everything else ends the run.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            AppError::Shell(ShellError::Command { .. })
                | AppError::Shell(ShellError::Remote { .. })
                | AppError::Remote(RemoteError::Shell(ShellError::Command { .. }))
                | AppError::Transfer(TransferError::Shell(ShellError::Remote { .. }))
        )
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            AppError::Shell(_) => "shell",
            AppError::Remote(_) => "remote",
            AppError::Transfer(_) => "transfer",
            AppError::Config(_) => "config",
            AppError::Auth(_) => "authentication",
            AppError::Io(_) => "io",
            AppError::Generic { .. } => "generic",
        }
    }
}

impl ShellError {
    /// Whether the session stream can no longer be trusted after this error
    pub fn desynchronizes(&self) -> bool {
        !matches!(self, ShellError::Command { .. } | ShellError::Remote { .. })
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, AppError>;

/// Shell result type alias
pub type ShellResult<T> = std::result::Result<T, ShellError>;

/// Remote filesystem result type alias
pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

/// Transfer result type alias
pub type TransferResult<T> = std::result::Result<T, TransferError>;

/// Configuration result type alias
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Authentication result type alias
pub type AuthResult<T> = std::result::Result<T, AuthError>;
