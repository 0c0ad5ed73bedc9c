//! Command-line argument parsing for Dump Fetcher
//!
//! This module defines the CLI structure using clap derive macros:
//! downloading a time window of dump files, discovering dump roots on a
//! host, and managing the configuration file.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::app::transfer::Strategy;

/// Dump Fetcher - Download profiler dump files over SSH
#[derive(Parser, Debug)]
#[command(
    name = "dump_fetcher",
    version,
    about = "Download a time window of profiler dump files from a remote host",
    long_about = "Copies the profiler dump files written during a time window from a remote host over SSH.
Only the parts of the date partitioned dump tree that can hold data from the window are listed,
and files are copied in parallel over SFTP or the scp sink protocol."
)]
pub struct Cli {
    /// Global options
    #[command(flatten)]
    pub global: GlobalArgs,

    /// Subcommands
    #[command(subcommand)]
    pub command: Commands,
}

/// Global arguments available to all subcommands
#[derive(Args, Debug)]
pub struct GlobalArgs {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Very verbose logging (debug level)
    #[arg(long, global = true)]
    pub very_verbose: bool,

    /// Quiet mode - suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Configuration file path
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Download the dump files of a time window
    Download(DownloadArgs),

    /// List dump roots of the collector agents running on a host
    Roots(RootsArgs),

    /// Manage the configuration file
    Config(ConfigArgs),
}

/// Where to connect and how to log in
#[derive(Args, Debug, Clone)]
pub struct ConnectionArgs {
    /// Remote host name or address
    #[arg(long)]
    pub host: String,

    /// SSH port
    #[arg(long)]
    pub port: Option<u16>,

    /// Login user
    #[arg(short, long)]
    pub user: Option<String>,

    /// Login password (prefer the DUMP_FETCHER_PASSWORD variable)
    #[arg(long)]
    pub password: Option<String>,

    /// Prompt for the password when none is supplied
    #[arg(long)]
    pub ask_password: bool,

    /// Private key file
    #[arg(long, value_name = "FILE")]
    pub identity: Option<PathBuf>,

    /// Command switching to the application user after login, e.g. "sudo -iu app"
    #[arg(long, value_name = "COMMAND")]
    pub elevate: Option<String>,
}

/// Arguments for the download command
#[derive(Args, Debug, Clone)]
pub struct DownloadArgs {
    #[command(flatten)]
    pub connection: ConnectionArgs,

    /// Number of parallel connections
    #[arg(short = 'p', long = "parallel")]
    pub parallel_degree: Option<usize>,

    /// Transfer protocol: sftp or sink
    #[arg(long)]
    pub protocol: Option<Strategy>,

    /// Window start: "YYYY-MM-DD[ HH:MM[:SS]]", epoch millis, or a duration before the end like "2h"
    #[arg(short, long, default_value = "1h")]
    pub start_date: String,

    /// Window end in the same formats; open ended when omitted
    #[arg(short, long)]
    pub end_date: Option<String>,

    /// UTC offset of the remote dates, e.g. +03:00; queried from the host when omitted
    #[arg(long)]
    pub time_zone: Option<String>,

    /// Only download these servers (repeatable)
    #[arg(long = "server", value_name = "NAME")]
    pub servers: Vec<String>,

    /// Remote dump root; discovered from running agents when omitted
    #[arg(short = 'r', long, value_name = "PATH")]
    pub dump_root: Option<String>,

    /// Local output folder; defaults to dump_<start>_<end>
    #[arg(short, long, value_name = "DIR")]
    pub output: Option<PathBuf>,

    /// Leave out trace, xml and sql folders
    #[arg(long)]
    pub skip_details: bool,

    /// Only report what would be downloaded
    #[arg(long)]
    pub dry_run: bool,

    /// List the whole dump root with one recursive listing first
    #[arg(long)]
    pub preload: bool,
}

/// Arguments for the roots command
#[derive(Args, Debug, Clone)]
pub struct RootsArgs {
    #[command(flatten)]
    pub connection: ConnectionArgs,
}

/// Arguments for configuration management
#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

/// Configuration actions
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Write the default configuration file
    Init {
        /// Target file instead of the user config directory
        #[arg(long, value_name = "FILE")]
        path: Option<PathBuf>,
    },

    /// Print the effective configuration
    Show,
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Get the logging level based on global arguments
    pub fn log_level(&self) -> tracing::Level {
        if self.global.quiet {
            tracing::Level::ERROR
        } else if self.global.very_verbose {
            tracing::Level::DEBUG
        } else if self.global.verbose {
            tracing::Level::INFO
        } else {
            tracing::Level::WARN
        }
    }
}

impl DownloadArgs {
    /// Reject contradictory options
    pub fn validate(&self) -> Result<(), String> {
        if self.parallel_degree == Some(0) {
            return Err("Parallel degree must be greater than 0".to_string());
        }
        if self.connection.elevate.is_some() && self.protocol == Some(Strategy::Sftp) {
            return Err("--elevate requires the sink protocol".to_string());
        }
        Ok(())
    }

    /// Protocol to use: explicit choice, sink when elevating, else configured
    pub fn strategy(&self, configured: Strategy) -> Strategy {
        match (self.protocol, &self.connection.elevate) {
            (Some(strategy), _) => strategy,
            (None, Some(_)) => Strategy::Sink,
            (None, None) => configured,
        }
    }

    /// Server filter, `None` when every server is wanted
    pub fn server_filter(&self) -> Option<Vec<String>> {
        if self.servers.is_empty() {
            None
        } else {
            Some(self.servers.clone())
        }
    }
}
