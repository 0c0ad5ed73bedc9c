//! Command-line interface components
//!
//! This module contains CLI-specific code for Dump Fetcher, including
//! argument parsing, progress display, and the command handlers.

pub mod args;
pub mod commands;
pub mod progress;

pub use args::{
    Cli, Commands, ConfigAction, ConfigArgs, ConnectionArgs, DownloadArgs, GlobalArgs, RootsArgs,
};
pub use commands::{handle_config, handle_download, handle_roots};
pub use progress::{ProgressConfig, ProgressDisplay, SpeedReport};
