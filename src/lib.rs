//! Dump Fetcher Library
//!
//! A Rust library for copying time-windowed profiler dump files from a
//! remote host over SSH. Only the parts of the date partitioned dump tree
//! that can hold data from the window are listed, and files are copied in
//! parallel over SFTP or the scp sink protocol.

pub mod app;
pub mod auth;
pub mod cli;
pub mod config;
pub mod constants;
pub mod errors;

// Re-export commonly used types for convenience
pub use errors::{AppError, Result};
