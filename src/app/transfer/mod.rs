//! Parallel file transfer
//!
//! Copies the files chosen by the crawl over a pool of connections using
//! either SFTP or the `scp -f` sink protocol, and reports progress through
//! a shared [`Progress`] handle.

pub mod config;
pub mod engine;
pub mod progress;
pub mod types;


pub use config::TransferConfig;
pub use engine::TransferEngine;
pub use progress::{Progress, ProgressSnapshot};
pub use types::{Strategy, TransferFailure, TransferTask};
