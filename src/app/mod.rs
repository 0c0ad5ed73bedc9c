//! Core application logic for Dump Fetcher
//!
//! This module contains the shell protocol, the remote file manager, the
//! time-windowed crawl, the parallel transfer engine and the SSH transport
//! they run over.
//!
//! # Examples
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use dump_fetcher::app::crawl::{now_millis, TimeWindow};
//! use dump_fetcher::app::ssh::{SshConnector, SshSettings};
//! use dump_fetcher::app::{CrawlRequest, DumpFetcher, SessionConfig, TransferConfig, Watchdog};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let connector = Arc::new(SshConnector::new(SshSettings::new("app-host", "deploy")));
//! let mut fetcher = DumpFetcher::connect(
//!     connector,
//!     SessionConfig::default(),
//!     TransferConfig::default().with_parallel_degree(4),
//!     Watchdog::new(),
//! )?;
//!
//! let offset = fetcher.server_offset()?;
//! let window = TimeWindow::new(now_millis() - 3_600_000, None, offset)?;
//! let request = CrawlRequest::new(window, "/opt/app/dump", "./dump");
//!
//! let (tasks, _stats) = fetcher.collect(&request)?;
//! let progress = fetcher.start(tasks)?;
//! progress.wait();
//! println!("{} files copied", progress.files_done());
//! fetcher.close();
//! # Ok(())
//! # }
//! ```

pub mod crawl;
pub mod fetcher;
pub mod remote;
pub mod shell;
pub mod ssh;
pub mod transfer;
pub mod watchdog;


// Re-export main public API
pub use crawl::{CrawlRequest, CrawlStats, TimeWindow};
pub use fetcher::{find_dump_roots, open_listing, DumpFetcher, ListingManager};
pub use remote::{RemoteFile, RemoteFileManager};
pub use shell::{SessionConfig, ShellSession};
pub use ssh::{Connector, SshConnector, SshSettings};
pub use transfer::{Progress, ProgressSnapshot, Strategy, TransferConfig, TransferEngine, TransferTask};
pub use watchdog::{Deadline, Watchdog};
