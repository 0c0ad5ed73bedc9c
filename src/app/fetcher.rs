//! Top-level download session against one host
//!
//! A [`DumpFetcher`] owns one shell session for listings and remote
//! queries, plus a [`TransferEngine`] with its own pool of connections for
//! the file copies.

use std::sync::Arc;

use chrono::FixedOffset;
use tracing::{debug, info, warn};

use crate::app::crawl::{parse_offset, CrawlRequest, CrawlStats, Crawler};
use crate::app::remote::RemoteFileManager;
use crate::app::shell::{RemoteShell, SessionConfig, ShellSession};
use crate::app::ssh::Connector;
use crate::app::transfer::{Progress, TransferConfig, TransferEngine, TransferTask};
use crate::app::watchdog::Watchdog;
use crate::constants::{discovery, listing};
use crate::errors::{self, RemoteError, RemoteResult, TransferResult};

/// Listing manager over a shell opened by `C`
pub type ListingManager<C> = RemoteFileManager<ShellSession<<C as Connector>::Shell>>;

/// Open only the listing shell and check the remote `ls`
///
/// The shell is closed again when the check fails.
pub fn open_listing<C: Connector>(
    connector: &C,
    session: SessionConfig,
    watchdog: Watchdog,
) -> errors::Result<ListingManager<C>> {
    let channel = connector.open_shell()?;
    let shell = ShellSession::connect(channel, session, watchdog)?;
    let manager = RemoteFileManager::new(shell);
    if let Err(e) = manager.probe_listing() {
        close_manager(&manager);
        return Err(e.into());
    }
    Ok(manager)
}

/// UTC offset the remote host uses for its dates
pub fn server_offset<S: RemoteShell>(manager: &RemoteFileManager<S>) -> RemoteResult<FixedOffset> {
    let output = manager.execute(listing::TIMEZONE_COMMAND, true)?;
    let offset = parse_offset(output.trim()).map_err(|_| RemoteError::UnexpectedOutput {
        query: listing::TIMEZONE_COMMAND.to_string(),
        output: output.clone(),
    })?;
    debug!("Server UTC offset is {}", offset);
    Ok(offset)
}

/// Dump roots of the collector agents running on the host
pub fn find_dump_roots<S: RemoteShell>(manager: &RemoteFileManager<S>) -> RemoteResult<Vec<String>> {
    let output = manager.execute(discovery::FIND_DUMP_ROOTS, false)?;
    let roots: Vec<String> = output
        .lines()
        .map(str::trim)
        .filter(|line| line.starts_with('/'))
        .map(str::to_string)
        .collect();
    info!("Found {} dump root(s)", roots.len());
    Ok(roots)
}

/// Connected listing session plus transfer pool
pub struct DumpFetcher<C: Connector + 'static> {
    manager: ListingManager<C>,
    engine: TransferEngine<C>,
    host: String,
}

impl<C: Connector + 'static> DumpFetcher<C> {
    /// Open the listing shell, check the remote `ls`, then open the pool
    ///
    /// Transfer settings are validated before anything is opened.
    pub fn connect(
        connector: Arc<C>,
        session: SessionConfig,
        transfer: TransferConfig,
        watchdog: Watchdog,
    ) -> errors::Result<Self> {
        transfer.validate()?;
        let host = connector.host().to_string();

        let manager = open_listing(connector.as_ref(), session, watchdog.clone())?;

        let engine = match TransferEngine::connect(connector, transfer, watchdog) {
            Ok(engine) => engine,
            Err(e) => {
                close_manager(&manager);
                return Err(e.into());
            }
        };

        info!("Connected to {}", host);
        Ok(Self {
            manager,
            engine,
            host,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Listing manager of this session
    pub fn manager(&self) -> &ListingManager<C> {
        &self.manager
    }

    pub fn parallel_degree(&self) -> usize {
        self.engine.parallel_degree()
    }

    /// UTC offset the remote host uses for its dates
    pub fn server_offset(&self) -> RemoteResult<FixedOffset> {
        server_offset(&self.manager)
    }

    /// Dump roots of the collector agents running on the host
    pub fn find_dump_roots(&self) -> RemoteResult<Vec<String>> {
        find_dump_roots(&self.manager)
    }

    /// Crawl the dump root named in `request`
    pub fn collect(&self, request: &CrawlRequest) -> RemoteResult<(Vec<TransferTask>, CrawlStats)> {
        info!("Collecting files in {} for {}", request.dump_root, request.window);
        let result = Crawler::new(&self.manager, request).collect();
        debug!("{} remote commands issued on {}", self.manager.commands_issued(), self.host);
        result
    }

    /// Start copying `tasks` in the background
    pub fn start(&mut self, tasks: Vec<TransferTask>) -> TransferResult<Arc<Progress>> {
        self.engine.transfer(tasks)
    }

    /// Close the listing shell and the transfer pool
    ///
    /// Waits for a started transfer to finish; cancel its progress first
    /// to stop early.
    pub fn close(mut self) {
        close_manager(&self.manager);
        self.engine.close();
    }
}

fn close_manager<S: RemoteShell>(manager: &RemoteFileManager<S>) {
    if let Err(e) = manager.close() {
        warn!("Error closing listing shell: {}", e);
    }
}
