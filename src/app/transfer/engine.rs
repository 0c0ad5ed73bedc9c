//! Pooled parallel transfer engine
//!
//! Every connection of a run uses the same [`Strategy`]. Connections are
//! opened up front and parked in a bounded channel; each worker thread
//! takes one, copies a single file and hands it back, so a connection is
//! never used by two transfers at once.

use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use filetime::FileTime;
use tracing::{debug, info, warn};

use super::config::TransferConfig;
use super::progress::Progress;
use super::types::{Strategy, TransferFailure, TransferTask};
use crate::app::shell::ShellSession;
use crate::app::ssh::{Connector, SftpChannel};
use crate::app::watchdog::Watchdog;
use crate::constants::workers;
use crate::errors::{TransferError, TransferResult};

/// One pooled connection
enum Link<C: Connector> {
    Sftp(C::Sftp),
    Sink(ShellSession<C::Shell>),
}

impl<C: Connector> Link<C> {
    fn open(connector: &C, config: &TransferConfig, watchdog: &Watchdog) -> TransferResult<Self> {
        match config.strategy {
            Strategy::Sftp => Ok(Link::Sftp(connector.open_sftp()?)),
            Strategy::Sink => {
                let channel = connector.open_shell()?;
                let session = ShellSession::connect(channel, config.session.raw(), watchdog.clone())?;
                Ok(Link::Sink(session))
            }
        }
    }

    fn is_broken(&self) -> bool {
        match self {
            Link::Sftp(_) => false,
            Link::Sink(session) => session.is_broken(),
        }
    }

    /// Copy one file and return its byte count
    fn fetch(&mut self, task: &TransferTask) -> TransferResult<u64> {
        match self {
            Link::Sftp(sftp) => {
                let file = File::create(&task.local)?;
                let mut out = BufWriter::with_capacity(workers::COPY_BUFFER_SIZE, file);
                let bytes = sftp.fetch(task.remote.path(), &mut out)?;
                out.flush()?;
                Ok(bytes)
            }
            Link::Sink(session) => Ok(session.receive_file(task.remote.path(), &task.local)?),
        }
    }

    fn close(self) {
        if let Link::Sink(mut session) = self {
            if let Err(e) = session.close() {
                debug!("Error closing shell session: {}", e);
            }
        }
    }
}

/// Fixed set of connections shared by the workers
///
/// A slot holding `None` stands for a connection that broke and is
/// reopened by the next worker that takes it.
struct LinkPool<C: Connector> {
    connector: Arc<C>,
    config: TransferConfig,
    watchdog: Watchdog,
    slots: Sender<Option<Link<C>>>,
    ready: Receiver<Option<Link<C>>>,
}

impl<C: Connector> LinkPool<C> {
    fn acquire(&self) -> TransferResult<Link<C>> {
        let slot = self.ready.recv().map_err(|_| TransferError::PoolUnavailable {
            reason: "connection pool closed".to_string(),
        })?;
        match slot {
            Some(link) => Ok(link),
            None => {
                info!("Reopening connection to {}", self.connector.host());
                match Link::open(self.connector.as_ref(), &self.config, &self.watchdog) {
                    Ok(link) => Ok(link),
                    Err(e) => {
                        self.put(None);
                        Err(e)
                    }
                }
            }
        }
    }

    fn release(&self, link: Link<C>) {
        if link.is_broken() {
            warn!("Dropping broken connection to {}", self.connector.host());
            link.close();
            self.put(None);
        } else {
            self.put(Some(link));
        }
    }

    fn put(&self, slot: Option<Link<C>>) {
        if let Err(e) = self.slots.try_send(slot) {
            if let Some(link) = e.into_inner() {
                link.close();
            }
        }
    }

    fn drain(&self) {
        while let Ok(slot) = self.ready.try_recv() {
            if let Some(link) = slot {
                link.close();
            }
        }
    }
}

/// Parallel downloader over a pool of pre-opened connections
pub struct TransferEngine<C: Connector + 'static> {
    pool: Arc<LinkPool<C>>,
    parallel_degree: usize,
    workers: Vec<JoinHandle<()>>,
    active: Option<Arc<Progress>>,
}

impl<C: Connector + 'static> TransferEngine<C> {
    /// Open `parallel_degree` connections concurrently
    ///
    /// Fails as a whole if any single connection fails; connections that
    /// did open are closed again.
    pub fn connect(connector: Arc<C>, config: TransferConfig, watchdog: Watchdog) -> TransferResult<Self> {
        config.validate()?;
        let degree = config.parallel_degree;
        info!(
            "Opening {} {} connection(s) to {}",
            degree,
            config.strategy,
            connector.host()
        );

        let results: Vec<TransferResult<Link<C>>> = thread::scope(|scope| {
            let handles: Vec<_> = (0..degree)
                .map(|_| scope.spawn(|| Link::open(connector.as_ref(), &config, &watchdog)))
                .collect();
            handles
                .into_iter()
                .map(|handle| {
                    handle.join().unwrap_or_else(|_| {
                        Err(TransferError::PoolUnavailable {
                            reason: "connection thread panicked".to_string(),
                        })
                    })
                })
                .collect()
        });

        let mut links = Vec::with_capacity(degree);
        let mut first_error = None;
        for result in results {
            match result {
                Ok(link) => links.push(link),
                Err(e) => {
                    warn!("Connection to {} failed: {}", connector.host(), e);
                    first_error.get_or_insert(e);
                }
            }
        }
        if let Some(e) = first_error {
            links.into_iter().for_each(Link::close);
            return Err(e);
        }

        let (slots, ready) = bounded(degree);
        for link in links {
            slots
                .try_send(Some(link))
                .map_err(|_| TransferError::PoolUnavailable {
                    reason: "connection pool overflow".to_string(),
                })?;
        }

        Ok(Self {
            pool: Arc::new(LinkPool {
                connector,
                config,
                watchdog,
                slots,
                ready,
            }),
            parallel_degree: degree,
            workers: Vec::new(),
            active: None,
        })
    }

    pub fn parallel_degree(&self) -> usize {
        self.parallel_degree
    }

    /// Start copying `tasks` and return the shared progress handle
    ///
    /// Totals come from the remote sizes already known from listings.
    /// Local parent directories are created before any worker starts.
    pub fn transfer(&mut self, tasks: Vec<TransferTask>) -> TransferResult<Arc<Progress>> {
        self.join_workers();

        let bytes_total: u64 = tasks.iter().map(TransferTask::size).sum();
        let progress = Arc::new(Progress::new(tasks.len(), bytes_total));
        info!(
            "Transferring {} files ({} bytes) over {} connection(s)",
            tasks.len(),
            bytes_total,
            self.parallel_degree
        );

        let mut created = HashSet::new();
        for task in &tasks {
            if let Some(parent) = task.local.parent() {
                if created.insert(parent.to_path_buf()) {
                    fs::create_dir_all(parent)?;
                }
            }
        }

        let (jobs, queue) = unbounded();
        for task in tasks {
            let _ = jobs.send(task);
        }
        drop(jobs);

        for index in 0..self.parallel_degree {
            let pool = Arc::clone(&self.pool);
            let queue = queue.clone();
            let progress = Arc::clone(&progress);
            let handle = thread::Builder::new()
                .name(format!("transfer-{}", index))
                .spawn(move || {
                    for task in queue.iter() {
                        run_task(&pool, &task, &progress);
                    }
                    debug!("Transfer worker {} finished", index);
                })?;
            self.workers.push(handle);
        }

        self.active = Some(Arc::clone(&progress));
        Ok(progress)
    }

    /// Wait for workers and close every pooled connection
    pub fn close(&mut self) {
        self.join_workers();
        self.pool.drain();
    }

    fn join_workers(&mut self) {
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                warn!("A transfer worker panicked");
            }
        }
        self.active = None;
    }
}

impl<C: Connector + 'static> Drop for TransferEngine<C> {
    fn drop(&mut self) {
        if let Some(progress) = &self.active {
            if !progress.is_completed() {
                progress.cancel();
            }
        }
        self.close();
    }
}

fn run_task<C: Connector>(pool: &LinkPool<C>, task: &TransferTask, progress: &Progress) {
    if progress.is_cancelled() {
        debug!("Cancelled before start: {}", task.remote.path());
        progress.file_skipped();
        return;
    }

    let mut link = match pool.acquire() {
        Ok(link) => link,
        Err(e) => {
            fail(task, progress, e);
            return;
        }
    };

    let result = link.fetch(task).and_then(|bytes| {
        set_modified(&task.local, task.modified_millis())?;
        Ok(bytes)
    });
    pool.release(link);

    match result {
        Ok(bytes) => {
            debug!("Transferred {} ({} bytes)", task.remote.path(), bytes);
            progress.file_done(bytes);
        }
        Err(e) => {
            if let Err(remove) = fs::remove_file(&task.local) {
                if remove.kind() != io::ErrorKind::NotFound {
                    debug!("Could not remove partial {}: {}", task.local.display(), remove);
                }
            }
            fail(task, progress, e);
        }
    }
}

fn fail(task: &TransferTask, progress: &Progress, error: TransferError) {
    warn!("Failed to transfer {}: {}", task.remote.path(), error);
    progress.file_failed(TransferFailure {
        remote: task.remote.path().to_string(),
        local: task.local.clone(),
        error: error.to_string(),
    });
}

fn set_modified(local: &Path, millis: i64) -> TransferResult<()> {
    let mtime = FileTime::from_unix_time(
        millis.div_euclid(1000),
        (millis.rem_euclid(1000) * 1_000_000) as u32,
    );
    filetime::set_file_mtime(local, mtime)?;
    Ok(())
}
